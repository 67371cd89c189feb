//! Thermocouple and relay traits

/// Errors that can occur with temperature sensing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Thermocouple disconnected (open circuit)
    OpenCircuit,
    /// Thermocouple shorted to ground
    ShortToGround,
    /// Thermocouple shorted to supply
    ShortToVcc,
    /// Reading outside the plausible range
    OutOfRange,
    /// Bus transfer failed
    Bus,
    /// No conversion available yet
    NoReading,
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            SensorError::OpenCircuit => "thermocouple open circuit",
            SensorError::ShortToGround => "thermocouple shorted to ground",
            SensorError::ShortToVcc => "thermocouple shorted to supply",
            SensorError::OutOfRange => "reading out of range",
            SensorError::Bus => "sensor bus error",
            SensorError::NoReading => "no reading available",
        };
        f.write_str(text)
    }
}

/// Trait for the kiln thermocouple
///
/// Implementations handle the amplifier specifics (fault bits, cold junction).
pub trait TemperatureSensor {
    /// Read the hot-junction temperature in degrees Celsius
    ///
    /// Takes `&mut self` because a read is a bus transaction.
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

/// Errors reported by a relay output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RelayError {
    /// A relay pin could not be driven
    Pin,
    /// No relay pins were configured
    NoPins,
}

impl core::fmt::Display for RelayError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RelayError::Pin => f.write_str("relay pin write failed"),
            RelayError::NoPins => f.write_str("no relay pins configured"),
        }
    }
}

/// Time-proportional heating output
///
/// `set_output` only records the request; hardware changes happen in
/// `update`, which is called at a fixed sub-cycle cadence.
pub trait RelayOutput {
    /// Request a duty in percent; clamped to 0-100
    fn set_output(&mut self, percent: f32);

    /// Advance the switching cycle to `now_ms`
    fn update(&mut self, now_ms: u64) -> Result<(), RelayError>;

    /// Switch every pin off immediately, bypassing the stagger
    fn force_off(&mut self) -> Result<(), RelayError>;

    /// Duty locked for the current cycle
    fn output(&self) -> f32;

    /// Whether the relays are currently energized
    fn is_on(&self) -> bool;
}
