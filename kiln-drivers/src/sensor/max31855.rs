//! MAX31855 K-type thermocouple amplifier
//!
//! The chip streams a 32-bit frame on every chip-select, MSB first:
//!
//! | bits   | content                                         |
//! |--------|-------------------------------------------------|
//! | 31..18 | thermocouple temperature, signed, 0.25 °C/LSB   |
//! | 16     | fault (any of bits 2..0)                        |
//! | 15..4  | cold-junction temperature, signed, 0.0625 °C/LSB|
//! | 2      | short to VCC                                    |
//! | 1      | short to GND                                    |
//! | 0      | open circuit                                    |

use embedded_hal::spi::SpiDevice;
use kiln_core::traits::{SensorError, TemperatureSensor};

/// Thermocouple resolution (°C per LSB)
const THERMOCOUPLE_LSB_C: f32 = 0.25;

/// Cold-junction resolution (°C per LSB)
const INTERNAL_LSB_C: f32 = 0.0625;

const FAULT_BIT: u32 = 1 << 16;
const SCV_BIT: u32 = 1 << 2;
const SCG_BIT: u32 = 1 << 1;
const OC_BIT: u32 = 1 << 0;

/// One decoded conversion
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// Hot-junction temperature (°C)
    pub thermocouple_c: f32,
    /// Cold-junction (die) temperature (°C)
    pub internal_c: f32,
}

/// Sign-extend the low `bits` of `value`
fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Decode a raw frame
///
/// An all-zero frame means nothing answered on the bus (a live chip always
/// reports a non-zero die temperature indoors), so it is a bus error rather
/// than 0 °C.
pub fn decode(frame: u32) -> Result<Reading, SensorError> {
    if frame == 0 {
        return Err(SensorError::Bus);
    }

    if frame & FAULT_BIT != 0 {
        // Open circuit wins: a floating input can also trip the short bits
        return Err(if frame & OC_BIT != 0 {
            SensorError::OpenCircuit
        } else if frame & SCG_BIT != 0 {
            SensorError::ShortToGround
        } else if frame & SCV_BIT != 0 {
            SensorError::ShortToVcc
        } else {
            SensorError::Bus
        });
    }

    let thermocouple = sign_extend(frame >> 18, 14);
    let internal = sign_extend((frame >> 4) & 0x0FFF, 12);

    Ok(Reading {
        thermocouple_c: thermocouple as f32 * THERMOCOUPLE_LSB_C,
        internal_c: internal as f32 * INTERNAL_LSB_C,
    })
}

/// MAX31855 on an SPI bus
///
/// The device owns chip-select, so one read is one transaction.
pub struct Max31855<SPI> {
    spi: SPI,
    last: Option<Reading>,
}

impl<SPI: SpiDevice> Max31855<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi, last: None }
    }

    /// Clock out one frame and decode it
    pub fn read(&mut self) -> Result<Reading, SensorError> {
        let mut buf = [0u8; 4];
        self.spi.read(&mut buf).map_err(|_| SensorError::Bus)?;

        let reading = decode(u32::from_be_bytes(buf))?;
        self.last = Some(reading);
        Ok(reading)
    }

    /// Most recent good conversion
    pub fn last(&self) -> Option<Reading> {
        self.last
    }

    /// Give back the bus
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> TemperatureSensor for Max31855<SPI> {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        match self.read() {
            Ok(reading) => Ok(reading.thermocouple_c),
            Err(err) => {
                debug!("max31855: {}", err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::spi::{ErrorKind, ErrorType, Operation};

    /// SPI device that answers every read with a fixed frame
    struct MockSpi {
        frame: u32,
        fail: bool,
        transactions: usize,
    }

    impl MockSpi {
        fn new(frame: u32) -> Self {
            Self {
                frame,
                fail: false,
                transactions: 0,
            }
        }
    }

    impl ErrorType for MockSpi {
        type Error = ErrorKind;
    }

    impl SpiDevice for MockSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
            self.transactions += 1;
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for op in operations.iter_mut() {
                if let Operation::Read(buf) = op {
                    let bytes = self.frame.to_be_bytes();
                    for (dst, src) in buf.iter_mut().zip(bytes.iter()) {
                        *dst = *src;
                    }
                }
            }
            Ok(())
        }
    }

    /// Build a frame from raw counts
    fn frame(thermocouple: i32, internal: i32) -> u32 {
        (((thermocouple as u32) & 0x3FFF) << 18) | (((internal as u32) & 0x0FFF) << 4)
    }

    #[test]
    fn test_decode_positive() {
        // 1000.25 °C hot junction, 25.0 °C die
        let reading = decode(frame(4001, 400)).unwrap();
        assert_eq!(reading.thermocouple_c, 1000.25);
        assert_eq!(reading.internal_c, 25.0);
    }

    #[test]
    fn test_decode_negative() {
        let reading = decode(frame(-1, -16)).unwrap();
        assert_eq!(reading.thermocouple_c, -0.25);
        assert_eq!(reading.internal_c, -1.0);

        let reading = decode(frame(-1000, 400)).unwrap();
        assert_eq!(reading.thermocouple_c, -250.0);
    }

    #[test]
    fn test_decode_datasheet_frame() {
        // Datasheet table: +1600.00 °C reads 0x6400 in the upper 16 bits
        let reading = decode(0x6400_0000 | (400 << 4)).unwrap();
        assert_eq!(reading.thermocouple_c, 1600.0);
    }

    #[test]
    fn test_fault_bits() {
        let base = frame(100, 400) | FAULT_BIT;
        assert_eq!(decode(base | OC_BIT), Err(SensorError::OpenCircuit));
        assert_eq!(decode(base | SCG_BIT), Err(SensorError::ShortToGround));
        assert_eq!(decode(base | SCV_BIT), Err(SensorError::ShortToVcc));
        assert_eq!(decode(base | OC_BIT | SCG_BIT), Err(SensorError::OpenCircuit));
        assert_eq!(decode(base), Err(SensorError::Bus));
    }

    #[test]
    fn test_missing_device() {
        // MISO pulled high: every bit set, including fault and open circuit
        assert_eq!(decode(0xFFFF_FFFF), Err(SensorError::OpenCircuit));
        // MISO pulled low
        assert_eq!(decode(0), Err(SensorError::Bus));
    }

    #[test]
    fn test_sensor_trait_reads_hot_junction() {
        let mut sensor = Max31855::new(MockSpi::new(frame(3400, 480)));
        assert!(sensor.last().is_none());

        assert_eq!(sensor.read_celsius(), Ok(850.0));
        assert_eq!(sensor.last().map(|r| r.internal_c), Some(30.0));
        assert_eq!(sensor.release().transactions, 1);
    }

    #[test]
    fn test_bus_failure() {
        let mut spi = MockSpi::new(frame(100, 400));
        spi.fail = true;
        let mut sensor = Max31855::new(spi);
        assert_eq!(sensor.read_celsius(), Err(SensorError::Bus));
        assert!(sensor.last().is_none());
    }

    #[test]
    fn test_fault_keeps_last_good() {
        let mut sensor = Max31855::new(MockSpi::new(frame(400, 400)));
        assert_eq!(sensor.read_celsius(), Ok(100.0));

        sensor.spi.frame = frame(400, 400) | FAULT_BIT | OC_BIT;
        assert_eq!(sensor.read_celsius(), Err(SensorError::OpenCircuit));
        assert_eq!(sensor.last().map(|r| r.thermocouple_c), Some(100.0));
    }
}
