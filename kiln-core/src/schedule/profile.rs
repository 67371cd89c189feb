//! Firing profiles
//!
//! A profile is an immutable, ordered list of steps. It is loaded once per
//! run and owned by the firing controller until the run ends.

use heapless::Vec;
use kiln_protocol::{ProfileName, StepKind, StepName};

/// Maximum steps per profile
pub const MAX_STEPS: usize = 16;

/// One segment of a firing schedule
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Move to `target` at `rate` °C/h, or as fast as possible without a rate
    Ramp {
        target: f32,
        rate: Option<f32>,
        /// Slowest rate adaptation may fall to before the run fails
        min_rate: Option<f32>,
    },
    /// Stay at `target` for `duration_s` seconds
    Hold { target: f32, duration_s: u32 },
    /// Unpowered natural cooling, ending at `target` if given
    Cooling {
        target: Option<f32>,
        rate: Option<f32>,
        min_rate: Option<f32>,
    },
}

impl Step {
    /// Variant tag reported in status
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Ramp { .. } => StepKind::Ramp,
            Step::Hold { .. } => StepKind::Hold,
            Step::Cooling { .. } => StepKind::Cooling,
        }
    }

    /// Step end temperature, if it has one
    pub fn target(&self) -> Option<f32> {
        match *self {
            Step::Ramp { target, .. } | Step::Hold { target, .. } => Some(target),
            Step::Cooling { target, .. } => target,
        }
    }

    /// Desired rate (°C/h)
    pub fn rate(&self) -> Option<f32> {
        match *self {
            Step::Ramp { rate, .. } | Step::Cooling { rate, .. } => rate,
            Step::Hold { .. } => None,
        }
    }

    /// Minimum acceptable rate (°C/h)
    pub fn min_rate(&self) -> Option<f32> {
        match *self {
            Step::Ramp { min_rate, .. } | Step::Cooling { min_rate, .. } => min_rate,
            Step::Hold { .. } => None,
        }
    }

    /// Whether the step moves the kiln downward from `start_temp`
    pub fn is_descending(&self, start_temp: f32) -> bool {
        match *self {
            Step::Ramp { target, .. } => target < start_temp,
            Step::Hold { .. } => false,
            Step::Cooling { .. } => true,
        }
    }

    /// Time the step takes at its desired rate starting from `start_temp`
    ///
    /// `None` for steps whose length depends on the kiln (ramps without a
    /// rate and cooling).
    pub fn nominal_duration_s(&self, start_temp: f32) -> Option<f32> {
        match *self {
            Step::Ramp {
                target,
                rate: Some(rate),
                ..
            } if rate > 0.0 => Some(libm::fabsf(target - start_temp) / rate * 3600.0),
            Step::Ramp { target, .. } if target == start_temp => Some(0.0),
            Step::Hold { duration_s, .. } => Some(duration_s as f32),
            _ => None,
        }
    }

    fn default_label(&self) -> &'static str {
        match self {
            Step::Ramp { .. } => "ramp",
            Step::Hold { .. } => "hold",
            Step::Cooling { .. } => "cooling",
        }
    }
}

/// Profile loading and validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProfileError {
    /// No profile with that name
    NotFound,
    /// Profile text could not be parsed
    Malformed { line: u32 },
    /// Profile has no steps
    Empty,
    /// More steps than a profile can hold
    TooManySteps,
    /// Step target missing, not finite or outside sensor range
    InvalidTarget { step: u8 },
    /// Negative or non-finite rate or duration
    InvalidRate { step: u8 },
    /// Cooling without a target is only allowed as the last step
    OpenEndedCooling { step: u8 },
    /// Name or label longer than its buffer
    NameTooLong,
    /// Storage could not be read
    Unavailable,
}

impl core::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProfileError::NotFound => write!(f, "profile not found"),
            ProfileError::Malformed { line } => write!(f, "malformed profile at line {}", line),
            ProfileError::Empty => write!(f, "profile has no steps"),
            ProfileError::TooManySteps => write!(f, "more than {} steps", MAX_STEPS),
            ProfileError::InvalidTarget { step } => write!(f, "step {} has an invalid target", step),
            ProfileError::InvalidRate { step } => write!(f, "step {} has an invalid rate", step),
            ProfileError::OpenEndedCooling { step } => {
                write!(f, "step {} cools without a target but is not last", step)
            }
            ProfileError::NameTooLong => write!(f, "name too long"),
            ProfileError::Unavailable => write!(f, "profile storage unavailable"),
        }
    }
}

/// An ordered firing schedule
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    name: ProfileName,
    steps: Vec<Step, MAX_STEPS>,
    labels: Vec<StepName, MAX_STEPS>,
}

impl Profile {
    /// Create an empty profile
    pub fn new(name: &str) -> Result<Self, ProfileError> {
        Ok(Self {
            name: ProfileName::try_from(name).map_err(|_| ProfileError::NameTooLong)?,
            steps: Vec::new(),
            labels: Vec::new(),
        })
    }

    /// Append a step, labelled with `label` or its kind
    pub fn push(&mut self, step: Step, label: Option<&str>) -> Result<(), ProfileError> {
        let label = StepName::try_from(label.unwrap_or(step.default_label()))
            .map_err(|_| ProfileError::NameTooLong)?;
        self.steps.push(step).map_err(|_| ProfileError::TooManySteps)?;
        // Both vectors share a capacity, so this cannot fail after the push above
        let _ = self.labels.push(label);
        Ok(())
    }

    /// Builder form of [`Profile::push`] without a label
    pub fn with_step(mut self, step: Step) -> Result<Self, ProfileError> {
        self.push(step, None)?;
        Ok(self)
    }

    pub fn name(&self) -> &ProfileName {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn label(&self, index: usize) -> Option<&StepName> {
        self.labels.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the profile invariants against the sensor range
    pub fn validate(&self, sensor_min_c: f32, sensor_max_c: f32) -> Result<(), ProfileError> {
        if self.steps.is_empty() {
            return Err(ProfileError::Empty);
        }

        let in_range = |t: f32| t.is_finite() && t >= sensor_min_c && t <= sensor_max_c;
        let last = self.steps.len() - 1;

        for (i, step) in self.steps.iter().enumerate() {
            let index = i as u8;
            match *step {
                Step::Ramp { target, .. } | Step::Hold { target, .. } if !in_range(target) => {
                    return Err(ProfileError::InvalidTarget { step: index });
                }
                Step::Cooling {
                    target: Some(target),
                    ..
                } if !in_range(target) => {
                    return Err(ProfileError::InvalidTarget { step: index });
                }
                Step::Cooling { target: None, .. } if i != last => {
                    return Err(ProfileError::OpenEndedCooling { step: index });
                }
                _ => {}
            }

            let bad = |v: Option<f32>| v.is_some_and(|v| !v.is_finite() || v < 0.0);
            if bad(step.rate()) || bad(step.min_rate()) {
                return Err(ProfileError::InvalidRate { step: index });
            }
        }
        Ok(())
    }
}

/// Source of named profiles
pub trait ProfileStore {
    /// Load and validate the profile called `name`
    fn load(&mut self, name: &str) -> Result<Profile, ProfileError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(target: f32, rate: f32) -> Step {
        Step::Ramp {
            target,
            rate: Some(rate),
            min_rate: None,
        }
    }

    #[test]
    fn test_labels_default_to_kind() {
        let mut profile = Profile::new("bisque").unwrap();
        profile.push(ramp(600.0, 100.0), Some("candle")).unwrap();
        profile
            .push(
                Step::Hold {
                    target: 600.0,
                    duration_s: 600,
                },
                None,
            )
            .unwrap();

        assert_eq!(profile.label(0).unwrap().as_str(), "candle");
        assert_eq!(profile.label(1).unwrap().as_str(), "hold");
        assert_eq!(profile.len(), 2);
    }

    #[test]
    fn test_empty_profile_invalid() {
        let profile = Profile::new("nothing").unwrap();
        assert_eq!(profile.validate(0.0, 1300.0), Err(ProfileError::Empty));
    }

    #[test]
    fn test_target_outside_sensor_range() {
        let profile = Profile::new("hot").unwrap().with_step(ramp(1500.0, 100.0)).unwrap();
        assert_eq!(
            profile.validate(0.0, 1370.0),
            Err(ProfileError::InvalidTarget { step: 0 })
        );
    }

    #[test]
    fn test_nan_target_invalid() {
        let profile = Profile::new("nan")
            .unwrap()
            .with_step(Step::Hold {
                target: f32::NAN,
                duration_s: 10,
            })
            .unwrap();
        assert!(profile.validate(0.0, 1370.0).is_err());
    }

    #[test]
    fn test_open_cooling_must_be_last() {
        let open = Step::Cooling {
            target: None,
            rate: None,
            min_rate: None,
        };
        let profile = Profile::new("cool")
            .unwrap()
            .with_step(open)
            .unwrap()
            .with_step(ramp(100.0, 50.0))
            .unwrap();
        assert_eq!(
            profile.validate(0.0, 1370.0),
            Err(ProfileError::OpenEndedCooling { step: 0 })
        );

        let profile = Profile::new("cool")
            .unwrap()
            .with_step(ramp(100.0, 50.0))
            .unwrap()
            .with_step(open)
            .unwrap();
        assert_eq!(profile.validate(0.0, 1370.0), Ok(()));
    }

    #[test]
    fn test_negative_rate_invalid() {
        let profile = Profile::new("neg").unwrap().with_step(ramp(100.0, -5.0)).unwrap();
        assert_eq!(
            profile.validate(0.0, 1370.0),
            Err(ProfileError::InvalidRate { step: 0 })
        );
    }

    #[test]
    fn test_too_many_steps() {
        let mut profile = Profile::new("long").unwrap();
        for _ in 0..MAX_STEPS {
            profile.push(ramp(100.0, 100.0), None).unwrap();
        }
        assert_eq!(
            profile.push(ramp(100.0, 100.0), None),
            Err(ProfileError::TooManySteps)
        );
    }

    #[test]
    fn test_nominal_duration() {
        assert_eq!(ramp(100.0, 100.0).nominal_duration_s(20.0), Some(2880.0));
        assert_eq!(ramp(20.0, 100.0).nominal_duration_s(100.0), Some(2880.0));
        assert_eq!(
            Step::Hold {
                target: 100.0,
                duration_s: 600
            }
            .nominal_duration_s(100.0),
            Some(600.0)
        );
        let unrated = Step::Ramp {
            target: 100.0,
            rate: None,
            min_rate: None,
        };
        assert_eq!(unrated.nominal_duration_s(20.0), None);
    }

    #[test]
    fn test_descending() {
        assert!(ramp(100.0, 50.0).is_descending(500.0));
        assert!(!ramp(500.0, 50.0).is_descending(100.0));
        assert!(Step::Cooling {
            target: None,
            rate: None,
            min_rate: None
        }
        .is_descending(0.0));
    }
}
