//! Firing profiles stored in the configuration document
//!
//! ```toml
//! [profile.bisque]
//! steps = [
//!     { type = "ramp", target = 600, rate = 100, name = "candle" },
//!     { type = "hold", target = 600, duration = 1800 },
//!     { type = "cooling" },
//! ]
//! ```

use crate::schedule::{Profile, ProfileError, ProfileStore, Step};

use super::toml::{inline_tables, items, parse_f32, parse_int, parse_str, table_pairs, Item, TomlErrorKind};

/// Profiles read on demand from a TOML document
pub struct TomlProfiles<'a> {
    doc: &'a str,
    sensor_min_c: f32,
    sensor_max_c: f32,
}

impl<'a> TomlProfiles<'a> {
    /// Profiles in `doc`, validated against the sensor range
    pub fn new(doc: &'a str, sensor_min_c: f32, sensor_max_c: f32) -> Self {
        Self {
            doc,
            sensor_min_c,
            sensor_max_c,
        }
    }

    fn find(&self, name: &str) -> Result<Profile, ProfileError> {
        let mut in_profile = false;
        let mut found = None;

        for item in items(self.doc) {
            let (line, item) = item.map_err(|e| ProfileError::Malformed { line: e.line })?;
            match item {
                Item::Section(section) => {
                    in_profile = section.strip_prefix("profile.") == Some(name);
                    if in_profile && found.is_none() {
                        found = Some(Profile::new(name)?);
                    }
                }
                Item::Pair { key, value } if in_profile => {
                    let Some(profile) = found.as_mut() else {
                        continue;
                    };
                    if key != "steps" {
                        return Err(ProfileError::Malformed { line });
                    }
                    parse_steps(profile, value, line)?;
                }
                Item::Pair { .. } => {}
            }
        }

        found.ok_or(ProfileError::NotFound)
    }
}

impl ProfileStore for TomlProfiles<'_> {
    fn load(&mut self, name: &str) -> Result<Profile, ProfileError> {
        let profile = self.find(name)?;
        profile.validate(self.sensor_min_c, self.sensor_max_c)?;
        Ok(profile)
    }
}

fn parse_steps(profile: &mut Profile, value: &str, line: u32) -> Result<(), ProfileError> {
    let malformed = |_: TomlErrorKind| ProfileError::Malformed { line };

    for table in inline_tables(value).map_err(malformed)? {
        let table = table.map_err(malformed)?;
        let (step, label) = parse_step(table, profile.len() as u8).map_err(|err| match err {
            StepError::Toml(_) => ProfileError::Malformed { line },
            StepError::Profile(err) => err,
        })?;
        profile.push(step, label)?;
    }
    Ok(())
}

enum StepError {
    Toml(TomlErrorKind),
    Profile(ProfileError),
}

impl From<TomlErrorKind> for StepError {
    fn from(err: TomlErrorKind) -> Self {
        StepError::Toml(err)
    }
}

fn parse_step(table: &str, index: u8) -> Result<(Step, Option<&str>), StepError> {
    let mut kind = None;
    let mut target = None;
    let mut rate = None;
    let mut min_rate = None;
    let mut duration = None;
    let mut label = None;

    for pair in table_pairs(table) {
        let (key, value) = pair?;
        match key {
            "type" => kind = Some(parse_str(value)?),
            "target" => target = Some(parse_f32(value)?),
            "rate" => rate = Some(parse_f32(value)?),
            "min_rate" => min_rate = Some(parse_f32(value)?),
            "duration" => duration = Some(parse_int::<u32>(value)?),
            "name" => label = Some(parse_str(value)?),
            _ => return Err(TomlErrorKind::UnknownKey.into()),
        }
    }

    let missing_target = StepError::Profile(ProfileError::InvalidTarget { step: index });
    let step = match kind.ok_or(TomlErrorKind::MissingKey)? {
        "ramp" => Step::Ramp {
            target: target.ok_or(missing_target)?,
            rate,
            min_rate,
        },
        "hold" => Step::Hold {
            target: target.ok_or(missing_target)?,
            duration_s: duration.ok_or(TomlErrorKind::MissingKey)?,
        },
        "cooling" => Step::Cooling {
            target,
            rate,
            min_rate,
        },
        _ => return Err(TomlErrorKind::InvalidValue.into()),
    };
    Ok((step, label))
}
