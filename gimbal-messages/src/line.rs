use thiserror::Error;

use crate::Orientation;

const EULER_PREFIX: &str = "Euler:";
const SECOND_IMU_PREFIX: &str = "IMU2:";

/// One line of text received from the gimbal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorLine<'a> {
    /// Orientation of the gimbal IMU.
    Euler(Orientation),
    /// Orientation of the handheld IMU, used for the ghost trace and follow mode.
    SecondImu(Orientation),
    /// Anything else the firmware prints.
    Text(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("expected {expected} angle values, found {found}")]
    MissingValue { expected: usize, found: usize },
    #[error("expected ',' after angle value {0}")]
    MissingSeparator(usize),
    #[error("angle value {0} is not a number")]
    InvalidNumber(usize),
}

impl<'a> SensorLine<'a> {
    /// Parses a line with the trailing newline already removed.
    ///
    /// Number fields follow the firmware's `[0-9.-]+` format: whitespace is allowed after the
    /// prefix and after each comma, but not in front of a comma. Text after the third value is
    /// ignored.
    pub fn parse(line: &'a str) -> Result<Self, LineError> {
        let line = line.trim();

        if let Some(values) = line.strip_prefix(EULER_PREFIX) {
            return parse_triplet(values).map(|values| Self::Euler(values.into()));
        }
        if let Some(values) = line.strip_prefix(SECOND_IMU_PREFIX) {
            return parse_triplet(values).map(|values| Self::SecondImu(values.into()));
        }

        Ok(Self::Text(line))
    }
}

fn parse_triplet(mut rest: &str) -> Result<[f32; 3], LineError> {
    let mut values = [0.0; 3];

    for (i, value) in values.iter_mut().enumerate() {
        if i > 0 {
            rest = rest
                .strip_prefix(',')
                .ok_or(LineError::MissingSeparator(i - 1))?;
        }

        let trimmed = rest.trim_start();
        let end = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .unwrap_or(trimmed.len());
        if end == 0 {
            return Err(LineError::MissingValue {
                expected: 3,
                found: i,
            });
        }

        *value = trimmed[..end]
            .parse()
            .map_err(|_| LineError::InvalidNumber(i))?;
        rest = &trimmed[end..];
    }

    Ok(values)
}
