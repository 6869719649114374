use alloc::string::String;
use core::fmt::{self, Display};
use core::str::FromStr;

use thiserror::Error;

/// How the gimbal firmware picks its servo targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Firmware wanders between random targets.
    #[default]
    Random,
    /// Host sends explicit servo angles.
    Control,
    /// Host mirrors the second IMU onto the servos.
    Follow,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Random, Mode::Control, Mode::Follow];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Random => "RANDOM",
            Self::Control => "CONTROL",
            Self::Follow => "FOLLOW",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown mode, expected one of RANDOM, CONTROL, FOLLOW")]
pub struct ParseModeError;

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(ParseModeError)
    }
}

/// Commands understood by the gimbal firmware, one per line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GimbalCommand {
    Start,
    Stop,
    Zero,
    Home,
    SetMode(Mode),
    Speed(f32),
    Control([u8; 3]),
}

impl GimbalCommand {
    /// Wire representation including the line terminator.
    pub fn encode(&self) -> String {
        let mut line = alloc::format!("{self}");
        line.push('\n');
        line
    }
}

impl Display for GimbalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("START"),
            Self::Stop => f.write_str("STOP"),
            Self::Zero => f.write_str("ZERO"),
            Self::Home => f.write_str("HOME"),
            Self::SetMode(mode) => mode.fmt(f),
            // Debug keeps the decimal point on whole numbers ("2.0"), which the firmware expects.
            Self::Speed(speed) => write!(f, "SPEED,{speed:?}"),
            Self::Control([a, b, c]) => write!(f, "CONTROL,{a},{b},{c}"),
        }
    }
}

#[test]
fn wire_format() {
    assert_eq!(GimbalCommand::Start.encode(), "START\n");
    assert_eq!(GimbalCommand::Stop.encode(), "STOP\n");
    assert_eq!(GimbalCommand::Zero.encode(), "ZERO\n");
    assert_eq!(GimbalCommand::Home.encode(), "HOME\n");
    assert_eq!(GimbalCommand::SetMode(Mode::Follow).encode(), "FOLLOW\n");
    assert_eq!(GimbalCommand::Speed(2.0).encode(), "SPEED,2.0\n");
    assert_eq!(GimbalCommand::Speed(7.5).encode(), "SPEED,7.5\n");
    assert_eq!(
        GimbalCommand::Control([0, 90, 180]).encode(),
        "CONTROL,0,90,180\n"
    );
}

#[test]
fn mode_parsing() {
    assert_eq!("random".parse(), Ok(Mode::Random));
    assert_eq!(" CONTROL ".parse(), Ok(Mode::Control));
    assert_eq!("Follow".parse(), Ok(Mode::Follow));
    assert_eq!("HOME".parse::<Mode>(), Err(ParseModeError));
}
