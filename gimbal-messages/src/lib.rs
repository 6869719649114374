#![no_std]

extern crate alloc;

mod command;
mod line;
mod stream;

pub use command::{GimbalCommand, Mode, ParseModeError};
pub use line::{LineError, SensorLine};
pub use stream::LineStreamDecoder;

/// Servo angle every axis returns to on `HOME`.
pub const HOME_ANGLE: u8 = 90;
/// Largest servo angle the gimbal firmware accepts.
pub const MAX_SERVO_ANGLE: u8 = 180;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 10.0;
pub const DEFAULT_SPEED: f32 = 2.0;

pub const DEFAULT_BAUD: u32 = 115_200;

/// Euler angles in degrees as reported by the gimbal IMU.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Orientation {
    pub const fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    pub const fn to_array(self) -> [f32; 3] {
        [self.yaw, self.pitch, self.roll]
    }
}

impl From<[f32; 3]> for Orientation {
    fn from([yaw, pitch, roll]: [f32; 3]) -> Self {
        Self { yaw, pitch, roll }
    }
}
