#![no_std]

pub mod kalman;
pub mod pipeline;
pub mod unwrap;

use nalgebra::ComplexField;

pub use kalman::{FilterError, KalmanFilter3D};
pub use pipeline::{FilteredSample, OrientationFilter, wrap_degrees};
pub use unwrap::AngleUnwrapper;

pub type F = f32;

const DEG2RAD: F = core::f32::consts::PI / 180.0;

/// Unit vector the gimbal points at, from Euler angles in degrees. Roll does not move it.
pub fn euler_to_vector(yaw: F, pitch: F, _roll: F) -> [F; 3] {
    let yaw = yaw * DEG2RAD;
    let pitch = pitch * DEG2RAD;

    [
        ComplexField::cos(yaw) * ComplexField::cos(pitch),
        ComplexField::sin(yaw) * ComplexField::cos(pitch),
        ComplexField::sin(pitch),
    ]
}

#[test]
fn direction_vectors() {
    fn close(a: [F; 3], b: [F; 3]) -> bool {
        a.iter().zip(b).all(|(a, b)| (a - b).abs() < 1e-6)
    }

    assert!(close(euler_to_vector(0.0, 0.0, 0.0), [1.0, 0.0, 0.0]));
    assert!(close(euler_to_vector(90.0, 0.0, 45.0), [0.0, 1.0, 0.0]));
    assert!(close(euler_to_vector(0.0, 90.0, 0.0), [0.0, 0.0, 1.0]));
    assert!(close(euler_to_vector(180.0, -90.0, 0.0), [0.0, 0.0, -1.0]));
}
