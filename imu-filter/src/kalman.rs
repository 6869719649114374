use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use thiserror::Error;

use crate::F;

pub const DEFAULT_PROCESS_NOISE: F = 0.1;
pub const DEFAULT_MEASUREMENT_NOISE: F = 1.0;

/// Variance of the initial state estimate, large enough that the first measurement dominates.
const INITIAL_COVARIANCE: F = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("innovation covariance is singular")]
    SingularInnovation,
}

/// Constant velocity Kalman filter over yaw, pitch and roll.
///
/// State is `[yaw, pitch, roll, d_yaw, d_pitch, d_roll]`, one time step per sample.
#[derive(Debug, Clone)]
pub struct KalmanFilter3D {
    state: Vector6<F>,
    covariance: Matrix6<F>,

    /// Q
    process_noise: Matrix6<F>,
    /// R
    measurement_noise: Matrix3<F>,
    /// F
    transition: Matrix6<F>,
    /// H
    observation: Matrix3x6<F>,
}

impl KalmanFilter3D {
    pub fn new(process_noise: F, measurement_noise: F) -> Self {
        let mut transition = Matrix6::identity();
        transition
            .fixed_view_mut::<3, 3>(0, 3)
            .fill_with_identity();

        let mut observation = Matrix3x6::zeros();
        observation
            .fixed_view_mut::<3, 3>(0, 0)
            .fill_with_identity();

        Self {
            state: Vector6::zeros(),
            covariance: Matrix6::identity() * INITIAL_COVARIANCE,
            process_noise: Matrix6::identity() * process_noise,
            measurement_noise: Matrix3::identity() * measurement_noise,
            transition,
            observation,
        }
    }

    pub fn predict(&mut self) {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
    }

    /// Folds a measurement into the estimate and returns the filtered angles.
    ///
    /// On error the state is left as it was after [`Self::predict`].
    pub fn update(&mut self, measurement: [F; 3]) -> Result<[F; 3], FilterError> {
        let measurement = Vector3::from(measurement);

        let innovation_covariance = self.observation * self.covariance * self.observation.transpose()
            + self.measurement_noise;
        let inverse = innovation_covariance
            .try_inverse()
            .ok_or(FilterError::SingularInnovation)?;
        let gain = self.covariance * self.observation.transpose() * inverse;

        let innovation = measurement - self.observation * self.state;
        self.state += gain * innovation;
        self.covariance = (Matrix6::identity() - gain * self.observation) * self.covariance;

        Ok(self.angles())
    }

    /// Current estimate of yaw, pitch and roll.
    pub fn angles(&self) -> [F; 3] {
        [self.state[0], self.state[1], self.state[2]]
    }

    /// Current estimate of the per-sample angle change.
    pub fn rates(&self) -> [F; 3] {
        [self.state[3], self.state[4], self.state[5]]
    }
}

impl Default for KalmanFilter3D {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(filter: &mut KalmanFilter3D, measurement: [F; 3]) -> [F; 3] {
        filter.predict();
        filter.update(measurement).unwrap()
    }

    #[test]
    fn first_update_trusts_measurement() {
        let mut filter = KalmanFilter3D::default();
        let [yaw, pitch, roll] = step(&mut filter, [10.0, -20.0, 30.0]);

        assert!((yaw - 10.0).abs() < 0.1);
        assert!((pitch + 20.0).abs() < 0.1);
        assert!((roll - 30.0).abs() < 0.1);
    }

    #[test]
    fn converges_to_constant_input() {
        let mut filter = KalmanFilter3D::default();
        for _ in 0..100 {
            step(&mut filter, [10.0, -20.0, 30.0]);
        }

        let [yaw, pitch, roll] = filter.angles();
        assert!((yaw - 10.0).abs() < 1e-2);
        assert!((pitch + 20.0).abs() < 1e-2);
        assert!((roll - 30.0).abs() < 1e-2);
        assert!(filter.rates().iter().all(|rate| rate.abs() < 1e-2));
    }

    #[test]
    fn smooths_a_step() {
        let mut filter = KalmanFilter3D::default();
        for _ in 0..50 {
            step(&mut filter, [0.0; 3]);
        }

        let [yaw, _, _] = step(&mut filter, [10.0; 3]);
        assert!(yaw > 1.0 && yaw < 9.0, "yaw = {yaw}");
    }

    #[test]
    fn predict_follows_velocity() {
        let mut filter = KalmanFilter3D::default();
        for i in 0..60 {
            step(&mut filter, [i as F, 0.0, 0.0]);
        }

        filter.predict();
        let [yaw, _, _] = filter.angles();
        assert!((yaw - 60.0).abs() < 0.5, "yaw = {yaw}");
    }
}
