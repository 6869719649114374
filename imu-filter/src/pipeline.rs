use gimbal_messages::Orientation;

use crate::{F, FilterError, KalmanFilter3D, unwrap::AngleUnwrapper};

/// Result of pushing one measurement through [`OrientationFilter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredSample {
    /// Measurement after yaw unwrapping.
    pub measured: Orientation,
    /// Kalman estimate.
    pub filtered: Orientation,
}

/// Yaw unwrapping followed by Kalman smoothing, one instance per IMU.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    continuous_yaw: bool,
    process_noise: F,
    measurement_noise: F,

    yaw_unwrapper: AngleUnwrapper,
    kalman: KalmanFilter3D,
}

impl OrientationFilter {
    pub fn new(continuous_yaw: bool, process_noise: F, measurement_noise: F) -> Self {
        Self {
            continuous_yaw,
            process_noise,
            measurement_noise,
            yaw_unwrapper: AngleUnwrapper::new(),
            kalman: KalmanFilter3D::new(process_noise, measurement_noise),
        }
    }

    pub fn advance(&mut self, raw: Orientation) -> Result<FilteredSample, FilterError> {
        let mut measured = raw;
        if self.continuous_yaw {
            measured.yaw = self.yaw_unwrapper.unwrap(raw.yaw);
        }

        self.kalman.predict();
        let filtered = self.kalman.update(measured.to_array())?;

        Ok(FilteredSample {
            measured,
            filtered: filtered.into(),
        })
    }

    /// Starts over from an empty estimate, used when the IMU is zeroed.
    pub fn reset(&mut self) {
        self.yaw_unwrapper.reset();
        self.kalman = KalmanFilter3D::new(self.process_noise, self.measurement_noise);
    }

    pub fn continuous_yaw(&self) -> bool {
        self.continuous_yaw
    }

    /// Switching yaw handling invalidates the history, so the filter is reset.
    pub fn set_continuous_yaw(&mut self, continuous_yaw: bool) {
        if self.continuous_yaw != continuous_yaw {
            self.continuous_yaw = continuous_yaw;
            self.reset();
        }
    }

    /// Direction the gimbal points at for the current estimate.
    pub fn heading(&self) -> [F; 3] {
        let [yaw, pitch, roll] = self.kalman.angles();
        let yaw = if self.continuous_yaw {
            wrap_degrees(yaw)
        } else {
            yaw
        };
        crate::euler_to_vector(yaw, pitch, roll)
    }
}

impl Default for OrientationFilter {
    fn default() -> Self {
        Self::new(
            true,
            crate::kalman::DEFAULT_PROCESS_NOISE,
            crate::kalman::DEFAULT_MEASUREMENT_NOISE,
        )
    }
}

/// Reduces an angle into `[0, 360)`.
pub fn wrap_degrees(angle: F) -> F {
    let wrapped = angle % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaw_is_unwrapped_before_filtering() {
        let mut filter = OrientationFilter::default();
        filter.advance(Orientation::new(350.0, 0.0, 0.0)).unwrap();
        let sample = filter.advance(Orientation::new(10.0, 0.0, 0.0)).unwrap();

        assert_eq!(sample.measured.yaw, 370.0);
        assert!(sample.filtered.yaw > 350.0);
    }

    #[test]
    fn raw_yaw_when_not_continuous() {
        let mut filter = OrientationFilter::new(false, 0.1, 1.0);
        filter.advance(Orientation::new(350.0, 0.0, 0.0)).unwrap();
        let sample = filter.advance(Orientation::new(10.0, 0.0, 0.0)).unwrap();

        assert_eq!(sample.measured.yaw, 10.0);
    }

    #[test]
    fn reset_starts_from_scratch() {
        let mut filter = OrientationFilter::default();
        for _ in 0..20 {
            filter.advance(Orientation::new(90.0, 10.0, 5.0)).unwrap();
        }

        filter.reset();
        let sample = filter.advance(Orientation::new(0.0, 0.0, 0.0)).unwrap();
        assert!(sample.filtered.yaw.abs() < 0.1);
    }

    #[test]
    fn heading_uses_wrapped_yaw() {
        let mut filter = OrientationFilter::default();
        for _ in 0..50 {
            filter.advance(Orientation::new(450.0, 0.0, 0.0)).unwrap();
        }

        let [x, y, z] = filter.heading();
        assert!(x.abs() < 1e-2);
        assert!((y - 1.0).abs() < 1e-2);
        assert!(z.abs() < 1e-2);
    }

    #[test]
    fn wrap_is_floored() {
        assert_eq!(wrap_degrees(370.0), 10.0);
        assert_eq!(wrap_degrees(-10.0), 350.0);
        assert_eq!(wrap_degrees(0.0), 0.0);
        assert_eq!(wrap_degrees(720.0), 0.0);
    }
}
