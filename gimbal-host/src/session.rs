use gimbal_messages::Orientation;
use imu_filter::{FilteredSample, OrientationFilter};
use tracing::{info, warn};

use crate::trace::Trace;

/// Everything a gimbal tool knows about the orientation stream.
pub struct ImuSession {
    filter: OrientationFilter,
    filtering: bool,
    samples: u64,

    raw: Trace,
    filtered: Trace,
    /// Second IMU, drawn behind the gimbal trace.
    ghost: Trace,

    latest: Option<FilteredSample>,
    second_imu: Option<Orientation>,
}

impl ImuSession {
    /// With `filtering` off the filtered trace shows the unwrapped measurement.
    pub fn new(filtering: bool) -> Self {
        Self {
            filter: OrientationFilter::default(),
            filtering,
            samples: 0,
            raw: Trace::default(),
            filtered: Trace::default(),
            ghost: Trace::default(),
            latest: None,
            second_imu: None,
        }
    }

    pub fn ingest(&mut self, raw: Orientation) -> FilteredSample {
        let sample = match self.filter.advance(raw) {
            Ok(sample) if self.filtering => sample,
            Ok(sample) => FilteredSample {
                measured: sample.measured,
                filtered: sample.measured,
            },
            Err(error) => {
                warn!(%error, "filter update failed, showing raw sample");
                FilteredSample {
                    measured: raw,
                    filtered: raw,
                }
            }
        };

        self.raw.push(self.samples, sample.measured);
        self.filtered.push(self.samples, sample.filtered);
        self.samples += 1;
        self.latest = Some(sample);
        sample
    }

    pub fn ingest_second(&mut self, orientation: Orientation) {
        self.ghost.push(self.samples, orientation);
        self.second_imu = Some(orientation);
    }

    /// Called alongside the `ZERO` command, the device restarts its angles at zero.
    pub fn zero(&mut self) {
        info!("zeroing IMU");
        self.filter.reset();
    }

    pub fn reset_plot(&mut self) {
        self.raw.clear();
        self.filtered.clear();
        self.ghost.clear();
        self.filter.reset();
    }

    pub fn continuous_yaw(&self) -> bool {
        self.filter.continuous_yaw()
    }

    pub fn set_continuous_yaw(&mut self, continuous_yaw: bool) {
        self.filter.set_continuous_yaw(continuous_yaw);
    }

    pub fn filtering(&self) -> bool {
        self.filtering
    }

    pub fn set_filtering(&mut self, filtering: bool) {
        self.filtering = filtering;
    }

    pub fn raw(&self) -> &Trace {
        &self.raw
    }

    pub fn filtered(&self) -> &Trace {
        &self.filtered
    }

    pub fn ghost(&self) -> &Trace {
        &self.ghost
    }

    pub fn latest(&self) -> Option<FilteredSample> {
        self.latest
    }

    pub fn second_imu(&self) -> Option<Orientation> {
        self.second_imu
    }

    /// Number of gimbal samples seen since startup.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Unit vector of the current estimate.
    pub fn heading(&self) -> [f32; 3] {
        self.filter.heading()
    }

    /// Range that fits both the raw and the filtered trace.
    pub fn auto_range(&self) -> f32 {
        self.raw.auto_range().max(self.filtered.auto_range())
    }
}

impl Default for ImuSession {
    fn default() -> Self {
        Self::new(true)
    }
}
