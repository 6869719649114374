use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::bus::Transport;
use crate::{Controller, DynamixelSettings};

/// Pause before moving on after a servo failed.
const FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Draws random velocities and dwell times within the configured bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomPlanner {
    min_percent: f32,
    max_percent: f32,
    max_units: i32,
    min_dwell: Duration,
    max_dwell: Duration,
}

impl RandomPlanner {
    pub fn new(settings: &DynamixelSettings) -> Self {
        let (min_dwell, max_dwell) = settings.random_durations();
        Self {
            min_percent: settings.random_min_speed_percent,
            max_percent: settings.random_max_speed_percent,
            max_units: settings.max_velocity_unit,
            min_dwell,
            max_dwell,
        }
    }

    /// Goal velocity in units with a random direction.
    pub fn velocity(&self, rng: &mut impl Rng) -> i32 {
        let percent = rng.gen_range(self.min_percent..=self.max_percent);
        let units = (percent / 100.0 * self.max_units as f32) as i32;
        let units = if rng.gen_bool(0.5) { units } else { -units };
        units.clamp(-self.max_units, self.max_units)
    }

    /// How long to keep the current velocities.
    pub fn dwell(&self, rng: &mut impl Rng) -> Duration {
        rng.gen_range(self.min_dwell..=self.max_dwell)
    }
}

/// Background thread that keeps changing servo velocities at random.
///
/// Stopping zeroes every servo and disables torque.
pub struct RandomMotion {
    stop: Sender<()>,
    worker: JoinHandle<()>,
}

impl RandomMotion {
    pub fn start<T: Transport + 'static>(controller: Controller<T>) -> Self {
        let planner = RandomPlanner::new(controller.settings());
        let (stop, rx_stop) = mpsc::channel();

        let worker = thread::spawn(move || random_motion(&controller, &planner, &rx_stop));
        info!("random movement started");

        Self { stop, worker }
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Interrupts the current dwell and waits for the cleanup to finish.
    pub fn stop(self) {
        // The worker may already be gone if it panicked, join reports that.
        let _ = self.stop.send(());
        if self.worker.join().is_err() {
            error!("random movement worker panicked");
        }
        info!("random movement stopped");
    }
}

fn random_motion<T: Transport>(
    controller: &Controller<T>,
    planner: &RandomPlanner,
    rx_stop: &Receiver<()>,
) {
    let mut rng = rand::thread_rng();

    'thread: loop {
        for &id in controller.servo_ids() {
            if stop_requested(rx_stop) {
                break 'thread;
            }

            let result = controller
                .enable_velocity_mode(id)
                .and_then(|()| controller.set_velocity(id, planner.velocity(&mut rng)));
            match result {
                Ok(units) => info!(id, units, "random velocity"),
                Err(error) => {
                    warn!(id, %error, "skipping servo this round");
                    if wait_for_stop(rx_stop, FAILURE_BACKOFF) {
                        break 'thread;
                    }
                }
            }
        }

        let dwell = planner.dwell(&mut rng);
        debug!(seconds = dwell.as_secs_f32(), "waiting");
        if wait_for_stop(rx_stop, dwell) {
            break 'thread;
        }
    }

    controller.stop_all();
}

pub(crate) fn stop_requested(rx_stop: &Receiver<()>) -> bool {
    !matches!(rx_stop.try_recv(), Err(TryRecvError::Empty))
}

/// Sleeps for `timeout` unless a stop arrives first.
pub(crate) fn wait_for_stop(rx_stop: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(rx_stop.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}
