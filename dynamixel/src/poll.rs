use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::bus::Transport;
use crate::random::{stop_requested, wait_for_stop};
use crate::{Controller, DxlError, ServoStatus};

/// Pause between two rounds over all servos.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct StatusReport {
    pub id: u8,
    pub status: Result<ServoStatus, DxlError>,
}

/// Background thread that reads the status of every configured servo in rounds.
///
/// Each read holds the bus lock only for one servo, so commands from other threads interleave.
pub struct StatusPoller {
    stop: Sender<()>,
    reports: Receiver<StatusReport>,
    worker: JoinHandle<()>,
}

impl StatusPoller {
    /// `notify` runs after every round, e.g. to wake up a UI.
    pub fn start<T, F>(controller: Controller<T>, interval: Duration, notify: F) -> Self
    where
        T: Transport + 'static,
        F: Fn() + Send + 'static,
    {
        let (stop, rx_stop) = mpsc::channel();
        let (tx_reports, reports) = mpsc::channel();

        let worker = thread::spawn(move || {
            'thread: loop {
                for &id in controller.servo_ids() {
                    if stop_requested(&rx_stop) {
                        break 'thread;
                    }
                    let status = controller.status(id);
                    if let Err(error) = &status {
                        debug!(id, %error, "status read failed");
                    }
                    if tx_reports.send(StatusReport { id, status }).is_err() {
                        break 'thread;
                    }
                }
                notify();
                if wait_for_stop(&rx_stop, interval) {
                    break 'thread;
                }
            }
        });

        Self {
            stop,
            reports,
            worker,
        }
    }

    /// Reports received since the last call.
    pub fn reports(&self) -> impl Iterator<Item = StatusReport> + '_ {
        self.reports.try_iter()
    }

    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.worker.join().is_err() {
            error!("status poller panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::controller::tests::controller;

    fn collect(poller: &StatusPoller, count: usize) -> Vec<StatusReport> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reports = Vec::new();
        while reports.len() < count && Instant::now() < deadline {
            reports.extend(poller.reports());
            thread::sleep(Duration::from_millis(5));
        }
        reports
    }

    #[test]
    fn reports_every_servo() {
        let (controller, servos) = controller();
        {
            let mut servos = servos.lock().unwrap();
            let table = servos.tables.get_mut(&2).unwrap();
            table[128..132].copy_from_slice(&109i32.to_le_bytes());
            table[146] = 41;
            table[126..128].copy_from_slice(&300i16.to_le_bytes());
            servos.tables.remove(&3);
        }
        let rounds = Arc::new(AtomicUsize::new(0));
        let counter = rounds.clone();

        let poller = StatusPoller::start(controller, Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let reports = collect(&poller, 6);
        poller.stop();

        assert!(reports.len() >= 6);
        assert_eq!(
            reports[..3].iter().map(|report| report.id).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        let status = reports[1].status.as_ref().unwrap();
        assert_eq!(status.velocity, 109);
        assert_eq!(status.temperature, 41);
        assert_eq!(status.load_percent(), 30.0);
        assert!(matches!(reports[2].status, Err(DxlError::Timeout { id: 3 })));
        assert!(rounds.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn stop_interrupts_interval() {
        let (controller, _servos) = controller();
        let poller = StatusPoller::start(controller, Duration::from_secs(30), || {});
        assert_eq!(collect(&poller, 3).len(), 3);

        let started = Instant::now();
        poller.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
