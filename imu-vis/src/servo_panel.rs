use std::collections::HashMap;

use dynamixel::{Controller, RandomMotion, STATUS_INTERVAL, ServoStatus, StatusPoller, Transport};
use tracing::{info, warn};

/// Velocity and torque controls for the Dynamixel servos, shown next to the IMU plots.
///
/// Status is read on a [`StatusPoller`] thread, commands from the UI share its bus.
pub struct ServoPanel<T: Transport + 'static> {
    controller: Controller<T>,
    /// Taken on drop.
    poller: Option<StatusPoller>,
    random: Option<RandomMotion>,
    /// Slider values in velocity units, one per configured servo.
    velocities: Vec<i32>,
    statuses: HashMap<u8, Result<ServoStatus, String>>,
}

impl<T: Transport + 'static> ServoPanel<T> {
    /// Puts every servo in velocity mode with torque on and starts polling.
    pub fn new(controller: Controller<T>, ctx: egui::Context) -> Self {
        for &id in controller.servo_ids() {
            if let Err(error) = controller.enable_velocity_mode(id) {
                warn!(id, %error, "servo not ready");
            }
        }
        let poller = StatusPoller::start(controller.clone(), STATUS_INTERVAL, move || {
            ctx.request_repaint()
        });
        let random = controller
            .settings()
            .enable_random_movement
            .then(|| RandomMotion::start(controller.clone()));

        Self {
            velocities: vec![0; controller.servo_ids().len()],
            controller,
            poller: Some(poller),
            random,
            statuses: HashMap::new(),
        }
    }

    fn receive(&mut self) {
        let Some(poller) = &self.poller else {
            return;
        };
        for report in poller.reports() {
            let status = report.status.map_err(|error| error.to_string());
            self.statuses.insert(report.id, status);
        }
    }

    fn set_random(&mut self, enable: bool) {
        match (enable, self.random.take()) {
            (true, None) => self.random = Some(RandomMotion::start(self.controller.clone())),
            (false, Some(random)) => {
                random.stop();
                self.velocities.fill(0);
                info!("torque is off, enable it to drive the servos by hand");
            }
            (_, random) => self.random = random,
        }
    }

    pub fn draw(&mut self, ui: &mut egui::Ui) {
        self.receive();

        ui.heading("Dynamixel");
        let mut random = self.random.is_some();
        if ui.checkbox(&mut random, "Random movement").changed() {
            self.set_random(random);
        }

        let max = self.controller.settings().max_velocity_unit;
        let manual = self.random.is_none();
        for (&id, velocity) in self.controller.servo_ids().iter().zip(&mut self.velocities) {
            ui.separator();
            ui.label(format!("Servo {id}"));
            ui.horizontal(|ui| {
                for (label, enable) in [("Torque on", true), ("Torque off", false)] {
                    if !ui.button(label).clicked() {
                        continue;
                    }
                    if let Err(error) = self.controller.set_torque(id, enable) {
                        warn!(id, %error, "torque not changed");
                    }
                }
            });

            let slider = egui::Slider::new(velocity, -max..=max).text("velocity");
            if ui.add_enabled(manual, slider).changed() {
                if let Err(error) = self.controller.set_velocity(id, *velocity) {
                    warn!(id, %error, "velocity not sent");
                }
            }

            match self.statuses.get(&id) {
                Some(Ok(status)) => ui.label(status_text(status)),
                Some(Err(error)) => ui.colored_label(egui::Color32::RED, error),
                None => ui.weak("no status yet"),
            };
        }
    }
}

impl<T: Transport + 'static> Drop for ServoPanel<T> {
    fn drop(&mut self) {
        if let Some(random) = self.random.take() {
            random.stop();
        }
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.controller.stop_all();
    }
}

fn status_text(status: &ServoStatus) -> String {
    format!(
        "{} ({:.1} RPM)  {} °C  load {:.1}%",
        status.velocity,
        status.rpm,
        status.temperature,
        status.load_percent()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line() {
        let status = ServoStatus {
            velocity: -109,
            rpm: -24.96,
            position: 0,
            temperature: 38,
            load: -125,
        };
        assert_eq!(status_text(&status), "-109 (-25.0 RPM)  38 °C  load -12.5%");
    }
}
