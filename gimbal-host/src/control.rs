use std::time::Duration;

use gimbal_messages::{
    DEFAULT_SPEED, GimbalCommand, HOME_ANGLE, MAX_SERVO_ANGLE, MAX_SPEED, MIN_SPEED, Mode,
    Orientation,
};
use tracing::{debug, info};

use crate::ControlError;

/// Interval at which servo targets are resent while in control mode.
pub const TICK: Duration = Duration::from_millis(100);

/// Speed changes smaller than this are not sent.
const SPEED_HYSTERESIS: f32 = 0.1;

/// Host side view of the gimbal's motion state.
///
/// Operations return the commands to send; the caller owns the link.
#[derive(Debug, Clone)]
pub struct ControlPanel {
    mode: Mode,
    running: bool,
    targets: [u8; 3],
    speed: f32,

    sent_mode: Mode,
    sent_speed: f32,
}

impl ControlPanel {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            running: false,
            targets: [HOME_ANGLE; 3],
            speed: DEFAULT_SPEED,
            sent_mode: mode,
            sent_speed: DEFAULT_SPEED,
        }
    }

    /// Puts the device into the selected mode and starts moving.
    pub fn startup(&mut self) -> [GimbalCommand; 2] {
        self.sent_mode = self.mode;
        self.running = true;
        info!(mode = %self.mode, "starting gimbal");
        [GimbalCommand::SetMode(self.mode), GimbalCommand::Start]
    }

    /// Starts moving and pushes whatever changed while stopped.
    pub fn start(&mut self) -> Vec<GimbalCommand> {
        self.running = true;
        let mut commands = vec![GimbalCommand::Start];
        commands.extend(self.sync(None));
        commands
    }

    pub fn stop(&mut self) -> GimbalCommand {
        self.running = false;
        GimbalCommand::Stop
    }

    pub fn home(&mut self) -> GimbalCommand {
        self.targets = [HOME_ANGLE; 3];
        GimbalCommand::Home
    }

    pub fn zero(&mut self) -> GimbalCommand {
        GimbalCommand::Zero
    }

    /// Selects a mode, it is sent with the next [`Self::sync`].
    pub fn select_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn set_targets(&mut self, targets: [u16; 3]) -> Result<(), ControlError> {
        if let Some(&angle) = targets.iter().find(|&&angle| angle > MAX_SERVO_ANGLE.into()) {
            return Err(ControlError::AngleOutOfRange(angle));
        }
        self.targets = targets.map(|angle| angle as u8);
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f32) -> Result<(), ControlError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ControlError::SpeedOutOfRange(speed));
        }
        self.speed = speed;
        Ok(())
    }

    /// Sets the speed and sends it even when it is within the hysteresis of the last one.
    pub fn send_speed(&mut self, speed: f32) -> Result<GimbalCommand, ControlError> {
        self.set_speed(speed)?;
        self.sent_speed = speed;
        Ok(GimbalCommand::Speed(speed))
    }

    /// Pushes the selected state to the device.
    ///
    /// `follow_source` is the latest second IMU orientation, used in follow mode.
    pub fn sync(&mut self, follow_source: Option<Orientation>) -> Vec<GimbalCommand> {
        let mut commands = Vec::new();

        if self.mode != self.sent_mode {
            info!(from = %self.sent_mode, to = %self.mode, "switching mode");
            self.sent_mode = self.mode;
            commands.push(GimbalCommand::SetMode(self.mode));
            if self.mode == Mode::Random && self.running {
                commands.push(GimbalCommand::Start);
            }
        }

        match (self.mode, follow_source) {
            (Mode::Control, _) => commands.push(GimbalCommand::Control(self.targets)),
            (Mode::Follow, Some(orientation)) => {
                self.targets = orientation.to_array().map(follow_angle);
                commands.push(GimbalCommand::Control(self.targets));
            }
            _ => {}
        }

        if (self.speed - self.sent_speed).abs() > SPEED_HYSTERESIS {
            debug!(speed = self.speed, "speed changed");
            self.sent_speed = self.speed;
            commands.push(GimbalCommand::Speed(self.speed));
        }

        commands
    }

    /// Periodic update, call every [`TICK`].
    pub fn tick(&mut self) -> Vec<GimbalCommand> {
        if self.running && self.mode == Mode::Control {
            self.sync(None)
        } else {
            Vec::new()
        }
    }

    /// Mirrors a second IMU sample onto the servos while following.
    pub fn follow(&mut self, second_imu: Orientation) -> Vec<GimbalCommand> {
        if self.running && self.mode == Mode::Follow {
            self.sync(Some(second_imu))
        } else {
            Vec::new()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn targets(&self) -> [u8; 3] {
        self.targets
    }

    /// For sliders, which keep the value in `0..=180` themselves.
    pub fn targets_mut(&mut self) -> &mut [u8; 3] {
        &mut self.targets
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// For sliders, which keep the value in range themselves.
    pub fn speed_mut(&mut self) -> &mut f32 {
        &mut self.speed
    }
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

/// Second IMU angle to servo angle, centered on the home position.
fn follow_angle(angle: f32) -> u8 {
    ((HOME_ANGLE as f32 + angle) as i32).clamp(0, MAX_SERVO_ANGLE.into()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_sends_mode_and_start() {
        let mut panel = ControlPanel::new(Mode::Control);
        assert_eq!(
            panel.startup(),
            [GimbalCommand::SetMode(Mode::Control), GimbalCommand::Start]
        );
        assert!(panel.running());
    }

    #[test]
    fn mode_switch_is_sent_once() {
        let mut panel = ControlPanel::new(Mode::Random);
        panel.select_mode(Mode::Control);

        assert_eq!(
            panel.sync(None),
            [
                GimbalCommand::SetMode(Mode::Control),
                GimbalCommand::Control([90, 90, 90]),
            ]
        );
        assert_eq!(panel.sync(None), [GimbalCommand::Control([90, 90, 90])]);
    }

    #[test]
    fn switching_to_random_restarts_when_running() {
        let mut panel = ControlPanel::new(Mode::Control);
        panel.startup();
        panel.select_mode(Mode::Random);
        assert_eq!(
            panel.sync(None),
            [GimbalCommand::SetMode(Mode::Random), GimbalCommand::Start]
        );

        let mut panel = ControlPanel::new(Mode::Control);
        panel.select_mode(Mode::Random);
        assert_eq!(panel.sync(None), [GimbalCommand::SetMode(Mode::Random)]);
    }

    #[test]
    fn follow_maps_and_clamps() {
        let mut panel = ControlPanel::new(Mode::Follow);
        panel.startup();

        let commands = panel.follow(Orientation::new(10.7, -30.2, 120.0));
        assert_eq!(commands, [GimbalCommand::Control([100, 59, 180])]);

        let commands = panel.follow(Orientation::new(-200.0, 0.0, 89.9));
        assert_eq!(commands, [GimbalCommand::Control([0, 90, 179])]);
        assert_eq!(panel.targets(), [0, 90, 179]);
    }

    #[test]
    fn follow_without_second_imu_sends_nothing() {
        let mut panel = ControlPanel::new(Mode::Follow);
        assert!(panel.sync(None).is_empty());
    }

    #[test]
    fn follow_needs_running() {
        let mut panel = ControlPanel::new(Mode::Follow);
        assert!(panel.follow(Orientation::default()).is_empty());
        panel.start();
        assert_eq!(panel.follow(Orientation::default()).len(), 1);
        panel.stop();
        assert!(panel.follow(Orientation::default()).is_empty());
    }

    #[test]
    fn tick_only_in_running_control_mode() {
        let mut panel = ControlPanel::new(Mode::Random);
        panel.startup();
        assert!(panel.tick().is_empty());

        panel.select_mode(Mode::Control);
        assert_eq!(panel.tick().len(), 2);

        panel.stop();
        assert!(panel.tick().is_empty());
    }

    #[test]
    fn speed_hysteresis() {
        let mut panel = ControlPanel::new(Mode::Random);

        panel.set_speed(2.05).unwrap();
        assert!(panel.sync(None).is_empty());

        panel.set_speed(2.5).unwrap();
        assert_eq!(panel.sync(None), [GimbalCommand::Speed(2.5)]);
        assert!(panel.sync(None).is_empty());

        panel.set_speed(2.45).unwrap();
        assert!(panel.sync(None).is_empty());
    }

    #[test]
    fn explicit_speed_skips_hysteresis() {
        let mut panel = ControlPanel::new(Mode::Random);

        assert_eq!(panel.send_speed(2.05), Ok(GimbalCommand::Speed(2.05)));
        assert_eq!(panel.speed(), 2.05);
        assert!(panel.sync(None).is_empty());
        assert!(panel.send_speed(50.0).is_err());
    }

    #[test]
    fn start_pushes_speed_changed_while_stopped() {
        let mut panel = ControlPanel::new(Mode::Random);
        panel.startup();
        panel.stop();

        *panel.speed_mut() = 7.0;
        assert_eq!(
            panel.start(),
            [GimbalCommand::Start, GimbalCommand::Speed(7.0)]
        );
        for _ in 0..50 {
            assert!(panel.tick().is_empty());
        }
        assert!(panel.sync(None).is_empty());
    }

    #[test]
    fn start_pushes_pending_mode() {
        let mut panel = ControlPanel::new(Mode::Control);
        panel.select_mode(Mode::Random);

        assert_eq!(
            panel.start(),
            [
                GimbalCommand::Start,
                GimbalCommand::SetMode(Mode::Random),
                GimbalCommand::Start
            ]
        );
    }

    #[test]
    fn rejects_out_of_range() {
        let mut panel = ControlPanel::default();
        assert_eq!(
            panel.set_speed(0.4),
            Err(ControlError::SpeedOutOfRange(0.4))
        );
        assert!(panel.set_speed(10.5).is_err());
        assert!(panel.set_speed(f32::NAN).is_err());
        assert_eq!(
            panel.set_targets([0, 181, 90]),
            Err(ControlError::AngleOutOfRange(181))
        );
        assert_eq!(panel.speed(), DEFAULT_SPEED);
        assert_eq!(panel.targets(), [HOME_ANGLE; 3]);
    }

    #[test]
    fn home_resets_targets() {
        let mut panel = ControlPanel::new(Mode::Control);
        panel.set_targets([0, 45, 180]).unwrap();
        assert_eq!(panel.home(), GimbalCommand::Home);
        assert_eq!(panel.targets(), [HOME_ANGLE; 3]);
    }
}
