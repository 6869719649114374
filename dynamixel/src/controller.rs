use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::bus::{Bus, PingInfo, Transport};
use crate::{DxlError, DynamixelSettings};

/// Servos ignore a mode change right after torque was disabled.
const MODE_CHANGE_DELAY: Duration = Duration::from_millis(50);
/// Pause between consecutive writes to the same servo during setup and shutdown.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Highest goal position of a single turn (12 bit encoder).
pub const MAX_POSITION: u32 = 4095;

/// Velocity in units for `rpm`, rounded to the nearest unit.
pub fn rpm_to_units(rpm: f32, rpm_per_unit: f32) -> i32 {
    (rpm / rpm_per_unit).round() as i32
}

/// RPM for a velocity in units, rounded to two decimals.
pub fn units_to_rpm(units: i32, rpm_per_unit: f32) -> f32 {
    (units as f32 * rpm_per_unit * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoStatus {
    pub velocity: i32,
    pub rpm: f32,
    pub position: i32,
    /// Degrees Celsius.
    pub temperature: u8,
    /// Signed, 0.1% of the maximum torque per unit.
    pub load: i16,
}

impl ServoStatus {
    pub fn load_percent(&self) -> f32 {
        f32::from(self.load) / 10.0
    }
}

/// Servo level operations on a shared bus.
///
/// Every operation holds the bus lock for its whole register sequence, clones share the bus.
pub struct Controller<T> {
    bus: Arc<Mutex<Bus<T>>>,
    settings: Arc<DynamixelSettings>,
}

impl<T> Clone for Controller<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T: Transport> Controller<T> {
    pub fn new(bus: Bus<T>, settings: DynamixelSettings) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &DynamixelSettings {
        &self.settings
    }

    pub fn servo_ids(&self) -> &[u8] {
        &self.settings.servo_ids
    }

    /// Only configured servos may be driven.
    pub fn check_id(&self, id: u8) -> Result<(), DxlError> {
        if self.servo_ids().contains(&id) {
            Ok(())
        } else {
            Err(DxlError::UnknownServo(id))
        }
    }

    fn bus(&self) -> Result<MutexGuard<'_, Bus<T>>, DxlError> {
        self.bus.lock().map_err(|_| DxlError::Poisoned)
    }

    pub fn ping(&self, id: u8) -> Result<PingInfo, DxlError> {
        self.bus()?.ping(id)
    }

    pub fn set_torque(&self, id: u8, enable: bool) -> Result<(), DxlError> {
        let value = if enable {
            self.settings.torque_enable
        } else {
            self.settings.torque_disable
        };
        self.bus()?
            .write1(id, self.settings.addr_torque_enable, value)?;
        debug!(id, enable, "torque");
        Ok(())
    }

    /// Disables torque first, the servo does not accept mode changes otherwise.
    ///
    /// Torque stays off afterwards.
    pub fn set_operating_mode(&self, id: u8, mode: u8) -> Result<(), DxlError> {
        let mut bus = self.bus()?;
        if let Err(error) = bus.write1(
            id,
            self.settings.addr_torque_enable,
            self.settings.torque_disable,
        ) {
            warn!(id, %error, "could not disable torque before mode change, trying anyway");
        }
        thread::sleep(MODE_CHANGE_DELAY);
        bus.write1(id, self.settings.addr_operating_mode, mode)?;
        debug!(id, mode, "operating mode");
        Ok(())
    }

    /// Velocity mode with torque on.
    pub fn enable_velocity_mode(&self, id: u8) -> Result<(), DxlError> {
        self.set_operating_mode(id, self.settings.mode_velocity_control)?;
        self.set_torque(id, true)
    }

    /// Sets the goal velocity, clamped to the configured maximum. Returns what was written.
    pub fn set_velocity(&self, id: u8, units: i32) -> Result<i32, DxlError> {
        let max = self.settings.max_velocity_unit;
        let units = units.clamp(-max, max);
        self.bus()?
            .write4(id, self.settings.addr_goal_velocity, units as u32)?;
        debug!(id, units, "goal velocity");
        Ok(units)
    }

    pub fn set_rpm(&self, id: u8, rpm: f32) -> Result<i32, DxlError> {
        self.set_velocity(id, self.rpm_to_units(rpm))
    }

    /// Switches to position mode and moves to `position` with the given profile velocity.
    pub fn go_to_position(
        &self,
        id: u8,
        position: u32,
        profile_velocity: u32,
    ) -> Result<(), DxlError> {
        if position > MAX_POSITION {
            return Err(DxlError::PositionOutOfRange(position));
        }

        self.set_operating_mode(id, self.settings.mode_position_control)?;
        self.set_torque(id, true)?;

        let mut bus = self.bus()?;
        bus.write4(id, self.settings.addr_profile_velocity, profile_velocity)?;
        bus.write4(id, self.settings.addr_goal_position, position)?;
        info!(id, position, profile_velocity, "moving to position");
        Ok(())
    }

    pub fn present_velocity(&self, id: u8) -> Result<i32, DxlError> {
        Ok(self
            .bus()?
            .read4(id, self.settings.addr_present_velocity)? as i32)
    }

    pub fn present_position(&self, id: u8) -> Result<i32, DxlError> {
        Ok(self
            .bus()?
            .read4(id, self.settings.addr_present_position)? as i32)
    }

    pub fn present_temperature(&self, id: u8) -> Result<u8, DxlError> {
        self.bus()?
            .read1(id, self.settings.addr_present_temperature)
    }

    pub fn present_load(&self, id: u8) -> Result<i16, DxlError> {
        Ok(self.bus()?.read2(id, self.settings.addr_present_load)? as i16)
    }

    pub fn status(&self, id: u8) -> Result<ServoStatus, DxlError> {
        let velocity = self.present_velocity(id)?;
        Ok(ServoStatus {
            velocity,
            rpm: self.units_to_rpm(velocity),
            position: self.present_position(id)?,
            temperature: self.present_temperature(id)?,
            load: self.present_load(id)?,
        })
    }

    pub fn rpm_to_units(&self, rpm: f32) -> i32 {
        rpm_to_units(rpm, self.settings.rpm_per_unit_velocity)
    }

    pub fn units_to_rpm(&self, units: i32) -> f32 {
        units_to_rpm(units, self.settings.rpm_per_unit_velocity)
    }

    /// Per servo velocities for `units`, negated on reversed servos.
    pub fn spin_profile(&self, units: i32) -> Vec<(u8, i32)> {
        self.servo_ids()
            .iter()
            .map(|&id| {
                let units = if self.settings.is_reversed(id) {
                    -units
                } else {
                    units
                };
                (id, units)
            })
            .collect()
    }

    /// Velocity mode, torque on and the start speed for every servo.
    ///
    /// A servo that fails is logged and skipped. Returns the number of running servos.
    pub fn initialize(&self) -> usize {
        let units = self.rpm_to_units(self.settings.default_start_rpm);
        info!(
            servos = self.servo_ids().len(),
            rpm = self.settings.default_start_rpm,
            "initializing servos"
        );

        let mut running = 0;
        for (id, units) in self.spin_profile(units) {
            let result = self.enable_velocity_mode(id).and_then(|()| {
                thread::sleep(SETTLE_DELAY);
                self.set_velocity(id, units)
            });
            match result {
                Ok(units) => {
                    info!(id, units, rpm = self.units_to_rpm(units), "servo running");
                    running += 1;
                }
                Err(error) => error!(id, %error, "could not initialize servo, skipping"),
            }
        }
        running
    }

    /// Spins every servo at `units`, reversed servos the other way.
    pub fn spin(&self, units: i32) {
        for (id, units) in self.spin_profile(units) {
            if let Err(error) = self.set_torque(id, true) {
                warn!(id, %error, "could not enable torque");
            }
            match self.set_velocity(id, units) {
                Ok(units) => info!(id, units, rpm = self.units_to_rpm(units), "spinning"),
                Err(error) => error!(id, %error, "could not set velocity"),
            }
        }
    }

    /// Zero velocity, then torque off, for every servo. Errors are logged.
    pub fn stop_all(&self) {
        for &id in self.servo_ids() {
            if let Err(error) = self.set_velocity(id, 0) {
                warn!(id, %error, "could not stop servo");
            }
            thread::sleep(SETTLE_DELAY);
            if let Err(error) = self.set_torque(id, false) {
                warn!(id, %error, "could not disable torque");
            }
        }
        info!("all servos stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::tests::{MockTransport, Servos, mock_bus};
    use crate::config::tests::settings;

    pub fn controller() -> (Controller<MockTransport>, Arc<Mutex<Servos>>) {
        let (bus, servos) = mock_bus(&[1, 2, 3]);
        (Controller::new(bus, settings()), servos)
    }

    #[test]
    fn rpm_conversion() {
        assert_eq!(rpm_to_units(25.0, 0.229), 109);
        assert_eq!(rpm_to_units(-25.0, 0.229), -109);
        assert_eq!(rpm_to_units(0.0, 0.229), 0);
        assert_eq!(units_to_rpm(109, 0.229), 24.96);
        assert_eq!(units_to_rpm(-1023, 0.229), -234.27);
    }

    #[test]
    fn velocity_is_clamped() {
        let (controller, servos) = controller();

        assert_eq!(controller.set_velocity(1, 5000).unwrap(), 1023);
        assert_eq!(controller.set_velocity(2, -5000).unwrap(), -1023);
        assert_eq!(controller.set_rpm(3, -10.0).unwrap(), -44);

        let servos = servos.lock().unwrap();
        assert_eq!(servos.read4(1, 104) as i32, 1023);
        assert_eq!(servos.read4(2, 104) as i32, -1023);
        assert_eq!(servos.read4(3, 104) as i32, -44);
    }

    #[test]
    fn mode_change_disables_torque_first() {
        let (controller, servos) = controller();
        controller.set_torque(1, true).unwrap();
        controller.set_operating_mode(1, 1).unwrap();

        let servos = servos.lock().unwrap();
        assert_eq!(servos.read1(1, 64), 0);
        assert_eq!(servos.read1(1, 11), 1);
        let addresses: Vec<_> = servos
            .log
            .iter()
            .map(|packet| packet.params[0])
            .collect();
        assert_eq!(addresses, [64, 64, 11]);
    }

    #[test]
    fn spin_profile_negates_reversed() {
        let (controller, _) = controller();
        assert_eq!(controller.spin_profile(204), [(1, 204), (2, -204), (3, 204)]);
    }

    #[test]
    fn initialize_and_stop() {
        let (controller, servos) = controller();
        assert_eq!(controller.initialize(), 3);
        {
            let servos = servos.lock().unwrap();
            assert_eq!(servos.read4(1, 104) as i32, 109);
            assert_eq!(servos.read4(2, 104) as i32, -109);
            assert_eq!(servos.read1(3, 64), 1);
            assert_eq!(servos.read1(3, 11), 1);
        }

        controller.stop_all();
        let servos = servos.lock().unwrap();
        for id in [1, 2, 3] {
            assert_eq!(servos.read4(id, 104), 0);
            assert_eq!(servos.read1(id, 64), 0);
        }
    }

    #[test]
    fn initialize_skips_missing_servo() {
        let (bus, _) = mock_bus(&[1, 3]);
        let controller = Controller::new(bus, settings());
        assert_eq!(controller.initialize(), 2);
    }

    #[test]
    fn status_reads_registers() {
        let (controller, servos) = controller();
        {
            let mut servos = servos.lock().unwrap();
            let table = servos.tables.get_mut(&1).unwrap();
            table[128..132].copy_from_slice(&(-109i32).to_le_bytes());
            table[132..136].copy_from_slice(&2048u32.to_le_bytes());
            table[146] = 38;
            table[126..128].copy_from_slice(&(-125i16).to_le_bytes());
        }

        let status = controller.status(1).unwrap();
        assert_eq!(
            status,
            ServoStatus {
                velocity: -109,
                rpm: -24.96,
                position: 2048,
                temperature: 38,
                load: -125,
            }
        );
        assert_eq!(status.load_percent(), -12.5);
    }

    #[test]
    fn position_move() {
        let (controller, servos) = controller();
        controller.go_to_position(2, 3000, 100).unwrap();

        let servos = servos.lock().unwrap();
        assert_eq!(servos.read1(2, 11), 3);
        assert_eq!(servos.read1(2, 64), 1);
        assert_eq!(servos.read4(2, 112), 100);
        assert_eq!(servos.read4(2, 116), 3000);
        drop(servos);

        assert!(matches!(
            controller.go_to_position(2, 5000, 100),
            Err(DxlError::PositionOutOfRange(5000))
        ));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (controller, _) = controller();
        assert!(controller.check_id(2).is_ok());
        assert!(matches!(controller.check_id(9), Err(DxlError::UnknownServo(9))));
    }
}
