use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::{ConfigError, DxlError};

/// `DEVICENAME` value that picks the first USB serial adapter.
pub const AUTO_DEVICE: &str = "auto";

/// Name prefixes of USB serial adapters, Linux first.
const DEVICE_PREFIXES: [&str; 4] = [
    "/dev/ttyUSB",
    "/dev/ttyACM",
    "/dev/tty.usbserial",
    "/dev/tty.usbmodem",
];

#[derive(Debug, Deserialize)]
struct ConfigFile {
    dynamixel_settings: DynamixelSettings,
}

/// Contents of the `dynamixel_settings` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DynamixelSettings {
    pub protocol_version: f32,
    pub baudrate: u32,
    #[serde(default = "defaults::devicename")]
    pub devicename: String,
    #[serde(default)]
    pub servo_ids: Vec<u8>,

    // ---- CONTROL TABLE ----
    pub addr_operating_mode: u16,
    pub addr_torque_enable: u16,
    pub addr_goal_velocity: u16,
    #[serde(default = "defaults::addr_goal_position")]
    pub addr_goal_position: u16,
    #[serde(default = "defaults::addr_profile_velocity")]
    pub addr_profile_velocity: u16,
    #[serde(default = "defaults::addr_present_position")]
    pub addr_present_position: u16,
    #[serde(default = "defaults::addr_present_velocity")]
    pub addr_present_velocity: u16,
    #[serde(default = "defaults::addr_present_temperature")]
    pub addr_present_temperature: u16,
    #[serde(default = "defaults::addr_present_load")]
    pub addr_present_load: u16,

    // ---- VALUES ----
    pub mode_velocity_control: u8,
    #[serde(default = "defaults::mode_position_control")]
    pub mode_position_control: u8,
    pub torque_enable: u8,
    pub torque_disable: u8,
    /// Largest goal velocity magnitude, in velocity units.
    #[serde(default = "defaults::max_velocity_unit")]
    pub max_velocity_unit: i32,
    #[serde(default = "defaults::default_start_rpm")]
    pub default_start_rpm: f32,
    #[serde(default = "defaults::rpm_per_unit_velocity")]
    pub rpm_per_unit_velocity: f32,
    /// Servos mounted the other way round, their velocities are negated.
    #[serde(default = "defaults::reversed_servo_ids")]
    pub reversed_servo_ids: Vec<u8>,

    // ---- RANDOM MOVEMENT ----
    #[serde(default)]
    pub enable_random_movement: bool,
    #[serde(default = "defaults::random_min_speed_percent")]
    pub random_min_speed_percent: f32,
    #[serde(default = "defaults::random_max_speed_percent")]
    pub random_max_speed_percent: f32,
    #[serde(default = "defaults::random_min_duration_s")]
    pub random_min_duration_s: f32,
    #[serde(default = "defaults::random_max_duration_s")]
    pub random_max_duration_s: f32,
}

mod defaults {
    pub fn devicename() -> String {
        super::AUTO_DEVICE.to_owned()
    }
    pub fn addr_goal_position() -> u16 {
        116
    }
    pub fn addr_profile_velocity() -> u16 {
        112
    }
    pub fn addr_present_position() -> u16 {
        132
    }
    pub fn addr_present_velocity() -> u16 {
        128
    }
    pub fn addr_present_temperature() -> u16 {
        146
    }
    pub fn addr_present_load() -> u16 {
        126
    }
    pub fn mode_position_control() -> u8 {
        3
    }
    pub fn max_velocity_unit() -> i32 {
        1023
    }
    pub fn default_start_rpm() -> f32 {
        25.0
    }
    pub fn rpm_per_unit_velocity() -> f32 {
        0.229
    }
    pub fn reversed_servo_ids() -> Vec<u8> {
        vec![2]
    }
    pub fn random_min_speed_percent() -> f32 {
        10.0
    }
    pub fn random_max_speed_percent() -> f32 {
        70.0
    }
    pub fn random_min_duration_s() -> f32 {
        1.0
    }
    pub fn random_max_duration_s() -> f32 {
        4.0
    }
}

impl DynamixelSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let settings = Self::from_yaml(&text)?;
        info!(path = %path.display(), servos = ?settings.servo_ids, "loaded config");
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let ConfigFile { dynamixel_settings } = serde_yaml::from_str(text)?;
        dynamixel_settings.validate()?;
        Ok(dynamixel_settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                key,
                reason: reason.into(),
            }
        }

        if self.protocol_version != 2.0 {
            return Err(ConfigError::Protocol(self.protocol_version));
        }
        if self.baudrate == 0 {
            return Err(invalid("BAUDRATE", "must be positive"));
        }
        if self.max_velocity_unit <= 0 {
            return Err(invalid("MAX_VELOCITY_UNIT", "must be positive"));
        }
        if !(self.rpm_per_unit_velocity > 0.0 && self.rpm_per_unit_velocity.is_finite()) {
            return Err(invalid("RPM_PER_UNIT_VELOCITY", "must be positive and finite"));
        }
        if !(0.0 <= self.random_min_speed_percent
            && self.random_min_speed_percent <= self.random_max_speed_percent
            && self.random_max_speed_percent <= 100.0)
        {
            return Err(invalid(
                "RANDOM_MIN_SPEED_PERCENT",
                format!(
                    "need 0 <= {} <= RANDOM_MAX_SPEED_PERCENT ({}) <= 100",
                    self.random_min_speed_percent, self.random_max_speed_percent
                ),
            ));
        }
        if Duration::try_from_secs_f32(self.random_max_duration_s).is_err() {
            return Err(invalid(
                "RANDOM_MAX_DURATION_S",
                format!("{} is not a usable duration", self.random_max_duration_s),
            ));
        }
        if !(0.0 <= self.random_min_duration_s
            && self.random_min_duration_s <= self.random_max_duration_s)
        {
            return Err(invalid(
                "RANDOM_MIN_DURATION_S",
                format!(
                    "need 0 <= {} <= RANDOM_MAX_DURATION_S ({})",
                    self.random_min_duration_s, self.random_max_duration_s
                ),
            ));
        }
        Ok(())
    }

    pub fn is_reversed(&self, id: u8) -> bool {
        self.reversed_servo_ids.contains(&id)
    }

    pub fn random_durations(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f32(self.random_min_duration_s),
            Duration::from_secs_f32(self.random_max_duration_s),
        )
    }

    /// Serial device to open, resolving [`AUTO_DEVICE`].
    pub fn device(&self) -> Result<String, DxlError> {
        if !self.devicename.eq_ignore_ascii_case(AUTO_DEVICE) {
            return Ok(self.devicename.clone());
        }

        let ports = serialport::available_ports()
            .map_err(|source| DxlError::Open {
                path: AUTO_DEVICE.to_owned(),
                source,
            })?
            .into_iter()
            .map(|port| port.port_name);
        let device = pick_device(ports)
            .ok_or_else(|| DxlError::NoDevice(DEVICE_PREFIXES.join("*, ") + "*"))?;
        info!(%device, "auto-detected serial device");
        Ok(device)
    }
}

/// First adapter by prefix order, then name.
fn pick_device(ports: impl IntoIterator<Item = String>) -> Option<String> {
    ports
        .into_iter()
        .filter_map(|name| {
            let rank = DEVICE_PREFIXES
                .iter()
                .position(|prefix| name.starts_with(prefix))?;
            Some((rank, name))
        })
        .min()
        .map(|(_, name)| name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const MINIMAL: &str = "
dynamixel_settings:
  PROTOCOL_VERSION: 2.0
  BAUDRATE: 57600
  SERVO_IDS: [1, 2, 3]
  ADDR_OPERATING_MODE: 11
  ADDR_TORQUE_ENABLE: 64
  ADDR_GOAL_VELOCITY: 104
  MODE_VELOCITY_CONTROL: 1
  TORQUE_ENABLE: 1
  TORQUE_DISABLE: 0
";

    pub fn settings() -> DynamixelSettings {
        DynamixelSettings::from_yaml(MINIMAL).unwrap()
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let settings = settings();

        assert_eq!(settings.devicename, AUTO_DEVICE);
        assert_eq!(settings.servo_ids, [1, 2, 3]);
        assert_eq!(settings.addr_goal_position, 116);
        assert_eq!(settings.addr_present_position, 132);
        assert_eq!(settings.addr_present_velocity, 128);
        assert_eq!(settings.addr_present_temperature, 146);
        assert_eq!(settings.addr_present_load, 126);
        assert_eq!(settings.mode_position_control, 3);
        assert_eq!(settings.max_velocity_unit, 1023);
        assert_eq!(settings.default_start_rpm, 25.0);
        assert_eq!(settings.rpm_per_unit_velocity, 0.229);
        assert_eq!(settings.reversed_servo_ids, [2]);
        assert!(!settings.enable_random_movement);
        assert_eq!(
            settings.random_durations(),
            (Duration::from_secs(1), Duration::from_secs(4))
        );
    }

    #[test]
    fn integers_are_accepted_for_floats() {
        let text = MINIMAL.replace("2.0", "2") + "  RANDOM_MAX_SPEED_PERCENT: 50\n";
        let settings = DynamixelSettings::from_yaml(&text).unwrap();
        assert_eq!(settings.random_max_speed_percent, 50.0);
    }

    #[test]
    fn missing_required_key() {
        let text = MINIMAL.replace("  BAUDRATE: 57600\n", "");
        let Err(ConfigError::Parse(source)) = DynamixelSettings::from_yaml(&text) else {
            panic!("expected a parse error");
        };
        assert!(source.to_string().contains("BAUDRATE"), "{source}");
    }

    #[test]
    fn missing_table() {
        assert!(matches!(
            DynamixelSettings::from_yaml("other: 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn only_protocol_two() {
        let text = MINIMAL.replace("2.0", "1.0");
        assert!(matches!(
            DynamixelSettings::from_yaml(&text),
            Err(ConfigError::Protocol(1.0))
        ));
    }

    #[test]
    fn inconsistent_ranges() {
        let text = MINIMAL.to_owned() + "  RANDOM_MIN_SPEED_PERCENT: 80\n";
        assert!(matches!(
            DynamixelSettings::from_yaml(&text),
            Err(ConfigError::Invalid {
                key: "RANDOM_MIN_SPEED_PERCENT",
                ..
            })
        ));

        let text = MINIMAL.to_owned()
            + "  RANDOM_MIN_DURATION_S: 5\n  RANDOM_MAX_DURATION_S: 2\n";
        assert!(matches!(
            DynamixelSettings::from_yaml(&text),
            Err(ConfigError::Invalid {
                key: "RANDOM_MIN_DURATION_S",
                ..
            })
        ));
    }

    #[test]
    fn unbounded_values() {
        for value in [".inf", ".nan", "1.0e+30"] {
            let text = MINIMAL.to_owned() + &format!("  RANDOM_MAX_DURATION_S: {value}\n");
            assert!(
                matches!(
                    DynamixelSettings::from_yaml(&text),
                    Err(ConfigError::Invalid {
                        key: "RANDOM_MAX_DURATION_S",
                        ..
                    })
                ),
                "{value}"
            );
        }

        let text = MINIMAL.to_owned() + "  RPM_PER_UNIT_VELOCITY: .inf\n";
        assert!(matches!(
            DynamixelSettings::from_yaml(&text),
            Err(ConfigError::Invalid {
                key: "RPM_PER_UNIT_VELOCITY",
                ..
            })
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            DynamixelSettings::load("/nonexistent/config.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn explicit_device_is_used_as_is() {
        let text = MINIMAL.to_owned() + "  DEVICENAME: /dev/ttyUSB3\n";
        let settings = DynamixelSettings::from_yaml(&text).unwrap();
        assert_eq!(settings.device().unwrap(), "/dev/ttyUSB3");
    }

    #[test]
    fn device_detection_order() {
        let ports = ["/dev/ttyS0", "/dev/ttyACM0", "/dev/ttyUSB1", "/dev/ttyUSB0"].map(String::from);
        assert_eq!(pick_device(ports), Some("/dev/ttyUSB0".to_owned()));

        let ports = ["/dev/tty.usbmodem14101", "/dev/tty.Bluetooth"].map(String::from);
        assert_eq!(pick_device(ports), Some("/dev/tty.usbmodem14101".to_owned()));

        assert_eq!(pick_device(["/dev/ttyS0".to_owned()]), None);
    }
}
