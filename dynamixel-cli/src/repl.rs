use std::ops::ControlFlow;
use std::str::{FromStr, SplitWhitespace};

use anyhow::{Context, Result, bail};
use dynamixel::{Controller, Transport};
use tracing::warn;

/// Profile velocity for `pos` when none is given.
const DEFAULT_PROFILE: u32 = 50;

pub const HELP: &str = "\
Commands:
  set <id> <rpm>               set target RPM (e.g. set 1 50)
  get <id>                     read current RPM
  off <id>                     stop servo (RPM 0)
  torque <id> <on|off>         enable or disable torque
  spin <rpm>                   set ALL servos to <rpm>, reversed servos opposite
  stopall                      stop ALL servos and disable torque
  statusall                    velocity, position, temperature and load of ALL servos
  ping <id>                    check communication with a servo
  pos <id> <position> [speed]  move to a position (0-4095) in position mode
  help                         this list
  exit                         close port and exit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplCommand {
    Set { id: u8, rpm: f32 },
    Get(u8),
    Off(u8),
    Torque { id: u8, enable: bool },
    Spin(f32),
    StopAll,
    StatusAll,
    Ping(u8),
    Position { id: u8, position: u32, profile: u32 },
    Help,
    Exit,
}

/// One command per line, case insensitive. Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.to_lowercase();
    let mut args = line.split_whitespace();
    let Some(name) = args.next() else {
        return Ok(None);
    };

    fn arg<T: FromStr>(args: &mut SplitWhitespace<'_>, usage: &str) -> Result<T> {
        args.next()
            .and_then(|arg| arg.parse().ok())
            .with_context(|| format!("Usage: {usage}"))
    }

    let command = match name {
        "set" => {
            let usage = "set <id> <rpm>";
            ReplCommand::Set {
                id: arg(&mut args, usage)?,
                rpm: arg(&mut args, usage)?,
            }
        }
        "get" => ReplCommand::Get(arg(&mut args, "get <id>")?),
        "off" => ReplCommand::Off(arg(&mut args, "off <id>")?),
        "torque" => {
            let usage = "torque <id> <on|off>";
            let id = arg(&mut args, usage)?;
            let enable = match args.next() {
                Some("on") => true,
                Some("off") => false,
                _ => bail!("Usage: {usage}"),
            };
            ReplCommand::Torque { id, enable }
        }
        "spin" => ReplCommand::Spin(arg(&mut args, "spin <rpm>")?),
        "stopall" => ReplCommand::StopAll,
        "statusall" => ReplCommand::StatusAll,
        "ping" => ReplCommand::Ping(arg(&mut args, "ping <id>")?),
        "pos" => {
            let usage = "pos <id> <position> [speed]";
            let id = arg(&mut args, usage)?;
            let position = arg(&mut args, usage)?;
            let profile = match args.next() {
                Some(profile) => profile
                    .parse::<u32>()
                    .with_context(|| format!("Usage: {usage}"))?,
                None => DEFAULT_PROFILE,
            };
            ReplCommand::Position {
                id,
                position,
                profile,
            }
        }
        "help" | "?" => ReplCommand::Help,
        "exit" | "quit" => ReplCommand::Exit,
        _ => bail!("Unknown command: {name}"),
    };

    if args.next().is_some() {
        bail!("Too many arguments for {name}");
    }

    Ok(Some(command))
}

pub fn execute<T: Transport>(
    controller: &Controller<T>,
    command: ReplCommand,
) -> Result<ControlFlow<()>> {
    match command {
        ReplCommand::Set { id, rpm } => {
            controller.check_id(id)?;
            if let Err(error) = controller.set_torque(id, true) {
                warn!(id, %error, "could not ensure torque is on, velocity may not apply");
            }
            let units = controller.set_rpm(id, rpm)?;
            println!(
                "Servo {id}: target {} RPM ({units} units)",
                controller.units_to_rpm(units)
            );
        }
        ReplCommand::Get(id) => {
            controller.check_id(id)?;
            let units = controller.present_velocity(id)?;
            println!(
                "Servo {id}: present velocity {} RPM ({units} units)",
                controller.units_to_rpm(units)
            );
        }
        ReplCommand::Off(id) => {
            controller.check_id(id)?;
            controller.set_velocity(id, 0)?;
            println!("Servo {id}: stopped");
        }
        ReplCommand::Torque { id, enable } => {
            controller.check_id(id)?;
            controller.set_torque(id, enable)?;
            println!(
                "Servo {id}: torque {}",
                if enable { "enabled" } else { "disabled" }
            );
        }
        ReplCommand::Spin(rpm) => controller.spin(controller.rpm_to_units(rpm)),
        ReplCommand::StopAll => controller.stop_all(),
        ReplCommand::StatusAll => {
            if controller.servo_ids().is_empty() {
                println!("No servos configured");
            }
            for &id in controller.servo_ids() {
                match controller.status(id) {
                    Ok(status) => println!(
                        "Servo {id}: {} RPM ({} units), position {}, {} °C, load {:.1}%",
                        status.rpm,
                        status.velocity,
                        status.position,
                        status.temperature,
                        status.load_percent()
                    ),
                    Err(error) => println!("Servo {id}: failed to read status: {error}"),
                }
            }
        }
        ReplCommand::Ping(id) => {
            let info = controller.ping(id)?;
            println!(
                "Servo {id}: model {}, firmware {}",
                info.model, info.firmware
            );
        }
        ReplCommand::Position {
            id,
            position,
            profile,
        } => {
            controller.check_id(id)?;
            controller.go_to_position(id, position, profile)?;
        }
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Exit => return Ok(ControlFlow::Break(())),
    }
    Ok(ControlFlow::Continue(()))
}
