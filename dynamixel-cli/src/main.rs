mod repl;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dynamixel::{Controller, DynamixelSettings, RandomMotion, Transport};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Share of `MAX_VELOCITY_UNIT` used by the spin subcommand.
const SPIN_FRACTION: f32 = 0.2;

/// Dynamixel servo controller.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// YAML file with a `dynamixel_settings` table.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, Default)]
enum Command {
    /// Start the servos and read commands from stdin.
    #[default]
    Repl,
    /// Start the servos and keep them running until terminated.
    Service,
    /// Spin all servos at 20% of the maximum velocity until terminated.
    Spin,
    /// Random velocities until terminated.
    Random,
}

/// Things the main thread waits for.
enum Input {
    Line(String),
    Eof,
    Interrupt,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = DynamixelSettings::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if settings.servo_ids.is_empty() {
        warn!("no SERVO_IDS configured, nothing to control");
    }

    let controller = dynamixel::open(settings)?;

    let (tx_input, rx_input) = mpsc::channel();
    let tx_interrupt = tx_input.clone();
    ctrlc::set_handler(move || {
        let _ = tx_interrupt.send(Input::Interrupt);
    })?;

    let result = match args.command.unwrap_or_default() {
        Command::Repl => run_repl(&controller, tx_input, &rx_input),
        Command::Service => run_service(&controller, &rx_input),
        Command::Spin => run_spin(&controller, &rx_input),
        Command::Random => run_random(&controller, &rx_input),
    };

    info!("cleaning up: stopping servos and closing port");
    controller.stop_all();
    drop(controller);
    info!("port closed");

    result
}

fn run_repl<T: Transport>(
    controller: &Controller<T>,
    tx_input: Sender<Input>,
    rx_input: &Receiver<Input>,
) -> Result<()> {
    controller.initialize();
    println!("\nDynamixel CLI\n{}", repl::HELP);

    // stdin blocks, so it is read on its own thread and merged with the interrupt
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx_input.send(Input::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx_input.send(Input::Eof);
    });

    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = match rx_input.recv()? {
            Input::Line(line) => line,
            Input::Eof => {
                println!();
                info!("EOF received, exiting");
                return Ok(());
            }
            Input::Interrupt => {
                println!();
                info!("interrupted, exiting");
                return Ok(());
            }
        };

        let command = match repl::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                println!("{error}");
                continue;
            }
        };
        match repl::execute(controller, command) {
            Ok(flow) if flow.is_break() => return Ok(()),
            Ok(_) => {}
            Err(error) => error!("{error:#}"),
        }
    }
}

fn run_service<T: Transport + 'static>(
    controller: &Controller<T>,
    rx_input: &Receiver<Input>,
) -> Result<()> {
    if controller.settings().enable_random_movement {
        return run_random(controller, rx_input);
    }
    let running = controller.initialize();
    info!(running, "service running, waiting for SIGINT or SIGTERM");
    wait_for_interrupt(rx_input)
}

fn run_spin<T: Transport>(controller: &Controller<T>, rx_input: &Receiver<Input>) -> Result<()> {
    let units = (controller.settings().max_velocity_unit as f32 * SPIN_FRACTION) as i32;
    for &id in controller.servo_ids() {
        if let Err(error) = controller.enable_velocity_mode(id) {
            error!(id, %error, "could not enable velocity mode");
        }
    }
    controller.spin(units);
    info!(units, "spinning, waiting for SIGINT or SIGTERM");
    wait_for_interrupt(rx_input)
}

fn run_random<T: Transport + 'static>(
    controller: &Controller<T>,
    rx_input: &Receiver<Input>,
) -> Result<()> {
    let motion = RandomMotion::start(controller.clone());
    let result = wait_for_interrupt(rx_input);
    motion.stop();
    result
}

fn wait_for_interrupt(rx_input: &Receiver<Input>) -> Result<()> {
    loop {
        if let Input::Interrupt = rx_input.recv()? {
            info!("termination requested");
            return Ok(());
        }
    }
}
