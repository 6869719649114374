mod servo_panel;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use dynamixel::{DynamixelSettings, SerialController};
use gimbal_host::{ControlPanel, HISTORY_LEN, ImuSession, Link, LinkEvent, TICK, Trace};
use gimbal_messages::{DEFAULT_BAUD, GimbalCommand, MAX_SPEED, MIN_SPEED, Mode, Orientation};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use servo_panel::ServoPanel;

/// Live orientation dashboard for the IMU gimbal.
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Serial port of the gimbal, detected when omitted.
    #[arg(long)]
    port: Option<String>,
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,
    /// Mode sent on startup.
    #[arg(long, default_value_t = Mode::Random)]
    mode: Mode,
    /// Plot the unwrapped measurement instead of the Kalman estimate.
    #[arg(long)]
    no_filter: bool,
    /// Also drive the Dynamixel servos described in this YAML file.
    #[arg(long, value_name = "CONFIG")]
    dynamixel: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = gimbal_host::connect(args.port.as_deref(), args.baud)?;
    let servos = args.dynamixel.as_deref().map(open_servos).transpose()?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1200.0, 800.0]),
        ..Default::default()
    };

    eframe::run_native(
        "IMU gimbal",
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let link = Link::spawn(port, move || ctx.request_repaint());
            let servos =
                servos.map(|controller| ServoPanel::new(controller, cc.egui_ctx.clone()));
            Ok(Box::new(ImuVis::new(link, servos, args.mode, !args.no_filter)?))
        }),
    )
    .map_err(|error| eyre::eyre!("{error}"))?;

    Ok(())
}

fn open_servos(path: &Path) -> eyre::Result<SerialController> {
    let settings = DynamixelSettings::load(path)?;
    Ok(dynamixel::open(settings)?)
}

type SerialServoPanel = ServoPanel<Box<dyn serialport::SerialPort>>;

struct ImuVis {
    /// Taken on drop to shut the worker down.
    link: Option<Link>,
    session: ImuSession,
    panel: ControlPanel,
    servos: Option<SerialServoPanel>,

    auto_resize: bool,
    last_tick: Instant,
}

impl ImuVis {
    fn new(
        link: Link,
        servos: Option<SerialServoPanel>,
        mode: Mode,
        filtering: bool,
    ) -> Result<Self, gimbal_host::HostError> {
        let mut panel = ControlPanel::new(mode);
        link.send_all(panel.startup())?;

        Ok(Self {
            link: Some(link),
            session: ImuSession::new(filtering),
            panel,
            servos,
            auto_resize: true,
            last_tick: Instant::now(),
        })
    }

    fn send_all(&self, commands: impl IntoIterator<Item = GimbalCommand>) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(error) = link.send_all(commands) {
            warn!(%error, "command not sent");
        }
    }

    fn receive(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let events: Vec<_> = link.events().collect();

        for event in events {
            match event {
                LinkEvent::Euler(orientation) => {
                    self.session.ingest(orientation);
                }
                LinkEvent::SecondImu(orientation) => {
                    self.session.ingest_second(orientation);
                    let commands = self.panel.follow(orientation);
                    self.send_all(commands);
                }
                LinkEvent::Text(text) => info!("[device] {text}"),
                LinkEvent::Malformed { .. } | LinkEvent::Sent(_) => {}
            }
        }
    }

    fn draw_controls(&mut self, ui: &mut egui::Ui) {
        ui.heading("Mode");
        let previous_mode = self.panel.mode();
        let mut mode = previous_mode;
        for candidate in Mode::ALL {
            ui.radio_value(&mut mode, candidate, candidate.as_str());
        }
        if mode != previous_mode {
            self.panel.select_mode(mode);
            let commands = self.panel.sync(self.session.second_imu());
            self.send_all(commands);
        }

        ui.separator();
        ui.heading("Servos");
        let targets = self.panel.targets_mut();
        for (label, target) in ["Servo 1", "Servo 2", "Servo 3"].into_iter().zip(targets) {
            ui.add(egui::Slider::new(target, 0..=180).text(label));
        }
        let speed = ui.add(
            egui::Slider::new(self.panel.speed_mut(), MIN_SPEED..=MAX_SPEED).text("Speed"),
        );
        let apply = ui.button("Apply").clicked();
        if speed.changed() || apply {
            let commands = self.panel.sync(self.session.second_imu());
            self.send_all(commands);
        }

        ui.separator();
        ui.horizontal(|ui| {
            if ui.button("Start").clicked() {
                let commands = self.panel.start();
                self.send_all(commands);
            }
            if ui.button("Stop").clicked() {
                let command = self.panel.stop();
                self.send_all([command]);
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Home").clicked() {
                let command = self.panel.home();
                self.send_all([command]);
            }
            if ui.button("Zero IMU").clicked() {
                let command = self.panel.zero();
                self.send_all([command]);
                self.session.zero();
            }
        });

        ui.separator();
        let mut continuous_yaw = self.session.continuous_yaw();
        if ui.checkbox(&mut continuous_yaw, "Continuous yaw").changed() {
            self.session.set_continuous_yaw(continuous_yaw);
        }
        ui.checkbox(&mut self.auto_resize, "Auto resize");
        if ui.button("Reset plot").clicked() {
            self.session.reset_plot();
        }

        ui.separator();
        let status = if self.panel.running() {
            "running"
        } else {
            "stopped"
        };
        ui.label(format!("{} ({status})", self.panel.mode()));
        ui.label(format!("{} samples", self.session.samples()));
        if let Some(sample) = self.session.latest() {
            let Orientation { yaw, pitch, roll } = sample.filtered;
            ui.label(format!("yaw {yaw:.1}  pitch {pitch:.1}  roll {roll:.1}"));
        }
        let [x, y, z] = self.session.heading();
        ui.label(format!("heading {x:.2} {y:.2} {z:.2}"));
    }

    fn draw_plots(&self, ui: &mut egui::Ui) {
        let range = if self.auto_resize {
            f64::from(self.session.auto_range())
        } else {
            180.0
        };
        let height = ui.available_height() / 4.0;

        let angles: [(&str, fn(Orientation) -> f32); 3] = [
            ("Yaw", |o| o.yaw),
            ("Pitch", |o| o.pitch),
            ("Roll", |o| o.roll),
        ];
        for (name, angle) in angles {
            self.draw_time_series(ui, name, angle, range, height);
        }
        self.draw_trace(ui, range);
    }

    fn draw_time_series(
        &self,
        ui: &mut egui::Ui,
        name: &str,
        angle: fn(Orientation) -> f32,
        range: f64,
        height: f32,
    ) {
        let start = self.session.raw().iter().next().map_or(0, |point| point.index) as f64;

        egui_plot::Plot::new(name.to_lowercase())
            .height(height)
            .legend(egui_plot::Legend::default().position(egui_plot::Corner::LeftTop))
            .include_x(start)
            .include_x(start + HISTORY_LEN as f64)
            .include_y(-range)
            .include_y(range)
            .show(ui, |plot_ui| {
                for (label, trace) in [
                    (format!("{name} raw"), self.session.raw()),
                    (format!("{name} filtered"), self.session.filtered()),
                ] {
                    plot_ui.line(egui_plot::Line::new(
                        label,
                        egui_plot::PlotPoints::Owned(time_series(trace, angle)),
                    ));
                }
            });
    }

    /// Yaw against pitch, with the second IMU drawn behind.
    fn draw_trace(&self, ui: &mut egui::Ui, range: f64) {
        egui_plot::Plot::new("trace")
            .data_aspect(1.0)
            .legend(egui_plot::Legend::default().position(egui_plot::Corner::LeftTop))
            .include_x(-range)
            .include_x(range)
            .include_y(-range)
            .include_y(range)
            .show(ui, |plot_ui| {
                plot_ui.line(
                    egui_plot::Line::new(
                        "IMU2",
                        egui_plot::PlotPoints::Owned(path(self.session.ghost())),
                    )
                    .color(egui::Color32::from_gray(110)),
                );
                plot_ui.line(egui_plot::Line::new(
                    "Orientation path",
                    egui_plot::PlotPoints::Owned(path(self.session.filtered())),
                ));
                if let Some(point) = self.session.filtered().latest() {
                    let Orientation { yaw, pitch, .. } = point.orientation;
                    plot_ui.points(
                        egui_plot::Points::new(
                            "Current orientation",
                            egui_plot::PlotPoints::Owned(vec![egui_plot::PlotPoint::new(
                                yaw, pitch,
                            )]),
                        )
                        .radius(5.0)
                        .color(egui::Color32::RED),
                    );
                }
            });
    }
}

impl eframe::App for ImuVis {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.receive();

        if self.last_tick.elapsed() >= TICK {
            let commands = self.panel.tick();
            self.send_all(commands);
            self.last_tick = Instant::now();
        }

        egui::SidePanel::left("controls")
            .resizable(false)
            .show(ctx, |ui| self.draw_controls(ui));
        if let Some(servos) = &mut self.servos {
            egui::SidePanel::right("servos")
                .resizable(false)
                .show(ctx, |ui| egui::ScrollArea::vertical().show(ui, |ui| servos.draw(ui)));
        }
        egui::CentralPanel::default().show(ctx, |ui| self.draw_plots(ui));

        // Keeps the control tick going while no samples arrive.
        let until_tick = TICK.saturating_sub(self.last_tick.elapsed());
        ctx.request_repaint_after(until_tick.max(Duration::from_millis(1)));
    }
}

impl Drop for ImuVis {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if link.send(GimbalCommand::Stop).is_err() {
            warn!("link closed before STOP could be sent");
        }
        link.shutdown();
    }
}

fn time_series(trace: &Trace, angle: fn(Orientation) -> f32) -> Vec<egui_plot::PlotPoint> {
    trace
        .iter()
        .map(|point| egui_plot::PlotPoint::new(point.index as f64, angle(point.orientation)))
        .collect()
}

fn path(trace: &Trace) -> Vec<egui_plot::PlotPoint> {
    trace
        .iter()
        .map(|point| egui_plot::PlotPoint::new(point.orientation.yaw, point.orientation.pitch))
        .collect()
}
