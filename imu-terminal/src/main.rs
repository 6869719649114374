mod control_tab;
mod logs_tab;

use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use gimbal_host::{ControlPanel, HISTORY_LEN, ImuSession, Link, LinkEvent, TICK, Trace};
use gimbal_messages::{DEFAULT_BAUD, GimbalCommand, Mode};
use ratatui::DefaultTerminal;
use ratatui::Frame;
use ratatui::crossterm::event::{self, Event, KeyCode};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Style, Stylize};
use ratatui::symbols::Marker;
use ratatui::text::Line;
use ratatui::widgets::{Axis, Block, Chart, Dataset, GraphType, Paragraph};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use control_tab::{ControlTab, HELP, TerminalCommand};
use logs_tab::{LogsTab, LogsTabKind, LogsWriter};

/// Terminal controller for the IMU gimbal.
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
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (tx_logs, rx_logs) = mpsc::channel();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(LogsWriter::new(tx_logs))
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .init();

    let port = gimbal_host::connect(args.port.as_deref(), args.baud)?;
    let link = Link::spawn(port, || {});

    let terminal = ratatui::init();
    let app_result = App::new(args.mode).run(terminal, &link, &rx_logs);
    ratatui::restore();

    if link.send(GimbalCommand::Stop).is_err() {
        warn!("link closed before STOP could be sent");
    }
    link.shutdown();
    app_result
}

struct App {
    session: ImuSession,
    panel: ControlPanel,
    control_tab: ControlTab,
    logs_tabs: [LogsTab; 2],
    active_logs_tab: LogsTabKind,
}

impl App {
    fn new(mode: Mode) -> Self {
        Self {
            session: ImuSession::default(),
            panel: ControlPanel::new(mode),
            control_tab: ControlTab::new(),
            logs_tabs: LogsTabKind::ALL.map(LogsTab::new),
            active_logs_tab: LogsTabKind::Device,
        }
    }

    fn draw(&self, frame: &mut Frame) {
        let layout = Layout::new(
            Direction::Horizontal,
            [Constraint::Length(44), Constraint::Fill(1)],
        );
        let [controls, view] = layout.areas(frame.area());
        let [status, command] =
            Layout::vertical([Constraint::Length(9), Constraint::Fill(1)]).areas(controls);
        let [chart, logging] =
            Layout::vertical([Constraint::Percentage(55), Constraint::Fill(1)]).areas(view);

        frame.render_widget(self.status(), status);
        self.control_tab.draw(frame, command);
        self.draw_chart(frame, chart);
        self.logs_tabs[self.active_logs_tab as usize].draw(frame, logging, self.active_logs_tab);
    }

    fn status(&self) -> Paragraph<'static> {
        let [s1, s2, s3] = self.panel.targets();
        let running = if self.panel.running() {
            "running".green()
        } else {
            "stopped".red()
        };

        let mut lines = vec![
            Line::from(vec![
                format!("Mode    {} ", self.panel.mode()).into(),
                running,
            ]),
            Line::raw(format!("Speed   {:.1}", self.panel.speed())),
            Line::raw(format!("Servos  {s1} {s2} {s3}")),
        ];
        lines.push(match self.session.latest() {
            Some(sample) => {
                let o = sample.filtered;
                Line::raw(format!("IMU     {:7.1} {:7.1} {:7.1}", o.yaw, o.pitch, o.roll))
            }
            None => Line::raw("IMU     waiting for data").dim(),
        });
        lines.push(match self.session.second_imu() {
            Some(o) => Line::raw(format!("IMU2    {:7.1} {:7.1} {:7.1}", o.yaw, o.pitch, o.roll)),
            None => Line::raw("IMU2    -").dim(),
        });
        let [x, y, z] = self.session.heading();
        lines.push(Line::raw(format!("Heading {x:5.2} {y:5.2} {z:5.2}")));
        lines.push(Line::raw(format!(
            "Yaw     {}, {} samples",
            if self.session.continuous_yaw() {
                "continuous"
            } else {
                "wrapped"
            },
            self.session.samples()
        )));

        Paragraph::new(lines).block(Block::bordered().title("Gimbal"))
    }

    fn draw_chart(&self, frame: &mut Frame, area: Rect) {
        let trace = self.session.filtered();
        let series = [
            ("yaw", points(trace, |o| o.yaw)),
            ("pitch", points(trace, |o| o.pitch)),
            ("roll", points(trace, |o| o.roll)),
        ];
        let styles = [Style::new().red(), Style::new().green(), Style::new().cyan()];
        let datasets = series
            .iter()
            .zip(styles)
            .map(|((name, data), style)| {
                Dataset::default()
                    .name(*name)
                    .marker(Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(style)
                    .data(data)
            })
            .collect::<Vec<_>>();

        let start = trace.iter().next().map_or(0, |point| point.index) as f64;
        let end = start + HISTORY_LEN as f64;
        let range = f64::from(self.session.auto_range());

        let chart = Chart::new(datasets)
            .block(Block::bordered().title("Orientation"))
            .x_axis(Axis::default().bounds([start, end]).style(Style::new().gray()))
            .y_axis(
                Axis::default()
                    .bounds([-range, range])
                    .style(Style::new().gray())
                    .labels([format!("{:.0}", -range), "0".to_owned(), format!("{range:.0}")]),
            );
        frame.render_widget(chart, area);
    }

    fn run(
        mut self,
        mut terminal: DefaultTerminal,
        link: &Link,
        logs: &Receiver<(LogsTabKind, Line<'static>)>,
    ) -> Result<()> {
        let tick_rate = Duration::from_millis(5);
        let (tx_commands, rx_commands) = mpsc::channel();

        link.send_all(self.panel.startup())?;
        let mut last_tick = Instant::now();

        loop {
            for (tab, line) in logs.try_iter() {
                self.logs_tabs[tab as usize].push(line);
            }
            for event in link.events() {
                link.send_all(self.handle_link_event(event))?;
            }
            for command in rx_commands.try_iter() {
                match self.apply(command) {
                    ControlFlow::Continue(commands) => link.send_all(commands)?,
                    ControlFlow::Break(()) => return Ok(()),
                }
            }
            if last_tick.elapsed() >= TICK {
                link.send_all(self.panel.tick())?;
                last_tick = Instant::now();
            }

            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(tick_rate)? {
                let event = event::read()?;
                if self.control_tab.handle_event(&event, &tx_commands) {
                    continue;
                }
                if let Event::Key(key) = event {
                    match key.code {
                        KeyCode::Char('i') | KeyCode::Char(':') | KeyCode::Enter => {
                            self.control_tab.toggle_input()
                        }
                        KeyCode::Char('1') => self.active_logs_tab = LogsTabKind::Device,
                        KeyCode::Char('2') => self.active_logs_tab = LogsTabKind::Host,
                        KeyCode::Esc | KeyCode::Char('q') => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Commands to send in response to a device event.
    fn handle_link_event(&mut self, event: LinkEvent) -> Vec<GimbalCommand> {
        match event {
            LinkEvent::Euler(orientation) => {
                self.session.ingest(orientation);
            }
            LinkEvent::SecondImu(orientation) => {
                self.session.ingest_second(orientation);
                return self.panel.follow(orientation);
            }
            LinkEvent::Text(text) => self.logs_tabs[LogsTabKind::Device as usize].push(text.into()),
            // Already logged by the link worker.
            LinkEvent::Malformed { .. } => {}
            LinkEvent::Sent(command) => self.logs_tabs[LogsTabKind::Host as usize]
                .push(Line::raw(format!("-> {command}")).dim()),
        }
        Vec::new()
    }

    fn apply(&mut self, command: TerminalCommand) -> ControlFlow<(), Vec<GimbalCommand>> {
        let commands = match command {
            TerminalCommand::Quit => return ControlFlow::Break(()),
            TerminalCommand::Stop => vec![self.panel.stop()],
            TerminalCommand::Start => self.panel.start(),
            TerminalCommand::Home => vec![self.panel.home()],
            TerminalCommand::Zero => {
                self.session.zero();
                vec![self.panel.zero()]
            }
            TerminalCommand::Mode(mode) => {
                self.panel.select_mode(mode);
                self.panel.sync(self.session.second_imu())
            }
            TerminalCommand::Speed(speed) => match self.panel.send_speed(speed) {
                Ok(command) => vec![command],
                Err(error) => {
                    warn!(%error, "speed rejected");
                    Vec::new()
                }
            },
            TerminalCommand::Control(targets) => match self.panel.set_targets(targets) {
                Ok(()) => {
                    self.panel.select_mode(Mode::Control);
                    self.panel.sync(None)
                }
                Err(error) => {
                    warn!(%error, "targets rejected");
                    Vec::new()
                }
            },
            TerminalCommand::ToggleContinuousYaw => {
                let continuous_yaw = !self.session.continuous_yaw();
                self.session.set_continuous_yaw(continuous_yaw);
                info!(continuous_yaw, "yaw handling changed");
                Vec::new()
            }
            TerminalCommand::ResetTrace => {
                self.session.reset_plot();
                Vec::new()
            }
            TerminalCommand::Help => {
                let logs = &mut self.logs_tabs[LogsTabKind::Host as usize];
                for line in HELP {
                    logs.push(Line::raw(line));
                }
                self.active_logs_tab = LogsTabKind::Host;
                Vec::new()
            }
        };
        ControlFlow::Continue(commands)
    }
}

fn points(trace: &Trace, angle: impl Fn(gimbal_messages::Orientation) -> f32) -> Vec<(f64, f64)> {
    trace
        .iter()
        .map(|point| (point.index as f64, f64::from(angle(point.orientation))))
        .collect()
}

#[cfg(test)]
mod tests {
    use gimbal_messages::Orientation;

    use super::*;

    fn running(mode: Mode) -> App {
        let mut app = App::new(mode);
        app.panel.startup();
        app
    }

    #[test]
    fn zero_resets_filter_and_device() {
        let mut app = running(Mode::Random);
        for _ in 0..20 {
            app.handle_link_event(LinkEvent::Euler(Orientation::new(90.0, 0.0, 0.0)));
        }

        assert_eq!(
            app.apply(TerminalCommand::Zero),
            ControlFlow::Continue(vec![GimbalCommand::Zero])
        );
        app.handle_link_event(LinkEvent::Euler(Orientation::new(0.0, 0.0, 0.0)));
        let sample = app.session.latest().unwrap();
        assert!(sample.filtered.yaw.abs() < 0.1, "{}", sample.filtered.yaw);
    }

    #[test]
    fn second_imu_drives_follow_mode() {
        let mut app = running(Mode::Follow);

        let commands =
            app.handle_link_event(LinkEvent::SecondImu(Orientation::new(10.0, -20.0, 0.0)));
        assert_eq!(commands, [GimbalCommand::Control([100, 70, 90])]);
        assert!(app.session.second_imu().is_some());

        let _ = app.apply(TerminalCommand::Stop);
        assert!(
            app.handle_link_event(LinkEvent::SecondImu(Orientation::new(10.0, -20.0, 0.0)))
                .is_empty()
        );
    }

    #[test]
    fn speed_is_sent_even_for_small_steps() {
        let mut app = running(Mode::Random);

        assert_eq!(
            app.apply(TerminalCommand::Speed(2.05)),
            ControlFlow::Continue(vec![GimbalCommand::Speed(2.05)])
        );
        assert_eq!(
            app.apply(TerminalCommand::Speed(99.0)),
            ControlFlow::Continue(Vec::new())
        );
    }

    #[test]
    fn start_after_speed_change() {
        let mut app = running(Mode::Random);
        let _ = app.apply(TerminalCommand::Stop);
        *app.panel.speed_mut() = 7.0;

        assert_eq!(
            app.apply(TerminalCommand::Start),
            ControlFlow::Continue(vec![GimbalCommand::Start, GimbalCommand::Speed(7.0)])
        );
    }

    #[test]
    fn quit_breaks() {
        assert!(App::new(Mode::Random).apply(TerminalCommand::Quit).is_break());
    }
}
