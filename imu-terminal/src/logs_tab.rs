use std::fmt::Display;
use std::io;
use std::sync::mpsc::Sender;

use ratatui::{
    Frame,
    layout::Rect,
    style::{Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Paragraph},
};
use tracing_subscriber::fmt::MakeWriter;

/// Older lines are dropped beyond this.
const MAX_LINES: usize = 2000;

pub struct LogsTab {
    pub kind: LogsTabKind,
    pub lines: Vec<Line<'static>>,
}

impl LogsTab {
    pub fn new(kind: LogsTabKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: Line<'static>) {
        if self.lines.len() == MAX_LINES {
            self.lines.remove(0);
        }
        self.lines.push(line);
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, active: LogsTabKind) {
        let title = LogsTabKind::ALL
            .iter()
            .flat_map(|&kind| {
                let label = Span::raw(format!(" {} {kind} ", kind as u8 + 1));
                let label = if kind == active {
                    label.reversed()
                } else {
                    label.dim()
                };
                [label, Span::raw(" ")]
            })
            .collect::<Vec<_>>();
        let log_block = Block::bordered().title(Line::from(title));
        let num_lines = log_block.inner(area).height;
        let log_lines: Vec<_> = self
            .lines
            .iter()
            .rev()
            .take(num_lines as usize)
            .rev()
            .cloned()
            .collect();
        let logging_view = Paragraph::new(log_lines).block(log_block);

        frame.render_widget(logging_view, area);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LogsTabKind {
    /// Text printed by the gimbal firmware.
    Device = 0,
    /// Our own tracing output.
    Host = 1,
}

impl LogsTabKind {
    pub const ALL: [Self; 2] = [Self::Device, Self::Host];
}

impl Display for LogsTabKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Device => "Device",
            Self::Host => "Host",
        })
    }
}

/// Tracing writer that forwards formatted events to the host logs tab.
#[derive(Clone)]
pub struct LogsWriter {
    tx: Sender<(LogsTabKind, Line<'static>)>,
}

impl LogsWriter {
    pub fn new(tx: Sender<(LogsTabKind, Line<'static>)>) -> Self {
        Self { tx }
    }
}

impl io::Write for LogsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            // Nothing to show the line in once the UI is gone.
            let _ = self.tx.send((LogsTabKind::Host, format_log_line(line)));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogsWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Colors the level of a line formatted as `LEVEL message`.
fn format_log_line(text: &str) -> Line<'static> {
    let trimmed = text.trim_start();
    let (level, message) = trimmed.split_once(' ').unwrap_or((trimmed, ""));

    let style = Style::new().bold();
    let style = match level {
        "TRACE" | "DEBUG" => style.blue(),
        "INFO" => style.green(),
        "WARN" => style.yellow(),
        "ERROR" => style.red(),
        _ => return Line::raw(text.to_owned()),
    };

    let mut line = Line::default();
    line.push_span("[");
    line.push_span(Span::raw(level.to_owned()).style(style));
    line.push_span("] ");
    line.push_span(Span::raw(message.trim_start().to_owned()));
    line
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::mpsc;

    use super::*;

    fn text(line: &Line) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    #[test]
    fn levels_are_bracketed() {
        assert_eq!(text(&format_log_line(" INFO opened serial port")), "[INFO] opened serial port");
        assert_eq!(text(&format_log_line("WARN  malformed line")), "[WARN] malformed line");
        assert_eq!(text(&format_log_line("plain text")), "plain text");
    }

    #[test]
    fn writer_splits_lines() {
        let (tx, rx) = mpsc::channel();
        let mut writer = LogsWriter::new(tx);
        writer.write_all(b" INFO one\n\nERROR two\n").unwrap();

        let lines: Vec<_> = rx.try_iter().map(|(kind, line)| (kind, text(&line))).collect();
        assert_eq!(
            lines,
            [
                (LogsTabKind::Host, "[INFO] one".to_owned()),
                (LogsTabKind::Host, "[ERROR] two".to_owned()),
            ]
        );
    }

    #[test]
    fn keeps_recent_lines() {
        let mut tab = LogsTab::new(LogsTabKind::Device);
        for i in 0..MAX_LINES + 5 {
            tab.push(Line::from(i.to_string()));
        }
        assert_eq!(tab.lines.len(), MAX_LINES);
        assert_eq!(text(&tab.lines[0]), "5");
    }
}
