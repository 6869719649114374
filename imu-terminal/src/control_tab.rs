use std::{iter::Peekable, sync::mpsc::Sender};

use anyhow::{Result, bail};
use gimbal_messages::{MAX_SERVO_ANGLE, MAX_SPEED, MIN_SPEED, Mode};
use logos::{Lexer, Logos};
use ratatui::{
    crossterm::event::{Event, KeyCode},
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Styled},
    text::Line,
    widgets::{Block, Borders, Paragraph},
};
use tui_input::{Input, backend::crossterm::EventHandler};

pub const HELP: [&str; 11] = [
    "Q                      quit",
    "S                      stop movement",
    "G                      start movement",
    "H                      home servos",
    "Z                      zero IMU",
    "M RANDOM|CONTROL|FOLLOW set mode",
    "SPEED 0.5-10.0         movement speed",
    "CONTROL a b c          servo angles 0-180",
    "Y                      toggle continuous yaw",
    "R                      reset trace",
    "?                      this help",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminalCommand {
    Quit,
    Stop,
    Start,
    Home,
    Zero,
    Mode(Mode),
    Speed(f32),
    Control([u16; 3]),
    ToggleContinuousYaw,
    ResetTrace,
    Help,
}

/// Submitted commands kept for recall with the arrow keys.
const HISTORY: usize = 32;

/// Command line of the terminal. Typed text is parsed on every keystroke so errors show up early.
pub struct ControlTab {
    editing: bool,
    input: Input,
    parsed: Result<Option<TerminalCommand>>,

    history: Vec<String>,
    /// Position while browsing the history, `None` when editing fresh text.
    recalled: Option<usize>,
}

impl ControlTab {
    pub fn new() -> Self {
        Self {
            editing: false,
            input: Input::default(),
            parsed: Ok(None),
            history: Vec::new(),
            recalled: None,
        }
    }

    /// Returns whether the event was consumed by the input line.
    pub fn handle_event(&mut self, event: &Event, tx_commands: &Sender<TerminalCommand>) -> bool {
        if !self.editing {
            return false;
        }

        match event.as_key_event().map(|key| key.code) {
            Some(KeyCode::Esc) => self.editing = false,
            Some(KeyCode::Enter) => self.submit(tx_commands),
            Some(KeyCode::Up) => self.recall(true),
            Some(KeyCode::Down) => self.recall(false),
            _ => {
                self.input.handle_event(event);
                self.recalled = None;
                self.parsed = parse_input(self.input.value());
            }
        }
        true
    }

    fn submit(&mut self, tx_commands: &Sender<TerminalCommand>) {
        let parsed = std::mem::replace(&mut self.parsed, Ok(None));
        let Ok(Some(command)) = parsed else {
            // Keep the text so the error can be fixed.
            self.parsed = parsed;
            return;
        };

        _ = tx_commands.send(command);
        let text = self.input.value().trim().to_owned();
        if self.history.last() != Some(&text) {
            if self.history.len() == HISTORY {
                self.history.remove(0);
            }
            self.history.push(text);
        }
        self.input.reset();
        self.recalled = None;
    }

    fn recall(&mut self, older: bool) {
        let Some(last) = self.history.len().checked_sub(1) else {
            return;
        };
        self.recalled = match (self.recalled, older) {
            (None, true) => Some(last),
            (None, false) => None,
            (Some(index), true) => Some(index.saturating_sub(1)),
            (Some(index), false) if index < last => Some(index + 1),
            (Some(_), false) => None,
        };

        let text = self
            .recalled
            .map_or_else(String::new, |index| self.history[index].clone());
        self.parsed = parse_input(&text);
        self.input = Input::new(text);
    }

    pub fn draw(&self, frame: &mut ratatui::Frame, area: Rect) {
        let [input_area, feedback_area, help_area] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Fill(1),
        ])
        .areas(area);

        let border = Style::from(match self.parsed {
            Ok(None) => Color::White,
            Ok(Some(_)) => Color::LightGreen,
            Err(_) => Color::LightRed,
        });
        let title = if self.editing {
            "Command (Esc to leave)"
        } else {
            "Command (i to edit)"
        };

        // inner width minus one column for the cursor
        let width = input_area.width.saturating_sub(3);
        let scroll = self.input.visual_scroll(width as usize);
        let mut input = Paragraph::new(self.input.value())
            .style(Color::Gray)
            .scroll((0, scroll as u16))
            .block(Block::bordered().border_style(border).title(title));
        if self.editing {
            let cursor = self.input.visual_cursor().saturating_sub(scroll) as u16;
            frame.set_cursor_position((input_area.x + 1 + cursor, input_area.y + 1));
        } else {
            input = input.set_style(Style::from(Color::Gray).dim());
        }

        let feedback = match &self.parsed {
            Ok(None) => Line::default(),
            Ok(Some(command)) => Line::from(format!("{command:?}")).style(Color::LightGreen),
            Err(error) => Line::from(error.to_string()).style(Color::LightRed),
        };
        let help = Paragraph::new(HELP.map(Line::from).to_vec())
            .style(Color::DarkGray)
            .block(Block::default().borders(Borders::TOP).title("Help"));

        frame.render_widget(input, input_area);
        frame.render_widget(Paragraph::new(feedback), feedback_area);
        frame.render_widget(help, help_area);
    }

    pub fn toggle_input(&mut self) {
        self.editing = !self.editing;
    }
}

/// Format, case insensitive
/// ```text
/// Q | S | G | H | Z | Y | R | ?
/// M RANDOM|CONTROL|FOLLOW
/// SPEED f32
/// CONTROL u8 u8 u8
/// ```
pub fn parse_input(text: &str) -> Result<Option<TerminalCommand>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut tokens = Token::lexer(text).peekable();

    fn consume_number(tokens: &mut Peekable<Lexer<'_, Token>>) -> Result<f32> {
        let Some(Ok(Token::Number(number))) = tokens.next() else {
            bail!("Expected number");
        };
        Ok(number)
    }

    fn consume_angle(tokens: &mut Peekable<Lexer<'_, Token>>) -> Result<u16> {
        let angle = consume_number(tokens)?;
        if angle.fract() != 0.0 || !(0.0..=f32::from(MAX_SERVO_ANGLE)).contains(&angle) {
            bail!("Angle {angle} is not a whole number in 0-{MAX_SERVO_ANGLE}");
        }
        Ok(angle as u16)
    }

    let command = match tokens.next() {
        Some(Ok(Token::Question)) => TerminalCommand::Help,
        Some(Ok(Token::Word(word))) => match word.to_ascii_uppercase().as_str() {
            "Q" => TerminalCommand::Quit,
            "S" => TerminalCommand::Stop,
            "G" => TerminalCommand::Start,
            "H" => TerminalCommand::Home,
            "Z" => TerminalCommand::Zero,
            "Y" => TerminalCommand::ToggleContinuousYaw,
            "R" => TerminalCommand::ResetTrace,
            "M" => {
                let Some(Ok(Token::Word(mode))) = tokens.next() else {
                    bail!("Expected mode");
                };
                TerminalCommand::Mode(mode.parse()?)
            }
            "SPEED" => {
                let speed = consume_number(&mut tokens)?;
                if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
                    bail!("Speed must be within {MIN_SPEED}-{MAX_SPEED}");
                }
                TerminalCommand::Speed(speed)
            }
            "CONTROL" => TerminalCommand::Control([
                consume_angle(&mut tokens)?,
                consume_angle(&mut tokens)?,
                consume_angle(&mut tokens)?,
            ]),
            _ => bail!("Unknown command: {word}"),
        },
        Some(Ok(token)) => bail!("Expected command got {token:?}"),
        Some(Err(_)) => bail!("Invalid token"),
        None => return Ok(None),
    };

    if tokens.next().is_some() {
        bail!("Unexpected input after command");
    }

    Ok(Some(command))
}

#[derive(Logos, PartialEq, Debug)]
#[logos(skip r"[ \t\n,]+")]
enum Token {
    #[regex("[a-zA-Z_]+", |lex| lex.slice().to_owned())]
    Word(String),

    #[regex(r"-?[0-9]+(\.[0-9]*)?", |lex| lex.slice().parse().ok())]
    #[regex(r"-?\.[0-9]+", |lex| lex.slice().parse().ok())]
    Number(f32),

    #[token("?")]
    Question,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<TerminalCommand> {
        parse_input(text).unwrap()
    }

    #[test]
    fn single_letters() {
        assert_eq!(parse("q"), Some(TerminalCommand::Quit));
        assert_eq!(parse(" S "), Some(TerminalCommand::Stop));
        assert_eq!(parse("g"), Some(TerminalCommand::Start));
        assert_eq!(parse("H"), Some(TerminalCommand::Home));
        assert_eq!(parse("z"), Some(TerminalCommand::Zero));
        assert_eq!(parse("y"), Some(TerminalCommand::ToggleContinuousYaw));
        assert_eq!(parse("r"), Some(TerminalCommand::ResetTrace));
        assert_eq!(parse("?"), Some(TerminalCommand::Help));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn mode() {
        assert_eq!(parse("m follow"), Some(TerminalCommand::Mode(Mode::Follow)));
        assert_eq!(parse("M CONTROL"), Some(TerminalCommand::Mode(Mode::Control)));
        assert!(parse_input("M HOME").is_err());
        assert!(parse_input("M").is_err());
    }

    #[test]
    fn speed() {
        assert_eq!(parse("speed 2.5"), Some(TerminalCommand::Speed(2.5)));
        assert_eq!(parse("SPEED 10"), Some(TerminalCommand::Speed(10.0)));
        assert_eq!(parse("SPEED .5"), Some(TerminalCommand::Speed(0.5)));
        assert!(parse_input("SPEED 0.4").is_err());
        assert!(parse_input("SPEED 11").is_err());
        assert!(parse_input("SPEED fast").is_err());
    }

    #[test]
    fn control() {
        assert_eq!(
            parse("control 0 90 180"),
            Some(TerminalCommand::Control([0, 90, 180]))
        );
        assert_eq!(
            parse("CONTROL 10, 20, 30"),
            Some(TerminalCommand::Control([10, 20, 30]))
        );
        assert!(parse_input("CONTROL 0 90").is_err());
        assert!(parse_input("CONTROL 0 90 181").is_err());
        assert!(parse_input("CONTROL 0 -1 90").is_err());
        assert!(parse_input("CONTROL 0 1.5 90").is_err());
    }

    #[test]
    fn history_recall() {
        use ratatui::crossterm::event::KeyEvent;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut tab = ControlTab::new();
        tab.toggle_input();
        let press = |tab: &mut ControlTab, code: KeyCode| {
            assert!(tab.handle_event(&Event::Key(KeyEvent::from(code)), &tx));
        };

        for text in ["g", "speed 3"] {
            for c in text.chars() {
                press(&mut tab, KeyCode::Char(c));
            }
            press(&mut tab, KeyCode::Enter);
        }
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [TerminalCommand::Start, TerminalCommand::Speed(3.0)]
        );
        assert_eq!(tab.input.value(), "");

        press(&mut tab, KeyCode::Up);
        assert_eq!(tab.input.value(), "speed 3");
        press(&mut tab, KeyCode::Up);
        press(&mut tab, KeyCode::Up);
        assert_eq!(tab.input.value(), "g");
        press(&mut tab, KeyCode::Down);
        assert_eq!(tab.input.value(), "speed 3");
        press(&mut tab, KeyCode::Down);
        assert_eq!(tab.input.value(), "");
    }

    #[test]
    fn invalid_input_is_kept() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut tab = ControlTab::new();
        assert!(!tab.handle_event(&Event::Key(KeyCode::Char('q').into()), &tx));

        tab.toggle_input();
        for c in "speed 99".chars() {
            tab.handle_event(&Event::Key(KeyCode::Char(c).into()), &tx);
        }
        tab.handle_event(&Event::Key(KeyCode::Enter.into()), &tx);

        assert!(rx.try_recv().is_err());
        assert_eq!(tab.input.value(), "speed 99");
        assert!(tab.parsed.is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_input("FLY").is_err());
        assert!(parse_input("Q Q").is_err());
        assert!(parse_input("42").is_err());
        assert!(parse_input("G!").is_err());
    }
}
