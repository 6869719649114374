use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gimbal_messages::{GimbalCommand, LineError, LineStreamDecoder, Orientation, SensorLine};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, error, warn};

use crate::HostError;

/// Back-off after a read that returned nothing or failed.
const IDLE: Duration = Duration::from_millis(5);

/// Byte stream the link worker talks to, a serial port outside of tests.
pub trait SerialIo: Read + Write + Send {
    /// Throws away whatever the device sent but was not read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl SerialIo for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Euler(Orientation),
    SecondImu(Orientation),
    /// Free text printed by the firmware.
    Text(String),
    /// Orientation line that failed to parse.
    Malformed { line: String, error: LineError },
    /// Command that was written to the device.
    Sent(GimbalCommand),
}

/// Handle to the worker thread that owns the serial port.
///
/// Dropping the handle disconnects both channels, which stops the worker.
pub struct Link {
    commands: Sender<GimbalCommand>,
    events: Receiver<LinkEvent>,
    worker: JoinHandle<()>,
}

impl Link {
    /// Starts the worker. `notify` is called after every event, e.g. to wake up a UI.
    pub fn spawn<Io>(io: Io, notify: impl Fn() + Send + 'static) -> Self
    where
        Io: SerialIo + 'static,
    {
        let (commands, rx_commands) = mpsc::channel();
        let (tx_events, events) = mpsc::channel();

        let worker = thread::spawn(move || link_worker(io, &rx_commands, &tx_events, notify));

        Self {
            commands,
            events,
            worker,
        }
    }

    pub fn send(&self, command: GimbalCommand) -> Result<(), HostError> {
        self.commands
            .send(command)
            .map_err(|_| HostError::LinkClosed)
    }

    pub fn send_all(
        &self,
        commands: impl IntoIterator<Item = GimbalCommand>,
    ) -> Result<(), HostError> {
        commands.into_iter().try_for_each(|command| self.send(command))
    }

    /// Events received since the last call, without blocking.
    pub fn events(&self) -> impl Iterator<Item = LinkEvent> + '_ {
        self.events.try_iter()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<LinkEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Lets the worker write out pending commands, then waits for it to stop.
    pub fn shutdown(self) {
        let Self {
            commands,
            events,
            worker,
        } = self;
        drop(commands);
        drop(events);
        if worker.join().is_err() {
            error!("link worker panicked");
        }
    }
}

fn link_worker<Io: SerialIo>(
    mut io: Io,
    rx_commands: &Receiver<GimbalCommand>,
    tx_events: &Sender<LinkEvent>,
    notify: impl Fn(),
) {
    let mut decoder = LineStreamDecoder::new();

    'thread: loop {
        // Write pending commands
        'commands: loop {
            let command = match rx_commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => break 'commands,
                Err(TryRecvError::Disconnected) => break 'thread,
            };
            if let Err(error) = write_command(&mut io, command) {
                error!(%command, %error, "write failed");
                continue;
            }
            debug!(%command, "sent");
            // The receiver may already be gone during shutdown, the command is out either way.
            let _ = tx_events.send(LinkEvent::Sent(command));
        }

        // Receive
        let discarded = decoder.discarded();
        let mut result = Ok(());
        let len = decoder.receive(|buffer| match io.read(buffer) {
            Ok(len) => len,
            Err(error) => {
                result = Err(error);
                0
            }
        });
        if decoder.discarded() != discarded {
            warn!("line buffer overflowed without a newline, input discarded");
        }

        match result {
            Ok(()) if len == 0 => thread::sleep(IDLE),
            Ok(()) => {}
            Err(error) if is_transient(&error) => {}
            Err(error) => {
                warn!(%error, "read failed, clearing input");
                decoder.clear();
                if let Err(error) = io.clear_input() {
                    error!(%error, "could not clear input");
                }
                thread::sleep(IDLE);
            }
        }

        // Decode
        for line in &mut decoder {
            let event = match SensorLine::parse(&line) {
                Ok(SensorLine::Euler(orientation)) => LinkEvent::Euler(orientation),
                Ok(SensorLine::SecondImu(orientation)) => LinkEvent::SecondImu(orientation),
                Ok(SensorLine::Text("")) => continue,
                Ok(SensorLine::Text(text)) => LinkEvent::Text(text.to_owned()),
                Err(error) => {
                    warn!(%line, %error, "malformed line");
                    LinkEvent::Malformed {
                        line: line.clone(),
                        error,
                    }
                }
            };
            let Ok(..) = tx_events.send(event) else {
                break 'thread;
            };
            notify();
        }
    }

    debug!("link worker stopped");
}

fn write_command(io: &mut impl Write, command: GimbalCommand) -> io::Result<()> {
    io.write_all(command.encode().as_bytes())?;
    io.flush()
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
