//! Host side of the gimbal: serial link, orientation session and servo control state.

mod control;
mod error;
mod link;
mod port;
mod session;
mod trace;

pub use control::{ControlPanel, TICK};
pub use error::{ControlError, HostError};
pub use link::{Link, LinkEvent, SerialIo};
pub use port::{READ_TIMEOUT, connect, find_gimbal_port, open_port};
pub use session::ImuSession;
pub use trace::{HISTORY_LEN, Trace, TracePoint};
