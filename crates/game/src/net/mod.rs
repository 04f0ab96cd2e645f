mod command;
mod config;
mod endpoint;
mod handshake;
mod protocol;
mod rtt;
mod session;
mod stats;

pub use command::{Command, Direction};
pub use config::SessionConfig;
pub use endpoint::{NetworkEndpoint, is_transient};
pub use handshake::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL, HandshakeAction, HandshakeError, HandshakeState,
    SessionHandshake, Transition,
};
pub use protocol::{
    DEFAULT_SERVER_PORT, DEFAULT_TICK_RATE, DefaultRtt, Frame, FrameBuf, MAX_FRAME_SIZE, Message,
    MoveData, MoveDataRtt, PortAssignment, PortRequest, PositionData, PositionDataRtt,
    ProtocolError, UserAssignment, UserId, get_command,
};
pub use rtt::{DEFAULT_MAX_AGE, DEFAULT_MAX_PENDING, RttTracker, duration_ms};
pub use session::{NetworkSession, NoopObserver, SessionError, SessionEvent, SessionObserver};
pub use stats::NetworkStats;
