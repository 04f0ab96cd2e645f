pub mod net;
pub mod player;

pub use net::{
    Command, DEFAULT_SERVER_PORT, DEFAULT_TICK_RATE, Direction, Frame, FrameBuf, HandshakeState,
    Message, NetworkEndpoint, NetworkSession, NetworkStats, ProtocolError, RttTracker,
    SessionConfig, SessionError, SessionEvent, SessionHandshake, SessionObserver, UserId,
};
pub use player::{Pose, PoseSource, RemotePlayer, RemotePlayers, SharedPose};
