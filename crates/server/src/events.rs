use std::net::SocketAddr;

use posync::UserId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientRegistered {
        user_id: UserId,
        addr: SocketAddr,
        listen_port: u16,
    },
    RegistrationFailed { addr: SocketAddr, reason: String },
    ClientTimedOut { user_id: UserId },
    Error { message: String },
}
