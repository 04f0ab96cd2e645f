use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::handshake::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
use super::protocol::{DEFAULT_SERVER_PORT, DEFAULT_TICK_RATE};
use super::rtt::{DEFAULT_MAX_AGE, DEFAULT_MAX_PENDING};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Well-known endpoint that answers port requests.
    pub server_addr: SocketAddr,
    /// Local address both the ephemeral socket and the assigned-port
    /// listener bind to.
    pub bind_ip: IpAddr,
    /// Position updates per second.
    pub tick_rate: u32,
    pub handshake_retry_interval: Duration,
    /// `None` retries forever.
    pub max_handshake_attempts: Option<u32>,
    pub rtt_max_pending: usize,
    pub rtt_max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_SERVER_PORT),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tick_rate: DEFAULT_TICK_RATE,
            handshake_retry_interval: DEFAULT_RETRY_INTERVAL,
            max_handshake_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            rtt_max_pending: DEFAULT_MAX_PENDING,
            rtt_max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
