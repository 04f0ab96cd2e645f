use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// First port handed out to clients.
    pub min_port: u16,
    /// Last port handed out to clients, inclusive.
    pub max_port: u16,
    pub cleanup_interval: Duration,
    pub inactivity_timeout: Duration,
    /// Longest a single receive waits before the loop checks for shutdown.
    pub read_timeout: Duration,
    /// Datagrams handled per `tick_once` before housekeeping runs.
    pub max_datagrams_per_tick: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            min_port: 9000,
            max_port: 9100,
            cleanup_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_millis(10),
            max_datagrams_per_tick: 256,
        }
    }
}
