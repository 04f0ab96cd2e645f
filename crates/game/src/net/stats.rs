#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub port_requests_sent: u64,
    pub send_failures: u64,
    /// Frames shorter than their variant.
    pub malformed_frames: u64,
    pub unknown_commands: u64,
    /// Valid frames this client has no handler for.
    pub unhandled_commands: u64,
    /// Position broadcasts carrying our own user id.
    pub self_echoes: u64,
    /// RTT echoes with no pending send.
    pub unmatched_echoes: u64,
    pub expired_rtt_entries: u64,
    pub rtt_ms: f64,
    pub rtt_avg_ms: f64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}
