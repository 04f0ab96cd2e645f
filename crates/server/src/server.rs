use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use posync::net::{
    DefaultRtt, Frame, FrameBuf, MoveData, NetworkEndpoint, PortAssignment, PositionData,
    ProtocolError, UserAssignment, is_transient,
};
use posync::{Message, NetworkStats, Pose};

use crate::clients::{ClientEntry, ClientRegistry};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events::ServerEvent;
use crate::ports::PortPool;

const RECV_BUFFER_SIZE: usize = 1500;

/// Relay on the well-known port: hands out listen ports and user ids,
/// echoes RTT timestamps and fans position updates out to every other client.
pub struct GameServer {
    endpoint: NetworkEndpoint,
    clients: ClientRegistry,
    config: ServerConfig,
    frames: FrameBuf,
    stats: NetworkStats,
    running: Arc<AtomicBool>,
    last_cleanup: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: SocketAddr, config: ServerConfig) -> Result<Self, ServerError> {
        let endpoint = NetworkEndpoint::bind(bind_addr, config.read_timeout)?;

        Ok(Self {
            endpoint,
            clients: ClientRegistry::new(PortPool::new(config.min_port, config.max_port)),
            frames: FrameBuf::new(),
            stats: NetworkStats::default(),
            running: Arc::new(AtomicBool::new(true)),
            last_cleanup: Instant::now(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn available_ports(&self) -> usize {
        self.clients.available_ports()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Ticks until the running flag is cleared, handing every queued event
    /// to `on_event`.
    pub fn run(&mut self, mut on_event: impl FnMut(ServerEvent)) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            self.drain_events().for_each(&mut on_event);
        }
    }

    pub fn tick_once(&mut self) {
        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        let now = Instant::now();
        if now.saturating_duration_since(self.last_cleanup) >= self.config.cleanup_interval {
            self.last_cleanup = now;
            self.cleanup(now);
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        for _ in 0..self.config.max_datagrams_per_tick {
            match self.endpoint.recv_from(&mut buf) {
                Ok(Some((size, addr))) => self.handle_datagram(&buf[..size], addr, Instant::now()),
                Ok(None) => break,
                Err(e) if is_transient(&e) => {
                    log::debug!("Transient receive error: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr, now: Instant) {
        self.stats.record_received(data.len());

        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(e) => {
                match e {
                    ProtocolError::TruncatedFrame { .. } => self.stats.malformed_frames += 1,
                    ProtocolError::UnknownCommand(_) => self.stats.unknown_commands += 1,
                }
                log::debug!("Dropping datagram from {}: {}", addr, e);
                return;
            }
        };

        match message {
            Message::PortRequest(_) => self.handle_port_request(addr, now),
            Message::PositionRtt(frame) => {
                // Unknown senders are registered instead of relayed.
                let Some(client) = self.clients.get_by_addr(&addr).copied() else {
                    self.handle_port_request(addr, now);
                    return;
                };
                self.relay_position(&client, frame.position, now);
                self.echo_rtt(client.listen_addr(), frame.timestamp);
            }
            Message::Position(frame) => match self.clients.get_by_addr(&addr).copied() {
                Some(client) => self.relay_position(&client, frame, now),
                None => log::debug!("Position from unregistered {}", addr),
            },
            Message::MoveRtt(frame) => {
                self.log_move(&frame.movement);
                match self.clients.get(frame.movement.user_id).copied() {
                    Some(client) => self.echo_rtt(client.listen_addr(), frame.timestamp),
                    None => log::debug!("Move from unknown user {}", frame.movement.user_id),
                }
            }
            Message::Move(frame) => self.log_move(&frame),
            Message::DefaultRtt(_) | Message::UserAssignment(_) | Message::PortAssignment(_) => {
                log::debug!("Unhandled {} from {}", message.command(), addr);
                self.stats.unhandled_commands += 1;
            }
        }

        self.clients.touch(&addr, now);
    }

    fn handle_port_request(&mut self, addr: SocketAddr, now: Instant) {
        let (client, new) = match self.clients.register(addr, now) {
            Ok(registered) => registered,
            Err(e) => {
                log::warn!("Failed to register {}: {}", addr, e);
                self.pending_events.push_back(ServerEvent::RegistrationFailed {
                    addr,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if new {
            log::info!(
                "Registered user {} from {} (listen port {})",
                client.user_id,
                addr,
                client.listen_port
            );
            self.pending_events.push_back(ServerEvent::ClientRegistered {
                user_id: client.user_id,
                addr,
                listen_port: client.listen_port,
            });
        }

        let port_assignment = PortAssignment {
            user_id: client.user_id,
            port: client.listen_port,
        };
        self.send_frame(&port_assignment, addr);

        let user_assignment = UserAssignment {
            user_id: client.user_id,
        };
        self.send_frame(&user_assignment, client.listen_addr());
    }

    fn relay_position(&mut self, client: &ClientEntry, mut position: PositionData, now: Instant) {
        // The registered identity wins over whatever the frame claims.
        position.user_id = client.user_id;
        self.clients
            .update_pose(client.user_id, Pose::from(position), now);

        log::trace!(
            "User {} at ({:.2}, {:.2}, {:.2})",
            client.user_id,
            position.x,
            position.y,
            position.z
        );

        let bytes = self.frames.encode(&position);
        for target in self.clients.listen_addrs_except(client.user_id) {
            self.send_bytes(&bytes, target);
        }
    }

    fn echo_rtt(&mut self, addr: SocketAddr, timestamp: u32) {
        self.send_frame(&DefaultRtt { timestamp }, addr);
    }

    fn log_move(&self, movement: &MoveData) {
        log::debug!(
            "User {} moves {} at {:.2}",
            movement.user_id,
            movement.direction,
            movement.speed
        );
    }

    fn send_frame<F: Frame>(&mut self, frame: &F, addr: SocketAddr) {
        let bytes = self.frames.encode(frame);
        self.send_bytes(&bytes, addr);
    }

    fn send_bytes(&mut self, data: &[u8], addr: SocketAddr) {
        match self.endpoint.send_to(data, addr) {
            Ok(bytes) => self.stats.record_sent(bytes),
            Err(e) => {
                self.stats.send_failures += 1;
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Failed to send to {}: {}", addr, e),
                });
            }
        }
    }

    fn cleanup(&mut self, now: Instant) {
        let removed = self
            .clients
            .cleanup_inactive(self.config.inactivity_timeout, now);
        for client in removed {
            self.pending_events.push_back(ServerEvent::ClientTimedOut {
                user_id: client.user_id,
            });
        }

        log::info!(
            "Active players: {}, available ports: {}",
            self.clients.len(),
            self.clients.available_ports()
        );
    }
}
