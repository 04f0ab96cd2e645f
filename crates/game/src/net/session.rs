//! Client session: handshake, position streaming and RTT accounting.
//!
//! A session runs two kinds of worker threads. The sender ticks at a fixed
//! rate and either drives the handshake or streams the local pose. Receive
//! loops (one on the ephemeral socket, one on the assigned-port listener once
//! it exists) decode frames and route them by command. All mutable session
//! data sits behind a single lock; observers are called after it is released.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::command::Direction;
use super::config::SessionConfig;
use super::endpoint::{NetworkEndpoint, is_transient};
use super::handshake::{
    HandshakeAction, HandshakeError, HandshakeState, SessionHandshake, Transition,
};
use super::protocol::{
    Frame, FrameBuf, Message, MoveData, MoveDataRtt, PortRequest, PositionData, PositionDataRtt,
    ProtocolError, UserId,
};
use super::rtt::{RttTracker, duration_ms};
use super::stats::NetworkStats;
use crate::player::{Pose, PoseSource, RemotePlayer, RemotePlayers};

const RECV_BUFFER_SIZE: usize = 1500;
const RTT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Failures surfaced to the owner of a [`NetworkSession`]. Faults inside the
/// worker loops are logged and counted instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("socket fault: {0}")]
    Socket(#[from] io::Error),
    #[error("failed to spawn session worker: {0}")]
    Spawn(io::Error),
    #[error("session has no user id yet")]
    NotReady,
    #[error("session is shut down")]
    Closed,
}

/// Presentation-side hooks. Called on the receive or send thread; the
/// implementation is responsible for moving work to its own context.
pub trait SessionObserver: Send + Sync {
    fn on_ready(&self, _user_id: UserId, _port: u16) {}

    fn on_remote_player_joined(&self, _user_id: UserId) {}

    fn on_remote_pose_update(&self, _user_id: UserId, _pose: Pose) {}

    fn on_rtt_sample(&self, _latest_ms: f64, _average_ms: f64) {}

    fn on_handshake_timeout(&self, _attempts: u32) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    Ready { user_id: UserId, port: u16 },
    RemotePlayerJoined { user_id: UserId },
    RemotePose { user_id: UserId, pose: Pose },
    RttSample { latest_ms: f64, average_ms: f64 },
    HandshakeTimedOut { attempts: u32 },
}

/// Forwards every callback as a [`SessionEvent`]. Send errors mean the
/// receiver is gone and are ignored.
impl SessionObserver for mpsc::Sender<SessionEvent> {
    fn on_ready(&self, user_id: UserId, port: u16) {
        let _ = self.send(SessionEvent::Ready { user_id, port });
    }

    fn on_remote_player_joined(&self, user_id: UserId) {
        let _ = self.send(SessionEvent::RemotePlayerJoined { user_id });
    }

    fn on_remote_pose_update(&self, user_id: UserId, pose: Pose) {
        let _ = self.send(SessionEvent::RemotePose { user_id, pose });
    }

    fn on_rtt_sample(&self, latest_ms: f64, average_ms: f64) {
        let _ = self.send(SessionEvent::RttSample {
            latest_ms,
            average_ms,
        });
    }

    fn on_handshake_timeout(&self, attempts: u32) {
        let _ = self.send(SessionEvent::HandshakeTimedOut { attempts });
    }
}

/// What a received frame asks the session to do once the lock is released.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Dispatch {
    Nothing,
    Handshake {
        transition: Transition,
        ready: Option<(UserId, u16)>,
    },
    Rtt { latest_ms: f64, average_ms: f64 },
    RemotePose {
        user_id: UserId,
        pose: Pose,
        joined: bool,
    },
}

#[derive(Debug)]
struct SessionState {
    handshake: SessionHandshake,
    rtt: RttTracker,
    sequence: u32,
    remote_players: RemotePlayers,
    stats: NetworkStats,
    handshake_timed_out: bool,
    last_sweep: Instant,
}

impl SessionState {
    fn new(config: &SessionConfig, now: Instant) -> Self {
        Self {
            handshake: SessionHandshake::new(
                config.handshake_retry_interval,
                config.max_handshake_attempts,
            ),
            rtt: RttTracker::new(config.rtt_max_pending, config.rtt_max_age),
            sequence: 0,
            remote_players: RemotePlayers::new(),
            stats: NetworkStats::default(),
            handshake_timed_out: false,
            last_sweep: now,
        }
    }

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Reports a handshake timeout only the first time it happens.
    fn poll_handshake(&mut self, now: Instant) -> Result<Option<HandshakeAction>, HandshakeError> {
        match self.handshake.poll(now) {
            Ok(action) => Ok(action),
            Err(_) if self.handshake_timed_out => Ok(None),
            Err(e) => {
                self.handshake_timed_out = true;
                Err(e)
            }
        }
    }

    fn position_frame(&mut self, pose: Pose, now: Instant) -> Option<PositionDataRtt> {
        let user_id = self.handshake.user_id()?;
        let timestamp = self.next_sequence();
        self.rtt.on_send(timestamp, now);

        Some(PositionDataRtt {
            position: pose.to_position_data(user_id),
            timestamp,
        })
    }

    fn move_frame(
        &mut self,
        direction: Direction,
        speed: f32,
        now: Instant,
    ) -> Option<MoveDataRtt> {
        let user_id = self.handshake.user_id()?;
        let timestamp = self.next_sequence();
        self.rtt.on_send(timestamp, now);

        Some(MoveDataRtt {
            movement: MoveData {
                user_id,
                direction,
                speed,
            },
            timestamp,
        })
    }

    fn sweep_rtt(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) < RTT_SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now;

        let expired = self.rtt.sweep(now);
        if expired > 0 {
            log::debug!("Dropped {} RTT entries without echo", expired);
            self.stats.expired_rtt_entries += expired as u64;
        }
    }

    fn record_decode_error(&mut self, error: &ProtocolError) {
        match error {
            ProtocolError::TruncatedFrame { .. } => self.stats.malformed_frames += 1,
            ProtocolError::UnknownCommand(_) => self.stats.unknown_commands += 1,
        }
    }

    fn dispatch(&mut self, message: Message, now: Instant) -> Dispatch {
        match message {
            Message::PortAssignment(assignment) => {
                let transition = self.handshake.on_port_assignment(&assignment);
                self.handshake_transition(transition)
            }
            Message::UserAssignment(assignment) => {
                let transition = self.handshake.on_user_assignment(&assignment);
                self.handshake_transition(transition)
            }
            Message::DefaultRtt(echo) => match self.rtt.on_echo(echo.timestamp, now) {
                Some(sample) => {
                    let latest_ms = duration_ms(sample);
                    let average_ms = self.rtt.average_ms();
                    self.stats.rtt_ms = latest_ms;
                    self.stats.rtt_avg_ms = average_ms;
                    Dispatch::Rtt {
                        latest_ms,
                        average_ms,
                    }
                }
                None => {
                    self.stats.unmatched_echoes += 1;
                    Dispatch::Nothing
                }
            },
            Message::Position(position) => self.remote_pose(position, now),
            Message::PositionRtt(position) => self.remote_pose(position.position, now),
            Message::Move(_) | Message::MoveRtt(_) | Message::PortRequest(_) => {
                log::debug!("Ignoring {} frame", message.command());
                self.stats.unhandled_commands += 1;
                Dispatch::Nothing
            }
        }
    }

    fn handshake_transition(&self, transition: Transition) -> Dispatch {
        if transition.is_empty() {
            return Dispatch::Nothing;
        }

        let ready = transition.ready.zip(self.handshake.assigned_port());
        Dispatch::Handshake { transition, ready }
    }

    fn remote_pose(&mut self, position: PositionData, now: Instant) -> Dispatch {
        if self.handshake.local_user_id() == Some(position.user_id) {
            self.stats.self_echoes += 1;
            return Dispatch::Nothing;
        }

        let pose = Pose::from(position);
        let joined = self.remote_players.upsert(position.user_id, pose, now);
        Dispatch::RemotePose {
            user_id: position.user_id,
            pose,
            joined,
        }
    }
}

struct Shared {
    config: SessionConfig,
    state: Mutex<SessionState>,
    running: AtomicBool,
    observer: Arc<dyn SessionObserver>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns and tracks a worker unless the session is already stopping.
    fn spawn_worker<F>(&self, name: &str, f: F) -> io::Result<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut workers = self.workers.lock();
        if !self.is_running() {
            return Ok(false);
        }

        let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
        workers.push(handle);
        Ok(true)
    }

    fn send_loop(self: Arc<Self>, endpoint: NetworkEndpoint, source: Arc<dyn PoseSource>) {
        let interval = self.config.tick_interval();
        let mut frames = FrameBuf::new();
        let mut next_tick = Instant::now();

        log::debug!("Send loop started ({:?} per tick)", interval);

        while self.is_running() {
            self.send_tick(&endpoint, source.as_ref(), &mut frames, Instant::now());

            next_tick += interval;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                // Fell behind; skip the missed ticks instead of bursting.
                next_tick = now;
            }
        }

        log::debug!("Send loop ended");
    }

    fn send_tick(
        &self,
        endpoint: &NetworkEndpoint,
        source: &dyn PoseSource,
        frames: &mut FrameBuf,
        now: Instant,
    ) {
        let ready = {
            let mut state = self.state.lock();
            state.sweep_rtt(now);
            state.handshake.is_ready()
        };

        if ready {
            let pose = source.sample_local_pose();
            let frame = self.state.lock().position_frame(pose, now);
            if let Some(frame) = frame {
                let bytes = frames.encode(&frame);
                self.transmit(endpoint, &bytes);
            }
            return;
        }

        let poll = self.state.lock().poll_handshake(now);
        match poll {
            Ok(Some(HandshakeAction::SendPortRequest)) => {
                log::debug!("Requesting port from {}", self.config.server_addr);
                let bytes = frames.encode(&PortRequest);
                if self.transmit(endpoint, &bytes) {
                    self.state.lock().stats.port_requests_sent += 1;
                }
            }
            Ok(None) => {}
            Err(HandshakeError::Timeout { attempts }) => {
                log::error!(
                    "No port assignment from {} after {} requests",
                    self.config.server_addr,
                    attempts
                );
                self.observer.on_handshake_timeout(attempts);
            }
        }
    }

    fn transmit(&self, endpoint: &NetworkEndpoint, data: &[u8]) -> bool {
        match endpoint.send_to(data, self.config.server_addr) {
            Ok(bytes) => {
                self.state.lock().stats.record_sent(bytes);
                true
            }
            Err(e) => {
                log::warn!("Send to {} failed: {}", self.config.server_addr, e);
                self.state.lock().stats.send_failures += 1;
                false
            }
        }
    }

    fn receive_loop(self: Arc<Self>, endpoint: NetworkEndpoint) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        log::debug!("Receive loop started on {}", endpoint.local_addr());

        while self.is_running() {
            match endpoint.recv_from(&mut buf) {
                Ok(Some((size, _from))) => self.process_packet(&buf[..size]),
                Ok(None) => {}
                Err(e) if is_transient(&e) => {
                    log::debug!(
                        "Transient receive error on {}: {}",
                        endpoint.local_addr(),
                        e
                    );
                }
                Err(e) => {
                    log::error!("Receive loop on {} stopped: {}", endpoint.local_addr(), e);
                    break;
                }
            }
        }

        log::debug!("Receive loop on {} ended", endpoint.local_addr());
    }

    fn process_packet(self: &Arc<Self>, data: &[u8]) {
        let now = Instant::now();

        let dispatch = {
            let mut state = self.state.lock();
            state.stats.record_received(data.len());

            match Message::decode(data) {
                Ok(message) => state.dispatch(message, now),
                Err(e) => {
                    log::debug!("Dropping frame of {} bytes: {}", data.len(), e);
                    state.record_decode_error(&e);
                    return;
                }
            }
        };

        match dispatch {
            Dispatch::Nothing => {}
            Dispatch::Handshake { transition, ready } => {
                if let Some(port) = transition.bind_port {
                    log::info!("Assigned port {}", port);
                    self.bind_listener(port);
                }
                if let Some((user_id, port)) = ready {
                    log::info!("Session ready as user {} on port {}", user_id, port);
                    self.observer.on_ready(user_id, port);
                }
            }
            Dispatch::Rtt {
                latest_ms,
                average_ms,
            } => {
                log::trace!("RTT {:.2}ms | avg {:.2}ms", latest_ms, average_ms);
                self.observer.on_rtt_sample(latest_ms, average_ms);
            }
            Dispatch::RemotePose {
                user_id,
                pose,
                joined,
            } => {
                if joined {
                    log::info!("Remote player {} joined", user_id);
                    self.observer.on_remote_player_joined(user_id);
                }
                self.observer.on_remote_pose_update(user_id, pose);
            }
        }
    }

    /// Opens the socket the server addresses its unicast replies to.
    fn bind_listener(self: &Arc<Self>, port: u16) {
        let addr = SocketAddr::new(self.config.bind_ip, port);
        let endpoint = match NetworkEndpoint::bind(addr, self.config.tick_interval()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                log::error!("Failed to listen on assigned port {}: {}", addr, e);
                return;
            }
        };

        log::info!("Listening on {}", endpoint.local_addr());

        let shared = Arc::clone(self);
        if let Err(e) = self.spawn_worker("posync-listen", move || shared.receive_loop(endpoint)) {
            log::error!("Failed to start listener on {}: {}", addr, e);
        }
    }
}

pub struct NetworkSession {
    shared: Arc<Shared>,
    endpoint: Mutex<Option<NetworkEndpoint>>,
    local_addr: SocketAddr,
}

impl NetworkSession {
    /// Binds an ephemeral socket and starts the sender and receiver threads.
    /// A bind failure is returned; nothing is left running in that case.
    pub fn start(
        config: SessionConfig,
        source: Arc<dyn PoseSource>,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        let endpoint = NetworkEndpoint::bind((config.bind_ip, 0), config.tick_interval())?;
        let local_addr = endpoint.local_addr();

        log::info!(
            "Session bound to {}, server {}",
            local_addr,
            config.server_addr
        );

        let now = Instant::now();
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::new(&config, now)),
            config,
            running: AtomicBool::new(true),
            observer,
            workers: Mutex::new(Vec::new()),
        });

        let session = Self {
            shared: Arc::clone(&shared),
            endpoint: Mutex::new(Some(endpoint.clone())),
            local_addr,
        };

        let receiver = Arc::clone(&shared);
        let receive_endpoint = endpoint.clone();
        shared
            .spawn_worker("posync-recv", move || {
                receiver.receive_loop(receive_endpoint)
            })
            .map_err(SessionError::Spawn)?;

        let sender = Arc::clone(&shared);
        shared
            .spawn_worker("posync-send", move || sender.send_loop(endpoint, source))
            .map_err(SessionError::Spawn)?;

        Ok(session)
    }

    /// Sends a movement intent with RTT tracking.
    pub fn send_move(&self, direction: Direction, speed: f32) -> Result<(), SessionError> {
        let endpoint = self.endpoint.lock();
        let endpoint = endpoint.as_ref().ok_or(SessionError::Closed)?;

        let frame = self
            .shared
            .state
            .lock()
            .move_frame(direction, speed, Instant::now())
            .ok_or(SessionError::NotReady)?;

        let bytes = endpoint.send_to(&frame.to_bytes(), self.shared.config.server_addr)?;
        self.shared.state.lock().stats.record_sent(bytes);
        Ok(())
    }

    /// Stops every worker and releases the sockets. Safe to call more than
    /// once and from an observer callback.
    pub fn shutdown(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);

        let workers = std::mem::take(&mut *self.shared.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Session worker panicked");
            }
        }

        self.endpoint.lock().take();

        if was_running {
            log::info!("Session on {} shut down", self.local_addr);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> HandshakeState {
        self.shared.state.lock().handshake.state()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.shared.state.lock().handshake.user_id()
    }

    pub fn assigned_port(&self) -> Option<u16> {
        self.shared.state.lock().handshake.assigned_port()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.state.lock().stats.clone()
    }

    pub fn average_rtt_ms(&self) -> f64 {
        self.shared.state.lock().rtt.average_ms()
    }

    pub fn remote_player(&self, user_id: UserId) -> Option<RemotePlayer> {
        self.shared
            .state
            .lock()
            .remote_players
            .get(user_id)
            .copied()
    }

    pub fn remote_players(&self) -> Vec<RemotePlayer> {
        self.shared
            .state
            .lock()
            .remote_players
            .iter()
            .copied()
            .collect()
    }
}

impl Drop for NetworkSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
