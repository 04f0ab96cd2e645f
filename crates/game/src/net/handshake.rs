use std::time::{Duration, Instant};

use super::protocol::{PortAssignment, UserAssignment, UserId};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

/// Progress of the port and identity negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unbound,
    PortRequested,
    PortAssigned { port: u16 },
    Ready { user_id: UserId, port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    SendPortRequest,
}

/// Side effects the owner of the handshake has to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    /// A listener must be bound on this port.
    pub bind_port: Option<u16>,
    /// The session became ready with this identity.
    pub ready: Option<UserId>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.bind_port.is_none() && self.ready.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("no port assignment after {attempts} requests")]
    Timeout { attempts: u32 },
}

/// Client side of the port and identity negotiation.
///
/// `Unbound -> PortRequested -> PortAssigned -> Ready`, where a port
/// assignment that already carries a user id skips `PortAssigned`. `Ready`
/// is final; a reconnect builds a new handshake.
#[derive(Debug)]
pub struct SessionHandshake {
    state: HandshakeState,
    retry_interval: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
    last_request: Option<Instant>,
    early_user: Option<UserId>,
}

impl Default for SessionHandshake {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL, Some(DEFAULT_MAX_ATTEMPTS))
    }
}

impl SessionHandshake {
    pub fn new(retry_interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            state: HandshakeState::Unbound,
            retry_interval,
            max_attempts,
            attempts: 0,
            last_request: None,
            early_user: None,
        }
    }

    /// Drives the request cadence. Call once per tick.
    pub fn poll(&mut self, now: Instant) -> Result<Option<HandshakeAction>, HandshakeError> {
        match self.state {
            HandshakeState::Unbound => {
                self.state = HandshakeState::PortRequested;
                Ok(Some(self.record_request(now)))
            }
            HandshakeState::PortRequested => {
                let due = self
                    .last_request
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.retry_interval);
                if !due {
                    return Ok(None);
                }

                if let Some(max_attempts) = self.max_attempts {
                    if self.attempts >= max_attempts {
                        return Err(HandshakeError::Timeout {
                            attempts: self.attempts,
                        });
                    }
                }

                Ok(Some(self.record_request(now)))
            }
            HandshakeState::PortAssigned { .. } | HandshakeState::Ready { .. } => Ok(None),
        }
    }

    fn record_request(&mut self, now: Instant) -> HandshakeAction {
        self.attempts += 1;
        self.last_request = Some(now);
        HandshakeAction::SendPortRequest
    }

    pub fn on_port_assignment(&mut self, assignment: &PortAssignment) -> Transition {
        let mut transition = Transition::default();
        if assignment.port == 0 {
            return transition;
        }

        match self.state {
            HandshakeState::Unbound | HandshakeState::PortRequested => {
                let port = assignment.port;
                transition.bind_port = Some(port);

                let user_id = nonzero(assignment.user_id).or(self.early_user.take());
                match user_id {
                    Some(user_id) => {
                        self.state = HandshakeState::Ready { user_id, port };
                        transition.ready = Some(user_id);
                    }
                    None => self.state = HandshakeState::PortAssigned { port },
                }
            }
            HandshakeState::PortAssigned { port } if port == assignment.port => {
                if let Some(user_id) = nonzero(assignment.user_id) {
                    self.state = HandshakeState::Ready { user_id, port };
                    transition.ready = Some(user_id);
                }
            }
            HandshakeState::PortAssigned { .. } | HandshakeState::Ready { .. } => {}
        }

        transition
    }

    pub fn on_user_assignment(&mut self, assignment: &UserAssignment) -> Transition {
        let mut transition = Transition::default();
        let Some(user_id) = nonzero(assignment.user_id) else {
            return transition;
        };

        match self.state {
            // The identity can overtake the port on the wire; keep it for later.
            HandshakeState::Unbound | HandshakeState::PortRequested => {
                self.early_user = Some(user_id);
            }
            HandshakeState::PortAssigned { port } => {
                self.state = HandshakeState::Ready { user_id, port };
                transition.ready = Some(user_id);
            }
            HandshakeState::Ready { .. } => {}
        }

        transition
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandshakeState::Ready { .. })
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.state {
            HandshakeState::Ready { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Our own identity as far as it is known: the final id once ready, or an
    /// id announced ahead of the port.
    pub fn local_user_id(&self) -> Option<UserId> {
        self.user_id().or(self.early_user)
    }

    pub fn assigned_port(&self) -> Option<u16> {
        match self.state {
            HandshakeState::PortAssigned { port } | HandshakeState::Ready { port, .. } => {
                Some(port)
            }
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[inline]
fn nonzero(user_id: UserId) -> Option<UserId> {
    (user_id != 0).then_some(user_id)
}
