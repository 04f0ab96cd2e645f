use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use posync::{Pose, UserId};

use crate::error::ServerError;
use crate::ports::PortPool;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientEntry {
    pub user_id: UserId,
    /// Address the client sends from.
    pub addr: SocketAddr,
    pub listen_port: u16,
    pub last_seen: Instant,
    pub pose: Pose,
}

impl ClientEntry {
    /// Where unicast replies and broadcasts for this client go.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.ip(), self.listen_port)
    }
}

/// Registered clients, indexed by user id and by source address.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<UserId, ClientEntry>,
    by_addr: HashMap<SocketAddr, UserId>,
    ports: PortPool,
    next_user_id: UserId,
}

impl ClientRegistry {
    pub fn new(ports: PortPool) -> Self {
        Self {
            clients: HashMap::new(),
            by_addr: HashMap::new(),
            ports,
            next_user_id: 1,
        }
    }

    /// Registers `addr`, or returns its existing entry. The flag is `true`
    /// for a new registration.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<(ClientEntry, bool), ServerError> {
        if let Some(entry) = self.get_by_addr(&addr) {
            return Ok((*entry, false));
        }

        let user_id = self.next_free_user_id()?;
        let listen_port = self.ports.allocate()?;

        let entry = ClientEntry {
            user_id,
            addr,
            listen_port,
            last_seen: now,
            pose: Pose::default(),
        };
        self.clients.insert(user_id, entry);
        self.by_addr.insert(addr, user_id);

        Ok((entry, true))
    }

    /// Ids wrap around; 0 is reserved for "unassigned".
    fn next_free_user_id(&mut self) -> Result<UserId, ServerError> {
        for _ in 0..UserId::MAX {
            let candidate = self.next_user_id;
            self.next_user_id = match self.next_user_id.wrapping_add(1) {
                0 => 1,
                id => id,
            };

            if !self.clients.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ServerError::NoUserIdsAvailable)
    }

    pub fn get(&self, user_id: UserId) -> Option<&ClientEntry> {
        self.clients.get(&user_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ClientEntry> {
        self.by_addr
            .get(addr)
            .and_then(|user_id| self.clients.get(user_id))
    }

    pub fn touch(&mut self, addr: &SocketAddr, now: Instant) {
        if let Some(user_id) = self.by_addr.get(addr) {
            if let Some(entry) = self.clients.get_mut(user_id) {
                entry.last_seen = now;
            }
        }
    }

    pub fn update_pose(&mut self, user_id: UserId, pose: Pose, now: Instant) {
        if let Some(entry) = self.clients.get_mut(&user_id) {
            entry.pose = pose;
            entry.last_seen = now;
        }
    }

    /// Listen addresses of every client except `exclude`.
    pub fn listen_addrs_except(&self, exclude: UserId) -> Vec<SocketAddr> {
        self.clients
            .values()
            .filter(|entry| entry.user_id != exclude)
            .map(ClientEntry::listen_addr)
            .collect()
    }

    /// Drops clients not heard from within `timeout` and frees their ports.
    pub fn cleanup_inactive(&mut self, timeout: Duration, now: Instant) -> Vec<ClientEntry> {
        let expired: Vec<UserId> = self
            .clients
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|entry| entry.user_id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for user_id in expired {
            if let Some(entry) = self.clients.remove(&user_id) {
                self.by_addr.remove(&entry.addr);
                self.ports.release(entry.listen_port);
                removed.push(entry);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn available_ports(&self) -> usize {
        self.ports.available()
    }
}
