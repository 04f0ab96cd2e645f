use std::collections::HashMap;
use std::time::Instant;

use super::pose::Pose;
use crate::net::UserId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePlayer {
    pub user_id: UserId,
    pub pose: Pose,
    pub updates: u64,
    pub last_seen: Instant,
}

/// Last known pose of every foreign player seen by this session.
///
/// Entries are created on first sighting and never removed here; despawning
/// is up to whoever consumes the updates.
#[derive(Debug, Default)]
pub struct RemotePlayers {
    players: HashMap<UserId, RemotePlayer>,
}

impl RemotePlayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the pose, returning `true` when the player was not known yet.
    pub fn upsert(&mut self, user_id: UserId, pose: Pose, now: Instant) -> bool {
        match self.players.get_mut(&user_id) {
            Some(player) => {
                player.pose = pose;
                player.updates += 1;
                player.last_seen = now;
                false
            }
            None => {
                self.players.insert(
                    user_id,
                    RemotePlayer {
                        user_id,
                        pose,
                        updates: 1,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, user_id: UserId) -> Option<&RemotePlayer> {
        self.players.get(&user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_upsert_reports_first_sighting() {
        let mut players = RemotePlayers::new();
        let now = Instant::now();

        assert!(players.upsert(3, Pose::new(Vec3::ONE, 0.0), now));
        assert!(!players.upsert(3, Pose::new(Vec3::ZERO, 1.0), now));

        let player = players.get(3).unwrap();
        assert_eq!(player.updates, 2);
        assert_eq!(player.pose, Pose::new(Vec3::ZERO, 1.0));
        assert_eq!(players.len(), 1);
    }
}
