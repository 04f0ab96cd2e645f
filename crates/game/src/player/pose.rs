use glam::Vec3;
use parking_lot::Mutex;

use crate::net::{PositionData, UserId};

/// Position and heading of one player, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation_y: f32,
}

impl Pose {
    pub fn new(position: Vec3, rotation_y: f32) -> Self {
        Self {
            position,
            rotation_y,
        }
    }

    pub fn to_position_data(self, user_id: UserId) -> PositionData {
        PositionData {
            user_id,
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            rot_y: self.rotation_y,
        }
    }
}

impl From<PositionData> for Pose {
    fn from(data: PositionData) -> Self {
        Self {
            position: Vec3::new(data.x, data.y, data.z),
            rotation_y: data.rot_y,
        }
    }
}

/// Producer side of the local player's pose, sampled once per send tick.
pub trait PoseSource: Send + Sync {
    fn sample_local_pose(&self) -> Pose;
}

/// Latest published pose.
///
/// The movement side publishes whole poses under a lock, so readers never
/// observe a partially updated value.
#[derive(Debug, Default)]
pub struct SharedPose {
    latest: Mutex<Pose>,
}

impl SharedPose {
    pub fn new(initial: Pose) -> Self {
        Self {
            latest: Mutex::new(initial),
        }
    }

    pub fn publish(&self, pose: Pose) {
        *self.latest.lock() = pose;
    }

    pub fn latest(&self) -> Pose {
        *self.latest.lock()
    }
}

impl PoseSource for SharedPose {
    fn sample_local_pose(&self) -> Pose {
        self.latest()
    }
}
