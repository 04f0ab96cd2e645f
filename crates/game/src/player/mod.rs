mod pose;
mod registry;

pub use pose::{Pose, PoseSource, SharedPose};
pub use registry::{RemotePlayer, RemotePlayers};
