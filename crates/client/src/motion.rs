use std::f32::consts::TAU;
use std::time::Duration;

use glam::Vec3;
use posync::Pose;

/// Walks the local player around a circle so there is something to stream
/// without an input device.
#[derive(Debug, Clone, Copy)]
pub struct OrbitMotion {
    pub center: Vec3,
    pub radius: f32,
    /// Full laps per second.
    pub speed: f32,
}

impl Default for OrbitMotion {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 5.0,
            speed: 0.1,
        }
    }
}

impl OrbitMotion {
    pub fn pose_at(&self, elapsed: Duration) -> Pose {
        let angle = (elapsed.as_secs_f32() * self.speed * TAU) % TAU;
        let offset = Vec3::new(angle.cos(), 0.0, angle.sin()) * self.radius;

        // Face along the tangent of the circle.
        let heading = (angle + TAU / 4.0) % TAU;
        Pose::new(self.center + offset, heading)
    }

    /// Compass direction closest to the current heading.
    pub fn direction_at(&self, elapsed: Duration) -> posync::Direction {
        let heading = self.pose_at(elapsed).rotation_y;
        let octant = (heading / (TAU / 8.0)).round() as u8 % 8;
        posync::Direction(octant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_stays_on_circle() {
        let motion = OrbitMotion {
            center: Vec3::new(1.0, 2.0, 3.0),
            radius: 4.0,
            speed: 0.5,
        };

        for ms in [0, 250, 900, 1700, 5000] {
            let pose = motion.pose_at(Duration::from_millis(ms));
            let distance = (pose.position - motion.center).length();
            assert!((distance - 4.0).abs() < 1e-4);
            assert_eq!(pose.position.y, 2.0);
        }
    }

    #[test]
    fn test_direction_is_compass_octant() {
        let motion = OrbitMotion::default();
        for ms in (0..10_000).step_by(137) {
            assert!(motion.direction_at(Duration::from_millis(ms)).0 < 8);
        }
    }
}
