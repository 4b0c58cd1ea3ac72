//! Rigid-transform primitives and opaque scene identifiers.
//!
//! Poses are [`nalgebra::Isometry3<f64>`] in the world frame unless a field name says
//! otherwise (`parent_T_child`, `gripper_T_tool`, ...).

use std::fmt;

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// A rigid transform (translation + unit quaternion).
pub type Pose = Isometry3<f64>;

/// Handle of a body inside one simulation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

/// Index of a link within a body. Link 0 is the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub usize);

/// Index of a joint within a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointId(pub usize);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body#{}", self.0)
    }
}

pub fn unit_pose() -> Pose {
    Pose::identity()
}

/// Pure translation.
pub fn pose_from_point(x: f64, y: f64, z: f64) -> Pose {
    Isometry3::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
}

/// Pure rotation from roll/pitch/yaw (radians).
pub fn pose_from_euler(roll: f64, pitch: f64, yaw: f64) -> Pose {
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

/// Composes transforms left to right: `multiply(&[a, b, c]) == a * b * c`.
pub fn multiply(poses: &[Pose]) -> Pose {
    poses.iter().fold(Pose::identity(), |acc, p| acc * p)
}

/// Returns `(position_error, orientation_error)` between two poses.
///
/// The orientation error is the angle of the relative rotation in `[0, pi]`, so `q` and
/// `-q` are treated as the same orientation.
pub fn pose_distance(a: &Pose, b: &Pose) -> (f64, f64) {
    let position = (a.translation.vector - b.translation.vector).norm();
    let orientation = a.rotation.angle_to(&b.rotation);
    (position, orientation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn multiply_composes_left_to_right() {
        let shift = pose_from_point(1.0, 0.0, 0.0);
        let turn = pose_from_euler(0.0, 0.0, FRAC_PI_2);

        // Rotate first, then translate along the rotated x axis (world +y).
        let composed = multiply(&[turn, shift]);
        assert!((composed.translation.vector.y - 1.0).abs() < 1e-12);
        assert!(composed.translation.vector.x.abs() < 1e-12);

        assert_eq!(multiply(&[]), unit_pose());
    }

    #[test]
    fn pose_distance_reports_translation_and_angle() {
        let a = pose_from_point(0.45, 0.1, 0.05);
        let b = multiply(&[pose_from_point(0.1, 0.0, 0.0), a]);
        let (pos, ori) = pose_distance(&a, &b);
        assert!((pos - 0.1).abs() < 1e-12);
        assert!(ori.abs() < 1e-12);

        let c = multiply(&[a, pose_from_euler(0.0, 0.0, 0.3)]);
        let (pos, ori) = pose_distance(&a, &c);
        assert!(pos.abs() < 1e-12);
        assert!((ori - 0.3).abs() < 1e-9);
    }

    #[test]
    fn pose_distance_folds_quaternion_double_cover() {
        let rotation = UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1);
        let flipped = UnitQuaternion::new_unchecked(-rotation.into_inner());
        let a = Isometry3::from_parts(Translation3::identity(), rotation);
        let b = Isometry3::from_parts(Translation3::identity(), flipped);

        let (_, ori) = pose_distance(&a, &b);
        assert!(ori < 1e-6);
    }
}
