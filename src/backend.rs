//! The narrow interface through which the planner drives a physics/kinematics backend.
//!
//! This module defines:
//! - [`SimBackend`]: the object-safe session contract (bodies, joints, links, cloning).
//! - [`RobotDescription`]: a URDF-like, serde-loadable kinematic tree.
//!
//! Identifiers follow the usual Bullet convention: joint `i` moves link `i`, and link 0 is
//! the base of the body.

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TampError};
use crate::geometry::{BodyId, JointId, LinkId, Pose};

/// RGBA display color. Only meaningful to backends that render.
pub type Rgba = [f32; 4];

pub const RED: Rgba = [1.0, 0.0, 0.0, 1.0];
pub const BLUE: Rgba = [0.0, 0.0, 1.0, 1.0];
pub const TAN: Rgba = [0.824, 0.706, 0.549, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Revolute,
    Prismatic,
    Fixed,
}

/// Joint connecting a link to its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub kind: JointKind,
    #[serde(default = "default_axis")]
    pub axis: [f64; 3],
    /// Joint frame relative to the parent link, as in URDF `<origin xyz rpy>`.
    #[serde(default)]
    pub origin_xyz: [f64; 3],
    #[serde(default)]
    pub origin_rpy: [f64; 3],
    #[serde(default)]
    pub lower: f64,
    #[serde(default)]
    pub upper: f64,
}

fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

impl JointSpec {
    pub fn origin(&self) -> Pose {
        let [x, y, z] = self.origin_xyz;
        let [roll, pitch, yaw] = self.origin_rpy;
        Isometry3::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub name: String,
    /// `None` only for the base link, which must come first.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub joint: Option<JointSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotDescription {
    pub name: String,
    pub links: Vec<LinkSpec>,
}

/// One simulation (or mirrored real-robot) session.
///
/// Implementations own all scene state; the planner only holds opaque identifiers.
pub trait SimBackend: Send {
    /// Creates a box with the given full extents, at the identity pose.
    fn create_box(&mut self, extents: [f64; 3], color: Rgba) -> BodyId;

    fn load_robot(&mut self, description: &RobotDescription) -> Result<BodyId>;

    fn remove_body(&mut self, body: BodyId) -> Result<()>;

    /// World pose of the body's base.
    fn pose(&self, body: BodyId) -> Result<Pose>;

    fn set_pose(&mut self, body: BodyId, pose: &Pose) -> Result<()>;

    fn joint_from_name(&self, body: BodyId, name: &str) -> Result<JointId>;

    fn joint_name(&self, body: BodyId, joint: JointId) -> Result<String>;

    fn link_from_name(&self, body: BodyId, name: &str) -> Result<LinkId>;

    fn link_name(&self, body: BodyId, link: LinkId) -> Result<String>;

    /// `(lower, upper)` position limits.
    fn joint_limits(&self, body: BodyId, joint: JointId) -> Result<(f64, f64)>;

    fn joint_position(&self, body: BodyId, joint: JointId) -> Result<f64>;

    fn set_joint_position(&mut self, body: BodyId, joint: JointId, position: f64) -> Result<()>;

    /// Link the joint is mounted on.
    fn joint_parent_link(&self, body: BodyId, joint: JointId) -> Result<LinkId>;

    /// Link the joint moves.
    fn joint_child_link(&self, body: BodyId, joint: JointId) -> Result<LinkId>;

    /// Non-fixed joints in index order.
    fn movable_joints(&self, body: BodyId) -> Result<Vec<JointId>>;

    fn link_pose(&self, body: BodyId, link: LinkId) -> Result<Pose>;

    fn link_parent(&self, body: BodyId, link: LinkId) -> Result<Option<LinkId>>;

    fn link_children(&self, body: BodyId, link: LinkId) -> Result<Vec<LinkId>>;

    /// Copies the given links (and the joints between them) into a new body whose base
    /// sits where the topmost copied link currently is.
    fn clone_links(
        &mut self,
        body: BodyId,
        links: &[LinkId],
        collision_only: bool,
    ) -> Result<BodyId>;

    /// A detached copy of the body's kinematic tree at its current joint positions.
    ///
    /// Nodes are named after links and the root sits at the body origin, so poses read from
    /// the copy are relative to [`SimBackend::pose`]. Changing the copy leaves the scene as is.
    fn kinematic_chain(&self, body: BodyId) -> Result<k::Chain<f64>>;

    /// `link` followed by all of its descendants, depth first.
    fn link_subtree(&self, body: BodyId, link: LinkId) -> Result<Vec<LinkId>> {
        let mut out = Vec::new();
        let mut stack = vec![link];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.link_children(body, current)?;
            children.reverse();
            stack.extend(children);
        }
        Ok(out)
    }

    fn joint_positions(&self, body: BodyId, joints: &[JointId]) -> Result<Vec<f64>> {
        joints
            .iter()
            .map(|&joint| self.joint_position(body, joint))
            .collect()
    }

    fn set_joint_positions(
        &mut self,
        body: BodyId,
        joints: &[JointId],
        positions: &[f64],
    ) -> Result<()> {
        if joints.len() != positions.len() {
            return Err(TampError::InvalidCommand(format!(
                "{} positions for {} joints",
                positions.len(),
                joints.len()
            )));
        }
        for (&joint, &position) in joints.iter().zip(positions) {
            self.set_joint_position(body, joint, position)?;
        }
        Ok(())
    }
}
