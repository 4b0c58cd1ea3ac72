//! Rigid attachments between a gripper link and a held object.

use serde::{Deserialize, Serialize};

use crate::backend::SimBackend;
use crate::error::Result;
use crate::geometry::{multiply, pose_from_point, BodyId, LinkId, Pose};

/// A fixed transform from a parent link to a child body.
///
/// While active, `child_world = parent_link_world * parent_t_child`. The transform is
/// captured once and never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub parent: BodyId,
    pub parent_link: LinkId,
    pub child: BodyId,
    pub parent_t_child: Pose,
}

impl Attachment {
    pub fn new(parent: BodyId, parent_link: LinkId, child: BodyId, parent_t_child: Pose) -> Self {
        Self {
            parent,
            parent_link,
            child,
            parent_t_child,
        }
    }

    /// Captures the current relative transform between the link and the child.
    pub fn from_current(
        sim: &dyn SimBackend,
        parent: BodyId,
        parent_link: LinkId,
        child: BodyId,
    ) -> Result<Self> {
        let link_pose = sim.link_pose(parent, parent_link)?;
        let child_pose = sim.pose(child)?;
        Ok(Self::new(
            parent,
            parent_link,
            child,
            link_pose.inverse() * child_pose,
        ))
    }

    /// Child pose implied by a parent link pose.
    pub fn child_pose(&self, parent_link_pose: &Pose) -> Pose {
        parent_link_pose * self.parent_t_child
    }

    /// Moves the child to where the parent link currently holds it.
    pub fn assign(&self, sim: &mut dyn SimBackend) -> Result<Pose> {
        let pose = self.child_pose(&sim.link_pose(self.parent, self.parent_link)?);
        sim.set_pose(self.child, &pose)?;
        Ok(pose)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grasp {
    pub attachment: Attachment,
    /// Finger position that holds the object.
    pub closed_position: f64,
}

impl Grasp {
    pub fn new(attachment: Attachment, closed_position: f64) -> Self {
        Self {
            attachment,
            closed_position,
        }
    }

    /// Tool pose that puts the held object at `object_pose`.
    pub fn tool_pose_for(&self, object_pose: &Pose) -> Pose {
        object_pose * self.attachment.parent_t_child.inverse()
    }

    /// Standoff pose for approaching (or retreating from) `current_tool_pose`.
    ///
    /// Composed as `gripper_t_tool * Tx(tool_distance) * current_tool_pose * Tz(-object_distance)`:
    /// the tool offset and approach distance are applied before the world pose, and the retreat
    /// is applied in the resulting frame.
    pub fn pregrasp_pose(
        &self,
        current_tool_pose: &Pose,
        gripper_t_tool: &Pose,
        tool_distance: f64,
        object_distance: f64,
    ) -> Pose {
        multiply(&[
            *gripper_t_tool,
            pose_from_point(tool_distance, 0.0, 0.0),
            *current_tool_pose,
            pose_from_point(0.0, 0.0, -object_distance),
        ])
    }
}
