//! Simulation sessions.
//!
//! A [`SimulatorInstance`] owns one backend scene built from a [`WorldBelief`]: the robot,
//! a table, and one body per believed object (index-aligned with the belief). Planning runs
//! against a twin session; the primary session is the one that executes and, when bound
//! to a real [`HardwareSink`], mirrors every committed state change to the robot.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{JointKind, JointSpec, LinkSpec, RobotDescription, SimBackend, TAN};
use crate::belief::WorldBelief;
use crate::command::Conf;
use crate::config::PlannerConfig;
use crate::error::{Result, TampError};
use crate::geometry::{pose_from_point, BodyId, JointId, LinkId, Pose};
use crate::hardware::{HardwareSink, NamedPositions, NoopSink};

/// Kinematics plus the named joint groups the planner drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotModel {
    pub description: RobotDescription,
    /// Group name to joint names, in command order.
    pub groups: BTreeMap<String, Vec<String>>,
    pub tool_link: String,
}

impl RobotModel {
    /// A four-axis gantry (x, y, z, yaw) with a parallel two-finger gripper.
    ///
    /// The `tool_tip` frame sits 0.15 below the carriage with its z axis pointing down,
    /// so the arm configuration `[x, y, z, 0]` puts the tool at `(x, y, z - 0.15)`.
    pub fn gantry() -> Self {
        fn link(name: &str, parent: &str, joint: JointSpec) -> LinkSpec {
            LinkSpec {
                name: name.to_string(),
                parent: Some(parent.to_string()),
                joint: Some(joint),
            }
        }
        fn joint(name: &str, kind: JointKind, axis: [f64; 3], limits: (f64, f64)) -> JointSpec {
            JointSpec {
                name: name.to_string(),
                kind,
                axis,
                origin_xyz: [0.0; 3],
                origin_rpy: [0.0; 3],
                lower: limits.0,
                upper: limits.1,
            }
        }
        fn mount(name: &str, xyz: [f64; 3], rpy: [f64; 3]) -> JointSpec {
            JointSpec {
                origin_xyz: xyz,
                origin_rpy: rpy,
                ..joint(name, JointKind::Fixed, [0.0, 0.0, 1.0], (0.0, 0.0))
            }
        }

        let description = RobotDescription {
            name: "gantry".to_string(),
            links: vec![
                LinkSpec {
                    name: "base".to_string(),
                    parent: None,
                    joint: None,
                },
                link(
                    "carriage_x",
                    "base",
                    joint("gantry_x", JointKind::Prismatic, [1.0, 0.0, 0.0], (-1.0, 1.0)),
                ),
                link(
                    "carriage_y",
                    "carriage_x",
                    joint("gantry_y", JointKind::Prismatic, [0.0, 1.0, 0.0], (-1.0, 1.0)),
                ),
                link(
                    "carriage_z",
                    "carriage_y",
                    joint("gantry_z", JointKind::Prismatic, [0.0, 0.0, 1.0], (0.0, 1.0)),
                ),
                link(
                    "wrist",
                    "carriage_z",
                    joint("gantry_yaw", JointKind::Revolute, [0.0, 0.0, 1.0], (-PI, PI)),
                ),
                link("hand", "wrist", mount("hand_mount", [0.0, 0.0, -0.05], [0.0; 3])),
                link(
                    "left_finger",
                    "hand",
                    joint("finger_left", JointKind::Prismatic, [0.0, 1.0, 0.0], (0.0, 0.04)),
                ),
                link(
                    "right_finger",
                    "hand",
                    joint("finger_right", JointKind::Prismatic, [0.0, -1.0, 0.0], (0.0, 0.04)),
                ),
                link("tool_tip", "hand", mount("tool_mount", [0.0, 0.0, -0.1], [PI, 0.0, 0.0])),
            ],
        };

        let groups = [
            ("base", vec![]),
            ("main_arm", vec!["gantry_x", "gantry_y", "gantry_z", "gantry_yaw"]),
            ("main_gripper", vec!["finger_left", "finger_right"]),
        ]
        .into_iter()
        .map(|(group, joints)| {
            (
                group.to_string(),
                joints.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();

        Self {
            description,
            groups,
            tool_link: "tool_tip".to_string(),
        }
    }
}

/// How a session presents itself.
pub struct SessionOptions {
    /// Visual sessions pace trajectory playback in real time.
    pub visual: bool,
    pub sink: Box<dyn HardwareSink>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            visual: false,
            sink: Box::new(NoopSink),
        }
    }
}

impl SessionOptions {
    pub fn visual(mut self, visual: bool) -> Self {
        self.visual = visual;
        self
    }

    pub fn sink(mut self, sink: Box<dyn HardwareSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// One simulated scene holding the robot and the bodies of a belief.
///
/// Sessions are independent of each other. A session may mirror what it executes to a
/// [`HardwareSink`], and a visual session paces trajectory playback in real time.
pub struct SimulatorInstance {
    pub(crate) backend: Box<dyn SimBackend>,
    pub(crate) sink: Box<dyn HardwareSink>,
    model: RobotModel,
    pub robot: BodyId,
    pub table: BodyId,
    /// Index-aligned with `WorldBelief::object_states`.
    pub movable_objects: Vec<BodyId>,
    /// Lazily cloned collision-only copies of group subtrees.
    components: BTreeMap<String, BodyId>,
    pub arm_group: String,
    pub gripper_group: String,
    pub(crate) visual: bool,
    pub(crate) playback_dt: Duration,
}

impl std::fmt::Debug for SimulatorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorInstance")
            .field("robot", &self.robot)
            .field("table", &self.table)
            .field("movable_objects", &self.movable_objects)
            .field("components", &self.components)
            .field("visual", &self.visual)
            .field("real_robot", &self.sink.is_real())
            .finish()
    }
}

impl SimulatorInstance {
    /// Builds a scene matching `belief` inside `backend`.
    #[tracing::instrument(
        skip_all,
        fields(objects = belief.object_states.len(), visual = options.visual)
    )]
    pub fn from_belief(
        belief: &WorldBelief,
        mut backend: Box<dyn SimBackend>,
        model: RobotModel,
        config: &PlannerConfig,
        options: SessionOptions,
    ) -> Result<Self> {
        let robot = backend.load_robot(&model.description)?;

        let table = backend.create_box(config.table_extents, TAN);
        let [x, y, z] = config.table_position;
        backend.set_pose(table, &pose_from_point(x, y, z))?;

        let mut movable_objects = Vec::with_capacity(belief.object_states.len());
        for obj_state in &belief.object_states {
            let obj = (obj_state.create_object)(backend.as_mut());
            backend.set_pose(obj, &obj_state.pose)?;
            movable_objects.push(obj);
        }

        let mut instance = Self {
            backend,
            sink: options.sink,
            model,
            robot,
            table,
            movable_objects,
            components: BTreeMap::new(),
            arm_group: config.arm_group.clone(),
            gripper_group: config.gripper_group.clone(),
            visual: options.visual,
            playback_dt: Duration::from_secs_f64(config.playback_dt.max(0.0)),
        };

        if belief.gripper_open {
            instance.open_gripper()?;
        } else {
            instance.close_gripper()?;
        }
        let arm = instance.arm_group.clone();
        instance.set_group_positions(&arm, &belief.robot_state)?;

        Ok(instance)
    }

    /// Re-poses every tracked object and re-applies the robot state of `belief`.
    pub fn set_belief(&mut self, belief: &WorldBelief) -> Result<()> {
        if belief.object_states.len() != self.movable_objects.len() {
            return Err(TampError::BeliefMismatch {
                belief: belief.object_states.len(),
                session: self.movable_objects.len(),
            });
        }

        for (&body, obj_state) in self.movable_objects.iter().zip(&belief.object_states) {
            self.backend.set_pose(body, &obj_state.pose)?;
        }
        let arm = self.arm_group.clone();
        self.set_group_positions(&arm, &belief.robot_state)?;
        if belief.gripper_open {
            self.open_gripper()
        } else {
            self.close_gripper()
        }
    }

    pub fn backend(&self) -> &dyn SimBackend {
        self.backend.as_ref()
    }

    /// Direct scene access; changes made here are not mirrored to hardware.
    pub fn backend_mut(&mut self) -> &mut dyn SimBackend {
        self.backend.as_mut()
    }

    pub fn is_visual(&self) -> bool {
        self.visual
    }

    pub fn is_real_robot(&self) -> bool {
        self.sink.is_real()
    }

    pub fn object_pose(&self, body: BodyId) -> Result<Pose> {
        self.backend.pose(body)
    }

    pub fn group_joints(&self, group: &str) -> Result<Vec<JointId>> {
        self.model
            .groups
            .get(group)
            .ok_or_else(|| TampError::UnknownGroup(group.to_string()))?
            .iter()
            .map(|name| self.backend.joint_from_name(self.robot, name))
            .collect()
    }

    /// `(lower, upper)` limits of every joint in the group.
    pub fn group_limits(&self, group: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for joint in self.group_joints(group)? {
            let (lo, hi) = self.backend.joint_limits(self.robot, joint)?;
            lower.push(lo);
            upper.push(hi);
        }
        Ok((lower, upper))
    }

    pub fn group_positions(&self, group: &str) -> Result<Vec<f64>> {
        let joints = self.group_joints(group)?;
        self.backend.joint_positions(self.robot, &joints)
    }

    /// Sets a group's positions; arm moves are mirrored to a real robot.
    pub fn set_group_positions(&mut self, group: &str, positions: &[f64]) -> Result<()> {
        let joints = self.group_joints(group)?;
        self.backend.set_joint_positions(self.robot, &joints, positions)?;

        if self.sink.is_real() && group == self.arm_group {
            let named = self.named_positions(self.robot, &joints, positions)?;
            self.sink.command_arm(&named)?;
        }
        Ok(())
    }

    pub fn current_conf(&self, group: &str) -> Result<Conf> {
        let joints = self.group_joints(group)?;
        let positions = self.backend.joint_positions(self.robot, &joints)?;
        Ok(Conf::new(self.robot, joints, positions))
    }

    pub fn open_gripper(&mut self) -> Result<()> {
        let group = self.gripper_group.clone();
        let (_, open) = self.group_limits(&group)?;
        let joints = self.group_joints(&group)?;
        self.backend.set_joint_positions(self.robot, &joints, &open)?;
        self.sink.open_gripper()
    }

    pub fn close_gripper(&mut self) -> Result<()> {
        let group = self.gripper_group.clone();
        let (closed, _) = self.group_limits(&group)?;
        let joints = self.group_joints(&group)?;
        self.backend.set_joint_positions(self.robot, &joints, &closed)?;
        self.sink.close_gripper()
    }

    pub fn tool_link(&self) -> Result<LinkId> {
        self.backend.link_from_name(self.robot, &self.model.tool_link)
    }

    pub fn tool_pose(&self) -> Result<Pose> {
        self.backend.link_pose(self.robot, self.tool_link()?)
    }

    /// Link the group's first joint is mounted on.
    pub fn group_parent(&self, group: &str) -> Result<LinkId> {
        let first = *self
            .group_joints(group)?
            .first()
            .ok_or_else(|| TampError::UnknownGroup(format!("{group} has no joints")))?;
        self.backend.joint_parent_link(self.robot, first)
    }

    pub fn group_subtree(&self, group: &str) -> Result<Vec<LinkId>> {
        self.backend.link_subtree(self.robot, self.group_parent(group)?)
    }

    /// Collision-only copy of the group's kinematic subtree, cloned on first use.
    pub fn get_component(&mut self, group: &str) -> Result<BodyId> {
        if let Some(&component) = self.components.get(group) {
            return Ok(component);
        }
        let links = self.group_subtree(group)?;
        let component = self.backend.clone_links(self.robot, &links, true)?;
        tracing::debug!(group, %component, links = links.len(), "cloned component");
        self.components.insert(group.to_string(), component);
        Ok(component)
    }

    /// Robot joint to component joint, for every movable joint below the group parent.
    pub fn component_mapping(&self, group: &str) -> Result<BTreeMap<JointId, JointId>> {
        let component = *self
            .components
            .get(group)
            .ok_or_else(|| TampError::UnknownGroup(format!("{group} has no component")))?;
        let parent = self.group_parent(group)?;
        let descendants = self.backend.link_subtree(self.robot, parent)?;

        let component_joints = self.backend.movable_joints(component)?;
        let mut mapping = BTreeMap::new();
        for joint in self.backend.movable_joints(self.robot)? {
            let child = self.backend.joint_child_link(self.robot, joint)?;
            if child == parent || !descendants.contains(&child) {
                continue;
            }
            let name = self.backend.joint_name(self.robot, joint)?;
            mapping.insert(joint, self.backend.joint_from_name(component, &name)?);
        }

        if mapping.len() != component_joints.len() {
            return Err(TampError::UnknownJoint(format!(
                "{group}: {} robot joints map onto {} component joints",
                mapping.len(),
                component_joints.len()
            )));
        }
        Ok(mapping)
    }

    /// The group's joints, expressed on its component.
    pub fn component_joints(&self, group: &str) -> Result<Vec<JointId>> {
        let mapping = self.component_mapping(group)?;
        self.group_joints(group)?
            .into_iter()
            .map(|joint| {
                mapping
                    .get(&joint)
                    .copied()
                    .ok_or_else(|| TampError::UnknownJoint(format!("{group}: {}", joint.0)))
            })
            .collect()
    }

    pub(crate) fn named_positions(
        &self,
        body: BodyId,
        joints: &[JointId],
        positions: &[f64],
    ) -> Result<NamedPositions> {
        joints
            .iter()
            .zip(positions)
            .map(|(&joint, &position)| Ok((self.backend.joint_name(body, joint)?, position)))
            .collect()
    }
}
