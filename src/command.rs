//! Executable command trees.
//!
//! A plan is a [`Command`]: leaves move the arm ([`Trajectory`]) or actuate the gripper
//! ([`GraspAction`]), and [`Sequence`] nodes order their children. Trees are plain owned
//! values, so they cannot contain cycles.
//!
//! Commands serialize as JSON tagged by `"type"`; decoding an unknown tag fails.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::SimBackend;
use crate::error::{Result, TampError};
use crate::geometry::{BodyId, JointId, LinkId};
use crate::grasp::Attachment;

/// Run-scoped command identifier; used for labels and test assertions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CommandId(pub u64);

/// Hands out increasing [`CommandId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct CommandIds {
    last: u64,
}

impl CommandIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> CommandId {
        self.last += 1;
        CommandId(self.last)
    }
}

/// A robot configuration over a subset of joints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    pub robot: BodyId,
    pub joints: Vec<JointId>,
    pub positions: Vec<f64>,
}

impl Conf {
    pub fn new(robot: BodyId, joints: Vec<JointId>, positions: Vec<f64>) -> Self {
        Self {
            robot,
            joints,
            positions,
        }
    }

    pub fn assign(&self, sim: &mut dyn SimBackend) -> Result<()> {
        sim.set_joint_positions(self.robot, &self.joints, &self.positions)
    }
}

/// A joint-space path for one robot, carrying any attached bodies along.
///
/// Every waypoint lists one position per entry of `joints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    #[serde(default)]
    pub id: CommandId,
    pub robot: BodyId,
    pub joints: Vec<JointId>,
    pub path: Vec<Vec<f64>>,
    /// Bodies carried along while this trajectory plays.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default = "default_velocity_scale")]
    pub velocity_scale: f64,
    /// Seconds to keep moving after contact; `None` means no cutoff.
    #[serde(default)]
    pub time_after_contact: Option<f64>,
}

fn default_velocity_scale() -> f64 {
    1.0
}

impl Trajectory {
    pub fn new(robot: BodyId, joints: Vec<JointId>, path: Vec<Vec<f64>>) -> Self {
        Self {
            id: CommandId::default(),
            robot,
            joints,
            path,
            attachments: Vec::new(),
            velocity_scale: default_velocity_scale(),
            time_after_contact: None,
        }
    }

    pub fn with_id(mut self, id: CommandId) -> Self {
        self.id = id;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Same trajectory played backwards. Every other field is kept, including the id.
    pub fn reverse(&self) -> Self {
        let mut reversed = self.clone();
        reversed.path.reverse();
        reversed
    }

    pub fn start_positions(&self) -> Option<&[f64]> {
        self.path.first().map(Vec::as_slice)
    }

    pub fn final_positions(&self) -> Option<&[f64]> {
        self.path.last().map(Vec::as_slice)
    }

    pub fn final_conf(&self) -> Option<Conf> {
        self.final_positions()
            .map(|q| Conf::new(self.robot, self.joints.clone(), q.to_vec()))
    }

    /// Every waypoint must have one position per joint.
    pub fn validate(&self) -> Result<()> {
        match self.path.iter().position(|q| q.len() != self.joints.len()) {
            Some(i) => Err(TampError::InvalidCommand(format!(
                "{self}: waypoint {i} has {} positions for {} joints",
                self.path[i].len(),
                self.joints.len()
            ))),
            None => Ok(()),
        }
    }
}

/// Closes (activate) or opens (deactivate) the gripper around `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspAction {
    #[serde(default)]
    pub id: CommandId,
    pub robot: BodyId,
    pub gripper_link: LinkId,
    pub body: BodyId,
}

impl GraspAction {
    pub fn new(id: CommandId, robot: BodyId, gripper_link: LinkId, body: BodyId) -> Self {
        Self {
            id,
            robot,
            gripper_link,
            body,
        }
    }
}

/// Ordered children, executed depth first. `name` labels plans in logs and dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(default)]
    pub id: CommandId,
    pub commands: Vec<Command>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Sequence {
    pub fn new(id: CommandId, commands: Vec<Command>) -> Self {
        Self {
            id,
            commands,
            name: None,
        }
    }

    pub fn named(id: CommandId, commands: Vec<Command>, name: impl Into<String>) -> Self {
        Self {
            id,
            commands,
            name: Some(name.into()),
        }
    }
}

/// A node of a plan tree. Leaves are trajectories and grasp actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Trajectory(Trajectory),
    ActivateGrasp(GraspAction),
    DeactivateGrasp(GraspAction),
    Sequence(Sequence),
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::Trajectory(t) => t.id,
            Command::ActivateGrasp(g) | Command::DeactivateGrasp(g) => g.id,
            Command::Sequence(s) => s.id,
        }
    }

    /// Leaves in execution order, whatever the nesting depth.
    pub fn leaves(&self) -> Vec<&Command> {
        match self {
            Command::Sequence(s) => s.commands.iter().flat_map(Command::leaves).collect(),
            leaf => vec![leaf],
        }
    }

    /// The last trajectory that would run, if any.
    pub fn last_trajectory(&self) -> Option<&Trajectory> {
        match self {
            Command::Trajectory(t) => Some(t),
            Command::Sequence(s) => s.commands.iter().rev().find_map(Command::last_trajectory),
            Command::ActivateGrasp(_) | Command::DeactivateGrasp(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl From<Trajectory> for Command {
    fn from(t: Trajectory) -> Self {
        Command::Trajectory(t)
    }
}

impl From<Sequence> for Command {
    fn from(s: Sequence) -> Self {
        Command::Sequence(s)
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.id.0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Trajectory(t) => fmt::Display::fmt(t, f),
            Command::ActivateGrasp(g) => write!(f, "g{}", g.id.0),
            Command::DeactivateGrasp(g) => write!(f, "r{}", g.id.0),
            Command::Sequence(s) => match &s.name {
                Some(name) => write!(f, "s{}({name})", s.id.0),
                None => write!(f, "s{}", s.id.0),
            },
        }
    }
}
