//! Tiny task-and-motion planning (TAMP) core for pick-and-place rearrangement.
//!
//! This crate defines:
//! - [`WorldBelief`] / [`GoalBelief`]: believed object poses and the per-category goal.
//! - [`Command`]: the executable plan tree (trajectories, grasp actions, sequences).
//! - [`SimulatorInstance`]: one session over a [`SimBackend`], optionally mirrored to a
//!   real robot through a [`HardwareSink`].
//! - [`Orchestrator`]: the per-object re-planning loop driving pluggable
//!   [`GraspStrategy`] and [`MotionStrategy`] implementations.
//!
//! Physics, IK and search are behind traits; [`MemoryBackend`] and the strategies in
//! [`planners`] are enough to run the whole loop in-process.

pub mod backend;
pub mod belief;
pub mod command;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grasp;
pub mod hardware;
mod interpreter;
pub mod memory;
pub mod orchestrator;
pub mod planners;
pub mod sim;
pub mod strategy;

pub use backend::{RobotDescription, SimBackend};
pub use belief::{GoalBelief, ObjectState, WorldBelief};
pub use command::{Command, CommandId, CommandIds, Conf, GraspAction, Sequence, Trajectory};
pub use config::{load_config, PlannerConfig};
pub use error::{Result, TampError};
pub use geometry::{BodyId, JointId, LinkId, Pose};
pub use grasp::{Attachment, Grasp};
pub use hardware::{HardwareSink, NoopSink, SocketSink};
pub use memory::MemoryBackend;
pub use orchestrator::{Orchestrator, RearrangementPlan};
pub use sim::{RobotModel, SessionOptions, SimulatorInstance};
pub use strategy::{plan_pick_place, GraspStrategy, MotionGoal, MotionStrategy, Statistics};
