//! Error type shared by every layer of the planner.

use thiserror::Error;

use crate::geometry::BodyId;
use crate::strategy::Statistics;

#[derive(Error, Debug)]
pub enum TampError {
    #[error("Unknown body: {0}")]
    UnknownBody(BodyId),

    #[error("Unknown link '{0}'")]
    UnknownLink(String),

    #[error("Unknown joint '{0}'")]
    UnknownJoint(String),

    #[error("Unknown joint group '{0}'")]
    UnknownGroup(String),

    #[error("Belief tracks {belief} objects but the session holds {session}")]
    BeliefMismatch { belief: usize, session: usize },

    #[error("No believed object has category '{0}'")]
    NoMatchingCategory(String),

    #[error("Planning failed for '{category}'")]
    PlanningFailed {
        category: String,
        statistics: Statistics,
    },

    #[error("Kinematics error: {0}")]
    Kinematics(#[from] k::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Hardware sink error: {0}")]
    Hardware(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TampError>;
