//! World and goal beliefs, and matching between them.
//!
//! A [`GoalBelief`] has the same shape as a [`WorldBelief`] but reads existentially: for
//! every goal object, some believed object of the same category should sit at that pose.

use std::fmt;
use std::sync::Arc;

use crate::backend::{Rgba, SimBackend};
use crate::config::PlannerConfig;
use crate::error::{Result, TampError};
use crate::geometry::{pose_distance, BodyId, Pose};

/// Instantiates an object in a simulation session and returns its handle.
pub type ObjectFactory = Arc<dyn Fn(&mut dyn SimBackend) -> BodyId + Send + Sync>;

#[derive(Clone)]
pub struct ObjectState {
    pub create_object: ObjectFactory,
    pub pose: Pose,
    /// Label used for goal matching.
    pub category: String,
}

impl fmt::Debug for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectState")
            .field("category", &self.category)
            .field("pose", &self.pose)
            .finish_non_exhaustive()
    }
}

impl ObjectState {
    pub fn new(category: impl Into<String>, pose: Pose, create_object: ObjectFactory) -> Self {
        Self {
            create_object,
            pose,
            category: category.into(),
        }
    }

    /// An object backed by a plain box of the given full extents.
    pub fn boxed(category: impl Into<String>, pose: Pose, extents: [f64; 3], color: Rgba) -> Self {
        Self::new(
            category,
            pose,
            Arc::new(move |sim: &mut dyn SimBackend| sim.create_box(extents, color)),
        )
    }
}

/// What the robot believes about the scene: object poses plus the arm and gripper state.
#[derive(Debug, Clone)]
pub struct WorldBelief {
    /// Index-aligned with the movable objects of every session built from this belief.
    pub object_states: Vec<ObjectState>,
    /// Arm joint positions.
    pub robot_state: Vec<f64>,
    pub gripper_open: bool,
}

/// Where a goal object was found in the current belief, and how far off it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalMatch {
    pub index: usize,
    pub position_error: f64,
    pub orientation_error: f64,
}

impl GoalMatch {
    pub fn needs_replanning(&self, config: &PlannerConfig) -> bool {
        config.exceeds_tolerance((self.position_error, self.orientation_error))
    }
}

impl WorldBelief {
    pub fn new(object_states: Vec<ObjectState>, robot_state: Vec<f64>) -> Self {
        Self {
            object_states,
            robot_state,
            gripper_open: true,
        }
    }

    /// Index of the first object with this category.
    pub fn find_category(&self, category: &str) -> Option<usize> {
        self.object_states
            .iter()
            .position(|obj| obj.category == category)
    }

    /// Matches one goal object by category (first match wins) and measures its pose error.
    pub fn match_goal_object(&self, goal_object: &ObjectState) -> Result<GoalMatch> {
        let index = self
            .find_category(&goal_object.category)
            .ok_or_else(|| TampError::NoMatchingCategory(goal_object.category.clone()))?;
        let (position_error, orientation_error) =
            pose_distance(&self.object_states[index].pose, &goal_object.pose);
        Ok(GoalMatch {
            index,
            position_error,
            orientation_error,
        })
    }

    /// The belief after one object has been placed and the arm left at `robot_state`.
    pub fn with_object_placed(&self, index: usize, pose: Pose, robot_state: Vec<f64>) -> Self {
        let mut next = self.clone();
        if let Some(obj) = next.object_states.get_mut(index) {
            obj.pose = pose;
        }
        next.robot_state = robot_state;
        next
    }
}

#[derive(Debug, Clone)]
pub struct GoalBelief(WorldBelief);

impl GoalBelief {
    pub fn new(belief: WorldBelief) -> Self {
        Self(belief)
    }

    /// Goal objects in the order they are processed.
    pub fn object_states(&self) -> &[ObjectState] {
        &self.0.object_states
    }

    /// Checks that every goal category exists in `belief` before any planning starts.
    pub fn check_against(&self, belief: &WorldBelief) -> Result<()> {
        self.object_states().iter().try_for_each(|goal| {
            belief
                .find_category(&goal.category)
                .map(|_| ())
                .ok_or_else(|| TampError::NoMatchingCategory(goal.category.clone()))
        })
    }
}

impl From<WorldBelief> for GoalBelief {
    fn from(belief: WorldBelief) -> Self {
        Self(belief)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RED;
    use crate::geometry::{multiply, pose_from_euler, pose_from_point};

    fn cube(category: &str, pose: Pose) -> ObjectState {
        ObjectState::boxed(category, pose, [0.05; 3], RED)
    }

    #[test]
    fn first_category_match_wins() {
        let belief = WorldBelief::new(
            vec![
                cube("red_box", pose_from_point(0.0, 0.0, 0.0)),
                cube("red_box", pose_from_point(1.0, 0.0, 0.0)),
            ],
            vec![],
        );
        let goal = cube("red_box", pose_from_point(1.0, 0.0, 0.0));

        let found = belief.match_goal_object(&goal).unwrap();
        assert_eq!(found.index, 0);
        assert!((found.position_error - 1.0).abs() < 1e-12);
    }

    #[test]
    fn within_tolerance_is_not_replanned() {
        let config = PlannerConfig::default();
        let start = pose_from_point(0.45, 0.1, 0.05);
        let belief = WorldBelief::new(vec![cube("red_box", start)], vec![]);

        let nudged = multiply(&[pose_from_point(0.005, 0.0, 0.0), start]);
        assert!(!belief
            .match_goal_object(&cube("red_box", nudged))
            .unwrap()
            .needs_replanning(&config));

        let turned = multiply(&[start, pose_from_euler(0.0, 0.0, 0.05)]);
        assert!(belief
            .match_goal_object(&cube("red_box", turned))
            .unwrap()
            .needs_replanning(&config));
    }

    #[test]
    fn missing_category_is_an_error() {
        let belief = WorldBelief::new(vec![cube("red_box", Pose::identity())], vec![]);
        let goal = GoalBelief::new(WorldBelief::new(
            vec![cube("green_box", Pose::identity())],
            vec![],
        ));

        assert!(matches!(
            goal.check_against(&belief),
            Err(TampError::NoMatchingCategory(c)) if c == "green_box"
        ));
    }

    #[test]
    fn placing_an_object_leaves_the_source_belief_untouched() {
        let belief = WorldBelief::new(vec![cube("red_box", Pose::identity())], vec![0.0; 4]);
        let target = pose_from_point(0.1, 0.0, 0.0);

        let next = belief.with_object_placed(0, target, vec![1.0; 4]);
        assert_eq!(next.object_states[0].pose, target);
        assert_eq!(next.robot_state, vec![1.0; 4]);
        assert_eq!(belief.object_states[0].pose, Pose::identity());
        assert_eq!(belief.robot_state, vec![0.0; 4]);
    }
}
