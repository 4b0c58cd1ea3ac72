//! The per-object re-planning loop.
//!
//! Goal objects are handled strictly in goal order. Each one is matched to the current
//! belief by category; objects already within tolerance are skipped, the rest are planned
//! on the twin session. Successful sub-plans advance the belief (as a new value) and the
//! twin is re-synchronised; a single planning failure aborts the whole run before anything
//! is executed. The accumulated sub-plans run on the primary session only once every goal
//! object has a plan.

use crate::belief::{GoalBelief, WorldBelief};
use crate::command::{Command, CommandIds, Sequence};
use crate::config::PlannerConfig;
use crate::error::{Result, TampError};
use crate::sim::SimulatorInstance;
use crate::strategy::{plan_pick_place, GraspStrategy, MotionStrategy, Statistics};

/// A complete plan for one run, plus the belief it should leave behind.
#[derive(Debug, Clone)]
pub struct RearrangementPlan {
    /// Named sequence of per-object sub-plans, in goal order.
    pub command: Command,
    /// Predicted belief after `command` has executed.
    pub belief: WorldBelief,
    /// Diagnostics of every planned object, in goal order.
    pub statistics: Vec<Statistics>,
    /// Categories that were already at their goal pose.
    pub skipped: Vec<String>,
}

/// Owns the executing session and its planning twin.
///
/// Every [`plan`](Self::plan) numbers its commands from scratch, so planning the same
/// problem twice yields identical command trees.
#[derive(Debug)]
pub struct Orchestrator {
    config: PlannerConfig,
    primary: SimulatorInstance,
    twin: SimulatorInstance,
}

impl Orchestrator {
    /// `primary` executes, `twin` is used for planning only. Both are owned for the run.
    ///
    /// A visual twin replays each sub-plan as soon as it is found.
    pub fn new(config: PlannerConfig, primary: SimulatorInstance, twin: SimulatorInstance) -> Self {
        Self {
            config,
            primary,
            twin,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn primary(&self) -> &SimulatorInstance {
        &self.primary
    }

    pub fn twin(&self) -> &SimulatorInstance {
        &self.twin
    }

    /// Plans every goal object without executing anything.
    ///
    /// `belief` is never modified. On a planning failure the returned
    /// [`TampError::PlanningFailed`] carries the failing object's statistics, and plans
    /// already found for earlier objects are discarded.
    #[tracing::instrument(skip_all, fields(goals = goal.object_states().len()))]
    pub fn plan(
        &mut self,
        belief: &WorldBelief,
        goal: &GoalBelief,
        motion: &mut dyn MotionStrategy,
        grasp: &mut dyn GraspStrategy,
    ) -> Result<RearrangementPlan> {
        goal.check_against(belief)?;
        self.twin.set_belief(belief)?;

        let mut ids = CommandIds::new();
        let mut current = belief.clone();
        let mut sub_plans = Vec::new();
        let mut statistics = Vec::new();
        let mut skipped = Vec::new();

        for goal_object in goal.object_states() {
            let category = goal_object.category.as_str();
            let found = current.match_goal_object(goal_object)?;
            if !found.needs_replanning(&self.config) {
                tracing::info!(category, "already at goal, skipping");
                skipped.push(category.to_string());
                continue;
            }

            tracing::info!(
                category,
                position_error = found.position_error,
                orientation_error = found.orientation_error,
                "planning pick and place"
            );
            let body = *self.twin.movable_objects.get(found.index).ok_or(
                TampError::BeliefMismatch {
                    belief: current.object_states.len(),
                    session: self.twin.movable_objects.len(),
                },
            )?;
            let outcome = plan_pick_place(
                &mut self.twin,
                &current,
                body,
                grasp,
                motion,
                &goal_object.pose,
                &self.config,
                &mut ids,
            )?;

            let Some(subplan) = outcome.subplan else {
                tracing::warn!(category, "planning failure");
                return Err(TampError::PlanningFailed {
                    category: category.to_string(),
                    statistics: outcome.statistics,
                });
            };

            let robot_state = subplan
                .last_trajectory()
                .and_then(|t| t.final_positions())
                .map(<[f64]>::to_vec)
                .ok_or_else(|| {
                    TampError::InvalidCommand(format!("{subplan} contains no trajectory"))
                })?;
            if self.twin.is_visual() {
                tracing::debug!(category, "previewing sub-plan on the twin");
                self.twin.set_belief(&current)?;
                self.twin.execute_command(&subplan)?;
            }
            current = current.with_object_placed(found.index, goal_object.pose, robot_state);
            self.twin.set_belief(&current)?;

            statistics.push(outcome.statistics);
            sub_plans.push(subplan);
        }

        let command =
            Sequence::named(ids.next_id(), sub_plans, self.config.plan_name.clone()).into();
        Ok(RearrangementPlan {
            command,
            belief: current,
            statistics,
            skipped,
        })
    }

    /// Dispatches a plan to the primary session.
    #[tracing::instrument(skip_all, fields(plan = %plan.command))]
    pub fn execute(&mut self, plan: &RearrangementPlan) -> Result<()> {
        tracing::info!(leaves = plan.command.leaves().len(), "executing plan");
        self.primary.execute_command(&plan.command)
    }

    /// Plans, then executes.
    pub fn run(
        &mut self,
        belief: &WorldBelief,
        goal: &GoalBelief,
        motion: &mut dyn MotionStrategy,
        grasp: &mut dyn GraspStrategy,
    ) -> Result<RearrangementPlan> {
        let plan = self.plan(belief, goal, motion, grasp)?;
        self.execute(&plan)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RED;
    use crate::belief::ObjectState;
    use crate::command::{Conf, Trajectory};
    use crate::geometry::{pose_from_point, BodyId};
    use crate::grasp::{Attachment, Grasp};
    use crate::memory::MemoryBackend;
    use crate::sim::{RobotModel, SessionOptions};
    use crate::strategy::MotionGoal;

    fn belief(n: usize) -> WorldBelief {
        let objects = (0..n)
            .map(|i| {
                ObjectState::boxed(
                    format!("box_{i}"),
                    pose_from_point(0.45, 0.1 * i as f64, 0.035),
                    [0.05; 3],
                    RED,
                )
            })
            .collect();
        WorldBelief::new(objects, PlannerConfig::default().default_joint_positions)
    }

    fn session(belief: &WorldBelief) -> SimulatorInstance {
        SimulatorInstance::from_belief(
            belief,
            Box::new(MemoryBackend::new()),
            RobotModel::gantry(),
            &PlannerConfig::default(),
            SessionOptions::default(),
        )
        .unwrap()
    }

    fn never_grasp(_: &mut SimulatorInstance, body: BodyId) -> Result<Grasp> {
        panic!("grasp sampled for {body}")
    }

    fn never_move(
        _: &mut SimulatorInstance,
        _: &Conf,
        _: &MotionGoal,
        _: &[Attachment],
    ) -> Option<Trajectory> {
        panic!("motion requested")
    }

    #[test]
    fn empty_goal_yields_empty_named_plan() {
        let belief = belief(1);
        let mut orchestrator =
            Orchestrator::new(PlannerConfig::default(), session(&belief), session(&belief));
        let goal = GoalBelief::new(WorldBelief::new(Vec::new(), belief.robot_state.clone()));

        let plan = orchestrator
            .plan(&belief, &goal, &mut never_move, &mut never_grasp)
            .unwrap();
        let Command::Sequence(root) = &plan.command else {
            panic!("root must be a sequence");
        };
        assert_eq!(root.name.as_deref(), Some("rearrangement_plan"));
        assert!(root.commands.is_empty());
        assert!(plan.statistics.is_empty());
    }

    #[test]
    fn twin_out_of_sync_is_rejected() {
        let belief = belief(2);
        let mut orchestrator = Orchestrator::new(
            PlannerConfig::default(),
            session(&belief),
            session(&self::belief(1)),
        );
        let goal = GoalBelief::new(belief.clone());

        let err = orchestrator
            .plan(&belief, &goal, &mut never_move, &mut never_grasp)
            .unwrap_err();
        assert!(matches!(
            err,
            TampError::BeliefMismatch {
                belief: 2,
                session: 1
            }
        ));
    }

    #[test]
    fn repeated_runs_assign_the_same_ids() {
        let belief = belief(1);
        let mut orchestrator =
            Orchestrator::new(PlannerConfig::default(), session(&belief), session(&belief));
        let goal = GoalBelief::new(belief.clone());

        let first = orchestrator
            .run(&belief, &goal, &mut never_move, &mut never_grasp)
            .unwrap();
        let second = orchestrator
            .run(&belief, &goal, &mut never_move, &mut never_grasp)
            .unwrap();
        assert_eq!(second.command.id(), first.command.id());
        assert_eq!(second.skipped, vec!["box_0"]);
    }
}
