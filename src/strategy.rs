//! Pluggable planning strategies and the pick-and-place composer built on them.
//!
//! - [`GraspStrategy`]: proposes a [`Grasp`] for an object.
//! - [`MotionStrategy`]: connects a configuration to a configuration or tool pose.
//! - [`plan_pick_place`]: turns one grasp and four motions into a pick/place sub-plan.
//!
//! Strategies run against the twin session and may move it freely while searching.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{json, Value};

use crate::belief::WorldBelief;
use crate::command::{Command, CommandIds, Conf, GraspAction, Sequence, Trajectory};
use crate::config::PlannerConfig;
use crate::error::Result;
use crate::geometry::{unit_pose, BodyId, Pose};
use crate::grasp::{Attachment, Grasp};
use crate::sim::SimulatorInstance;

/// Planner diagnostics, keyed by name. Printed as JSON when a run fails.
pub type Statistics = BTreeMap<String, Value>;

/// Proposes a grasp on a body. Each call may return a different candidate.
pub trait GraspStrategy {
    fn sample_grasp(&mut self, sim: &mut SimulatorInstance, body: BodyId) -> Result<Grasp>;
}

impl<F> GraspStrategy for F
where
    F: FnMut(&mut SimulatorInstance, BodyId) -> Result<Grasp>,
{
    fn sample_grasp(&mut self, sim: &mut SimulatorInstance, body: BodyId) -> Result<Grasp> {
        self(sim, body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MotionGoal {
    Conf(Vec<f64>),
    /// World pose of the robot's tool link.
    ToolPose(Pose),
}

/// Plans arm motions to a configuration or a tool pose.
pub trait MotionStrategy {
    /// A trajectory starting at `start` and ending at `goal`, or `None` if none was found.
    ///
    /// `attachments` are carried along and must be listed on the returned trajectory.
    fn plan_motion(
        &mut self,
        sim: &mut SimulatorInstance,
        start: &Conf,
        goal: &MotionGoal,
        attachments: &[Attachment],
    ) -> Option<Trajectory>;
}

impl<F> MotionStrategy for F
where
    F: FnMut(&mut SimulatorInstance, &Conf, &MotionGoal, &[Attachment]) -> Option<Trajectory>,
{
    fn plan_motion(
        &mut self,
        sim: &mut SimulatorInstance,
        start: &Conf,
        goal: &MotionGoal,
        attachments: &[Attachment],
    ) -> Option<Trajectory> {
        self(sim, start, goal, attachments)
    }
}

/// Result of planning one object: a sub-plan if one was found, and diagnostics either way.
#[derive(Debug, Clone)]
pub struct PickPlaceOutcome {
    pub subplan: Option<Command>,
    pub statistics: Statistics,
}

#[derive(Debug, Default)]
struct Tally {
    grasp_attempts: usize,
    motion_calls: usize,
    failure_stage: Option<&'static str>,
    last_error: Option<String>,
}

impl Tally {
    fn into_statistics(self, body: BodyId, success: bool, started: Instant) -> Statistics {
        [
            ("body", json!(body.0)),
            ("success", json!(success)),
            ("grasp_attempts", json!(self.grasp_attempts)),
            ("motion_calls", json!(self.motion_calls)),
            ("failure_stage", json!(self.failure_stage)),
            ("last_error", json!(self.last_error)),
            ("planning_time", json!(started.elapsed().as_secs_f64())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Everything one grasp attempt needs besides the grasp itself.
struct PickPlaceRequest<'a> {
    start: &'a Conf,
    object_pose: Pose,
    placement: &'a Pose,
    config: &'a PlannerConfig,
}

/// Plans picking `body` from where the session holds it and placing it at `placement`.
///
/// The sub-plan is `Sequence[pick, place]` with
/// `pick = [approach, descend, activate, lift]` and
/// `place = [transport, descend, deactivate, retreat]`; the last trajectory therefore
/// ends at the place pre-grasp configuration. Up to `max_grasp_attempts` grasps are tried.
/// Infeasibility is reported through [`PickPlaceOutcome::subplan`]; backend faults are errors.
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(body = %body))]
pub fn plan_pick_place(
    sim: &mut SimulatorInstance,
    belief: &WorldBelief,
    body: BodyId,
    grasp_strategy: &mut dyn GraspStrategy,
    motion_strategy: &mut dyn MotionStrategy,
    placement: &Pose,
    config: &PlannerConfig,
    ids: &mut CommandIds,
) -> Result<PickPlaceOutcome> {
    let started = Instant::now();
    let mut tally = Tally::default();

    let arm = sim.arm_group.clone();
    let start = Conf::new(sim.robot, sim.group_joints(&arm)?, belief.robot_state.clone());
    let request = PickPlaceRequest {
        start: &start,
        object_pose: sim.object_pose(body)?,
        placement,
        config,
    };

    for attempt in 0..config.max_grasp_attempts.max(1) {
        tally.grasp_attempts += 1;
        let grasp = match grasp_strategy.sample_grasp(sim, body) {
            Ok(grasp) => grasp,
            Err(e) => {
                tracing::debug!(attempt, error = %e, "grasp sampling failed");
                tally.failure_stage = Some("grasp");
                tally.last_error = Some(e.to_string());
                continue;
            }
        };

        if let Some(subplan) =
            plan_with_grasp(sim, &grasp, &request, motion_strategy, &mut tally, ids)
        {
            tally.failure_stage = None;
            return Ok(PickPlaceOutcome {
                subplan: Some(subplan),
                statistics: tally.into_statistics(body, true, started),
            });
        }
    }

    Ok(PickPlaceOutcome {
        subplan: None,
        statistics: tally.into_statistics(body, false, started),
    })
}

fn plan_with_grasp(
    sim: &mut SimulatorInstance,
    grasp: &Grasp,
    request: &PickPlaceRequest<'_>,
    motion: &mut dyn MotionStrategy,
    tally: &mut Tally,
    ids: &mut CommandIds,
) -> Option<Command> {
    let config = request.config;
    let standoff = |tool: &Pose| {
        grasp.pregrasp_pose(
            tool,
            &unit_pose(),
            config.approach_offset,
            config.pregrasp_distance,
        )
    };
    let pick_tool = grasp.tool_pose_for(&request.object_pose);
    let place_tool = grasp.tool_pose_for(request.placement);
    let held = vec![grasp.attachment.clone()];

    let mut stage = |name: &'static str, start: &Conf, goal: Pose, attachments: &[Attachment]| {
        tally.motion_calls += 1;
        match motion.plan_motion(sim, start, &MotionGoal::ToolPose(goal), attachments) {
            Some(t) if t.final_positions().is_some() => Some(
                t.with_attachments(attachments.to_vec())
                    .with_id(ids.next_id()),
            ),
            _ => {
                tracing::debug!(stage = name, "motion planning failed");
                tally.failure_stage = Some(name);
                None
            }
        }
    };

    let approach = stage("approach", request.start, standoff(&pick_tool), &[])?;
    let descend = stage("pick_descend", &approach.final_conf()?, pick_tool, &[])?;
    let lift = descend.reverse().with_attachments(held.clone());
    let transport = stage("transport", &lift.final_conf()?, standoff(&place_tool), &held)?;
    let lower = stage("place_descend", &transport.final_conf()?, place_tool, &held)?;

    let lift = lift.with_id(ids.next_id());
    let retreat = lower.reverse().with_attachments(Vec::new()).with_id(ids.next_id());

    let link = grasp.attachment.parent_link;
    let body = grasp.attachment.child;
    let pick = Sequence::named(
        ids.next_id(),
        vec![
            approach.into(),
            descend.into(),
            Command::ActivateGrasp(GraspAction::new(ids.next_id(), sim.robot, link, body)),
            lift.into(),
        ],
        "pick",
    );
    let place = Sequence::named(
        ids.next_id(),
        vec![
            transport.into(),
            lower.into(),
            Command::DeactivateGrasp(GraspAction::new(ids.next_id(), sim.robot, link, body)),
            retreat.into(),
        ],
        "place",
    );

    Some(
        Sequence::named(
            ids.next_id(),
            vec![pick.into(), place.into()],
            format!("pick_place_{}", body.0),
        )
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RED;
    use crate::belief::ObjectState;
    use crate::error::TampError;
    use crate::geometry::pose_from_point;
    use crate::memory::MemoryBackend;
    use crate::planners::{InterpolatedMotion, JacobianIk, TopDownGrasp};
    use crate::sim::{RobotModel, SessionOptions};

    fn setup() -> (SimulatorInstance, WorldBelief) {
        let belief = WorldBelief::new(
            vec![ObjectState::boxed(
                "red_box",
                pose_from_point(0.45, 0.1, 0.035),
                [0.05; 3],
                RED,
            )],
            vec![0.45, 0.0, 0.3, 0.0],
        );
        let sim = SimulatorInstance::from_belief(
            &belief,
            Box::new(MemoryBackend::new()),
            RobotModel::gantry(),
            &PlannerConfig::default(),
            SessionOptions::default(),
        )
        .unwrap();
        (sim, belief)
    }

    #[test]
    fn failed_grasp_samples_are_retried_up_to_the_limit() {
        let (mut sim, belief) = setup();
        let body = sim.movable_objects[0];
        let config = PlannerConfig {
            max_grasp_attempts: 2,
            ..PlannerConfig::default()
        };

        let mut samples = 0;
        let mut reference = TopDownGrasp::downward(0.01, config.gripper_close_margin);
        let mut grasp = |sim: &mut SimulatorInstance, body: BodyId| -> Result<Grasp> {
            samples += 1;
            if samples == 1 {
                return Err(TampError::UnknownBody(body));
            }
            reference.sample_grasp(sim, body)
        };
        let mut motion = InterpolatedMotion::new(JacobianIk::default(), 0.05);

        let outcome = plan_pick_place(
            &mut sim,
            &belief,
            body,
            &mut grasp,
            &mut motion,
            &pose_from_point(0.55, 0.1, 0.035),
            &config,
            &mut CommandIds::new(),
        )
        .unwrap();

        assert!(outcome.subplan.is_some());
        let stats = &outcome.statistics;
        assert_eq!(stats["success"], true);
        assert_eq!(stats["grasp_attempts"], 2);
        assert_eq!(stats["motion_calls"], 4);
        assert!(stats["failure_stage"].is_null());
        assert!(stats["last_error"].as_str().unwrap().contains("body#"));
    }

    #[test]
    fn unreachable_placement_reports_the_failing_stage() {
        let (mut sim, belief) = setup();
        let body = sim.movable_objects[0];
        let config = PlannerConfig::default();

        let mut grasp = TopDownGrasp::downward(0.01, config.gripper_close_margin);
        let mut motion = InterpolatedMotion::new(JacobianIk::default(), 0.05);
        // Far outside the gantry's x travel.
        let placement = pose_from_point(3.0, 0.1, 0.035);

        let outcome = plan_pick_place(
            &mut sim,
            &belief,
            body,
            &mut grasp,
            &mut motion,
            &placement,
            &config,
            &mut CommandIds::new(),
        )
        .unwrap();

        assert!(outcome.subplan.is_none());
        assert_eq!(outcome.statistics["success"], false);
        assert_eq!(outcome.statistics["failure_stage"], "transport");
        assert_eq!(outcome.statistics["motion_calls"], 3);
    }
}
