//! Reference strategies: a fixed top-down grasp, Jacobian IK on the robot's `k` tree, and
//! straight-line joint-space motion. None of them check collisions.

use k::InverseKinematicsSolver;

use crate::command::{Conf, Trajectory};
use crate::error::Result;
use crate::geometry::{multiply, pose_distance, pose_from_euler, pose_from_point, BodyId, Pose};
use crate::grasp::{Attachment, Grasp};
use crate::sim::SimulatorInstance;
use crate::strategy::{GraspStrategy, MotionGoal, MotionStrategy};

/// Grasps every object with the same tool-to-object transform.
#[derive(Debug, Clone)]
pub struct TopDownGrasp {
    pub tool_t_object: Pose,
    /// Closed finger width is the lower gripper limit scaled by `1 + close_margin`.
    pub close_margin: f64,
}

impl TopDownGrasp {
    pub fn new(tool_t_object: Pose, close_margin: f64) -> Self {
        Self {
            tool_t_object,
            close_margin,
        }
    }

    /// Object `depth` beyond the tip along a downward-pointing tool z axis, upright.
    pub fn downward(depth: f64, close_margin: f64) -> Self {
        Self::new(
            multiply(&[
                pose_from_point(0.0, 0.0, depth),
                pose_from_euler(std::f64::consts::PI, 0.0, 0.0),
            ]),
            close_margin,
        )
    }
}

impl GraspStrategy for TopDownGrasp {
    fn sample_grasp(&mut self, sim: &mut SimulatorInstance, body: BodyId) -> Result<Grasp> {
        let gripper = sim.gripper_group.clone();
        let (closed, _) = sim.group_limits(&gripper)?;
        let closed_position = closed.first().copied().unwrap_or(0.0) * (1.0 + self.close_margin);
        let attachment = Attachment::new(sim.robot, sim.tool_link()?, body, self.tool_t_object);
        Ok(Grasp::new(attachment, closed_position))
    }
}

pub trait InverseKinematics {
    /// Arm positions that put the tool at `target`, searched from `seed`.
    fn solve(&mut self, sim: &mut SimulatorInstance, target: &Pose, seed: &[f64])
        -> Option<Vec<f64>>;
}

/// Jacobian IK through [`k::JacobianIkSolver`] on a detached copy of the robot's tree.
///
/// The arm group must be exactly the movable joints between the base and the tool link.
/// Arms with fewer than six joints leave roll and pitch unconstrained, and solutions that
/// miss the target orientation are rejected afterwards. The session is never touched.
#[derive(Debug, Clone)]
pub struct JacobianIk {
    pub position_tolerance: f64,
    pub orientation_tolerance: f64,
    /// Fraction of the Jacobian step applied per iteration.
    pub step_scale: f64,
    pub max_iterations: usize,
}

impl Default for JacobianIk {
    fn default() -> Self {
        Self {
            position_tolerance: 1e-6,
            orientation_tolerance: 1e-6,
            step_scale: 0.5,
            max_iterations: 100,
        }
    }
}

impl JacobianIk {
    fn solver(&self) -> k::JacobianIkSolver<f64> {
        k::JacobianIkSolver::new(
            self.position_tolerance,
            self.orientation_tolerance,
            self.step_scale,
            self.max_iterations,
        )
    }

    fn constraints(dof: usize) -> k::Constraints {
        if dof >= 6 {
            k::Constraints::default()
        } else {
            k::Constraints {
                rotation_x: false,
                rotation_y: false,
                ..Default::default()
            }
        }
    }
}

impl InverseKinematics for JacobianIk {
    fn solve(
        &mut self,
        sim: &mut SimulatorInstance,
        target: &Pose,
        seed: &[f64],
    ) -> Option<Vec<f64>> {
        let arm = sim.arm_group.clone();
        let joints = sim.group_joints(&arm).ok()?;
        let (lower, upper) = sim.group_limits(&arm).ok()?;
        if seed.len() != joints.len() {
            return None;
        }

        let backend = sim.backend();
        let robot = sim.robot;
        let chain = backend.kinematic_chain(robot).ok()?;
        let joint_nodes = joints
            .iter()
            .map(|&j| {
                let link = backend.joint_child_link(robot, j)?;
                backend.link_name(robot, link)
            })
            .collect::<Result<Vec<_>>>()
            .ok()?;
        let tool = backend.link_name(robot, sim.tool_link().ok()?).ok()?;
        let local_target = backend.pose(robot).ok()?.inverse() * target;

        for (name, &q) in joint_nodes.iter().zip(seed) {
            chain.find(name)?.set_joint_position(q).ok()?;
        }
        let serial = k::SerialChain::from_end(chain.find(&tool)?);
        if serial.dof() != joints.len() {
            tracing::debug!(
                dof = serial.dof(),
                arm = joints.len(),
                "arm is not the tool chain"
            );
            return None;
        }

        let constraints = Self::constraints(serial.dof());
        if let Err(e) = self.solver().solve_with_constraints(&serial, &local_target, &constraints) {
            tracing::debug!(error = %e, "IK did not converge");
            return None;
        }

        let (pos, ori) = pose_distance(&serial.end_transform(), &local_target);
        if pos > self.position_tolerance * 10.0 || ori > self.orientation_tolerance * 10.0 {
            tracing::debug!(pos, ori, "IK solution misses the target");
            return None;
        }

        let q = joint_nodes
            .iter()
            .map(|name| chain.find(name).and_then(|n| n.joint_position()))
            .collect::<Option<Vec<f64>>>()?;
        let within_limits = q
            .iter()
            .zip(lower.iter().zip(&upper))
            .all(|(&v, (&lo, &hi))| v >= lo - 1e-9 && v <= hi + 1e-9);
        if !within_limits {
            tracing::debug!(?q, "IK solution outside joint limits");
            return None;
        }
        Some(q)
    }
}

/// Evenly spaced waypoints from `from` to `to`, no joint moving more than `resolution`
/// between consecutive waypoints. Both endpoints are included exactly.
///
/// Returns no waypoints when either end is not finite.
pub fn interpolate(from: &[f64], to: &[f64], resolution: f64) -> Vec<Vec<f64>> {
    if from.iter().chain(to).any(|v| !v.is_finite()) {
        return Vec::new();
    }
    let span = from
        .iter()
        .zip(to)
        .map(|(a, b)| (b - a).abs())
        .fold(0.0, f64::max);
    let steps = if resolution > 0.0 {
        ((span / resolution).ceil() as usize).max(1)
    } else {
        1
    };

    (0..=steps)
        .map(|i| {
            if i == steps {
                return to.to_vec();
            }
            let s = i as f64 / steps as f64;
            from.iter().zip(to).map(|(a, b)| a + (b - a) * s).collect()
        })
        .collect()
}

/// Straight joint-space motion to an IK solution of the goal.
#[derive(Debug, Clone)]
pub struct InterpolatedMotion<K> {
    ik: K,
    resolution: f64,
}

impl<K: InverseKinematics> InterpolatedMotion<K> {
    pub fn new(ik: K, resolution: f64) -> Self {
        Self { ik, resolution }
    }
}

impl<K: InverseKinematics> MotionStrategy for InterpolatedMotion<K> {
    fn plan_motion(
        &mut self,
        sim: &mut SimulatorInstance,
        start: &Conf,
        goal: &MotionGoal,
        attachments: &[Attachment],
    ) -> Option<Trajectory> {
        let target = match goal {
            MotionGoal::Conf(q) => q.clone(),
            MotionGoal::ToolPose(pose) => self.ik.solve(sim, pose, &start.positions)?,
        };
        if target.len() != start.positions.len() {
            return None;
        }

        let path = interpolate(&start.positions, &target, self.resolution);
        if path.is_empty() {
            return None;
        }
        Some(
            Trajectory::new(start.robot, start.joints.clone(), path)
                .with_attachments(attachments.to_vec()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RED;
    use crate::belief::{ObjectState, WorldBelief};
    use crate::config::PlannerConfig;
    use crate::geometry::pose_distance;
    use crate::memory::MemoryBackend;
    use crate::sim::{RobotModel, SessionOptions};

    fn session() -> SimulatorInstance {
        let belief = WorldBelief::new(
            vec![ObjectState::boxed(
                "red_box",
                pose_from_point(0.45, 0.1, 0.035),
                [0.05; 3],
                RED,
            )],
            vec![0.45, 0.0, 0.3, 0.0],
        );
        SimulatorInstance::from_belief(
            &belief,
            Box::new(MemoryBackend::new()),
            RobotModel::gantry(),
            &PlannerConfig::default(),
            SessionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn interpolation_respects_resolution_and_endpoints() {
        let path = interpolate(&[0.0, 1.0], &[0.25, 1.0], 0.1);
        assert_eq!(path.len(), 4);
        assert_eq!(path[0], vec![0.0, 1.0]);
        assert_eq!(path[3], vec![0.25, 1.0]);
        assert!(path.windows(2).all(|w| (w[1][0] - w[0][0]).abs() <= 0.1 + 1e-12));

        assert_eq!(interpolate(&[0.3], &[0.3], 0.1).len(), 2);
    }

    #[test]
    fn non_finite_targets_have_no_path() {
        assert!(interpolate(&[0.0], &[f64::INFINITY], 0.1).is_empty());
        assert!(interpolate(&[f64::NAN, 0.0], &[0.0, 0.0], 0.1).is_empty());

        let mut sim = session();
        let start = sim.current_conf("main_arm").unwrap();
        let goal = MotionGoal::Conf(vec![0.45, 0.0, f64::INFINITY, 0.0]);
        let mut motion = InterpolatedMotion::new(JacobianIk::default(), 0.05);
        assert!(motion.plan_motion(&mut sim, &start, &goal, &[]).is_none());
    }

    #[test]
    fn ik_reaches_a_downward_tool_pose_without_moving_the_arm() {
        let mut sim = session();
        let before = sim.group_positions("main_arm").unwrap();
        let target = multiply(&[
            pose_from_point(0.55, -0.1, 0.05),
            pose_from_euler(std::f64::consts::PI, 0.0, 0.0),
            pose_from_euler(0.0, 0.0, 0.2),
        ]);

        let q = JacobianIk::default()
            .solve(&mut sim, &target, &before)
            .expect("reachable target");
        assert_eq!(sim.group_positions("main_arm").unwrap(), before);

        let arm = sim.group_joints("main_arm").unwrap();
        let robot = sim.robot;
        sim.backend_mut().set_joint_positions(robot, &arm, &q).unwrap();
        let (pos, ori) = pose_distance(&sim.tool_pose().unwrap(), &target);
        assert!(pos < 1e-5 && ori < 1e-5, "pos {pos} ori {ori}");
    }

    #[test]
    fn ik_rejects_targets_beyond_joint_limits() {
        let mut sim = session();
        let seed = sim.group_positions("main_arm").unwrap();
        // Needs gantry_z = 1.5, above the 1.0 limit.
        let target = multiply(&[
            pose_from_point(0.45, 0.0, 1.35),
            pose_from_euler(std::f64::consts::PI, 0.0, 0.0),
        ]);
        assert!(JacobianIk::default().solve(&mut sim, &target, &seed).is_none());
    }

    #[test]
    fn top_down_grasp_holds_the_object_below_the_tip() {
        let mut sim = session();
        let body = sim.movable_objects[0];
        let grasp = TopDownGrasp::downward(0.01, 0.05)
            .sample_grasp(&mut sim, body)
            .unwrap();

        assert_eq!(grasp.attachment.child, body);
        assert_eq!(grasp.closed_position, 0.0);

        let object = sim.object_pose(body).unwrap();
        let tool = grasp.tool_pose_for(&object);
        assert!((tool.translation.vector.z - 0.045).abs() < 1e-12);
        // The standoff retreats upwards, away from the object.
        let pre = grasp.pregrasp_pose(&tool, &Pose::identity(), 0.0, 0.05);
        assert!((pre.translation.vector.z - 0.095).abs() < 1e-12);
    }

    #[test]
    fn interpolated_motion_ends_at_the_ik_solution() {
        let mut sim = session();
        let start = sim.current_conf("main_arm").unwrap();
        let goal = MotionGoal::ToolPose(multiply(&[
            pose_from_point(0.45, 0.1, 0.095),
            pose_from_euler(std::f64::consts::PI, 0.0, 0.0),
        ]));

        let mut motion = InterpolatedMotion::new(JacobianIk::default(), 0.05);
        let t = motion.plan_motion(&mut sim, &start, &goal, &[]).unwrap();
        assert_eq!(t.start_positions().unwrap(), start.positions.as_slice());
        let end = t.final_positions().unwrap();
        assert!((end[1] - 0.1).abs() < 1e-5 && (end[2] - 0.245).abs() < 1e-5);
    }
}
