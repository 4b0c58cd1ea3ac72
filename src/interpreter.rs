//! Command execution on a simulation session.
//!
//! Execution is a depth-first walk of the command tree. Leaves run strictly in order and
//! the first failing leaf aborts the rest of the tree.

use crate::command::{Command, GraspAction, Trajectory};
use crate::error::Result;
use crate::sim::SimulatorInstance;

impl SimulatorInstance {
    /// Runs a command tree against this session (and its hardware sink, if any).
    pub fn execute_command(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Trajectory(trajectory) => self.command_trajectory(trajectory),
            Command::ActivateGrasp(action) => {
                self.log_grasp_action("activate", action);
                self.close_gripper()
            }
            Command::DeactivateGrasp(action) => {
                self.log_grasp_action("deactivate", action);
                self.open_gripper()
            }
            Command::Sequence(sequence) => {
                tracing::debug!(
                    command = %command,
                    children = sequence.commands.len(),
                    "executing sequence"
                );
                sequence
                    .commands
                    .iter()
                    .try_for_each(|child| self.execute_command(child))
            }
        }
    }

    /// Plays a trajectory waypoint by waypoint, dragging attached bodies along.
    ///
    /// A real robot receives the whole path once simulation playback has finished.
    fn command_trajectory(&mut self, trajectory: &Trajectory) -> Result<()> {
        trajectory.validate()?;
        tracing::debug!(
            command = %trajectory,
            waypoints = trajectory.path.len(),
            attachments = trajectory.attachments.len(),
            "executing trajectory"
        );

        let real = self.sink.is_real();
        let mut named_path = Vec::new();
        for positions in &trajectory.path {
            self.backend
                .set_joint_positions(trajectory.robot, &trajectory.joints, positions)?;
            for attachment in &trajectory.attachments {
                attachment.assign(self.backend.as_mut())?;
            }

            if real {
                named_path.push(self.named_positions(
                    trajectory.robot,
                    &trajectory.joints,
                    positions,
                )?);
            }
            if self.visual && !self.playback_dt.is_zero() {
                std::thread::sleep(self.playback_dt);
            }
        }

        if real {
            self.sink
                .execute_position_path(&named_path, self.playback_dt.as_secs_f64())?;
        }
        Ok(())
    }

    fn log_grasp_action(&self, kind: &str, action: &GraspAction) {
        tracing::debug!(
            id = action.id.0,
            body = %action.body,
            link = action.gripper_link.0,
            "{kind} grasp"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::backend::RED;
    use crate::belief::{ObjectState, WorldBelief};
    use crate::command::{CommandIds, Sequence};
    use crate::config::PlannerConfig;
    use crate::error::TampError;
    use crate::geometry::{pose_from_point, JointId};
    use crate::grasp::Attachment;
    use crate::hardware::{HardwareSink, NamedPositions};
    use crate::memory::MemoryBackend;
    use crate::sim::{RobotModel, SessionOptions};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl HardwareSink for Recorder {
        fn open_gripper(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("open".into());
            Ok(())
        }

        fn close_gripper(&mut self) -> Result<()> {
            self.0.lock().unwrap().push("close".into());
            Ok(())
        }

        fn command_arm(&mut self, positions: &NamedPositions) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("arm x={}", positions["gantry_x"]));
            Ok(())
        }

        fn execute_position_path(&mut self, path: &[NamedPositions], _dt: f64) -> Result<()> {
            self.0.lock().unwrap().push(format!("path {}", path.len()));
            Ok(())
        }
    }

    fn session(options: SessionOptions) -> SimulatorInstance {
        let belief = WorldBelief::new(
            vec![ObjectState::boxed(
                "red_box",
                pose_from_point(0.45, 0.1, 0.035),
                [0.05; 3],
                RED,
            )],
            vec![0.45, 0.1, 0.195, 0.0],
        );
        SimulatorInstance::from_belief(
            &belief,
            Box::new(MemoryBackend::new()),
            RobotModel::gantry(),
            &PlannerConfig::default(),
            options,
        )
        .unwrap()
    }

    fn arm_path(sim: &SimulatorInstance, path: Vec<Vec<f64>>) -> Trajectory {
        Trajectory::new(sim.robot, sim.group_joints("main_arm").unwrap(), path)
    }

    #[test]
    fn attached_object_follows_the_tool_at_every_waypoint() {
        let mut sim = session(SessionOptions::default());
        let object = sim.movable_objects[0];
        let tool = sim.tool_link().unwrap();
        let attachment = Attachment::from_current(sim.backend(), sim.robot, tool, object).unwrap();

        let path: Vec<Vec<f64>> = (0..=10)
            .map(|i| {
                let s = i as f64 / 10.0;
                vec![0.45 + 0.1 * s, 0.1, 0.195 + 0.05 * s, 0.3 * s]
            })
            .collect();

        for end in 1..=path.len() {
            let partial = arm_path(&sim, path[..end].to_vec())
                .with_attachments(vec![attachment.clone()]);
            sim.execute_command(&partial.into()).unwrap();

            let expected = sim.tool_pose().unwrap() * attachment.parent_t_child;
            let actual = sim.object_pose(object).unwrap();
            assert!((expected.translation.vector - actual.translation.vector).norm() < 1e-9);
            assert!(expected.rotation.angle_to(&actual.rotation) < 1e-9);
        }

        let p = sim.object_pose(object).unwrap().translation.vector;
        assert!((p.x - 0.55).abs() < 1e-9 && (p.z - 0.085).abs() < 1e-9);
    }

    #[test]
    fn nested_sequences_run_leaves_in_flattened_order() {
        let recorder = Recorder::default();
        let mut sim = session(SessionOptions::default().sink(Box::new(recorder.clone())));
        recorder.0.lock().unwrap().clear();

        let mut ids = CommandIds::new();
        let robot = sim.robot;
        let tool = sim.tool_link().unwrap();
        let body = sim.movable_objects[0];
        let grasp = |ids: &mut CommandIds| GraspAction::new(ids.next_id(), robot, tool, body);

        let tree: Command = Sequence::named(
            ids.next_id(),
            vec![
                arm_path(&sim, vec![vec![0.5, 0.0, 0.3, 0.0]; 3]).into(),
                Sequence::new(
                    ids.next_id(),
                    vec![
                        Command::ActivateGrasp(grasp(&mut ids)),
                        Sequence::new(
                            ids.next_id(),
                            vec![arm_path(&sim, vec![vec![0.6, 0.0, 0.3, 0.0]; 2]).into()],
                        )
                        .into(),
                    ],
                )
                .into(),
                Command::DeactivateGrasp(grasp(&mut ids)),
            ],
            "plan",
        )
        .into();

        sim.execute_command(&tree).unwrap();
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["path 3", "close", "path 2", "open"]
        );
        assert_eq!(tree.leaves().len(), 4);
        assert_eq!(sim.group_positions("main_arm").unwrap()[0], 0.6);
    }

    #[test]
    fn arm_moves_outside_trajectories_are_mirrored() {
        let recorder = Recorder::default();
        let mut sim = session(SessionOptions::default().sink(Box::new(recorder.clone())));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["open".to_string(), "arm x=0.45".to_string()]
        );

        sim.set_group_positions("main_gripper", &[0.01, 0.01]).unwrap();
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn ragged_trajectory_fails_before_moving() {
        let mut sim = session(SessionOptions::default());
        let before = sim.group_positions("main_arm").unwrap();
        let bad = Trajectory::new(sim.robot, vec![JointId(1), JointId(2)], vec![vec![0.0]]);

        let err = sim.execute_command(&bad.into()).unwrap_err();
        assert!(matches!(err, TampError::InvalidCommand(_)));
        assert_eq!(sim.group_positions("main_arm").unwrap(), before);
    }
}
