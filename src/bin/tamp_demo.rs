//! Two-box rearrangement demo.
//!
//! Perceives a red and a blue box on the table, asks for red to move 0.1 along +x and blue
//! 0.1 along -x, plans the whole rearrangement on a twin session and executes it on the
//! primary one (optionally mirrored to a robot listening on a local socket).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tiny_tamp::backend::{BLUE, RED};
use tiny_tamp::geometry::{multiply, pose_from_point};
use tiny_tamp::planners::{InterpolatedMotion, JacobianIk, TopDownGrasp};
use tiny_tamp::{
    load_config, GoalBelief, HardwareSink, MemoryBackend, NoopSink, ObjectState, Orchestrator,
    PlannerConfig, Result, RobotModel, SessionOptions, SimulatorInstance, SocketSink, TampError,
    WorldBelief,
};

const BOX_SIZE: f64 = 0.05;

#[derive(Debug, Parser)]
#[command(name = "tamp-demo", about = "Plan and execute a two-box rearrangement")]
struct Args {
    /// Pace playback of the executing session in real time.
    #[arg(long, conflicts_with = "vis_belief")]
    vis_sim: bool,

    /// Replay each sub-plan on the planning session, paced, as soon as it is found.
    #[arg(long)]
    vis_belief: bool,

    /// Mirror execution to a robot controller.
    #[arg(long)]
    real_robot: bool,

    /// Local socket the robot controller listens on.
    #[arg(long, default_value = "/tmp/tiny_tamp_robot.sock")]
    robot_socket: String,

    /// Planner configuration (TOML). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the executed plan as JSON.
    #[arg(long)]
    dump_plan: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(TampError::PlanningFailed {
            category,
            statistics,
        }) => {
            println!("Planning failure ({category})");
            match serde_json::to_string_pretty(&statistics) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("could not encode statistics: {e}"),
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let belief = dummy_perception(&config);
    let goal = shifted_goal(&belief);

    let sink: Box<dyn HardwareSink> = if args.real_robot {
        Box::new(SocketSink::connect(&args.robot_socket)?)
    } else {
        Box::new(NoopSink)
    };
    let session = |options: SessionOptions| {
        SimulatorInstance::from_belief(
            &belief,
            Box::new(MemoryBackend::new()),
            RobotModel::gantry(),
            &config,
            options,
        )
    };
    let primary = session(SessionOptions::default().visual(args.vis_sim).sink(sink))?;
    let twin = session(SessionOptions::default().visual(args.vis_belief))?;

    let mut motion = InterpolatedMotion::new(JacobianIk::default(), 0.05);
    let mut grasp = TopDownGrasp::downward(0.01, config.gripper_close_margin);

    let mut orchestrator = Orchestrator::new(config.clone(), primary, twin);
    let plan = orchestrator.run(&belief, &goal, &mut motion, &mut grasp)?;

    tracing::info!(
        planned = plan.statistics.len(),
        skipped = plan.skipped.len(),
        "rearrangement finished"
    );
    if let Some(path) = args.dump_plan {
        std::fs::write(&path, plan.command.to_json()?)?;
        tracing::info!(path = %path.display(), "plan written");
    }
    Ok(())
}

/// Stand-in for perception: two boxes resting on the table in front of the robot.
fn dummy_perception(config: &PlannerConfig) -> WorldBelief {
    let z = BOX_SIZE / 2.0 + 0.01;
    WorldBelief::new(
        vec![
            ObjectState::boxed("red_box", pose_from_point(0.45, 0.1, z), [BOX_SIZE; 3], RED),
            ObjectState::boxed("blue_box", pose_from_point(0.45, -0.1, z), [BOX_SIZE; 3], BLUE),
        ],
        config.default_joint_positions.clone(),
    )
}

fn shifted_goal(belief: &WorldBelief) -> GoalBelief {
    let mut goal = belief.clone();
    for obj in &mut goal.object_states {
        let dx = match obj.category.as_str() {
            "red_box" => 0.1,
            "blue_box" => -0.1,
            _ => 0.0,
        };
        obj.pose = multiply(&[pose_from_point(dx, 0.0, 0.0), obj.pose]);
    }
    GoalBelief::new(goal)
}
