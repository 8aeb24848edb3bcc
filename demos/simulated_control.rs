// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use franka_hw::config::JointLimitConfig;
use franka_hw::exception::FrankaException;
use franka_hw::robot::switching::{InterfaceClaim, VELOCITY_JOINT_INTERFACE};
use franka_hw::{
    ChannelStatusPublisher, ControlCommand, Controller, ControllerClaim, ControllerManager,
    FrankaCombinableHw, FrankaResult, HwConfig, JointVelocities, RealtimeConfig, RobotHw,
    RobotState, SimulatedRobot, StatusEvent,
};

const MIN_POSITION: [f64; 7] = [-2.8973, -1.7628, -2.8973, -3.0718, -2.8973, -0.0175, -2.8973];
const MAX_POSITION: [f64; 7] = [2.8973, 1.7628, 2.8973, -0.0698, 2.8973, 3.7525, 2.8973];
const MAX_VELOCITY: [f64; 7] = [2.175, 2.175, 2.175, 2.175, 2.61, 2.61, 2.61];
const MAX_EFFORT: [f64; 7] = [87., 87., 87., 87., 12., 12., 12.];

/// An example running a joint velocity controller on a simulated panda, optionally with an
/// injected fault and the error recovery afterwards.
#[derive(Parser, Debug)]
#[clap(author, version, name = "simulated_control")]
struct CommandLineArguments {
    /// Configuration file of the arm. Uses the panda joint limits if not given.
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Duration of the motion in seconds
    #[clap(long, default_value_t = 8.)]
    pub duration: f64,
    /// Injects a reflex after this many seconds
    #[clap(long)]
    pub fault_after: Option<f64>,
    /// Period of the supervisory loop in milliseconds
    #[clap(long, default_value_t = 10)]
    pub period_ms: u64,
}

fn panda_config() -> HwConfig {
    let mut config = HwConfig::new("panda", "simulation");
    config.realtime_config = RealtimeConfig::Ignore;
    config.joint_limits = Some(
        (0..7)
            .map(|i| JointLimitConfig {
                name: format!("panda_joint{}", i + 1),
                min_position: MIN_POSITION[i],
                max_position: MAX_POSITION[i],
                max_velocity: MAX_VELOCITY[i],
                max_effort: MAX_EFFORT[i],
                max_acceleration: None,
                soft_lower: MIN_POSITION[i],
                soft_upper: MAX_POSITION[i],
                k_position: 100.,
                k_velocity: 40.,
            })
            .collect(),
    );
    config
}

/// Moves the last four joints back and forth, the same way after every restart.
struct WaveController {
    joint_names: [String; 7],
    time: f64,
    time_max: f64,
    omega_max: f64,
}

impl Controller for WaveController {
    fn claim(&self) -> ControllerClaim {
        ControllerClaim::new(
            "wave_controller",
            vec![InterfaceClaim::new(
                VELOCITY_JOINT_INTERFACE,
                self.joint_names.iter().cloned(),
            )],
        )
    }

    fn starting(&mut self, _state: &RobotState) {
        self.time = 0.;
    }

    fn update(&mut self, _state: &RobotState, period: &Duration) -> Option<ControlCommand> {
        self.time += period.as_secs_f64();
        let cycle = f64::floor(f64::powf(
            -1.0,
            (self.time - float_extras::f64::fmod(self.time, self.time_max)) / self.time_max,
        ));
        let omega =
            cycle * self.omega_max / 2. * (1. - f64::cos(2. * PI / self.time_max * self.time));
        Some(JointVelocities::new([0., 0., 0., omega, omega, omega, omega]).into())
    }

    fn stopping(&mut self) {
        println!("wave controller stopped after {:.3} s", self.time);
    }
}

fn main() -> FrankaResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();
    let args = CommandLineArguments::parse();
    let config = match &args.config {
        Some(path) => HwConfig::load(path)?,
        None => panda_config(),
    };

    let (publisher, status) = ChannelStatusPublisher::new();
    let mut hw = FrankaCombinableHw::new(config, Arc::new(publisher))?;
    let robot = SimulatedRobot::new();
    let simulation = robot.handle();
    hw.init_with_driver(robot)?;
    let recovery = hw.recovery_handle()?;

    let controller = WaveController {
        joint_names: hw.joint_names().clone(),
        time: 0.,
        time_max: 4.,
        omega_max: 0.2,
    };
    let mut manager = ControllerManager::new(hw);
    manager.load_controller("wave", Box::new(controller))?;
    manager.switch_controllers(&["wave"], &[])?;

    let period = Duration::from_millis(args.period_ms);
    let start = Instant::now();
    let mut fault_after = args.fault_after;
    while manager.time().as_secs_f64() < args.duration {
        manager.update(period)?;
        if fault_after.map_or(false, |after| manager.time().as_secs_f64() >= after) {
            fault_after = None;
            simulation.inject_fault(FrankaException::ControlException {
                message: "cartesian_reflex".to_string(),
            });
        }
        for event in status.try_iter() {
            let StatusEvent::ErrorState(has_error) = event;
            println!("error state changed: has_error = {}", has_error);
            if has_error {
                println!("Running error recovery...");
                recovery.recover()?;
            }
        }
        std::thread::sleep(period);
    }
    manager.switch_controllers(&[], &["wave"])?;

    let state = manager.hw().robot_state();
    println!(
        "Finished after {:.2} s ({} cycles, {} recoveries), final joint positions: {:?}",
        start.elapsed().as_secs_f64(),
        simulation.cycles(),
        simulation.recoveries(),
        state.q
    );
    Ok(())
}
