// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a simulated robot which can be used instead of a real connection.
//!
//! The simulation follows every command perfectly and runs the control loop with a fixed cycle
//! time. A [`SimulationHandle`] gives access to the simulated robot from other threads, e.g. to
//! inject faults or inspect the commands the robot received.
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::exception::{create_command_exception, FrankaException, FrankaResult};
use crate::robot::control_tools::is_homogeneous_transformation;
use crate::robot::control_types::{CartesianPose, ControlCommand, ControlMode, Finishable};
use crate::robot::robot_control::{ControlCallback, RobotDriver};
use crate::robot::robot_state::{RobotMode, RobotState};
use crate::utils::integrate_twist;

/// Number of received commands kept by the simulation.
pub const COMMAND_LOG_CAPACITY: usize = 10_000;

/// Joint configuration the simulated robot starts in.
pub const START_POSITION: [f64; 7] = [0., -PI / 4., 0., -3. * PI / 4., 0., PI / 2., PI / 4.];

#[derive(Debug)]
struct Simulation {
    state: RobotState,
    pending_fault: Option<FrankaException>,
    recovery_failure: Option<FrankaException>,
    running_mode: Option<ControlMode>,
    cycles: u64,
    recoveries: usize,
    commands: VecDeque<ControlCommand>,
}

impl Simulation {
    fn new() -> Self {
        let mut state = RobotState {
            q: START_POSITION,
            q_d: START_POSITION,
            robot_mode: RobotMode::Idle,
            control_command_success_rate: 1.,
            ..RobotState::default()
        };
        state.O_T_EE[12] = 0.307;
        state.O_T_EE[14] = 0.487;
        state.O_T_EE_d = state.O_T_EE;
        state.O_T_EE_c = state.O_T_EE;
        Simulation {
            state,
            pending_fault: None,
            recovery_failure: None,
            running_mode: None,
            cycles: 0,
            recoveries: 0,
            commands: VecDeque::with_capacity(COMMAND_LOG_CAPACITY),
        }
    }

    fn end_session(&mut self, robot_mode: RobotMode) {
        self.running_mode = None;
        self.state.robot_mode = robot_mode;
    }

    fn apply(&mut self, command: &ControlCommand, delta_t: f64) {
        let state = &mut self.state;
        match command {
            ControlCommand::Torques(torques) => {
                state.tau_J_d = torques.tau_J;
                state.tau_J = torques.tau_J;
            }
            ControlCommand::JointPositions(positions) => {
                for i in 0..7 {
                    state.dq[i] = (positions.q[i] - state.q[i]) / delta_t;
                }
                state.dq_d = state.dq;
                state.q = positions.q;
                state.q_d = positions.q;
            }
            ControlCommand::JointVelocities(velocities) => {
                for i in 0..7 {
                    state.q[i] += velocities.dq[i] * delta_t;
                }
                state.dq = velocities.dq;
                state.dq_d = velocities.dq;
                state.q_d = state.q;
            }
            ControlCommand::CartesianPose(pose) => {
                state.O_T_EE = pose.O_T_EE;
                state.O_T_EE_d = pose.O_T_EE;
                state.O_T_EE_c = pose.O_T_EE;
                if let Some(elbow) = pose.elbow {
                    state.elbow = elbow;
                    state.elbow_d = elbow;
                }
            }
            ControlCommand::CartesianVelocities(velocities) => {
                state.O_dP_EE_d = velocities.O_dP_EE;
                state.O_T_EE = integrate_twist(&state.O_T_EE, &velocities.O_dP_EE, delta_t);
                state.O_T_EE_d = state.O_T_EE;
                state.O_T_EE_c = state.O_T_EE;
            }
        }
        if self.commands.len() == COMMAND_LOG_CAPACITY {
            self.commands.pop_front();
        }
        self.commands.push_back(*command);
        self.cycles += 1;
    }
}

/// Access to a [`SimulatedRobot`] from other threads.
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    simulation: Arc<Mutex<Simulation>>,
}

impl SimulationHandle {
    /// Current state of the simulated robot.
    pub fn state(&self) -> RobotState {
        self.simulation.lock().state
    }
    /// Overwrites the state of the simulated robot, e.g. to move it close to a joint limit.
    pub fn set_state(&self, state: RobotState) {
        self.simulation.lock().state = state;
    }
    /// Lets the running control session fail with `fault` in its next cycle. The robot is in
    /// reflex mode afterwards and rejects new sessions until it recovered.
    pub fn inject_fault(&self, fault: FrankaException) {
        self.simulation.lock().pending_fault = Some(fault);
    }
    /// Lets the next automatic error recovery fail with `error`.
    pub fn fail_next_recovery(&self, error: FrankaException) {
        self.simulation.lock().recovery_failure = Some(error);
    }
    /// Mode of the running control session.
    pub fn running_mode(&self) -> Option<ControlMode> {
        self.simulation.lock().running_mode
    }
    /// Number of commands the robot executed.
    pub fn cycles(&self) -> u64 {
        self.simulation.lock().cycles
    }
    /// Number of successful automatic error recoveries.
    pub fn recoveries(&self) -> usize {
        self.simulation.lock().recoveries
    }
    pub fn last_command(&self) -> Option<ControlCommand> {
        self.simulation.lock().commands.back().copied()
    }
    /// The most recent commands, oldest first.
    pub fn commands(&self) -> Vec<ControlCommand> {
        self.simulation.lock().commands.iter().copied().collect()
    }
}

/// A robot which executes every command perfectly.
#[derive(Debug)]
pub struct SimulatedRobot {
    simulation: Arc<Mutex<Simulation>>,
    cycle_time: Duration,
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        SimulatedRobot::new()
    }
}

impl SimulatedRobot {
    /// Creates a simulated robot with a 1 ms control cycle.
    pub fn new() -> Self {
        SimulatedRobot::with_cycle_time(Duration::from_millis(1))
    }
    pub fn with_cycle_time(cycle_time: Duration) -> Self {
        SimulatedRobot {
            simulation: Arc::new(Mutex::new(Simulation::new())),
            cycle_time,
        }
    }
    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle {
            simulation: self.simulation.clone(),
        }
    }
    fn tick(&self) {
        std::thread::sleep(self.cycle_time);
        self.simulation.lock().state.time += self.cycle_time;
    }
}

impl RobotDriver for SimulatedRobot {
    fn connect(address: &str) -> FrankaResult<Self> {
        if address.is_empty() {
            return Err(FrankaException::NetworkException {
                message: "franka_hw: no address given for the simulated robot".to_string(),
            });
        }
        debug!("franka_hw: connected to simulated robot {}", address);
        Ok(SimulatedRobot::new())
    }

    fn read_once(&mut self) -> FrankaResult<RobotState> {
        self.tick();
        Ok(self.simulation.lock().state)
    }

    fn control(&mut self, mode: ControlMode, callback: ControlCallback<'_>) -> FrankaResult<()> {
        if mode == ControlMode::None {
            return Err(create_command_exception(
                "franka_hw: cannot start a control session without a mode",
            ));
        }
        {
            let mut simulation = self.simulation.lock();
            if simulation.state.robot_mode == RobotMode::Reflex {
                return Err(FrankaException::ControlException {
                    message: "franka_hw: robot is in reflex mode".to_string(),
                });
            }
            simulation.running_mode = Some(mode);
            simulation.state.robot_mode = RobotMode::Move;
        }
        let delta_t = self.cycle_time.as_secs_f64();
        let mut period = Duration::from_secs(0);
        loop {
            self.tick();
            let state = {
                let mut simulation = self.simulation.lock();
                if let Some(fault) = simulation.pending_fault.take() {
                    simulation.end_session(RobotMode::Reflex);
                    return Err(fault);
                }
                simulation.state
            };
            let command = callback(&state, &period);
            period = self.cycle_time;

            let mut simulation = self.simulation.lock();
            if command.mode() != mode {
                simulation.end_session(RobotMode::Reflex);
                return Err(create_command_exception(
                    "franka_hw: command kind does not match the control mode",
                ));
            }
            if command.has_nan() {
                simulation.end_session(RobotMode::Reflex);
                return Err(create_command_exception("franka_hw: command contains NaN"));
            }
            if let ControlCommand::CartesianPose(pose) = &command {
                if !is_homogeneous_transformation(&pose.O_T_EE) {
                    simulation.end_session(RobotMode::Reflex);
                    return Err(create_command_exception(
                        "franka_hw: attempt to set invalid transformation in motion generator",
                    ));
                }
                if pose.elbow.map_or(false, |elbow| !CartesianPose::is_valid_elbow(&elbow)) {
                    simulation.end_session(RobotMode::Reflex);
                    return Err(create_command_exception(
                        "franka_hw: invalid elbow configuration given",
                    ));
                }
            }
            simulation.apply(&command, delta_t);
            if command.is_finished() {
                simulation.end_session(RobotMode::Idle);
                return Ok(());
            }
        }
    }

    fn automatic_error_recovery(&mut self) -> FrankaResult<()> {
        let mut simulation = self.simulation.lock();
        if let Some(error) = simulation.recovery_failure.take() {
            return Err(error);
        }
        simulation.state.robot_mode = RobotMode::Idle;
        simulation.recoveries += 1;
        Ok(())
    }
}
