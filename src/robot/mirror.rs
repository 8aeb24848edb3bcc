// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the double buffered robot state and command storage shared between the control loop
//! thread and the supervisory layer.
//!
//! Every piece of data exists twice, once per synchronization domain, each copy behind its own
//! lock. Data crosses domains only by copying it out of one slot and then into the other, so no
//! lock is ever held while the other one is taken.
use parking_lot::Mutex;

use crate::robot::control_types::{
    CartesianPose, CartesianVelocities, ControlCommand, ControlMode, JointPositions,
    JointVelocities, Torques,
};
use crate::robot::robot_state::RobotState;

/// Command which holds the robot at the given state for the given mode.
///
/// Returns zero torques for [`ControlMode::None`].
pub fn hold_command(mode: ControlMode, state: &RobotState) -> ControlCommand {
    match mode {
        ControlMode::None | ControlMode::Torque => Torques::new([0.; 7]).into(),
        ControlMode::JointPosition => JointPositions::new(state.q_d).into(),
        ControlMode::JointVelocity => JointVelocities::new([0.; 7]).into(),
        ControlMode::CartesianPose => CartesianPose::new(state.O_T_EE_d, None).into(),
        ControlMode::CartesianVelocity => CartesianVelocities::new([0.; 6], None).into(),
    }
}

/// Last written and last consumed value of one command kind.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CommandRecord<C> {
    pub desired: C,
    pub applied: C,
}

impl<C: Copy> CommandRecord<C> {
    fn new(command: C) -> Self {
        CommandRecord {
            desired: command,
            applied: command,
        }
    }
}

/// One [`CommandRecord`] per command kind.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CommandBuffers {
    pub torques: CommandRecord<Torques>,
    pub joint_positions: CommandRecord<JointPositions>,
    pub joint_velocities: CommandRecord<JointVelocities>,
    pub cartesian_pose: CommandRecord<CartesianPose>,
    pub cartesian_velocities: CommandRecord<CartesianVelocities>,
}

macro_rules! with_record {
    ($buffers:expr, $command:expr, $record:ident, $value:ident => $body:expr) => {
        match $command {
            ControlCommand::Torques($value) => {
                let $record = &mut $buffers.torques;
                $body
            }
            ControlCommand::JointPositions($value) => {
                let $record = &mut $buffers.joint_positions;
                $body
            }
            ControlCommand::JointVelocities($value) => {
                let $record = &mut $buffers.joint_velocities;
                $body
            }
            ControlCommand::CartesianPose($value) => {
                let $record = &mut $buffers.cartesian_pose;
                $body
            }
            ControlCommand::CartesianVelocities($value) => {
                let $record = &mut $buffers.cartesian_velocities;
                $body
            }
        }
    };
}

impl CommandBuffers {
    /// Creates buffers whose commands hold the robot at `state`.
    pub fn from_state(state: &RobotState) -> Self {
        CommandBuffers {
            torques: CommandRecord::new(Torques::new([0.; 7])),
            joint_positions: CommandRecord::new(JointPositions::new(state.q_d)),
            joint_velocities: CommandRecord::new(JointVelocities::new([0.; 7])),
            cartesian_pose: CommandRecord::new(CartesianPose::new(state.O_T_EE_d, None)),
            cartesian_velocities: CommandRecord::new(CartesianVelocities::new([0.; 6], None)),
        }
    }
    /// Last written command of the given mode, `None` for [`ControlMode::None`].
    pub fn desired(&self, mode: ControlMode) -> Option<ControlCommand> {
        match mode {
            ControlMode::None => None,
            ControlMode::Torque => Some(self.torques.desired.into()),
            ControlMode::JointPosition => Some(self.joint_positions.desired.into()),
            ControlMode::JointVelocity => Some(self.joint_velocities.desired.into()),
            ControlMode::CartesianPose => Some(self.cartesian_pose.desired.into()),
            ControlMode::CartesianVelocity => Some(self.cartesian_velocities.desired.into()),
        }
    }
    /// Last consumed command of the given mode, `None` for [`ControlMode::None`].
    pub fn applied(&self, mode: ControlMode) -> Option<ControlCommand> {
        match mode {
            ControlMode::None => None,
            ControlMode::Torque => Some(self.torques.applied.into()),
            ControlMode::JointPosition => Some(self.joint_positions.applied.into()),
            ControlMode::JointVelocity => Some(self.joint_velocities.applied.into()),
            ControlMode::CartesianPose => Some(self.cartesian_pose.applied.into()),
            ControlMode::CartesianVelocity => Some(self.cartesian_velocities.applied.into()),
        }
    }
    /// Stores `command` as the desired command of its kind.
    pub fn set_desired(&mut self, command: ControlCommand) {
        with_record!(self, command, record, value => record.desired = value)
    }
    /// Stores `command` as the applied command of its kind.
    pub fn set_applied(&mut self, command: ControlCommand) {
        with_record!(self, command, record, value => record.applied = value)
    }
    /// Resets all applied commands to hold the robot at `state`.
    pub fn reset_applied(&mut self, state: &RobotState) {
        let fresh = CommandBuffers::from_state(state);
        self.torques.applied = fresh.torques.applied;
        self.joint_positions.applied = fresh.joint_positions.applied;
        self.joint_velocities.applied = fresh.joint_velocities.applied;
        self.cartesian_pose.applied = fresh.cartesian_pose.applied;
        self.cartesian_velocities.applied = fresh.cartesian_velocities.applied;
    }
    /// Resets desired and applied command of `mode` so that they hold the robot at `state`.
    pub fn seed(&mut self, mode: ControlMode, state: &RobotState) {
        if mode == ControlMode::None {
            return;
        }
        let command = hold_command(mode, state);
        with_record!(self, command, record, value => *record = CommandRecord::new(value))
    }
}

/// Robot state slot of each domain.
#[derive(Debug)]
pub struct StateMirror {
    driver: Mutex<RobotState>,
    supervisory: Mutex<RobotState>,
}

impl StateMirror {
    pub fn new(state: RobotState) -> Self {
        StateMirror {
            driver: Mutex::new(state),
            supervisory: Mutex::new(state),
        }
    }
    /// Replaces the driver side state. Called by the control loop thread every cycle.
    pub fn update(&self, state: &RobotState) {
        *self.driver.lock() = *state;
    }
    /// Copies the driver side state into the supervisory slot and returns it.
    pub fn sync(&self) -> RobotState {
        let state = *self.driver.lock();
        *self.supervisory.lock() = state;
        state
    }
    /// The state as of the last [`sync`](`Self::sync`).
    pub fn latest(&self) -> RobotState {
        *self.supervisory.lock()
    }
    /// The state most recently received by the control loop thread.
    pub fn driver_state(&self) -> RobotState {
        *self.driver.lock()
    }
}

/// Command slots of each domain.
#[derive(Debug)]
pub struct CommandMirror {
    driver: Mutex<CommandBuffers>,
    supervisory: Mutex<CommandBuffers>,
}

impl CommandMirror {
    pub fn new(state: &RobotState) -> Self {
        CommandMirror {
            driver: Mutex::new(CommandBuffers::from_state(state)),
            supervisory: Mutex::new(CommandBuffers::from_state(state)),
        }
    }
    /// Stores a command on the supervisory side.
    pub fn store(&self, command: ControlCommand) {
        self.supervisory.lock().set_desired(command);
    }
    /// Supervisory side command of `mode`.
    pub fn desired(&self, mode: ControlMode) -> Option<ControlCommand> {
        self.supervisory.lock().desired(mode)
    }
    /// Seeds the command of `mode` with `state` and hands it over to the driver side.
    pub fn seed(&self, mode: ControlMode, state: &RobotState) {
        if mode == ControlMode::None {
            return;
        }
        self.supervisory.lock().seed(mode, state);
        self.publish(hold_command(mode, state));
    }
    /// Hands a command over to the driver side.
    pub fn publish(&self, command: ControlCommand) {
        self.driver.lock().set_desired(command);
    }
    /// Driver side command of `mode`, read by the control loop thread before use.
    pub fn take_for_cycle(&self, mode: ControlMode) -> Option<ControlCommand> {
        self.driver.lock().desired(mode)
    }
    /// Remembers the command which was forwarded to the robot.
    pub fn record_applied(&self, command: ControlCommand) {
        self.driver.lock().set_applied(command);
    }
    /// The command of `mode` last forwarded to the robot.
    pub fn applied(&self, mode: ControlMode) -> Option<ControlCommand> {
        self.driver.lock().applied(mode)
    }
    /// Forgets the commands applied in a previous control session.
    pub fn reset_applied(&self, state: &RobotState) {
        self.driver.lock().reset_applied(state);
    }
}
