// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::time::Duration;

use crate::exception::FrankaResult;
use crate::robot::control_types::{ControlCommand, ControlMode};
use crate::robot::robot_state::RobotState;

/// Callback invoked once per control cycle with the current state and the time since the last
/// cycle. Returning a finished command ends the control session.
pub type ControlCallback<'a> = &'a mut dyn FnMut(&RobotState, &Duration) -> ControlCommand;

/// Connection to the robot which executes commands.
///
/// Implemented by the robot's network driver and by
/// [`SimulatedRobot`](`crate::simulation::SimulatedRobot`).
pub trait RobotDriver: Send + 'static {
    /// Establishes a connection with the robot.
    /// # Errors
    /// * NetworkException if the connection is unsuccessful.
    fn connect(address: &str) -> FrankaResult<Self>
    where
        Self: Sized;

    /// Waits for a robot state update and returns it. Must not be called during a control session.
    /// # Errors
    /// * NetworkException if the connection is lost, e.g. after a timeout.
    fn read_once(&mut self) -> FrankaResult<RobotState>;

    /// Runs a control session of the given mode, blocking until the callback returns a finished
    /// command or the robot faults.
    ///
    /// Every command returned by `callback` is of the kind belonging to `mode`.
    /// # Errors
    /// * ControlException if an error related to motion generation or torque control occurred.
    /// * NetworkException if the connection is lost.
    /// * CommandException if the robot rejected a command.
    fn control(&mut self, mode: ControlMode, callback: ControlCallback<'_>) -> FrankaResult<()>;

    /// Executes automatic error recovery, e.g. after a reflex.
    /// # Errors
    /// * CommandException if the command fails.
    /// * NetworkException if the connection is lost.
    fn automatic_error_recovery(&mut self) -> FrankaResult<()>;
}
