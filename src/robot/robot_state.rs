// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the RobotState snapshot shared between the real-time and the supervisory domain.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Describes the current mode of the robot as reported by the driver.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RobotMode {
    Other,
    Idle,
    Move,
    Guiding,
    Reflex,
    UserStopped,
    AutomaticErrorRecovery,
}

impl Default for RobotMode {
    fn default() -> Self {
        RobotMode::Other
    }
}

/// Describes the robot state at one control tick.
///
/// A snapshot is always replaced as a whole. It only contains fixed size arrays so copying it
/// never allocates, which makes it usable inside the real-time callback.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct RobotState {
    /// Measured end effector pose in base frame.
    /// Pose is represented as a 4x4 matrix in column-major format.
    pub O_T_EE: [f64; 16],
    /// Last desired end effector pose of motion generation in base frame.
    /// Pose is represented as a 4x4 matrix in column-major format.
    pub O_T_EE_d: [f64; 16],
    /// Last commanded end effector pose of motion generation in base frame.
    pub O_T_EE_c: [f64; 16],
    /// Desired end effector twist in base frame. Unit: \[m/s,m/s,m/s,rad/s,rad/s,rad/s\]
    pub O_dP_EE_d: [f64; 6],
    /// Elbow configuration.
    ///
    /// The values of the array are:
    ///  - \[0\] Position of the 3rd joint in \[rad\].
    ///  - \[1\] Sign of the 4th joint. Can be +1 or -1.
    pub elbow: [f64; 2],
    /// Desired elbow configuration.
    pub elbow_d: [f64; 2],
    /// Measured link-side joint torque sensor signals. Unit: \[Nm\]
    pub tau_J: [f64; 7],
    /// Desired link-side joint torque sensor signals without gravity. Unit:  \[Nm\]
    ///
    /// This is the torque that was applied in the previous cycle and the reference for the
    /// torque rate saturation.
    pub tau_J_d: [f64; 7],
    /// Derivative of measured link-side joint torque sensor signals. Unit: [Nm/s]
    pub dtau_J: [f64; 7],
    /// Measured joint position. Unit: \[rad\]
    pub q: [f64; 7],
    /// Desired joint position. Unit: \[rad\]
    pub q_d: [f64; 7],
    /// Measured joint velocity. Unit: \[rad/s\]
    pub dq: [f64; 7],
    /// Desired joint velocity. Unit: \[rad/s\]
    pub dq_d: [f64; 7],
    /// Desired joint acceleration. Unit: \[rad/s^2\]
    pub ddq_d: [f64; 7],
    /// External torque, filtered. Unit: \[Nm\]
    pub tau_ext_hat_filtered: [f64; 7],
    /// Percentage of the last 100 control commands that were successfully received by the robot.
    pub control_command_success_rate: f64,
    /// Current robot mode.
    pub robot_mode: RobotMode,
    /// Strictly monotonically increasing timestamp since robot start.
    pub time: Duration,
}

const IDENTITY: [f64; 16] = [
    1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
];

impl Default for RobotState {
    fn default() -> Self {
        RobotState {
            O_T_EE: IDENTITY,
            O_T_EE_d: IDENTITY,
            O_T_EE_c: IDENTITY,
            O_dP_EE_d: [0.; 6],
            elbow: [0., 1.],
            elbow_d: [0., 1.],
            tau_J: [0.; 7],
            tau_J_d: [0.; 7],
            dtau_J: [0.; 7],
            q: [0.; 7],
            q_d: [0.; 7],
            dq: [0.; 7],
            dq_d: [0.; 7],
            ddq_d: [0.; 7],
            tau_ext_hat_filtered: [0.; 7],
            control_command_success_rate: 0.,
            robot_mode: RobotMode::default(),
            time: Duration::from_secs(0),
        }
    }
}
