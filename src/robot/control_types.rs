// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains helper types for returning motion generation and joint-level torque commands.

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use serde::Serialize;

use crate::robot::control_tools::array_has_nan;
use crate::utils::Vector7;
use nalgebra::Isometry3;

/// Used to decide whether to enforce realtime mode for a control loop thread.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig::Ignore
    }
}

/// The command kind which is currently forwarded to the robot.
///
/// Exactly one mode is armed at a time. Commands of all other kinds are stale and are never
/// forwarded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ControlMode {
    None = 0,
    Torque = 1,
    JointPosition = 2,
    JointVelocity = 3,
    CartesianPose = 4,
    CartesianVelocity = 5,
}

impl Default for ControlMode {
    fn default() -> Self {
        ControlMode::None
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ControlMode::None => "<none>",
            ControlMode::Torque => "joint_torque",
            ControlMode::JointPosition => "joint_position",
            ControlMode::JointVelocity => "joint_velocity",
            ControlMode::CartesianPose => "cartesian_pose",
            ControlMode::CartesianVelocity => "cartesian_velocity",
        };
        write!(f, "{}", name)
    }
}

pub trait Finishable {
    /// Determines whether to finish a currently running motion.
    fn is_finished(&self) -> bool;
    /// Sets the attribute which decide if the currently running motion should be finished
    fn set_motion_finished(&mut self, finished: bool);
    /// Turns the command into the termination value of a control loop.
    fn motion_finished(self) -> Self;
}

/// Kind specific behavior every command type has to provide to the arbiter.
pub trait MotionCommand: Finishable + Copy + fmt::Debug {
    /// The control mode this command kind belongs to.
    const MODE: ControlMode;
    /// Returns true if any element of the command is NaN.
    fn has_nan(&self) -> bool;
}

macro_rules! impl_finishable {
    ($type:ty) => {
        impl Finishable for $type {
            fn is_finished(&self) -> bool {
                self.motion_finished
            }
            fn set_motion_finished(&mut self, finished: bool) {
                self.motion_finished = finished;
            }
            fn motion_finished(mut self) -> Self {
                self.set_motion_finished(true);
                self
            }
        }
    };
}

/// Stores joint-level torque commands without gravity and friction.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct Torques {
    motion_finished: bool,
    /// Desired torques in \[Nm\].
    pub tau_J: [f64; 7],
}

impl From<Vector7> for Torques {
    fn from(vector: Vector7) -> Self {
        Torques::new(vector.into())
    }
}

impl Torques {
    /// Creates a new Torques instance
    /// # Arguments
    /// * `torques` - Desired joint-level torques without gravity and friction in \[Nm\].
    pub fn new(torques: [f64; 7]) -> Self {
        Torques {
            tau_J: torques,
            motion_finished: false,
        }
    }
}

impl_finishable!(Torques);

impl MotionCommand for Torques {
    const MODE: ControlMode = ControlMode::Torque;
    fn has_nan(&self) -> bool {
        array_has_nan(&self.tau_J)
    }
}

/// Stores values for joint position motion generation.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct JointPositions {
    motion_finished: bool,
    /// Desired joint angles in \[rad\].
    pub q: [f64; 7],
}

impl From<Vector7> for JointPositions {
    fn from(vector: Vector7) -> Self {
        JointPositions::new(vector.into())
    }
}

impl JointPositions {
    /// Creates a new JointPositions instance.
    /// # Arguments
    /// * `joint_positions` - Desired joint angles in \[rad\].
    pub fn new(joint_positions: [f64; 7]) -> Self {
        JointPositions {
            q: joint_positions,
            motion_finished: false,
        }
    }
}

impl_finishable!(JointPositions);

impl MotionCommand for JointPositions {
    const MODE: ControlMode = ControlMode::JointPosition;
    fn has_nan(&self) -> bool {
        array_has_nan(&self.q)
    }
}

/// Stores values for joint velocity motion generation.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct JointVelocities {
    motion_finished: bool,
    /// Desired joint velocities in \[rad/s\].
    pub dq: [f64; 7],
}

impl From<Vector7> for JointVelocities {
    fn from(vector: Vector7) -> Self {
        JointVelocities::new(vector.into())
    }
}

impl JointVelocities {
    /// Creates a new JointVelocities instance.
    /// # Arguments
    /// * `joint_velocities` - Desired joint velocities in \[rad/s\].
    pub fn new(joint_velocities: [f64; 7]) -> Self {
        JointVelocities {
            dq: joint_velocities,
            motion_finished: false,
        }
    }
}

impl_finishable!(JointVelocities);

impl MotionCommand for JointVelocities {
    const MODE: ControlMode = ControlMode::JointVelocity;
    fn has_nan(&self) -> bool {
        array_has_nan(&self.dq)
    }
}

/// Stores values for Cartesian pose motion generation.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct CartesianPose {
    motion_finished: bool,
    /// Homogeneous transformation, column major, that transforms from the end effector frame
    /// `EE` to base frame `O`.
    /// Equivalently, it is the desired end effector pose in base frame.
    pub O_T_EE: [f64; 16],
    /// Elbow configuration.
    ///
    /// If "None" the elbow will be controlled by the robot
    ///
    /// The values of the array are:
    ///  - \[0\] Position of the 3rd joint in \[rad\].
    ///  - \[1\] Sign of the 4th joint. Can be +1 or -1.
    pub elbow: Option<[f64; 2]>,
}

impl From<Isometry3<f64>> for CartesianPose {
    fn from(isometry: Isometry3<f64>) -> Self {
        let mut out = [0.; 16];
        for (i, &x) in isometry.to_homogeneous().iter().enumerate() {
            out[i] = x;
        }
        CartesianPose::new(out, None)
    }
}

impl From<[f64; 16]> for CartesianPose {
    fn from(array: [f64; 16]) -> Self {
        CartesianPose::new(array, None)
    }
}

impl CartesianPose {
    /// Creates a new CartesianPose instance.
    /// # Arguments
    /// * `cartesian_pose` - Desired vectorized homogeneous transformation matrix, column major,
    /// that transforms from the end effector frame `EE` to base frame `O`.
    /// * `elbow` - Elbow configuration. See [elbow](#structfield.elbow)
    pub fn new(cartesian_pose: [f64; 16], elbow: Option<[f64; 2]>) -> Self {
        CartesianPose {
            O_T_EE: cartesian_pose,
            motion_finished: false,
            elbow,
        }
    }
    /// Determines whether there is a stored elbow configuration.
    pub fn has_elbow(&self) -> bool {
        self.elbow.is_some()
    }
    /// Determines whether the given elbow configuration is valid or not.
    #[allow(clippy::float_cmp)]
    pub fn is_valid_elbow(elbow: &[f64; 2]) -> bool {
        elbow[1].abs() == 1.
    }
}

impl_finishable!(CartesianPose);

impl MotionCommand for CartesianPose {
    const MODE: ControlMode = ControlMode::CartesianPose;
    fn has_nan(&self) -> bool {
        array_has_nan(&self.O_T_EE) || self.elbow.map_or(false, |elbow| array_has_nan(&elbow))
    }
}

/// Stores values for Cartesian velocity motion generation.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct CartesianVelocities {
    motion_finished: bool,
    /// Desired Cartesian velocity w.r.t. O-frame {dx in \[m/s\], dy in \[m/s\], dz in \[m/s\],
    /// omegax in \[rad/s\], omegay in \[rad/s\], omegaz in \[rad/s\]}.
    pub O_dP_EE: [f64; 6],
    /// Elbow configuration.
    ///
    /// If "None" the elbow will be controlled by the robot
    pub elbow: Option<[f64; 2]>,
}

impl CartesianVelocities {
    /// Creates a new CartesianVelocities instance.
    /// # Arguments
    /// * `cartesian_velocities` - Desired Cartesian velocity w.r.t. O-frame.
    /// * `elbow` - Elbow configuration. See [elbow](#structfield.elbow)
    pub fn new(cartesian_velocities: [f64; 6], elbow: Option<[f64; 2]>) -> Self {
        CartesianVelocities {
            O_dP_EE: cartesian_velocities,
            motion_finished: false,
            elbow,
        }
    }
    /// Determines whether there is a stored elbow configuration.
    pub fn has_elbow(&self) -> bool {
        self.elbow.is_some()
    }
}

impl_finishable!(CartesianVelocities);

impl MotionCommand for CartesianVelocities {
    const MODE: ControlMode = ControlMode::CartesianVelocity;
    fn has_nan(&self) -> bool {
        array_has_nan(&self.O_dP_EE) || self.elbow.map_or(false, |elbow| array_has_nan(&elbow))
    }
}

/// Tagged union over the five command kinds.
///
/// The arbiter and the driver only ever see this type, the kind specific behavior is
/// dispatched to the [`MotionCommand`] implementations.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub enum ControlCommand {
    Torques(Torques),
    JointPositions(JointPositions),
    JointVelocities(JointVelocities),
    CartesianPose(CartesianPose),
    CartesianVelocities(CartesianVelocities),
}

macro_rules! dispatch {
    ($self:expr, $command:ident => $body:expr) => {
        match $self {
            ControlCommand::Torques($command) => $body,
            ControlCommand::JointPositions($command) => $body,
            ControlCommand::JointVelocities($command) => $body,
            ControlCommand::CartesianPose($command) => $body,
            ControlCommand::CartesianVelocities($command) => $body,
        }
    };
}

impl ControlCommand {
    /// The control mode this command belongs to.
    pub fn mode(&self) -> ControlMode {
        match self {
            ControlCommand::Torques(_) => Torques::MODE,
            ControlCommand::JointPositions(_) => JointPositions::MODE,
            ControlCommand::JointVelocities(_) => JointVelocities::MODE,
            ControlCommand::CartesianPose(_) => CartesianPose::MODE,
            ControlCommand::CartesianVelocities(_) => CartesianVelocities::MODE,
        }
    }
    /// Returns true if any element of the command is NaN.
    pub fn has_nan(&self) -> bool {
        dispatch!(self, command => command.has_nan())
    }
}

impl Finishable for ControlCommand {
    fn is_finished(&self) -> bool {
        dispatch!(self, command => command.is_finished())
    }
    fn set_motion_finished(&mut self, finished: bool) {
        dispatch!(self, command => command.set_motion_finished(finished))
    }
    fn motion_finished(mut self) -> Self {
        self.set_motion_finished(true);
        self
    }
}

impl From<Torques> for ControlCommand {
    fn from(command: Torques) -> Self {
        ControlCommand::Torques(command)
    }
}

impl From<JointPositions> for ControlCommand {
    fn from(command: JointPositions) -> Self {
        ControlCommand::JointPositions(command)
    }
}

impl From<JointVelocities> for ControlCommand {
    fn from(command: JointVelocities) -> Self {
        ControlCommand::JointVelocities(command)
    }
}

impl From<CartesianPose> for ControlCommand {
    fn from(command: CartesianPose) -> Self {
        ControlCommand::CartesianPose(command)
    }
}

impl From<CartesianVelocities> for ControlCommand {
    fn from(command: CartesianVelocities) -> Self {
        ControlCommand::CartesianVelocities(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    fn nan_at(index: usize) -> [f64; 7] {
        let mut values = [0.; 7];
        values[index] = f64::NAN;
        values
    }

    #[test]
    fn torques_nan_test() {
        for i in 0..7 {
            assert!(Torques::new(nan_at(i)).has_nan());
        }
        assert!(!Torques::new([0.; 7]).has_nan());
        assert!(Torques::new([0., 0., f64::NAN, 0., 0., 0., 0.]).has_nan());
    }

    #[test]
    fn joint_nan_test() {
        for i in 0..7 {
            assert!(JointPositions::new(nan_at(i)).has_nan());
            assert!(JointVelocities::new(nan_at(i)).has_nan());
        }
        assert!(!JointPositions::new([1.; 7]).has_nan());
        assert!(!JointVelocities::new([-1.; 7]).has_nan());
        // infinity is not NaN
        assert!(!JointVelocities::new([f64::INFINITY; 7]).has_nan());
    }

    #[test]
    fn cartesian_pose_nan_test() {
        let identity = crate::RobotState::default().O_T_EE_d;
        assert!(!CartesianPose::new(identity, None).has_nan());
        assert!(!CartesianPose::new(identity, Some([0., 1.])).has_nan());
        assert!(CartesianPose::new(identity, Some([f64::NAN, 1.])).has_nan());
        for i in 0..16 {
            let mut pose = identity;
            pose[i] = f64::NAN;
            assert!(CartesianPose::new(pose, None).has_nan());
        }
    }

    #[test]
    fn cartesian_velocities_nan_test() {
        assert!(!CartesianVelocities::new([0.; 6], None).has_nan());
        assert!(CartesianVelocities::new([0.; 6], Some([0., f64::NAN])).has_nan());
        for i in 0..6 {
            let mut twist = [0.; 6];
            twist[i] = f64::NAN;
            assert!(CartesianVelocities::new(twist, Some([0., 1.])).has_nan());
        }
    }

    #[test]
    fn control_command_dispatch_test() {
        let command: ControlCommand = Torques::new([1.; 7]).into();
        assert_eq!(command.mode(), ControlMode::Torque);
        assert!(!command.is_finished());
        let finished = command.motion_finished();
        assert!(finished.is_finished());
        match finished {
            ControlCommand::Torques(torques) => assert_eq!(torques.tau_J, [1.; 7]),
            _ => panic!("termination value changed the command kind"),
        }
        let command: ControlCommand = CartesianVelocities::new([0.; 6], None).into();
        assert_eq!(command.mode(), ControlMode::CartesianVelocity);
    }

    #[test]
    fn control_mode_from_primitive_test() {
        assert_eq!(ControlMode::from_u8(4), Some(ControlMode::CartesianPose));
        assert_eq!(ControlMode::from_u8(0), Some(ControlMode::None));
        assert_eq!(ControlMode::from_u8(9), None);
        assert_eq!(format!("{}", ControlMode::Torque), "joint_torque");
    }
}
