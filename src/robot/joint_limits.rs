// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the joint limit table and the soft limit enforcement for joint-level commands.
//!
//! Soft limits do not cut a command off at the bound. The admissible velocity shrinks linearly
//! with the distance to the soft bound (gain `k_position`), and the admissible effort follows the
//! admissible velocity (gain `k_velocity`). A command approaching a bound is therefore decelerated
//! before it reaches the hard position limit.
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::exception::{create_config_exception, FrankaResult};
use crate::robot::control_types::ControlCommand;
use crate::robot::robot_state::RobotState;

/// Number of joints of the arm.
pub const NUM_JOINTS: usize = 7;

/// Hard limits of a single joint.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct JointLimits {
    /// Lower position bound in \[rad\].
    pub min_position: f64,
    /// Upper position bound in \[rad\].
    pub max_position: f64,
    /// Maximum velocity in \[rad/s\].
    pub max_velocity: f64,
    /// Maximum acceleration in \[rad/s^2\].
    pub max_acceleration: f64,
    /// Maximum effort in \[Nm\].
    pub max_effort: f64,
}

/// Soft limits and deceleration gains of a single joint.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct SoftJointLimits {
    /// Soft lower position bound in \[rad\].
    pub min_position: f64,
    /// Soft upper position bound in \[rad\].
    pub max_position: f64,
    /// Gain mapping the distance to a soft bound to an admissible velocity.
    pub k_position: f64,
    /// Gain mapping the velocity error to an admissible effort.
    pub k_velocity: f64,
}

/// Limits of one named joint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointLimitEntry {
    pub name: String,
    pub limits: JointLimits,
    pub soft_limits: SoftJointLimits,
}

/// Per joint position, velocity and effort bounds.
///
/// Loaded once during initialization and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct JointLimitTable {
    joints: Vec<JointLimitEntry>,
}

impl JointLimitTable {
    /// Creates a table from exactly one entry per joint, ordered like the joints.
    /// # Errors
    /// * ConfigException if the number of entries is wrong or a bound is inconsistent.
    pub fn new(joints: Vec<JointLimitEntry>) -> FrankaResult<Self> {
        if joints.len() != NUM_JOINTS {
            return Err(create_config_exception(format!(
                "expected limits for {} joints, got {}",
                NUM_JOINTS,
                joints.len()
            )));
        }
        for joint in joints.iter() {
            let limits = &joint.limits;
            let soft = &joint.soft_limits;
            if !(limits.min_position < limits.max_position) {
                return Err(create_config_exception(format!(
                    "joint {}: min_position must be smaller than max_position",
                    joint.name
                )));
            }
            if !(soft.min_position < soft.max_position) {
                return Err(create_config_exception(format!(
                    "joint {}: soft lower limit must be smaller than soft upper limit",
                    joint.name
                )));
            }
            if !(limits.max_velocity > 0. && limits.max_effort > 0. && limits.max_acceleration > 0.)
            {
                return Err(create_config_exception(format!(
                    "joint {}: velocity, acceleration and effort limits must be positive",
                    joint.name
                )));
            }
            if !(soft.k_position >= 0. && soft.k_velocity >= 0.) {
                return Err(create_config_exception(format!(
                    "joint {}: soft limit gains must not be negative",
                    joint.name
                )));
            }
        }
        Ok(JointLimitTable { joints })
    }
    /// Limits of the joint with the given index, `None` if the index is out of range.
    pub fn joint(&self, index: usize) -> Option<&JointLimitEntry> {
        self.joints.get(index)
    }
    pub fn joints(&self) -> &[JointLimitEntry] {
        &self.joints
    }
    /// Looks up the index of a joint by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|joint| joint.name == name)
    }
    /// Returns a bit mask of all joints whose position lies closer than `threshold` to one of
    /// their hard position bounds. Bit `i` corresponds to joint `i`.
    pub fn proximity_mask(&self, q: &[f64; 7], threshold: f64) -> u8 {
        let mut mask = 0;
        for (i, joint) in self.joints.iter().enumerate() {
            if distance_to_limit(&joint.limits, q[i]) < threshold {
                mask |= 1 << i;
            }
        }
        mask
    }
    /// Human readable description of the joints in `mask`, used for the proximity warning.
    pub fn describe_proximity(&self, mask: u8, q: &[f64; 7]) -> String {
        let mut description = String::new();
        for (i, joint) in self.joints.iter().enumerate() {
            if mask & (1 << i) == 0 {
                continue;
            }
            let limits = &joint.limits;
            let _ = write!(
                description,
                "\n\t{}: {:.3} degrees to joint limits (limits: [{:.4}, {:.4}] q: {:.4})",
                joint.name,
                distance_to_limit(limits, q[i]).to_degrees(),
                limits.min_position,
                limits.max_position,
                q[i]
            );
        }
        description
    }
}

fn distance_to_limit(limits: &JointLimits, position: f64) -> f64 {
    f64::min(
        (position - limits.min_position).abs(),
        (position - limits.max_position).abs(),
    )
}

/// Clamps without panicking if the bounds cross, the upper bound wins.
fn saturate(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Admissible velocity interval at `position`, shrinking towards zero at the soft bounds.
fn soft_velocity_bounds(joint: &JointLimitEntry, position: f64) -> (f64, f64) {
    let max_velocity = joint.limits.max_velocity;
    let soft = &joint.soft_limits;
    let min = saturate(
        -soft.k_position * (position - soft.min_position),
        -max_velocity,
        max_velocity,
    );
    let max = saturate(
        -soft.k_position * (position - soft.max_position),
        -max_velocity,
        max_velocity,
    );
    (min, max)
}

/// Clamps joint-level commands into the soft limits of a [`JointLimitTable`].
///
/// Position enforcement is stateful: the admissible interval moves with the previously
/// enforced position command. Call [`reset`](`Self::reset`) whenever the armed control mode
/// changes.
#[derive(Debug, Clone)]
pub struct SoftLimitEnforcer {
    table: JointLimitTable,
    previous_position_command: [Option<f64>; NUM_JOINTS],
}

impl SoftLimitEnforcer {
    pub fn new(table: JointLimitTable) -> Self {
        SoftLimitEnforcer {
            table,
            previous_position_command: [None; NUM_JOINTS],
        }
    }
    pub fn table(&self) -> &JointLimitTable {
        &self.table
    }
    /// Forgets the previously enforced position commands.
    pub fn reset(&mut self) {
        self.previous_position_command = [None; NUM_JOINTS];
    }

    /// Enforces the soft limits on a joint-level command. Cartesian commands are left untouched.
    ///
    /// Effort commands are bounded with the measured state, position and velocity commands with
    /// the desired state. Nothing happens for a non-positive `period`.
    pub fn enforce(&mut self, command: &mut ControlCommand, state: &RobotState, period: f64) {
        if period <= 0. {
            return;
        }
        match command {
            ControlCommand::Torques(torques) => {
                self.enforce_effort(&mut torques.tau_J, &state.q, &state.dq)
            }
            ControlCommand::JointPositions(positions) => {
                self.enforce_position(&mut positions.q, &state.q_d, period)
            }
            ControlCommand::JointVelocities(velocities) => {
                self.enforce_velocity(&mut velocities.dq, &state.q_d, &state.dq_d, period)
            }
            ControlCommand::CartesianPose(_) | ControlCommand::CartesianVelocities(_) => {}
        }
    }

    /// Bounds the effort so that the joint decelerates towards the soft bounds.
    pub fn enforce_effort(&self, tau: &mut [f64; 7], q: &[f64; 7], dq: &[f64; 7]) {
        for (i, joint) in self.table.joints.iter().enumerate() {
            let max_effort = joint.limits.max_effort;
            let k_velocity = joint.soft_limits.k_velocity;
            let (min_velocity, max_velocity) = soft_velocity_bounds(joint, q[i]);
            let min_effort = saturate(-k_velocity * (dq[i] - min_velocity), -max_effort, max_effort);
            let max_effort = saturate(-k_velocity * (dq[i] - max_velocity), -max_effort, max_effort);
            tau[i] = saturate(tau[i], min_effort, max_effort);
        }
    }

    /// Bounds the position step of one period and keeps the command inside the hard limits.
    pub fn enforce_position(&mut self, positions: &mut [f64; 7], q_d: &[f64; 7], period: f64) {
        for (i, joint) in self.table.joints.iter().enumerate() {
            let position = self.previous_position_command[i].unwrap_or(q_d[i]);
            let (min_velocity, max_velocity) = soft_velocity_bounds(joint, position);
            let low = f64::max(position + min_velocity * period, joint.limits.min_position);
            let high = f64::min(position + max_velocity * period, joint.limits.max_position);
            positions[i] = saturate(positions[i], low, high);
            self.previous_position_command[i] = Some(positions[i]);
        }
    }

    /// Bounds the velocity by the soft position limits and the acceleration limit.
    pub fn enforce_velocity(
        &self,
        velocities: &mut [f64; 7],
        q_d: &[f64; 7],
        dq_d: &[f64; 7],
        period: f64,
    ) {
        for (i, joint) in self.table.joints.iter().enumerate() {
            let (min_velocity, max_velocity) = soft_velocity_bounds(joint, q_d[i]);
            let max_delta = joint.limits.max_acceleration * period;
            let low = f64::max(dq_d[i] - max_delta, min_velocity);
            let high = f64::min(dq_d[i] + max_delta, max_velocity);
            velocities[i] = saturate(velocities[i], low, high);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::robot::control_types::{JointPositions, Torques};

    pub(crate) fn test_table() -> JointLimitTable {
        let joints = (1..=7)
            .map(|i| JointLimitEntry {
                name: format!("panda_joint{}", i),
                limits: JointLimits {
                    min_position: -2.,
                    max_position: 2.,
                    max_velocity: 2.,
                    max_acceleration: 10.,
                    max_effort: 80.,
                },
                soft_limits: SoftJointLimits {
                    min_position: -1.9,
                    max_position: 1.9,
                    k_position: 100.,
                    k_velocity: 40.,
                },
            })
            .collect();
        JointLimitTable::new(joints).unwrap()
    }

    #[test]
    fn table_validation_test() {
        let mut joints = test_table().joints().to_vec();
        joints.pop();
        assert!(JointLimitTable::new(joints.clone()).is_err());
        joints.push(JointLimitEntry {
            name: "panda_joint7".into(),
            limits: JointLimits {
                min_position: 1.,
                max_position: -1.,
                max_velocity: 1.,
                max_acceleration: 1.,
                max_effort: 1.,
            },
            soft_limits: SoftJointLimits {
                min_position: -1.,
                max_position: 1.,
                k_position: 1.,
                k_velocity: 1.,
            },
        });
        assert!(JointLimitTable::new(joints).is_err());
        assert_eq!(test_table().index_of("panda_joint3"), Some(2));
        assert_eq!(test_table().index_of("panda_joint8"), None);
    }

    #[test]
    fn effort_far_from_limits_is_unchanged() {
        let enforcer = SoftLimitEnforcer::new(test_table());
        let mut tau = [10., -10., 0., 5., -5., 1., -1.];
        let expected = tau;
        enforcer.enforce_effort(&mut tau, &[0.; 7], &[0.; 7]);
        assert_eq!(tau, expected);
    }

    #[test]
    fn effort_is_clamped_to_max_effort() {
        let enforcer = SoftLimitEnforcer::new(test_table());
        let mut tau = [200.; 7];
        enforcer.enforce_effort(&mut tau, &[0.; 7], &[0.; 7]);
        assert_eq!(tau, [80.; 7]);
    }

    #[test]
    fn effort_beyond_soft_limit_pushes_back() {
        let enforcer = SoftLimitEnforcer::new(test_table());
        // joint is past the soft upper bound: admissible velocity is negative, pushing the joint
        // into the limit is not allowed
        let mut tau = [10.; 7];
        enforcer.enforce_effort(&mut tau, &[1.95; 7], &[0.; 7]);
        for value in tau.iter() {
            assert!(*value < 0.);
        }
    }

    #[test]
    fn position_step_is_bounded() {
        let mut enforcer = SoftLimitEnforcer::new(test_table());
        let period = 1e-3;
        let mut q = [1.; 7];
        enforcer.enforce_position(&mut q, &[0.; 7], period);
        for value in q.iter() {
            assert!(f64::abs(value - 2. * period) < 1e-12);
        }
        // the next step starts from the previously enforced command
        let mut q = [1.; 7];
        enforcer.enforce_position(&mut q, &[0.; 7], period);
        for value in q.iter() {
            assert!(f64::abs(value - 4. * period) < 1e-12);
        }
        enforcer.reset();
        let mut q = [0.0005; 7];
        enforcer.enforce_position(&mut q, &[0.; 7], period);
        assert_eq!(q, [0.0005; 7]);
    }

    #[test]
    fn position_stays_inside_hard_limits() {
        let mut enforcer = SoftLimitEnforcer::new(test_table());
        let mut q = [2.5; 7];
        enforcer.enforce_position(&mut q, &[1.9999; 7], 1.);
        for value in q.iter() {
            assert!(*value <= 2.);
        }
    }

    #[test]
    fn velocity_respects_acceleration_and_soft_limits() {
        let enforcer = SoftLimitEnforcer::new(test_table());
        let mut dq = [1.; 7];
        enforcer.enforce_velocity(&mut dq, &[0.; 7], &[0.; 7], 1e-3);
        for value in dq.iter() {
            assert!(f64::abs(value - 10. * 1e-3) < 1e-12);
        }
        // at the soft upper bound, no positive velocity is admissible
        let mut dq = [0.5; 7];
        enforcer.enforce_velocity(&mut dq, &[1.9; 7], &[0.; 7], 1.);
        for value in dq.iter() {
            assert!(f64::abs(*value) < 1e-12);
        }
    }

    #[test]
    fn enforce_dispatches_on_command_kind() {
        let mut enforcer = SoftLimitEnforcer::new(test_table());
        let state = RobotState::default();
        let mut command: ControlCommand = Torques::new([500.; 7]).into();
        enforcer.enforce(&mut command, &state, 1e-3);
        assert_eq!(command, Torques::new([80.; 7]).into());

        let mut command: ControlCommand = JointPositions::new([500.; 7]).into();
        enforcer.enforce(&mut command, &state, 0.);
        assert_eq!(command, JointPositions::new([500.; 7]).into());
    }

    #[test]
    fn proximity_test() {
        let table = test_table();
        let threshold = 10f64.to_radians();
        let q = [0., 1.9, -1.95, 0., 0., 0., 2.];
        let mask = table.proximity_mask(&q, threshold);
        assert_eq!(mask, 0b100_0110);
        let description = table.describe_proximity(mask, &q);
        assert!(description.contains("panda_joint2"));
        assert!(description.contains("panda_joint3"));
        assert!(description.contains("panda_joint7"));
        assert!(!description.contains("panda_joint1"));
    }
}
