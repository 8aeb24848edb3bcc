// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the per cycle decision which command is forwarded to the robot.
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::robot::control_loop::SharedState;
use crate::robot::control_types::{ControlCommand, ControlMode, Finishable};
use crate::robot::mirror::hold_command;
use crate::robot::rate_limiting::saturate_torque_rate;
use crate::robot::robot_state::RobotState;

/// Parameters of the command enforcement inside a control cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ArbiterConfig {
    pub limit_rate: bool,
    pub max_torque_rate: [f64; 7],
    pub control_period: f64,
}

/// Decides every control cycle whether the buffered command of the session's mode is forwarded
/// or the session is terminated.
///
/// Runs inside the control loop of the robot: it only takes the driver side locks for copying
/// and never logs or allocates.
pub(crate) struct Arbiter<'a> {
    shared: &'a SharedState,
    session_mode: ControlMode,
    config: ArbiterConfig,
}

impl<'a> Arbiter<'a> {
    pub fn new(shared: &'a SharedState, session_mode: ControlMode, config: ArbiterConfig) -> Self {
        Arbiter {
            shared,
            session_mode,
            config,
        }
    }

    pub fn cycle(&self, state: &RobotState, _period: &Duration) -> ControlCommand {
        self.shared.state.update(state);
        let desired = self
            .shared
            .commands
            .take_for_cycle(self.session_mode)
            .unwrap_or_else(|| hold_command(self.session_mode, state));

        if desired.has_nan() {
            self.shared.rejected_commands.fetch_add(1, Ordering::Relaxed);
            return self
                .shared
                .commands
                .applied(self.session_mode)
                .unwrap_or_else(|| hold_command(self.session_mode, state))
                .motion_finished();
        }

        let mut enforced = desired;
        if self.config.limit_rate {
            if let ControlCommand::Torques(torques) = &mut enforced {
                torques.tau_J = saturate_torque_rate(
                    &self.config.max_torque_rate,
                    self.config.control_period,
                    &torques.tau_J,
                    &state.tau_J_d,
                );
            }
        }

        let (mode, active) = self.shared.switch.snapshot();
        if !self.shared.errors.allows_control() || !active || mode != self.session_mode {
            return enforced.motion_finished();
        }
        self.shared.commands.record_applied(enforced);
        enforced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::control_types::{CartesianPose, JointPositions, Torques};
    use crate::robot::error_state::RecoveryEvent;
    use crate::robot::status::NoopStatusPublisher;
    use std::sync::Arc;

    const CONFIG: ArbiterConfig = ArbiterConfig {
        limit_rate: true,
        max_torque_rate: [1000.; 7],
        control_period: 1e-3,
    };

    fn shared(mode: ControlMode) -> SharedState {
        let shared = SharedState::new(&RobotState::default(), Arc::new(NoopStatusPublisher));
        shared.switch.arm(mode);
        shared.switch.activate();
        shared
    }

    fn store(shared: &SharedState, command: ControlCommand) {
        shared.commands.store(command);
        shared.commands.publish(command);
    }

    #[test]
    fn forwards_active_command() {
        let shared = shared(ControlMode::JointPosition);
        let arbiter = Arbiter::new(&shared, ControlMode::JointPosition, CONFIG);
        let command: ControlCommand = JointPositions::new([0.5; 7]).into();
        store(&shared, command);
        let state = RobotState {
            q: [0.1; 7],
            ..RobotState::default()
        };
        let output = arbiter.cycle(&state, &Duration::from_millis(1));
        assert_eq!(output, command);
        assert!(!output.is_finished());
        assert_eq!(shared.commands.applied(ControlMode::JointPosition), Some(command));
        assert_eq!(shared.state.driver_state(), state);
    }

    #[test]
    fn torques_are_rate_limited() {
        let shared = shared(ControlMode::Torque);
        let arbiter = Arbiter::new(&shared, ControlMode::Torque, CONFIG);
        store(&shared, Torques::new([5.; 7]).into());
        let state = RobotState {
            tau_J_d: [1.; 7],
            ..RobotState::default()
        };
        let output = arbiter.cycle(&state, &Duration::from_millis(1));
        assert_eq!(output, Torques::new([2.; 7]).into());

        let unlimited = Arbiter::new(
            &shared,
            ControlMode::Torque,
            ArbiterConfig {
                limit_rate: false,
                ..CONFIG
            },
        );
        let output = unlimited.cycle(&state, &Duration::from_millis(1));
        assert_eq!(output, Torques::new([5.; 7]).into());
    }

    #[test]
    fn nan_is_never_forwarded() {
        let shared = shared(ControlMode::Torque);
        let arbiter = Arbiter::new(&shared, ControlMode::Torque, CONFIG);
        store(&shared, Torques::new([0.5; 7]).into());
        arbiter.cycle(&RobotState::default(), &Duration::from_millis(1));
        store(
            &shared,
            Torques::new([0., 0., f64::NAN, 0., 0., 0., 0.]).into(),
        );
        let output = arbiter.cycle(&RobotState::default(), &Duration::from_millis(1));
        assert!(output.is_finished());
        assert!(!output.has_nan());
        assert_eq!(output, Torques::new([0.5; 7]).motion_finished().into());
        assert_eq!(shared.rejected_commands.load(Ordering::Relaxed), 1);
        assert_eq!(
            shared.commands.applied(ControlMode::Torque),
            Some(Torques::new([0.5; 7]).into())
        );
        // the fault state is not touched
        assert!(!shared.errors.has_error());
    }

    #[test]
    fn terminates_while_faulted() {
        let shared = shared(ControlMode::CartesianPose);
        let arbiter = Arbiter::new(&shared, ControlMode::CartesianPose, CONFIG);
        shared.errors.apply(RecoveryEvent::TriggerError);
        for _ in 0..3 {
            let output = arbiter.cycle(&RobotState::default(), &Duration::from_millis(1));
            assert!(output.is_finished());
        }
        // terminates regardless of the active flag
        shared.switch.activate();
        let output = arbiter.cycle(&RobotState::default(), &Duration::from_millis(1));
        assert!(output.is_finished());
        assert_eq!(
            output,
            CartesianPose::new(RobotState::default().O_T_EE_d, None)
                .motion_finished()
                .into()
        );
    }

    #[test]
    fn terminates_while_awaiting_reset() {
        let shared = shared(ControlMode::Torque);
        let arbiter = Arbiter::new(&shared, ControlMode::Torque, CONFIG);
        shared.errors.apply(RecoveryEvent::TriggerError);
        shared.errors.apply(RecoveryEvent::ResetError);
        assert!(shared.switch.is_active());
        assert!(arbiter
            .cycle(&RobotState::default(), &Duration::from_millis(1))
            .is_finished());
        shared.errors.apply(RecoveryEvent::AcknowledgeReset);
        assert!(!arbiter
            .cycle(&RobotState::default(), &Duration::from_millis(1))
            .is_finished());
    }

    #[test]
    fn terminates_when_inactive_or_switched() {
        let shared = shared(ControlMode::Torque);
        let arbiter = Arbiter::new(&shared, ControlMode::Torque, CONFIG);
        shared.switch.deactivate();
        assert!(arbiter
            .cycle(&RobotState::default(), &Duration::from_millis(1))
            .is_finished());
        shared.switch.arm(ControlMode::JointVelocity);
        shared.switch.activate();
        assert!(arbiter
            .cycle(&RobotState::default(), &Duration::from_millis(1))
            .is_finished());
        assert_eq!(
            shared.commands.applied(ControlMode::Torque),
            Some(Torques::new([0.; 7]).into())
        );
    }
}
