// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the hardware interface which arbitrates commands of interchangeable controllers.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::HwConfig;
use crate::exception::{
    create_command_exception, create_config_exception, FrankaException, FrankaResult,
};
use crate::robot::arbiter::ArbiterConfig;
use crate::robot::control_loop::{ControlLoopDriver, SharedState};
use crate::robot::control_types::{ControlCommand, ControlMode};
use crate::robot::error_state::{ErrorState, RecoveryEvent, RecoveryState};
use crate::robot::joint_limits::SoftLimitEnforcer;
use crate::robot::robot_control::RobotDriver;
use crate::robot::robot_state::RobotState;
use crate::robot::status::StatusPublisher;
use crate::robot::switching::{
    check_for_conflict, requested_mode, resolve_control_mode, validate_claims, ControllerClaim,
};

/// Contract between a hardware interface and the scheduler running the controllers.
///
/// The scheduler calls [`init`](`Self::init`) once, then [`read`](`Self::read`) and
/// [`write`](`Self::write`) every tick and the switch calls whenever the set of running
/// controllers changes.
pub trait RobotHw {
    /// Connects to the robot and starts the control loop.
    fn init(&mut self) -> FrankaResult<()>;
    /// Copies the latest robot state into the supervisory domain.
    fn read(&mut self, time: Duration, period: Duration);
    /// Hands the command of the active mode over to the control loop.
    fn write(&mut self, time: Duration, period: Duration) -> FrankaResult<()>;
    /// Returns true iff two of the `candidates` claim a common resource.
    fn check_for_conflict(&self, candidates: &[ControllerClaim]) -> bool;
    /// Checks whether the switch can be executed and remembers the resulting mode.
    fn prepare_switch(&mut self, start: &[ControllerClaim], stop: &[ControllerClaim]) -> bool;
    /// Commits the switch prepared by [`prepare_switch`](`Self::prepare_switch`).
    fn do_switch(&mut self, start: &[ControllerClaim], stop: &[ControllerClaim]);
    /// Returns true after an error recovery until the controllers were restarted.
    fn controller_needs_reset(&self) -> bool;
    /// The robot state as of the last [`read`](`Self::read`).
    fn robot_state(&self) -> RobotState;
    /// Stores the command of a controller.
    fn set_command(&mut self, command: ControlCommand) -> FrankaResult<()>;
}

struct Connection<D: RobotDriver> {
    driver: Arc<Mutex<D>>,
    shared: Arc<SharedState>,
    control_loop: Arc<Mutex<ControlLoopDriver<D>>>,
}

/// Serves error recovery requests from any thread.
///
/// A recovery runs the automatic error recovery of the robot, restarts the control loop and
/// resets the error state. It only reports success or failure.
pub struct RecoveryHandle<D: RobotDriver> {
    driver: Arc<Mutex<D>>,
    shared: Arc<SharedState>,
    control_loop: Arc<Mutex<ControlLoopDriver<D>>>,
}

impl<D: RobotDriver> Clone for RecoveryHandle<D> {
    fn clone(&self) -> Self {
        RecoveryHandle {
            driver: self.driver.clone(),
            shared: self.shared.clone(),
            control_loop: self.control_loop.clone(),
        }
    }
}

impl<D: RobotDriver> RecoveryHandle<D> {
    /// Recovers from an error. Does nothing if there is no error.
    /// # Errors
    /// * the error of the automatic error recovery or of reading the robot state. The hardware
    /// interface stays in the error state.
    /// * RealTimeException if the control loop cannot be restarted.
    pub fn recover(&self) -> FrankaResult<()> {
        if !self.shared.errors.has_error() {
            debug!("franka_hw: recovery requested without an error");
            return Ok(());
        }
        self.driver.lock().automatic_error_recovery()?;
        let state = self.driver.lock().read_once()?;
        self.shared.state.update(&state);
        {
            let mut control_loop = self.control_loop.lock();
            if !control_loop.is_running() {
                control_loop.start()?;
            }
        }
        self.shared.switch.deactivate();
        if self.shared.errors.apply(RecoveryEvent::ResetError).is_some() {
            self.shared.publisher.publish_error_state(false);
        }
        info!("franka_hw: recovered from error, controllers have to be restarted");
        Ok(())
    }
}

/// Hardware interface of one arm.
///
/// The supervisory layer talks to it through [`RobotHw`], the robot is driven by a control loop
/// thread owned by this interface. Commands are checked for NaN when they are set, clamped into
/// the joint soft limits when they are written and rate limited in every control cycle.
pub struct FrankaCombinableHw<D: RobotDriver> {
    config: HwConfig,
    arbiter_config: ArbiterConfig,
    limits: Option<SoftLimitEnforcer>,
    publisher: Arc<dyn StatusPublisher>,
    connection: Option<Connection<D>>,
    pending_mode: Option<ControlMode>,
    joints_near_limits: u8,
    reported_rejections: u64,
}

impl<D: RobotDriver> FrankaCombinableHw<D> {
    /// Creates an unconnected hardware interface.
    /// # Errors
    /// * ConfigException if the configuration is inconsistent.
    pub fn new(config: HwConfig, publisher: Arc<dyn StatusPublisher>) -> FrankaResult<Self> {
        config.validate()?;
        let limits = config.joint_limit_table()?.map(SoftLimitEnforcer::new);
        let arbiter_config = ArbiterConfig {
            limit_rate: config.limit_rate,
            max_torque_rate: config.max_torque_rate,
            control_period: config.control_period,
        };
        Ok(FrankaCombinableHw {
            config,
            arbiter_config,
            limits,
            publisher,
            connection: None,
            pending_mode: None,
            joints_near_limits: 0,
            reported_rejections: 0,
        })
    }

    /// Initializes the interface with an already connected driver.
    /// # Errors
    /// * InvalidOperationException if the interface is already initialized.
    /// * the error of the first state read.
    /// * RealTimeException if the control loop cannot get realtime priority.
    pub fn init_with_driver(&mut self, mut driver: D) -> FrankaResult<()> {
        if self.connection.is_some() {
            return Err(FrankaException::InvalidOperationException {
                message: "franka_hw: already initialized".to_string(),
            });
        }
        let state = driver.read_once()?;
        let shared = Arc::new(SharedState::new(&state, self.publisher.clone()));
        let driver = Arc::new(Mutex::new(driver));
        let mut control_loop = ControlLoopDriver::new(
            driver.clone(),
            shared.clone(),
            self.arbiter_config,
            self.config.realtime_config,
        );
        control_loop.start()?;
        shared.publisher.publish_error_state(false);
        if self.limits.is_none() {
            warn!(
                "franka_hw: no joint limits configured for {}, command interfaces cannot be claimed",
                self.config.arm_id
            );
        }
        self.connection = Some(Connection {
            driver,
            shared,
            control_loop: Arc::new(Mutex::new(control_loop)),
        });
        info!(
            "franka_hw: initialized {} at {}",
            self.config.arm_id, self.config.robot_ip
        );
        Ok(())
    }

    fn connection(&self) -> FrankaResult<&Connection<D>> {
        self.connection
            .as_ref()
            .ok_or_else(|| FrankaException::InvalidOperationException {
                message: "franka_hw: not initialized".to_string(),
            })
    }

    pub fn arm_id(&self) -> &str {
        &self.config.arm_id
    }
    pub fn joint_names(&self) -> &[String; 7] {
        &self.config.joint_names
    }
    pub fn config(&self) -> &HwConfig {
        &self.config
    }
    /// The armed control mode.
    pub fn control_mode(&self) -> ControlMode {
        self.connection
            .as_ref()
            .map_or(ControlMode::None, |connection| connection.shared.switch.mode())
    }
    /// Whether commands of the armed mode are forwarded to the robot.
    pub fn controller_active(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |connection| connection.shared.switch.is_active())
    }
    pub fn recovery_state(&self) -> RecoveryState {
        self.connection
            .as_ref()
            .map_or(RecoveryState::Normal, |connection| {
                connection.shared.errors.current()
            })
    }
    pub fn error_state(&self) -> ErrorState {
        self.recovery_state().into()
    }
    pub fn has_error(&self) -> bool {
        self.error_state().has_error
    }
    /// Number of commands dropped inside the control loop because they contained NaN.
    pub fn rejected_commands(&self) -> u64 {
        self.connection.as_ref().map_or(0, |connection| {
            connection.shared.rejected_commands.load(Ordering::Relaxed)
        })
    }
    /// Whether the control loop thread is alive. It exits after a fault.
    pub fn control_loop_running(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |connection| connection.control_loop.lock().is_running())
    }

    fn applied(&self, mode: ControlMode) -> Option<ControlCommand> {
        self.connection
            .as_ref()
            .and_then(|connection| connection.shared.commands.applied(mode))
    }
    /// Torques last forwarded to the robot, after rate limiting.
    pub fn joint_effort_command(&self) -> [f64; 7] {
        match self.applied(ControlMode::Torque) {
            Some(ControlCommand::Torques(torques)) => torques.tau_J,
            _ => [0.; 7],
        }
    }
    /// Joint positions last forwarded to the robot.
    ///
    /// These are the commands after soft limit enforcement as seen by the control loop, not the
    /// raw commands of the controllers. Falls back to the desired joint positions of the robot
    /// state before the first forwarded command.
    pub fn joint_position_command(&self) -> [f64; 7] {
        match self.applied(ControlMode::JointPosition) {
            Some(ControlCommand::JointPositions(positions)) => positions.q,
            _ => self.robot_state().q_d,
        }
    }
    /// Joint velocities last forwarded to the robot.
    ///
    /// Like [`joint_position_command`](`Self::joint_position_command`) this is the enforced
    /// command, a command stored with [`RobotHw::set_command`] only shows up here once a control
    /// cycle forwarded it.
    pub fn joint_velocity_command(&self) -> [f64; 7] {
        match self.applied(ControlMode::JointVelocity) {
            Some(ControlCommand::JointVelocities(velocities)) => velocities.dq,
            _ => [0.; 7],
        }
    }

    /// Enters the error state. The active controller is stopped within one control cycle.
    pub fn trigger_error(&self) {
        if let Some(connection) = &self.connection {
            if connection.shared.trigger_error() {
                error!("franka_hw: error triggered, controllers stopped");
            }
        }
    }

    /// Recovers from an error, see [`RecoveryHandle::recover`].
    pub fn reset_error(&self) -> FrankaResult<()> {
        self.recovery_handle()?.recover()
    }

    /// Handle for serving recovery requests from other threads.
    /// # Errors
    /// * InvalidOperationException if the interface is not initialized.
    pub fn recovery_handle(&self) -> FrankaResult<RecoveryHandle<D>> {
        let connection = self.connection()?;
        Ok(RecoveryHandle {
            driver: connection.driver.clone(),
            shared: connection.shared.clone(),
            control_loop: connection.control_loop.clone(),
        })
    }

    fn try_prepare_switch(
        &self,
        start: &[ControllerClaim],
        stop: &[ControllerClaim],
    ) -> FrankaResult<ControlMode> {
        let connection = self.connection()?;
        validate_claims(start, &self.config.arm_id, &self.config.joint_names)?;
        let start_mode = requested_mode(start)?;
        let stop_mode = requested_mode(stop)?;
        let current = connection.shared.switch.mode();
        let requested = resolve_control_mode(current, start_mode, stop_mode)?;
        if requested != ControlMode::None && self.limits.is_none() {
            return Err(create_config_exception(format!(
                "no joint limits available for {}",
                requested
            )));
        }
        Ok(requested)
    }

    fn report_rejections(&mut self, shared: &SharedState) {
        let rejected = shared.rejected_commands.load(Ordering::Relaxed);
        if rejected > self.reported_rejections {
            warn!(
                "franka_hw: {} commands containing NaN were not forwarded to the robot",
                rejected - self.reported_rejections
            );
            self.reported_rejections = rejected;
        }
    }

    fn report_joints_near_limits(&mut self, state: &RobotState) {
        let limits = match &self.limits {
            Some(limits) => limits,
            None => return,
        };
        let table = limits.table();
        let mask = table.proximity_mask(&state.q, self.config.joint_limit_warning_threshold);
        let entered = mask & !self.joints_near_limits;
        if entered != 0 {
            warn!(
                "franka_hw: joints are close to their limits:{}",
                table.describe_proximity(entered, &state.q)
            );
        }
        self.joints_near_limits = mask;
    }
}

impl<D: RobotDriver> RobotHw for FrankaCombinableHw<D> {
    fn init(&mut self) -> FrankaResult<()> {
        if self.connection.is_some() {
            return Err(FrankaException::InvalidOperationException {
                message: "franka_hw: already initialized".to_string(),
            });
        }
        let driver = D::connect(&self.config.robot_ip)?;
        self.init_with_driver(driver)
    }

    fn read(&mut self, _time: Duration, _period: Duration) {
        let shared = match &self.connection {
            Some(connection) => connection.shared.clone(),
            None => return,
        };
        let state = shared.state.sync();
        self.report_rejections(&shared);
        self.report_joints_near_limits(&state);
    }

    fn write(&mut self, _time: Duration, period: Duration) -> FrankaResult<()> {
        let shared = self.connection()?.shared.clone();
        let mode = shared.switch.mode();
        let mut command = match shared.commands.desired(mode) {
            Some(command) => command,
            None => return Ok(()),
        };
        if command.has_nan() {
            return Err(create_command_exception(
                "franka_hw: got NaN value in command",
            ));
        }
        if let Some(limits) = &mut self.limits {
            let state = shared.state.latest();
            limits.enforce(&mut command, &state, period.as_secs_f64());
        }
        shared.commands.publish(command);
        Ok(())
    }

    fn check_for_conflict(&self, candidates: &[ControllerClaim]) -> bool {
        check_for_conflict(candidates)
    }

    fn prepare_switch(&mut self, start: &[ControllerClaim], stop: &[ControllerClaim]) -> bool {
        match self.try_prepare_switch(start, stop) {
            Ok(requested) => {
                let shared = match &self.connection {
                    Some(connection) => connection.shared.clone(),
                    None => return false,
                };
                if requested != shared.switch.mode() {
                    shared.switch.deactivate();
                }
                self.pending_mode = Some(requested);
                debug!("franka_hw: prepared switch to {}", requested);
                true
            }
            Err(error) => {
                error!("franka_hw: rejected controller switch: {}", error);
                false
            }
        }
    }

    fn do_switch(&mut self, _start: &[ControllerClaim], _stop: &[ControllerClaim]) {
        let shared = match &self.connection {
            Some(connection) => connection.shared.clone(),
            None => return,
        };
        let mode = match self.pending_mode.take() {
            Some(mode) => mode,
            None => {
                if shared.errors.allows_control() {
                    shared.switch.activate();
                    if !shared.errors.allows_control() {
                        shared.switch.deactivate();
                    }
                }
                return;
            }
        };
        let (current, active) = shared.switch.snapshot();
        let awaiting_reset = shared.errors.current() == RecoveryState::AwaitingReset;
        if mode == current && active && !awaiting_reset {
            return;
        }
        shared.switch.deactivate();
        shared.switch.arm(mode);
        if let Some(limits) = &mut self.limits {
            limits.reset();
        }
        shared.commands.seed(mode, &shared.state.latest());
        if awaiting_reset && shared.errors.apply(RecoveryEvent::AcknowledgeReset).is_some() {
            info!("franka_hw: controllers restarted after error recovery");
        }
        if mode != ControlMode::None && shared.errors.allows_control() {
            shared.switch.activate();
            // a fault of the control loop thread may have slipped in before the activation
            if !shared.errors.allows_control() {
                shared.switch.deactivate();
            }
        }
        info!("franka_hw: switched control mode to {}", mode);
    }

    fn controller_needs_reset(&self) -> bool {
        self.error_state().controller_needs_reset
    }

    fn robot_state(&self) -> RobotState {
        self.connection
            .as_ref()
            .map_or_else(RobotState::default, |connection| {
                connection.shared.state.latest()
            })
    }

    fn set_command(&mut self, command: ControlCommand) -> FrankaResult<()> {
        let connection = self.connection()?;
        if command.has_nan() {
            return Err(create_command_exception(
                "franka_hw: got NaN value in command",
            ));
        }
        connection.shared.commands.store(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::tests::PANDA_CONFIG;
    use crate::robot::control_types::{JointPositions, JointVelocities, Torques};
    use crate::robot::status::NoopStatusPublisher;
    use crate::simulation::SimulatedRobot;

    fn panda_hw() -> FrankaCombinableHw<SimulatedRobot> {
        let config = HwConfig::from_toml_str(PANDA_CONFIG).unwrap();
        FrankaCombinableHw::new(config, Arc::new(NoopStatusPublisher)).unwrap()
    }

    fn read_until(
        hw: &mut FrankaCombinableHw<SimulatedRobot>,
        condition: impl Fn(&RobotState) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            hw.read(Duration::from_secs(0), Duration::from_millis(1));
            if condition(&hw.robot_state()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn uninitialized_interface() {
        let mut hw = panda_hw();
        assert_eq!(hw.control_mode(), ControlMode::None);
        assert!(!hw.controller_active());
        assert!(!hw.has_error());
        assert!(!hw.control_loop_running());
        assert_eq!(hw.joint_effort_command(), [0.; 7]);
        assert!(matches!(
            hw.set_command(Torques::new([0.; 7]).into()),
            Err(FrankaException::InvalidOperationException { .. })
        ));
        assert!(hw
            .write(Duration::from_secs(0), Duration::from_millis(1))
            .is_err());
        assert!(hw.recovery_handle().is_err());
        assert!(!hw.prepare_switch(&[], &[]));
        hw.trigger_error();
        assert!(!hw.has_error());
    }

    #[test]
    fn recovery_clears_stale_activation() {
        let mut hw = panda_hw();
        let robot = SimulatedRobot::with_cycle_time(Duration::from_micros(200));
        let handle = robot.handle();
        hw.init_with_driver(robot).unwrap();
        let shared = hw.connection().unwrap().shared.clone();
        shared.switch.arm(ControlMode::Torque);
        shared.trigger_error();
        shared.switch.activate();

        hw.reset_error().unwrap();
        assert!(hw.controller_needs_reset());
        assert!(!hw.controller_active());
        hw.do_switch(&[], &[]);
        assert!(!hw.controller_active());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.running_mode(), None);
    }

    #[test]
    fn command_getters_show_forwarded_commands() {
        let mut hw = panda_hw();
        hw.init_with_driver(SimulatedRobot::new()).unwrap();
        hw.set_command(JointVelocities::new([0.1; 7]).into()).unwrap();
        hw.set_command(JointPositions::new([0.2; 7]).into()).unwrap();
        hw.write(Duration::from_secs(0), Duration::from_millis(1))
            .unwrap();
        // nothing is armed, so nothing was forwarded
        assert_eq!(hw.joint_velocity_command(), [0.; 7]);
        assert_eq!(hw.joint_position_command(), hw.robot_state().q_d);
    }

    #[test]
    fn joints_near_limits_are_tracked() {
        let mut hw = panda_hw();
        let robot = SimulatedRobot::with_cycle_time(Duration::from_micros(200));
        let handle = robot.handle();
        hw.init_with_driver(robot).unwrap();
        assert!(read_until(&mut hw, |state| state.q[0] == 0.));
        assert_eq!(hw.joints_near_limits, 0);

        let mut state = handle.state();
        state.q[0] = 2.89;
        state.q[6] = -2.89;
        handle.set_state(state);
        assert!(read_until(&mut hw, |state| state.q[0] == 2.89));
        assert_eq!(hw.joints_near_limits, 0b100_0001);

        let mut state = handle.state();
        state.q[0] = 0.;
        handle.set_state(state);
        assert!(read_until(&mut hw, |state| state.q[0] == 0.));
        assert_eq!(hw.joints_near_limits, 0b100_0000);
    }
}
