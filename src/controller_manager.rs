// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains a minimal scheduler which runs controllers on top of a [`RobotHw`].
use std::time::Duration;

use tracing::{info, warn};

use crate::exception::{create_conflict_exception, FrankaException, FrankaResult};
use crate::robot::combinable_hw::RobotHw;
use crate::robot::control_types::ControlCommand;
use crate::robot::robot_state::RobotState;
use crate::robot::switching::ControllerClaim;

/// A controller which can be loaded into a [`ControllerManager`].
pub trait Controller: Send {
    /// Resources and interfaces the controller needs.
    fn claim(&self) -> ControllerClaim;
    /// Called right before the controller is started and after every error recovery.
    fn starting(&mut self, state: &RobotState);
    /// Computes the command of one tick. Read-only controllers return `None`.
    fn update(&mut self, state: &RobotState, period: &Duration) -> Option<ControlCommand>;
    /// Called when the controller is stopped.
    fn stopping(&mut self) {}
}

struct LoadedController {
    name: String,
    controller: Box<dyn Controller>,
    running: bool,
}

/// Runs controllers on a hardware interface.
///
/// Every [`update`](`Self::update`) reads the robot state, restarts the running controllers if the
/// hardware interface recovered from an error, updates the controllers, and writes their
/// commands.
pub struct ControllerManager<H: RobotHw> {
    hw: H,
    controllers: Vec<LoadedController>,
    time: Duration,
}

impl<H: RobotHw> ControllerManager<H> {
    pub fn new(hw: H) -> Self {
        ControllerManager {
            hw,
            controllers: Vec::new(),
            time: Duration::from_secs(0),
        }
    }
    pub fn hw(&self) -> &H {
        &self.hw
    }
    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }
    /// Time accumulated from all update periods.
    pub fn time(&self) -> Duration {
        self.time
    }

    /// Adds a stopped controller.
    /// # Errors
    /// * InvalidOperationException if a controller with that name is already loaded.
    pub fn load_controller(
        &mut self,
        name: impl Into<String>,
        controller: Box<dyn Controller>,
    ) -> FrankaResult<()> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(FrankaException::InvalidOperationException {
                message: format!("controller {} is already loaded", name),
            });
        }
        self.controllers.push(LoadedController {
            name,
            controller,
            running: false,
        });
        Ok(())
    }

    /// Names of all running controllers.
    pub fn running_controllers(&self) -> Vec<&str> {
        self.controllers
            .iter()
            .filter(|loaded| loaded.running)
            .map(|loaded| loaded.name.as_str())
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.controllers.iter().position(|loaded| loaded.name == name)
    }

    fn indices(&self, names: &[&str]) -> FrankaResult<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.index_of(name)
                    .ok_or_else(|| FrankaException::InvalidOperationException {
                        message: format!("controller {} is not loaded", name),
                    })
            })
            .collect()
    }

    /// Stops the controllers in `stop` and starts the controllers in `start`.
    /// # Errors
    /// * InvalidOperationException if a controller is not loaded.
    /// * ConflictException if the resulting set of controllers claims a resource twice or the
    /// hardware interface rejects the switch. Nothing is changed in this case.
    pub fn switch_controllers(&mut self, start: &[&str], stop: &[&str]) -> FrankaResult<()> {
        let start = self.indices(start)?;
        let stop = self.indices(stop)?;
        let start_claims: Vec<ControllerClaim> = start
            .iter()
            .map(|&i| self.controllers[i].controller.claim())
            .collect();
        let stop_claims: Vec<ControllerClaim> = stop
            .iter()
            .map(|&i| self.controllers[i].controller.claim())
            .collect();

        let mut candidates: Vec<ControllerClaim> = self
            .controllers
            .iter()
            .enumerate()
            .filter(|(i, loaded)| loaded.running && !stop.contains(i) && !start.contains(i))
            .map(|(_, loaded)| loaded.controller.claim())
            .collect();
        candidates.extend(start_claims.iter().cloned());
        if self.hw.check_for_conflict(&candidates) {
            return Err(create_conflict_exception(
                "controllers claim the same resource",
            ));
        }
        if !self.hw.prepare_switch(&start_claims, &stop_claims) {
            return Err(create_conflict_exception(
                "hardware interface rejected the controller switch",
            ));
        }

        for &i in stop.iter() {
            let loaded = &mut self.controllers[i];
            if loaded.running {
                loaded.controller.stopping();
                loaded.running = false;
            }
        }
        let state = self.hw.robot_state();
        for &i in start.iter() {
            let loaded = &mut self.controllers[i];
            loaded.controller.starting(&state);
            loaded.running = true;
        }
        self.hw.do_switch(&start_claims, &stop_claims);
        info!(
            "controller_manager: running controllers {:?}",
            self.running_controllers()
        );
        Ok(())
    }

    /// Runs one tick.
    /// # Errors
    /// * CommandException if a controller produced a command containing NaN. The command is
    /// dropped, all other commands are still written.
    /// * the errors of [`switch_controllers`](`Self::switch_controllers`) while restarting the
    /// controllers after an error recovery.
    pub fn update(&mut self, period: Duration) -> FrankaResult<()> {
        self.time += period;
        self.hw.read(self.time, period);
        if self.hw.controller_needs_reset() {
            warn!("controller_manager: restarting controllers after error recovery");
            let running: Vec<String> = self
                .running_controllers()
                .iter()
                .map(|name| name.to_string())
                .collect();
            let running: Vec<&str> = running.iter().map(String::as_str).collect();
            self.switch_controllers(&running, &running)?;
        }

        let state = self.hw.robot_state();
        let mut result = Ok(());
        for loaded in self.controllers.iter_mut().filter(|loaded| loaded.running) {
            if let Some(command) = loaded.controller.update(&state, &period) {
                if let Err(error) = self.hw.set_command(command) {
                    warn!("controller_manager: {}: {}", loaded.name, error);
                    if result.is_ok() {
                        result = Err(error);
                    }
                }
            }
        }
        self.hw.write(self.time, period)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::config::tests::PANDA_CONFIG;
    use crate::robot::combinable_hw::FrankaCombinableHw;
    use crate::robot::control_types::{ControlMode, Torques};
    use crate::robot::status::NoopStatusPublisher;
    use crate::robot::switching::tests::effort_controller;
    use crate::robot::switching::{InterfaceClaim, FRANKA_STATE_INTERFACE};
    use crate::simulation::{SimulatedRobot, SimulationHandle};
    use crate::HwConfig;

    #[derive(Default)]
    struct Counters {
        starting: AtomicUsize,
        stopping: AtomicUsize,
        updates: AtomicUsize,
    }

    struct ConstantTorque {
        torque: f64,
        counters: Arc<Counters>,
    }

    impl Controller for ConstantTorque {
        fn claim(&self) -> ControllerClaim {
            effort_controller("constant_torque")
        }
        fn starting(&mut self, _state: &RobotState) {
            self.counters.starting.fetch_add(1, Ordering::SeqCst);
        }
        fn update(&mut self, _state: &RobotState, _period: &Duration) -> Option<ControlCommand> {
            self.counters.updates.fetch_add(1, Ordering::SeqCst);
            Some(Torques::new([self.torque; 7]).into())
        }
        fn stopping(&mut self) {
            self.counters.stopping.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StateReader;

    impl Controller for StateReader {
        fn claim(&self) -> ControllerClaim {
            ControllerClaim::new(
                "state_reader",
                vec![InterfaceClaim::read_only(FRANKA_STATE_INTERFACE)],
            )
        }
        fn starting(&mut self, _state: &RobotState) {}
        fn update(&mut self, _state: &RobotState, _period: &Duration) -> Option<ControlCommand> {
            None
        }
    }

    fn manager() -> (
        ControllerManager<FrankaCombinableHw<SimulatedRobot>>,
        SimulationHandle,
    ) {
        let robot = SimulatedRobot::new();
        let handle = robot.handle();
        let config = HwConfig::from_toml_str(PANDA_CONFIG).unwrap();
        let mut hw = FrankaCombinableHw::new(config, Arc::new(NoopStatusPublisher)).unwrap();
        hw.init_with_driver(robot).unwrap();
        (ControllerManager::new(hw), handle)
    }

    fn run_for(
        manager: &mut ControllerManager<FrankaCombinableHw<SimulatedRobot>>,
        condition: impl Fn(&ControllerManager<FrankaCombinableHw<SimulatedRobot>>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            manager.update(Duration::from_millis(1)).unwrap();
            if condition(manager) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn load_and_switch() {
        let (mut manager, _handle) = manager();
        let counters = Arc::new(Counters::default());
        manager
            .load_controller(
                "torque",
                Box::new(ConstantTorque {
                    torque: 0.5,
                    counters: counters.clone(),
                }),
            )
            .unwrap();
        manager.load_controller("state", Box::new(StateReader)).unwrap();
        assert!(manager.load_controller("state", Box::new(StateReader)).is_err());
        assert!(manager.switch_controllers(&["missing"], &[]).is_err());

        manager.switch_controllers(&["torque", "state"], &[]).unwrap();
        assert_eq!(manager.running_controllers(), vec!["torque", "state"]);
        assert_eq!(manager.hw().control_mode(), ControlMode::Torque);
        assert_eq!(counters.starting.load(Ordering::SeqCst), 1);
        assert!(run_for(&mut manager, |manager| {
            manager.hw().joint_effort_command() == [0.5; 7]
        }));
        assert!(counters.updates.load(Ordering::SeqCst) > 0);

        manager.switch_controllers(&[], &["torque"]).unwrap();
        assert_eq!(manager.running_controllers(), vec!["state"]);
        assert_eq!(manager.hw().control_mode(), ControlMode::None);
        assert_eq!(counters.stopping.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn conflicting_controllers_are_not_started() {
        let (mut manager, _handle) = manager();
        let counters = Arc::new(Counters::default());
        for name in ["first", "second"] {
            manager
                .load_controller(
                    name,
                    Box::new(ConstantTorque {
                        torque: 0.,
                        counters: counters.clone(),
                    }),
                )
                .unwrap();
        }
        manager.switch_controllers(&["first"], &[]).unwrap();
        assert!(matches!(
            manager.switch_controllers(&["second"], &[]),
            Err(FrankaException::ConflictException { .. })
        ));
        assert_eq!(manager.running_controllers(), vec!["first"]);
        assert_eq!(counters.starting.load(Ordering::SeqCst), 1);
        // replacing one by the other releases the joints first
        manager.switch_controllers(&["second"], &["first"]).unwrap();
        assert_eq!(manager.running_controllers(), vec!["second"]);
    }

    #[test]
    fn controllers_restart_after_recovery() {
        let (mut manager, handle) = manager();
        let counters = Arc::new(Counters::default());
        manager
            .load_controller(
                "torque",
                Box::new(ConstantTorque {
                    torque: 0.,
                    counters: counters.clone(),
                }),
            )
            .unwrap();
        manager.switch_controllers(&["torque"], &[]).unwrap();
        assert!(run_for(&mut manager, |_| handle.running_mode()
            == Some(ControlMode::Torque)));

        handle.inject_fault(FrankaException::ControlException {
            message: "joint position limits violation".to_string(),
        });
        assert!(run_for(&mut manager, |manager| manager.hw().has_error()));
        manager.hw().reset_error().unwrap();
        assert!(manager.hw().controller_needs_reset());

        manager.update(Duration::from_millis(1)).unwrap();
        assert!(!manager.hw().controller_needs_reset());
        assert!(manager.hw().controller_active());
        assert_eq!(counters.starting.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stopping.load(Ordering::SeqCst), 1);
        assert!(run_for(&mut manager, |_| handle.running_mode()
            == Some(ControlMode::Torque)));
    }

    #[test]
    fn nan_commands_are_reported() {
        let (mut manager, _handle) = manager();
        let counters = Arc::new(Counters::default());
        manager
            .load_controller(
                "nan",
                Box::new(ConstantTorque {
                    torque: f64::NAN,
                    counters,
                }),
            )
            .unwrap();
        manager.switch_controllers(&["nan"], &[]).unwrap();
        assert!(matches!(
            manager.update(Duration::from_millis(1)),
            Err(FrankaException::CommandException { .. })
        ));
        assert!(!manager.hw().has_error());
        assert_eq!(manager.time(), Duration::from_millis(1));
    }
}
