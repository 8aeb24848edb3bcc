// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the control loop thread which keeps a control session with the robot running.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::exception::{FrankaException, FrankaResult};
use crate::robot::arbiter::{Arbiter, ArbiterConfig};
use crate::robot::control_tools::prepare_realtime_thread;
use crate::robot::control_types::{ControlMode, RealtimeConfig};
use crate::robot::error_state::{ErrorStateMachine, RecoveryEvent};
use crate::robot::mirror::{CommandMirror, StateMirror};
use crate::robot::robot_control::RobotDriver;
use crate::robot::robot_state::RobotState;
use crate::robot::status::StatusPublisher;
use crate::robot::switching::SwitchState;

/// Pause before reading the robot state again after a failed read.
const READ_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the control loop thread and the supervisory layer share.
pub(crate) struct SharedState {
    pub state: StateMirror,
    pub commands: CommandMirror,
    pub switch: SwitchState,
    pub errors: ErrorStateMachine,
    /// Number of commands rejected inside a control cycle because they contained NaN.
    pub rejected_commands: AtomicU64,
    pub publisher: Arc<dyn StatusPublisher>,
}

impl SharedState {
    pub fn new(state: &RobotState, publisher: Arc<dyn StatusPublisher>) -> Self {
        SharedState {
            state: StateMirror::new(*state),
            commands: CommandMirror::new(state),
            switch: SwitchState::default(),
            errors: ErrorStateMachine::default(),
            rejected_commands: AtomicU64::new(0),
            publisher,
        }
    }

    /// Enters the fault state and stops the running controller.
    /// # Return
    /// Whether the fault state was entered, false if it was already active.
    pub fn trigger_error(&self) -> bool {
        self.switch.deactivate();
        if self.errors.apply(RecoveryEvent::TriggerError).is_some() {
            self.publisher.publish_error_state(true);
            true
        } else {
            false
        }
    }
}

/// Owns the control loop thread of one robot connection.
///
/// While no controller is active the thread keeps reading the robot state. Once a mode is armed
/// and activated, it runs a control session of that mode with the [`Arbiter`] as callback until
/// the session is terminated. If the session fails, the fault state is entered and the thread
/// exits. It has to be started again after recovery.
pub(crate) struct ControlLoopDriver<D: RobotDriver> {
    driver: Arc<Mutex<D>>,
    shared: Arc<SharedState>,
    config: ArbiterConfig,
    realtime_config: RealtimeConfig,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<D: RobotDriver> ControlLoopDriver<D> {
    pub fn new(
        driver: Arc<Mutex<D>>,
        shared: Arc<SharedState>,
        config: ArbiterConfig,
        realtime_config: RealtimeConfig,
    ) -> Self {
        ControlLoopDriver {
            driver,
            shared,
            config,
            realtime_config,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Returns true while the control loop thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Starts the control loop thread.
    /// # Errors
    /// * InvalidOperationException if the thread is already running.
    /// * RealTimeException if realtime priority cannot be set while
    /// [`RealtimeConfig::Enforce`] is configured. No thread is left running in this case.
    pub fn start(&mut self) -> FrankaResult<()> {
        if self.is_running() {
            return Err(FrankaException::InvalidOperationException {
                message: "franka_hw: control loop is already running".to_string(),
            });
        }
        self.join();
        self.shutdown.store(false, Ordering::Release);

        let (ready_sender, ready_receiver) = crossbeam_channel::bounded(1);
        let driver = self.driver.clone();
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let config = self.config;
        let enforce = self.realtime_config == RealtimeConfig::Enforce;
        let worker = spawn(move || {
            let ready = prepare_realtime_thread(enforce);
            let prepared = ready.is_ok();
            if ready_sender.send(ready).is_err() || !prepared {
                return;
            }
            run(&driver, &shared, config, &shutdown);
        });

        let ready = ready_receiver.recv();
        match ready {
            Ok(Ok(())) => {
                self.worker = Some(worker);
                debug!("franka_hw: control loop started");
                Ok(())
            }
            Ok(Err(error)) => {
                let _ = worker.join();
                Err(error)
            }
            Err(_) => {
                let _ = worker.join();
                Err(FrankaException::InvalidOperationException {
                    message: "franka_hw: control loop thread exited during startup".to_string(),
                })
            }
        }
    }

    /// Stops the control loop thread and waits for it.
    ///
    /// A running control session is terminated within one cycle.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.shared.switch.deactivate();
        self.join();
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("franka_hw: control loop thread panicked");
            }
        }
    }
}

impl<D: RobotDriver> Drop for ControlLoopDriver<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<D: RobotDriver>(
    driver: &Mutex<D>,
    shared: &SharedState,
    config: ArbiterConfig,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Acquire) {
        let (mode, active) = shared.switch.snapshot();
        if !active || mode == ControlMode::None || !shared.errors.allows_control() {
            let state = driver.lock().read_once();
            match state {
                Ok(state) => shared.state.update(&state),
                Err(error) => {
                    debug!("franka_hw: reading robot state failed: {}", error);
                    std::thread::sleep(READ_RETRY_INTERVAL);
                }
            }
            continue;
        }

        shared.commands.reset_applied(&shared.state.driver_state());
        info!("franka_hw: starting control session ({})", mode);
        let arbiter = Arbiter::new(shared, mode, config);
        let result = driver
            .lock()
            .control(mode, &mut |state, period| arbiter.cycle(state, period));
        match result {
            Ok(()) => debug!("franka_hw: control session ({}) finished", mode),
            Err(error) => {
                shared.trigger_error();
                error!("franka_hw: control session ({}) failed: {}", mode, error);
                return;
            }
        }
    }
}
