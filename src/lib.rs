// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! # franka_hw
//! franka_hw sits between the driver of a [Franka Emika](https://franka.de) arm and a
//! scheduler which runs interchangeable controllers.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE CONTROLLING THE ROBOT!**
//!
//! ## Design
//! The library is divided into the following modules:
//! * [robot](`crate::robot`) - the hardware interface, its control loop thread and everything
//! needed to arbitrate the commands of the controllers.
//! * [config](`crate::config`) - the configuration of one arm, including its joint limits.
//! * [controller_manager](`crate::controller_manager`) - a minimal scheduler for controllers.
//! * [simulation](`crate::simulation`) - a simulated robot to use instead of a real one.
//!
//! The supervisory layer runs at its own rate and only ever sees copies of the robot state. The
//! control loop thread runs the control session with the robot and takes the latest command of
//! the active controller in every cycle. Both sides exchange data through short copies under
//! separate locks, so a slow controller never blocks a control cycle.
//!
//! # Example:
//!```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use franka_hw::{
//!     ControllerManager, FrankaCombinableHw, FrankaResult, HwConfig, NoopStatusPublisher,
//!     RobotHw, SimulatedRobot,
//! };
//! fn main() -> FrankaResult<()> {
//!     let config = HwConfig::load("panda.toml")?;
//!     let mut hw: FrankaCombinableHw<SimulatedRobot> =
//!         FrankaCombinableHw::new(config, Arc::new(NoopStatusPublisher))?;
//!     hw.init()?;
//!     let mut manager = ControllerManager::new(hw);
//!     // load controllers and switch them on here
//!     loop {
//!         manager.update(Duration::from_millis(10))?;
//!         std::thread::sleep(Duration::from_millis(10));
//!     }
//! }
//!   ```
//!
//! Functions return a FrankaResult<()> which means that they return either Ok(())
//! or an Error of type FrankaException.
pub mod config;
pub mod controller_manager;
pub mod exception;
pub mod robot;
pub mod simulation;
pub mod utils;

pub use config::HwConfig;
pub use controller_manager::{Controller, ControllerManager};
pub use exception::{FrankaException, FrankaResult};
pub use robot::combinable_hw::{FrankaCombinableHw, RecoveryHandle, RobotHw};
pub use robot::control_types::*;
pub use robot::error_state::{ErrorState, RecoveryState};
pub use robot::robot_control::RobotDriver;
pub use robot::robot_state::RobotState;
pub use robot::status::{
    ChannelStatusPublisher, NoopStatusPublisher, StatusEvent, StatusPublisher,
};
pub use robot::switching::{ControllerClaim, InterfaceClaim};
pub use simulation::SimulatedRobot;
pub use utils::*;
