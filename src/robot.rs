// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the hardware interface and everything it needs to arbitrate commands between the
//! control loop of the robot and the supervisory layer.

mod arbiter;
pub mod combinable_hw;
mod control_loop;
pub(crate) mod control_tools;
pub mod control_types;
pub mod error_state;
pub mod joint_limits;
pub mod mirror;
pub mod rate_limiting;
pub mod robot_control;
pub mod robot_state;
pub mod status;
pub mod switching;
