// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the torque rate saturation and the default limits of the arm.

///Sample time constant
pub static DELTA_T: f64 = 1e-3;
/// Maximum torque rate in \[Nm/s\], i.e. 1 Nm per 1 ms cycle.
pub static MAX_TORQUE_RATE: [f64; 7] = [1000.; 7];
/// Maximum joint acceleration in \[rad/s^2\]
pub static MAX_JOINT_ACCELERATION: [f64; 7] = [15.0, 7.5, 10.0, 12.5, 15.0, 20.0, 20.0];

/// Saturates the change of a torque command between two cycles.
///
/// # Arguments
/// * `max_rate` - Per-joint maximum allowed torque rate in \[Nm/s\].
/// * `period` - Control period in \[s\].
/// * `commanded_torques` - Desired torques of the current time step.
/// * `last_commanded_torques` - Torques applied in the previous time step.
/// # Return
/// For each joint the desired torque unchanged if the change stays within
/// `max_rate * period`, otherwise the previous torque moved by exactly `max_rate * period`
/// towards the desired torque.
pub fn saturate_torque_rate(
    max_rate: &[f64; 7],
    period: f64,
    commanded_torques: &[f64; 7],
    last_commanded_torques: &[f64; 7],
) -> [f64; 7] {
    let mut saturated = [0.; 7];
    for i in 0..7 {
        let max_delta = max_rate[i] * period;
        let difference = commanded_torques[i] - last_commanded_torques[i];
        saturated[i] = if difference.abs() <= max_delta {
            commanded_torques[i]
        } else {
            last_commanded_torques[i] + max_delta.copysign(difference)
        };
    }
    saturated
}
