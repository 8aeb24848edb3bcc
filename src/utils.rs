// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! contains useful type definitions and conversion functions.
use nalgebra::{Isometry3, Matrix4, Rotation3, SVector, Translation3, UnitQuaternion, Vector3};

/// A Vector with 7 entries
pub type Vector7 = SVector<f64, 7>;

/// converts a 4x4 column-major homogenous matrix to an Isometry
pub fn array_to_isometry(array: &[f64; 16]) -> Isometry3<f64> {
    let rot = Rotation3::from_matrix(
        &Matrix4::from_column_slice(array)
            .remove_column(3)
            .remove_row(3),
    );
    Isometry3::from_parts(
        Vector3::new(array[12], array[13], array[14]).into(),
        rot.into(),
    )
}

/// converts an Isometry to a 4x4 column-major homogenous matrix
pub fn isometry_to_array(isometry: &Isometry3<f64>) -> [f64; 16] {
    let mut out = [0.; 16];
    for (i, &x) in isometry.to_homogeneous().iter().enumerate() {
        out[i] = x;
    }
    out
}

/// Integrates a twist (linear velocity, angular velocity) expressed in base frame over one
/// sample and applies it to a pose.
pub fn integrate_twist(pose: &[f64; 16], twist: &[f64; 6], delta_t: f64) -> [f64; 16] {
    let mut transform = array_to_isometry(pose);
    let translation = Vector3::new(twist[0], twist[1], twist[2]) * delta_t;
    let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(twist[3], twist[4], twist[5]) * delta_t);
    transform.translation = Translation3::from(transform.translation.vector + translation);
    transform.rotation = rotation * transform.rotation;
    isometry_to_array(&transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: [f64; 16] = [
        1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
    ];

    #[test]
    fn isometry_round_trip_keeps_translation() {
        let pose = [
            0., 1., 0., 0., -1., 0., 0., 0., 0., 0., 1., 0., 0.3, 0.1, 0.5, 1.,
        ];
        let converted = isometry_to_array(&array_to_isometry(&pose));
        pose.iter()
            .zip(converted.iter())
            .for_each(|(&x, &y)| assert!(f64::abs(x - y) < 1e-9));
    }

    #[test]
    fn integrate_twist_test() {
        let pose = integrate_twist(&IDENTITY, &[1., 0., -2., 0., 0., 0.], 1e-3);
        assert!(f64::abs(pose[12] - 1e-3) < 1e-12);
        assert!(f64::abs(pose[14] + 2e-3) < 1e-12);
        assert!(crate::robot::control_tools::is_homogeneous_transformation(&pose));

        let pose = integrate_twist(&IDENTITY, &[0., 0., 0., 0., 0., std::f64::consts::PI], 0.5);
        // quarter turn around z maps x onto y
        assert!(f64::abs(pose[0]) < 1e-9);
        assert!(f64::abs(pose[1] - 1.) < 1e-9);
    }
}
