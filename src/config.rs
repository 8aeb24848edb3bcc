// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the configuration of the hardware interface.
//!
//! The configuration is read once during initialization, e.g. from a TOML file like this:
//! ```toml
//! arm_id = "panda"
//! robot_ip = "172.16.0.2"
//! joint_names = ["panda_joint1", "panda_joint2", "panda_joint3", "panda_joint4",
//!                "panda_joint5", "panda_joint6", "panda_joint7"]
//! limit_rate = true
//!
//! [[joint_limits]]
//! name = "panda_joint1"
//! min_position = -2.8973
//! max_position = 2.8973
//! max_velocity = 2.175
//! max_effort = 87.0
//! soft_lower = -2.8973
//! soft_upper = 2.8973
//! k_position = 100.0
//! k_velocity = 40.0
//! # ... one table per joint
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::exception::{create_config_exception, FrankaResult};
use crate::robot::control_types::RealtimeConfig;
use crate::robot::joint_limits::{
    JointLimitEntry, JointLimitTable, JointLimits, SoftJointLimits, NUM_JOINTS,
};
use crate::robot::rate_limiting::{DELTA_T, MAX_JOINT_ACCELERATION, MAX_TORQUE_RATE};

fn default_joint_names() -> [String; 7] {
    [1, 2, 3, 4, 5, 6, 7].map(|i| format!("panda_joint{}", i))
}

fn default_limit_rate() -> bool {
    true
}

fn default_joint_limit_warning_threshold() -> f64 {
    10. * 3.14 / 180.
}

fn default_max_torque_rate() -> [f64; 7] {
    MAX_TORQUE_RATE
}

fn default_control_period() -> f64 {
    DELTA_T
}

/// Limits of a single joint as written in the configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointLimitConfig {
    pub name: String,
    pub min_position: f64,
    pub max_position: f64,
    pub max_velocity: f64,
    pub max_effort: f64,
    /// Defaults to the acceleration limit of the Franka joint with the same index.
    #[serde(default)]
    pub max_acceleration: Option<f64>,
    pub soft_lower: f64,
    pub soft_upper: f64,
    pub k_position: f64,
    pub k_velocity: f64,
}

/// Configuration of [`FrankaCombinableHw`](`crate::FrankaCombinableHw`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HwConfig {
    /// Name of the arm, prefixes the names of the robot and model resources.
    pub arm_id: String,
    /// IP address or hostname of the robot.
    pub robot_ip: String,
    #[serde(default = "default_joint_names")]
    pub joint_names: [String; 7],
    /// Whether torque commands are rate limited.
    #[serde(default = "default_limit_rate")]
    pub limit_rate: bool,
    /// Distance in \[rad\] to a joint limit below which a warning is logged.
    #[serde(default = "default_joint_limit_warning_threshold")]
    pub joint_limit_warning_threshold: f64,
    /// Maximum torque rate in \[Nm/s\] used by the rate limiting.
    #[serde(default = "default_max_torque_rate")]
    pub max_torque_rate: [f64; 7],
    /// Period in \[s\] of the control loop used by the rate limiting.
    #[serde(default = "default_control_period")]
    pub control_period: f64,
    #[serde(default)]
    pub realtime_config: RealtimeConfig,
    /// Joint limits. Without them no command interface can be claimed.
    #[serde(default)]
    pub joint_limits: Option<Vec<JointLimitConfig>>,
}

impl HwConfig {
    /// Creates a configuration without joint limits and default values for everything else.
    pub fn new(arm_id: impl Into<String>, robot_ip: impl Into<String>) -> Self {
        HwConfig {
            arm_id: arm_id.into(),
            robot_ip: robot_ip.into(),
            joint_names: default_joint_names(),
            limit_rate: default_limit_rate(),
            joint_limit_warning_threshold: default_joint_limit_warning_threshold(),
            max_torque_rate: default_max_torque_rate(),
            control_period: default_control_period(),
            realtime_config: RealtimeConfig::default(),
            joint_limits: None,
        }
    }

    /// Parses and validates a configuration.
    /// # Errors
    /// * ConfigException if the string is no valid TOML or the configuration is inconsistent.
    pub fn from_toml_str(toml: &str) -> FrankaResult<Self> {
        let config: HwConfig = toml::from_str(toml)
            .map_err(|e| create_config_exception(format!("parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    /// # Errors
    /// * ConfigException if the file cannot be read or [`from_toml_str`](`Self::from_toml_str`) fails.
    pub fn load<P: AsRef<Path>>(path: P) -> FrankaResult<Self> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path).map_err(|e| {
            create_config_exception(format!("failed to read {}: {}", path.display(), e))
        })?;
        HwConfig::from_toml_str(&toml)
    }

    /// Checks the configuration for consistency.
    /// # Errors
    /// * ConfigException naming the first inconsistent value.
    pub fn validate(&self) -> FrankaResult<()> {
        if self.arm_id.is_empty() {
            return Err(create_config_exception("arm_id is empty"));
        }
        if self.robot_ip.is_empty() {
            return Err(create_config_exception("robot_ip is empty"));
        }
        for (i, name) in self.joint_names.iter().enumerate() {
            if name.is_empty() {
                return Err(create_config_exception(format!("joint name {} is empty", i)));
            }
            if self.joint_names[..i].contains(name) {
                return Err(create_config_exception(format!(
                    "joint name {} is used twice",
                    name
                )));
            }
        }
        if !(self.control_period > 0.) {
            return Err(create_config_exception("control_period must be positive"));
        }
        if !(self.joint_limit_warning_threshold >= 0.) {
            return Err(create_config_exception(
                "joint_limit_warning_threshold must not be negative",
            ));
        }
        if self.max_torque_rate.iter().any(|rate| !(*rate > 0.)) {
            return Err(create_config_exception("max_torque_rate must be positive"));
        }
        self.joint_limit_table().map(|_| ())
    }

    /// Builds the joint limit table ordered like [`joint_names`](#structfield.joint_names).
    /// # Return
    /// `None` if no joint limits are configured.
    /// # Errors
    /// * ConfigException if a joint has no or more than one entry, an entry names an unknown
    /// joint or the limits are inconsistent.
    pub fn joint_limit_table(&self) -> FrankaResult<Option<JointLimitTable>> {
        let limits = match &self.joint_limits {
            None => return Ok(None),
            Some(limits) => limits,
        };
        if let Some(unknown) = limits
            .iter()
            .find(|limit| !self.joint_names.contains(&limit.name))
        {
            return Err(create_config_exception(format!(
                "joint limits for unknown joint {}",
                unknown.name
            )));
        }
        let mut entries = Vec::with_capacity(NUM_JOINTS);
        for (i, name) in self.joint_names.iter().enumerate() {
            let mut matching = limits.iter().filter(|limit| &limit.name == name);
            let limit = matching.next().ok_or_else(|| {
                create_config_exception(format!("no joint limits for joint {}", name))
            })?;
            if matching.next().is_some() {
                return Err(create_config_exception(format!(
                    "joint limits for joint {} are given twice",
                    name
                )));
            }
            entries.push(JointLimitEntry {
                name: name.clone(),
                limits: JointLimits {
                    min_position: limit.min_position,
                    max_position: limit.max_position,
                    max_velocity: limit.max_velocity,
                    max_acceleration: limit.max_acceleration.unwrap_or(MAX_JOINT_ACCELERATION[i]),
                    max_effort: limit.max_effort,
                },
                soft_limits: SoftJointLimits {
                    min_position: limit.soft_lower,
                    max_position: limit.soft_upper,
                    k_position: limit.k_position,
                    k_velocity: limit.k_velocity,
                },
            });
        }
        JointLimitTable::new(entries).map(Some)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exception::FrankaException;

    pub(crate) const PANDA_CONFIG: &str = r#"
arm_id = "panda"
robot_ip = "172.16.0.2"
realtime_config = "ignore"

[[joint_limits]]
name = "panda_joint1"
min_position = -2.8973
max_position = 2.8973
max_velocity = 2.175
max_effort = 87.0
soft_lower = -2.8973
soft_upper = 2.8973
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint2"
min_position = -1.7628
max_position = 1.7628
max_velocity = 2.175
max_effort = 87.0
soft_lower = -1.7628
soft_upper = 1.7628
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint3"
min_position = -2.8973
max_position = 2.8973
max_velocity = 2.175
max_effort = 87.0
soft_lower = -2.8973
soft_upper = 2.8973
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint4"
min_position = -3.0718
max_position = -0.0698
max_velocity = 2.175
max_effort = 87.0
soft_lower = -3.0718
soft_upper = -0.0698
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint5"
min_position = -2.8973
max_position = 2.8973
max_velocity = 2.61
max_effort = 12.0
soft_lower = -2.8973
soft_upper = 2.8973
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint6"
min_position = -0.0175
max_position = 3.7525
max_velocity = 2.61
max_effort = 12.0
soft_lower = -0.0175
soft_upper = 3.7525
k_position = 100.0
k_velocity = 40.0

[[joint_limits]]
name = "panda_joint7"
min_position = -2.8973
max_position = 2.8973
max_velocity = 2.61
max_effort = 12.0
max_acceleration = 5.0
soft_lower = -2.8973
soft_upper = 2.8973
k_position = 100.0
k_velocity = 40.0
"#;

    #[test]
    fn parse_full_config() {
        let config = HwConfig::from_toml_str(PANDA_CONFIG).unwrap();
        assert_eq!(config.arm_id, "panda");
        assert_eq!(config.joint_names[6], "panda_joint7");
        assert!(config.limit_rate);
        assert_eq!(config.max_torque_rate, [1000.; 7]);
        assert_eq!(config.control_period, 1e-3);
        assert_eq!(config.realtime_config, RealtimeConfig::Ignore);
        let table = config.joint_limit_table().unwrap().unwrap();
        assert_eq!(table.joint(3).unwrap().limits.max_position, -0.0698);
        assert_eq!(table.joint(0).unwrap().limits.max_acceleration, 15.);
        assert_eq!(table.joint(6).unwrap().limits.max_acceleration, 5.);
        assert!(table.joint(7).is_none());
    }

    #[test]
    fn minimal_config_has_no_limits() {
        let config = HwConfig::from_toml_str("arm_id = \"fr3\"\nrobot_ip = \"localhost\"").unwrap();
        assert_eq!(config, HwConfig::new("fr3", "localhost"));
        assert!(config.joint_limit_table().unwrap().is_none());
        assert!(f64::abs(config.joint_limit_warning_threshold - 0.1744444) < 1e-6);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            HwConfig::from_toml_str("arm_id = \"\"\nrobot_ip = \"localhost\""),
            Err(FrankaException::ConfigException { .. })
        ));
        assert!(HwConfig::from_toml_str("robot_ip = \"localhost\"").is_err());
        assert!(HwConfig::from_toml_str(
            "arm_id = \"a\"\nrobot_ip = \"b\"\ncontrol_period = 0.0"
        )
        .is_err());
        assert!(HwConfig::from_toml_str(
            "arm_id = \"a\"\nrobot_ip = \"b\"\nrealtime_config = \"sometimes\""
        )
        .is_err());
        let renamed = PANDA_CONFIG.replace("\"panda_joint7\"", "\"panda_joint8\"");
        assert!(HwConfig::from_toml_str(&renamed).is_err());
        let duplicated = PANDA_CONFIG.replace("\"panda_joint6\"", "\"panda_joint5\"");
        assert!(HwConfig::from_toml_str(&duplicated).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let error = HwConfig::load("/nonexistent/franka_hw.toml").unwrap_err();
        assert!(format!("{}", error).contains("failed to read"));
    }
}
