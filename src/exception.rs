// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while arbitrating commands between the
/// supervisory layer and the robot driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrankaException {
    /// ControlException is returned by the driver if an error occurs during motion generation or
    /// torque control, e.g. because a reflex was triggered.
    #[error("{message}")]
    ControlException { message: String },

    /// NetworkException is returned if a connection to the robot cannot be established, or when a
    /// timeout occurs.
    #[error("{message}")]
    NetworkException { message: String },

    /// CommandException is returned if a command is invalid, e.g. because it contains NaN values.
    #[error("{message}")]
    CommandException { message: String },

    /// ConflictException is returned if a set of controllers claims incompatible resources or
    /// interfaces.
    #[error("{message}")]
    ConflictException { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message}")]
    RealTimeException { message: String },

    /// InvalidOperationException is returned if a conflicting operation is already running or the
    /// hardware interface is used in the wrong order.
    #[error("{message}")]
    InvalidOperationException { message: String },

    /// ConfigException is returned if the configuration cannot be read or is inconsistent.
    #[error("invalid configuration: {message}")]
    ConfigException { message: String },
}

/// creates a CommandException from a static string slice
pub(crate) fn create_command_exception(message: &'static str) -> FrankaException {
    FrankaException::CommandException {
        message: message.to_string(),
    }
}

/// creates a ConflictException from anything that can be displayed
pub(crate) fn create_conflict_exception(message: impl Into<String>) -> FrankaException {
    FrankaException::ConflictException {
        message: message.into(),
    }
}

/// creates a ConfigException from anything that can be displayed
pub(crate) fn create_config_exception(message: impl Into<String>) -> FrankaException {
    FrankaException::ConfigException {
        message: message.into(),
    }
}

/// Result type which can have FrankaException as Error
pub type FrankaResult<T> = Result<T, FrankaException>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_test() {
        let error = create_command_exception("Got NaN value in command");
        assert_eq!(format!("{}", error), "Got NaN value in command");
        let error = create_config_exception("arm_id is empty");
        assert_eq!(format!("{}", error), "invalid configuration: arm_id is empty");
        let error = create_conflict_exception(String::from("two command interfaces"));
        assert!(matches!(error, FrankaException::ConflictException { .. }));
    }
}
