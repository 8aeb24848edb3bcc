// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the error and recovery state machine.
use std::sync::atomic::{AtomicU8, Ordering};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Fault state of the hardware interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum RecoveryState {
    /// No fault, controllers may run.
    Normal = 0,
    /// A fault occurred. Every control cycle terminates the session.
    Faulted = 1,
    /// The robot recovered from a fault. Running controllers have to be restarted before the
    /// interface becomes [`Normal`](`RecoveryState::Normal`) again.
    AwaitingReset = 2,
}

/// Events which move the [`RecoveryState`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    TriggerError,
    ResetError,
    /// A fresh prepare/do switch cycle completed.
    AcknowledgeReset,
}

/// Flags derived from a [`RecoveryState`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ErrorState {
    pub has_error: bool,
    pub error_recovered: bool,
    pub controller_needs_reset: bool,
}

impl From<RecoveryState> for ErrorState {
    fn from(state: RecoveryState) -> Self {
        match state {
            RecoveryState::Normal => ErrorState::default(),
            RecoveryState::Faulted => ErrorState {
                has_error: true,
                error_recovered: false,
                controller_needs_reset: false,
            },
            RecoveryState::AwaitingReset => ErrorState {
                has_error: false,
                error_recovered: true,
                controller_needs_reset: true,
            },
        }
    }
}

/// Transition table. `None` means the event does not apply in `state`.
pub fn transition(state: RecoveryState, event: RecoveryEvent) -> Option<RecoveryState> {
    use RecoveryEvent::*;
    use RecoveryState::*;
    match (state, event) {
        (Normal, TriggerError) | (AwaitingReset, TriggerError) => Some(Faulted),
        (Faulted, ResetError) => Some(AwaitingReset),
        (AwaitingReset, AcknowledgeReset) => Some(Normal),
        _ => None,
    }
}

/// Lock free [`RecoveryState`], shared by the control loop thread and the supervisory layer.
#[derive(Debug)]
pub struct ErrorStateMachine {
    state: AtomicU8,
}

impl Default for ErrorStateMachine {
    fn default() -> Self {
        ErrorStateMachine {
            state: AtomicU8::new(RecoveryState::Normal as u8),
        }
    }
}

impl ErrorStateMachine {
    pub fn current(&self) -> RecoveryState {
        RecoveryState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(RecoveryState::Faulted)
    }
    pub fn error_state(&self) -> ErrorState {
        self.current().into()
    }
    pub fn has_error(&self) -> bool {
        self.current() == RecoveryState::Faulted
    }
    /// Whether a control session may run. False while faulted and until the controllers were
    /// restarted after a recovery.
    pub fn allows_control(&self) -> bool {
        self.current() == RecoveryState::Normal
    }
    /// Applies `event` atomically.
    /// # Return
    /// The new state, or `None` if the event does not apply in the current state.
    pub fn apply(&self, event: RecoveryEvent) -> Option<RecoveryState> {
        let mut current = self.current();
        loop {
            let next = transition(current, event)?;
            match self.state.compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(next),
                Err(actual) => {
                    current = RecoveryState::from_u8(actual).unwrap_or(RecoveryState::Faulted)
                }
            }
        }
    }
}
