// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the status channel which notifies the supervisory layer about error state changes.
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Receives error state changes of the hardware interface.
///
/// Called from the supervisory layer and from the control loop thread after a fault, never from
/// within a control cycle.
#[cfg_attr(test, mockall::automock)]
pub trait StatusPublisher: Send + Sync {
    /// Publishes whether the hardware interface is currently in an error state.
    fn publish_error_state(&self, has_error: bool);
}

/// Events sent through a [`ChannelStatusPublisher`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    ErrorState(bool),
}

/// Forwards error state changes into a channel.
#[derive(Debug, Clone)]
pub struct ChannelStatusPublisher {
    sender: Sender<StatusEvent>,
}

impl ChannelStatusPublisher {
    /// Creates a publisher and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<StatusEvent>) {
        let (sender, receiver) = unbounded();
        (ChannelStatusPublisher { sender }, receiver)
    }
}

impl StatusPublisher for ChannelStatusPublisher {
    fn publish_error_state(&self, has_error: bool) {
        if self.sender.send(StatusEvent::ErrorState(has_error)).is_err() {
            debug!("franka_hw: status receiver dropped, error state {} not delivered", has_error);
        }
    }
}

/// Discards all status events.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoopStatusPublisher;

impl StatusPublisher for NoopStatusPublisher {
    fn publish_error_state(&self, _has_error: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_publisher_test() {
        let (publisher, receiver) = ChannelStatusPublisher::new();
        publisher.publish_error_state(true);
        publisher.publish_error_state(false);
        assert_eq!(receiver.try_recv(), Ok(StatusEvent::ErrorState(true)));
        assert_eq!(receiver.try_recv(), Ok(StatusEvent::ErrorState(false)));
        assert!(receiver.try_recv().is_err());
        drop(receiver);
        // a dropped receiver is not an error
        publisher.publish_error_state(true);
    }

    #[test]
    fn mock_publisher_test() {
        let mut publisher = MockStatusPublisher::new();
        publisher
            .expect_publish_error_state()
            .with(mockall::predicate::eq(true))
            .times(1)
            .return_const(());
        let publisher: Box<dyn StatusPublisher> = Box::new(publisher);
        publisher.publish_error_state(true);
    }
}
