//! Delivery outcomes broadcast to subscribers.

use std::time::Duration;

use pushwire_core::DeliveryError;
use tokio::sync::broadcast;

/// Capacity of each provider's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened to notifications handed to a provider.
///
/// Identifiers are the full 64-bit notification identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// The gateway accepted these notifications.
    Delivered {
        /// Accepted notifications.
        identifiers: Vec<u64>,
    },
    /// A notification could not be encoded and was never sent.
    Discarded {
        /// The notification.
        identifier: u64,
        /// Why encoding failed.
        reason: String,
    },
    /// The gateway rejected a notification; the rest of its batch continues.
    Skipped {
        /// The rejected notification.
        identifier: u64,
        /// The gateway's error frame.
        error: DeliveryError,
    },
    /// An unattributable failure; the batch will be resent.
    RetryScheduled {
        /// One-based retry number.
        attempt: usize,
        /// Pause before the retry.
        delay: Duration,
        /// Notifications still pending.
        pending: usize,
    },
    /// Retries are exhausted; these notifications were dropped.
    Abandoned {
        /// Dropped notifications.
        identifiers: Vec<u64>,
        /// Retries spent before giving up.
        retries: usize,
    },
}

pub(crate) fn channel() -> broadcast::Sender<DeliveryEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
