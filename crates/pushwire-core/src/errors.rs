//! Construction-time errors.
//!
//! These are the only failures a caller of the library ever sees directly.
//! Transport and protocol faults stay inside the delivery engine.

use thiserror::Error;

/// Errors raised while building or truncating a [`Payload`](crate::Payload).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// A custom top-level field shadows a field of the reserved `aps` object.
    #[error("'{field}' is a reserved field and cannot be set as a custom field")]
    ReservedFieldCollision {
        /// The offending field name.
        field: String,
    },

    /// The payload is over budget but has no alert string (or alert body) to trim.
    #[error("no alert to truncate: the alert must be a string or an object with a string body")]
    NoTruncatableAlert,

    /// Even removing the whole alert would not bring the payload under budget.
    #[error("not enough room to truncate: {excess} bytes must go but the alert only has {available}")]
    InsufficientRoom {
        /// Bytes that would have to be removed, filler included.
        excess: usize,
        /// Serialized length of the alert text.
        available: usize,
    },
}

/// Errors raised while validating or encoding a [`Notification`](crate::Notification).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// The decoded device token is not exactly 32 bytes.
    #[error("invalid device token length: expected {expected} bytes, got {actual}")]
    InvalidTokenLength {
        /// Required token length in bytes.
        expected: usize,
        /// Decoded token length in bytes.
        actual: usize,
    },

    /// The device token is not a hex string.
    #[error("invalid device token encoding: {reason}")]
    InvalidTokenEncoding {
        /// Decoder message.
        reason: String,
    },

    /// The payload cannot be described by the 16-bit length field.
    #[error("payload of {size} bytes does not fit the packet length field")]
    PayloadTooLarge {
        /// Serialized payload size.
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_names_the_field() {
        let err = PayloadError::ReservedFieldCollision {
            field: "badge".into(),
        };
        assert!(err.to_string().contains("'badge'"));
    }

    #[test]
    fn insufficient_room_reports_sizes() {
        let err = PayloadError::InsufficientRoom {
            excess: 409,
            available: 300,
        };
        assert_eq!(
            err.to_string(),
            "not enough room to truncate: 409 bytes must go but the alert only has 300"
        );
    }

    #[test]
    fn oversized_payload_reports_size() {
        let err = NotificationError::PayloadTooLarge { size: 70_013 };
        assert_eq!(
            err.to_string(),
            "payload of 70013 bytes does not fit the packet length field"
        );
    }
}
