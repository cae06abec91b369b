//! The gateway's asynchronous error-response frame.
//!
//! On rejecting a packet the gateway writes six bytes, command `8`, a status
//! byte and the 32-bit identifier of the offending notification, then closes
//! the connection. Everything before that notification was accepted.

use std::fmt;

use bytes::Buf;

use crate::notification::Notification;

/// Command byte of an error-response frame.
pub const COMMAND_ERROR_RESPONSE: u8 = 8;

/// Length of an error-response frame.
pub const ERROR_FRAME_LEN: usize = 6;

/// A delivery failure reported by, or inferred from, the gateway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryError {
    /// Status byte; `None` when the gateway sent no usable frame.
    pub status: Option<u8>,
    /// Wire identifier of the rejected notification.
    pub identifier: Option<u32>,
}

impl DeliveryError {
    /// A failure with no gateway frame behind it.
    pub const fn no_response() -> Self {
        Self {
            status: None,
            identifier: None,
        }
    }

    /// Decode the first six bytes of `frame`.
    ///
    /// Shorter input yields [`no_response`](Self::no_response). The command
    /// byte is skipped without being checked.
    pub fn decode(frame: &[u8]) -> Self {
        if frame.len() < ERROR_FRAME_LEN {
            return Self::no_response();
        }
        let mut buf = frame;
        let _command = buf.get_u8();
        let status = buf.get_u8();
        let identifier = buf.get_u32();
        Self {
            status: Some(status),
            identifier: Some(identifier),
        }
    }

    /// Build the frame a gateway would send.
    pub fn encode_frame(status: u8, identifier: u32) -> [u8; ERROR_FRAME_LEN] {
        let id = identifier.to_be_bytes();
        [
            COMMAND_ERROR_RESPONSE,
            status,
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }

    /// Human-readable reason for the status.
    pub fn reason(&self) -> &'static str {
        reason_text(self.status)
    }

    /// Whether this error names `notification`.
    pub fn matches(&self, notification: &Notification) -> bool {
        self.identifier == Some(notification.wire_identifier())
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.identifier) {
            (Some(status), Some(id)) => {
                write!(f, "{} (status {status}, notification {id})", self.reason())
            }
            _ => f.write_str(self.reason()),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Reason text for a status byte.
pub fn reason_text(status: Option<u8>) -> &'static str {
    match status {
        None => "unknown reason (no response from gateway)",
        Some(0) => "gateway error: no errors encountered",
        Some(1) => "gateway error: processing error",
        Some(2) => "gateway error: missing device token",
        Some(3) => "gateway error: missing topic",
        Some(4) => "gateway error: missing payload",
        Some(5) => "gateway error: invalid token size",
        Some(6) => "gateway error: invalid topic size",
        Some(7) => "gateway error: invalid payload size",
        Some(8) => "gateway error: invalid token",
        Some(255) => "gateway error: unknown error",
        Some(_) => "unknown reason",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::IdentifierSequence;
    use crate::payload::Payload;

    #[test]
    fn decodes_a_full_frame() {
        let error = DeliveryError::decode(&[8, 7, 0, 0, 1, 2]);
        assert_eq!(error.status, Some(7));
        assert_eq!(error.identifier, Some(258));
        assert_eq!(error.reason(), "gateway error: invalid payload size");
    }

    #[test]
    fn short_frames_mean_no_response() {
        assert_eq!(DeliveryError::decode(&[]), DeliveryError::no_response());
        assert_eq!(
            DeliveryError::decode(&[8, 8, 0, 0, 0]),
            DeliveryError::no_response()
        );
    }

    #[test]
    fn ignores_trailing_bytes() {
        let error = DeliveryError::decode(&[8, 8, 0, 0, 0, 9, 0xff, 0xff]);
        assert_eq!(error.identifier, Some(9));
        assert_eq!(error.status, Some(8));
    }

    #[test]
    fn frame_round_trip() {
        let frame = DeliveryError::encode_frame(5, 0xdead_beef);
        assert_eq!(frame[0], COMMAND_ERROR_RESPONSE);
        assert_eq!(
            DeliveryError::decode(&frame),
            DeliveryError {
                status: Some(5),
                identifier: Some(0xdead_beef)
            }
        );
    }

    #[test]
    fn reason_table() {
        assert_eq!(
            reason_text(None),
            "unknown reason (no response from gateway)"
        );
        assert_eq!(reason_text(Some(0)), "gateway error: no errors encountered");
        assert_eq!(reason_text(Some(2)), "gateway error: missing device token");
        assert_eq!(reason_text(Some(255)), "gateway error: unknown error");
        assert_eq!(reason_text(Some(42)), "unknown reason");
    }

    #[test]
    fn matches_by_wire_identifier() {
        let sequence = IdentifierSequence::starting_after(41);
        let payload = Payload::builder().alert("hi").build().unwrap();
        let notification = Notification::new(&sequence, "00".repeat(32), payload);

        assert!(DeliveryError::decode(&DeliveryError::encode_frame(8, 42)).matches(&notification));
        assert!(!DeliveryError::decode(&DeliveryError::encode_frame(8, 43)).matches(&notification));
        assert!(!DeliveryError::no_response().matches(&notification));
    }

    #[test]
    fn display_includes_status_and_identifier() {
        let error = DeliveryError::decode(&DeliveryError::encode_frame(8, 3));
        assert_eq!(
            error.to_string(),
            "gateway error: invalid token (status 8, notification 3)"
        );
        assert_eq!(
            DeliveryError::no_response().to_string(),
            "unknown reason (no response from gateway)"
        );
    }
}
