//! Notifications and their binary packet encoding.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};

use crate::errors::NotificationError;
use crate::payload::Payload;

/// Command byte of the extended notification packet.
pub const COMMAND_NOTIFICATION: u8 = 1;

/// Length of a decoded device token.
pub const DEVICE_TOKEN_LEN: usize = 32;

const TOKEN_LEN_FIELD: u16 = 32;

/// Bytes a packet spends before the payload.
pub const PACKET_HEADER_LEN: usize = 1 + 4 + 4 + 2 + DEVICE_TOKEN_LEN + 2;

/// Default time-to-live when no expiration is given.
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Source of notification identifiers.
///
/// Each call to [`next_identifier`](Self::next_identifier) returns a value
/// strictly greater than every earlier one from the same sequence, including
/// across threads. One sequence is typically shared per process.
#[derive(Debug, Default)]
pub struct IdentifierSequence {
    last: AtomicU64,
}

impl IdentifierSequence {
    /// A sequence whose first identifier is 1.
    pub const fn new() -> Self {
        Self::starting_after(0)
    }

    /// A sequence whose first identifier is `last + 1`.
    pub const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next identifier.
    pub fn next_identifier(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Most recently issued identifier (0 before the first).
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

/// A decoded 32-byte device token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; DEVICE_TOKEN_LEN]);

impl DeviceToken {
    /// Decode a hex token.
    pub fn parse(hex_token: &str) -> Result<Self, NotificationError> {
        let raw = hex::decode(hex_token).map_err(|e| NotificationError::InvalidTokenEncoding {
            reason: e.to_string(),
        })?;
        let actual = raw.len();
        let bytes = <[u8; DEVICE_TOKEN_LEN]>::try_from(raw).map_err(|_| {
            NotificationError::InvalidTokenLength {
                expected: DEVICE_TOKEN_LEN,
                actual,
            }
        })?;
        Ok(Self(bytes))
    }

    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_TOKEN_LEN] {
        &self.0
    }
}

impl FromStr for DeviceToken {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({}...)", &hex::encode(&self.0[..4]))
    }
}

/// A single push message.
///
/// Identity is the `identifier`; the token is validated only at encoding
/// time so that a bad token fails one packet rather than construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    identifier: u64,
    device_token: String,
    payload: Arc<Payload>,
    expiration: DateTime<Utc>,
}

impl Notification {
    /// Create a notification expiring one hour from now.
    pub fn new(
        sequence: &IdentifierSequence,
        device_token: impl Into<String>,
        payload: impl Into<Arc<Payload>>,
    ) -> Self {
        Self::with_expiration(
            sequence,
            device_token,
            payload,
            Utc::now() + Duration::seconds(DEFAULT_TTL_SECS),
        )
    }

    /// Create a notification with an explicit expiration.
    pub fn with_expiration(
        sequence: &IdentifierSequence,
        device_token: impl Into<String>,
        payload: impl Into<Arc<Payload>>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: sequence.next_identifier(),
            device_token: device_token.into(),
            payload: payload.into(),
            expiration,
        }
    }

    /// Process-unique identifier.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    /// The identifier as it appears on the wire (low 32 bits).
    #[allow(clippy::cast_possible_truncation)]
    pub fn wire_identifier(&self) -> u32 {
        self.identifier as u32
    }

    /// Hex device token as given.
    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    /// The payload, possibly shared with other notifications.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// When the gateway may stop trying to deliver.
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Expiration as 32-bit unix seconds, clamped to the representable range.
    pub fn expiration_seconds(&self) -> u32 {
        u32::try_from(self.expiration.timestamp().max(0)).unwrap_or(u32::MAX)
    }

    /// Encode the binary packet.
    ///
    /// Layout: command (1), identifier (4), expiration (4), token length (2),
    /// token (32), payload length (2), payload JSON. Integers are big-endian.
    pub fn encode(&self) -> Result<Bytes, NotificationError> {
        let token = DeviceToken::parse(&self.device_token)?;
        let json = self.payload.to_json();
        let payload_len = u16::try_from(json.len())
            .map_err(|_| NotificationError::PayloadTooLarge { size: json.len() })?;

        let mut packet = BytesMut::with_capacity(PACKET_HEADER_LEN + json.len());
        packet.put_u8(COMMAND_NOTIFICATION);
        packet.put_u32(self.wire_identifier());
        packet.put_u32(self.expiration_seconds());
        packet.put_u16(TOKEN_LEN_FIELD);
        packet.put_slice(token.as_bytes());
        packet.put_u16(payload_len);
        packet.put_slice(&json);
        Ok(packet.freeze())
    }
}
