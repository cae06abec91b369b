//! # pushwire-core
//!
//! Foundation types for the pushwire gateway client.
//!
//! - **Payload**: the namespaced JSON document with its 211-byte budget and
//!   alert truncation ([`Payload`], [`PayloadBuilder`])
//! - **Notification**: device token + payload + expiration, identified by an
//!   owned [`IdentifierSequence`], encoded into the binary packet format
//! - **Delivery errors**: the 6-byte asynchronous error frame ([`DeliveryError`])
//! - **Shared types**: [`Endpoint`], [`Endpoints`], [`DeliveryPolicy`], [`Credentials`]
//! - **Logging**: subscriber setup, token redaction and test capture helpers

#![deny(unsafe_code)]

pub mod delivery_error;
pub mod errors;
pub mod logging;
pub mod notification;
pub mod payload;
pub mod types;

pub use delivery_error::{DeliveryError, reason_text};
pub use errors::{NotificationError, PayloadError};
pub use notification::{DeviceToken, IdentifierSequence, Notification};
pub use payload::{DEFAULT_TRUNCATION_FILLER, MAX_PAYLOAD_BYTES, Payload, PayloadBuilder};
pub use types::{Credentials, DeliveryPolicy, Endpoint, Endpoints};
