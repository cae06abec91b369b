//! # pushwire-gateway
//!
//! Delivery of notifications over the binary gateway protocol.
//!
//! - [`connection`]: lazily opened, reusable session behind the [`Connector`] seam
//! - [`tls`]: the production [`Connector`], mutually authenticated TLS via rustls
//! - [`provider`]: the delivery engine with batching, skip-on-reject and retry backoff
//! - [`registry`]: named providers sharing one identifier sequence
//! - [`events`]: broadcast delivery outcomes
//! - `testing`: a scripted in-memory gateway, behind the `testing` feature

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod events;
pub mod provider;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tls;

pub use connection::{Connection, Connector, GatewayStream};
pub use errors::{ConnectionError, GatewayError, TransportFault};
pub use events::{DeliveryEvent, EVENT_CHANNEL_CAPACITY};
pub use provider::{BatchScope, Provider};
pub use registry::Providers;
pub use tls::{CONNECT_TIMEOUT, TlsConnector, TlsSession};
