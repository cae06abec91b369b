//! Lazily established, reusable gateway session.
//!
//! A [`Connection`] holds zero or one live stream produced by a
//! [`Connector`]. The stream is opened on first use, reused while it stays
//! healthy, and torn down by [`Connection::close`].

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use pushwire_core::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::errors::ConnectionError;

/// A bidirectional byte stream to the gateway.
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {
    /// Whether the peer is known to have ended the session.
    fn is_closed(&self) -> bool;
}

/// Opens and tears down gateway streams.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The stream type this connector produces.
    type Stream: GatewayStream;

    /// Open a stream to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream, ConnectionError>;

    /// Tear down `stream`, closing the secure session before the transport.
    async fn disconnect(&self, stream: Self::Stream);
}

/// Zero or one live session to a single endpoint.
pub struct Connection<C: Connector> {
    provider: String,
    endpoint: Endpoint,
    connector: C,
    stream: Option<C::Stream>,
}

impl<C: Connector> Connection<C> {
    /// A closed connection; nothing is opened until [`acquire`](Self::acquire).
    pub fn new(provider: impl Into<String>, endpoint: Endpoint, connector: C) -> Self {
        Self {
            provider: provider.into(),
            endpoint,
            connector,
            stream: None,
        }
    }

    /// Where this connection goes.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The connector in use.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Whether a session is cached.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// The live stream, opening a fresh one if none is cached or the cached
    /// one was closed by the peer.
    pub async fn acquire(&mut self) -> Result<&mut C::Stream, ConnectionError> {
        if let Some(stream) = self.stream.take() {
            if !stream.is_closed() {
                return Ok(self.stream.insert(stream));
            }
            debug!(provider = %self.provider, endpoint = %self.endpoint, "discarding stale session");
            self.connector.disconnect(stream).await;
        }

        let stream = self.connector.connect(&self.endpoint).await?;
        info!(provider = %self.provider, endpoint = %self.endpoint, "connected to gateway");
        metrics::counter!("pushwire_connections_opened_total", "provider" => self.provider.clone())
            .increment(1);
        Ok(self.stream.insert(stream))
    }

    /// Run `f` against the live stream.
    pub async fn with_stream<T, F>(&mut self, f: F) -> Result<T, ConnectionError>
    where
        F: for<'s> FnOnce(&'s mut C::Stream) -> BoxFuture<'s, T>,
    {
        let stream = self.acquire().await?;
        Ok(f(stream).await)
    }

    /// Tear down the session if one is open. Idempotent.
    pub async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.connector.disconnect(stream).await;
            info!(provider = %self.provider, endpoint = %self.endpoint, "closed gateway connection");
        }
    }
}

impl<C: Connector> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
