//! The delivery engine.
//!
//! A [`Provider`] owns one gateway [`Connection`] and pushes batches of
//! notifications through it. The gateway never acknowledges success; it only
//! writes an error frame naming the first packet it rejected and then hangs
//! up, with no bound on when that frame shows up. Each attempt therefore
//! writes the whole batch, waits briefly for a frame, and classifies what it
//! saw:
//!
//! - nothing: the batch is delivered
//! - a frame naming a notification of the batch: that notification is
//!   skipped and everything after it is resent on a fresh connection
//! - anything else (connect, write or read failure, end-of-stream, a frame
//!   naming an unknown notification): the whole batch is resent after the
//!   next delay of the retry backoff, and dropped once the backoff runs out
//!
//! Delivery failures are never returned to the caller; they are logged,
//! counted and broadcast as [`DeliveryEvent`]s.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use pushwire_core::delivery_error::ERROR_FRAME_LEN;
use pushwire_core::logging::redact_token;
use pushwire_core::{
    DeliveryError, DeliveryPolicy, DeviceToken, Endpoint, Endpoints, IdentifierSequence,
    Notification, NotificationError, Payload,
};
use pushwire_settings::{ProviderSettings, load_credentials};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::connection::{Connection, Connector, GatewayStream};
use crate::errors::{GatewayError, TransportFault};
use crate::events::{self, DeliveryEvent};
use crate::tls::TlsConnector;

/// Sends notifications to one gateway.
pub struct Provider<C: Connector = TlsConnector> {
    name: String,
    connection: Connection<C>,
    feedback: Endpoint,
    policy: DeliveryPolicy,
    sequence: Arc<IdentifierSequence>,
    pending: Option<Vec<Notification>>,
    events: broadcast::Sender<DeliveryEvent>,
}

impl Provider<TlsConnector> {
    /// Build a TLS provider from its settings, reading credentials from disk.
    pub fn from_settings(name: &str, settings: &ProviderSettings) -> Result<Self, GatewayError> {
        let endpoints = settings.endpoints(name)?;
        let policy = settings.policy(name)?;
        let credentials = load_credentials(&settings.credential_paths(name)?)?;
        let connector = TlsConnector::new(&credentials)?;
        Ok(Self::new(name, connector, endpoints, policy))
    }
}

impl<C: Connector> Provider<C> {
    /// A provider with its own identifier sequence.
    pub fn new(
        name: impl Into<String>,
        connector: C,
        endpoints: Endpoints,
        policy: DeliveryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            connection: Connection::new(name.clone(), endpoints.gateway, connector),
            name,
            feedback: endpoints.feedback,
            policy,
            sequence: Arc::new(IdentifierSequence::new()),
            pending: None,
            events: events::channel(),
        }
    }

    /// Draw identifiers from `sequence` instead.
    #[must_use]
    pub fn with_sequence(mut self, sequence: Arc<IdentifierSequence>) -> Self {
        self.sequence = sequence;
        self
    }

    /// Provider name, used in logs and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gateway endpoint.
    pub fn gateway_endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    /// Feedback service endpoint. The feedback service itself is not polled.
    pub fn feedback_endpoint(&self) -> &Endpoint {
        &self.feedback
    }

    /// Delivery timing in use.
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Identifier sequence in use.
    pub fn sequence(&self) -> &Arc<IdentifierSequence> {
        &self.sequence
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    /// Receive delivery outcomes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Build a notification with this provider's identifier sequence.
    ///
    /// The token is validated here so that a malformed one fails at the call
    /// site instead of inside a batch.
    pub fn prepare(
        &self,
        device_token: &str,
        payload: impl Into<Arc<Payload>>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<Notification, NotificationError> {
        let _ = DeviceToken::parse(device_token)?;
        Ok(match expiration {
            Some(at) => Notification::with_expiration(&self.sequence, device_token, payload, at),
            None => Notification::new(&self.sequence, device_token, payload),
        })
    }

    /// Send `payload` to every token, or buffer it while a batch is open.
    ///
    /// Every token is validated before anything is buffered or sent.
    pub async fn notify<I, T>(
        &mut self,
        device_tokens: I,
        payload: impl Into<Arc<Payload>>,
    ) -> Result<(), NotificationError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let notifications = build_notifications(&self.sequence, device_tokens, payload.into())?;
        self.submit(notifications).await;
        Ok(())
    }

    /// Send prepared notifications, or buffer them while a batch is open.
    pub async fn submit(&mut self, notifications: Vec<Notification>) {
        if let Some(pending) = &mut self.pending {
            pending.extend(notifications);
            debug!(provider = %self.name, buffered = pending.len(), "buffered notifications");
        } else {
            self.send(notifications).await;
        }
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.pending.is_some()
    }

    /// Start buffering notifications. Nested calls keep the open batch.
    pub fn begin_batch(&mut self) {
        let _ = self.pending.get_or_insert_with(Vec::new);
    }

    /// Send everything buffered since [`begin_batch`](Self::begin_batch) as one batch.
    pub async fn commit_batch(&mut self) {
        if let Some(batch) = self.pending.take() {
            self.send(batch).await;
        }
    }

    /// Buffer the notifications `f` adds to the scope and send them as one batch.
    ///
    /// If `f` fails the buffered notifications are discarded and its error
    /// returned. Inside an open batch the scope's notifications join it.
    pub async fn batch<F, E>(&mut self, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut BatchScope) -> Result<(), E>,
    {
        let mut scope = BatchScope::new(Arc::clone(&self.sequence));
        if let Err(e) = f(&mut scope) {
            warn!(provider = %self.name, discarded = scope.len(), "batch scope failed, discarding");
            return Err(e);
        }
        self.submit(scope.notifications).await;
        Ok(())
    }

    /// Deliver `batch`, recovering from gateway rejections and transport faults.
    pub async fn send(&mut self, batch: Vec<Notification>) {
        let mut batch = self.encode_batch(batch);
        let mut attempt = 0;

        while !batch.is_empty() {
            let probe = self.policy.probe_delay(batch.len());
            let packets: Vec<Bytes> = batch.iter().map(|(_, packet)| packet.clone()).collect();
            debug!(provider = %self.name, notifications = batch.len(), attempt, "sending batch");

            let (fault, response) = match self
                .connection
                .with_stream(move |stream| exchange(stream, packets, probe).boxed())
                .await
            {
                Ok(observed) => (observed.fault, observed.response),
                Err(e) => (Some(TransportFault::Connection(e)), None),
            };

            if fault.is_none() && response.is_none() {
                self.delivered(batch.iter().map(|(n, _)| n));
                return;
            }

            if let Some(fault) = &fault {
                warn!(provider = %self.name, error = %fault, "transport fault during delivery");
            }
            if let Some(error) = &response {
                warn!(provider = %self.name, %error, "gateway reported delivery error");
            }
            self.connection.close().await;

            let rejected = response.and_then(|error| {
                batch
                    .iter()
                    .position(|(notification, _)| error.matches(notification))
                    .map(|index| (index, error))
            });

            if let Some((index, error)) = rejected {
                let remaining = batch.split_off(index + 1);
                let rejected = batch.pop();
                self.delivered(batch.iter().map(|(n, _)| n));
                if let Some((notification, _)) = rejected {
                    self.skipped(&notification, error);
                }
                batch = remaining;
                attempt = 0;
                sleep(self.policy.error_skip_delay).await;
                continue;
            }

            match self.policy.backoff(attempt) {
                Some(delay) => {
                    attempt += 1;
                    warn!(
                        provider = %self.name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        pending = batch.len(),
                        "retrying batch"
                    );
                    metrics::counter!("pushwire_delivery_retries_total", "provider" => self.name.clone())
                        .increment(1);
                    self.emit(DeliveryEvent::RetryScheduled {
                        attempt,
                        delay,
                        pending: batch.len(),
                    });
                    sleep(delay).await;
                }
                None => {
                    self.abandoned(&batch, attempt);
                    return;
                }
            }
        }
    }

    /// Send any open batch and tear down the connection.
    pub async fn close(&mut self) {
        self.commit_batch().await;
        self.connection.close().await;
    }

    fn encode_batch(&self, batch: Vec<Notification>) -> Vec<(Notification, Bytes)> {
        batch
            .into_iter()
            .filter_map(|notification| match notification.encode() {
                Ok(packet) => Some((notification, packet)),
                Err(e) => {
                    warn!(
                        provider = %self.name,
                        identifier = notification.identifier(),
                        token = %redact_token(notification.device_token()),
                        error = %e,
                        "discarding notification that cannot be encoded"
                    );
                    metrics::counter!("pushwire_notifications_dropped_total", "provider" => self.name.clone())
                        .increment(1);
                    self.emit(DeliveryEvent::Discarded {
                        identifier: notification.identifier(),
                        reason: e.to_string(),
                    });
                    None
                }
            })
            .collect()
    }

    fn delivered<'a>(&self, notifications: impl Iterator<Item = &'a Notification>) {
        let identifiers: Vec<u64> = notifications.map(Notification::identifier).collect();
        if identifiers.is_empty() {
            return;
        }
        debug!(provider = %self.name, delivered = identifiers.len(), "batch delivered");
        metrics::counter!("pushwire_notifications_delivered_total", "provider" => self.name.clone())
            .increment(identifiers.len() as u64);
        self.emit(DeliveryEvent::Delivered { identifiers });
    }

    fn skipped(&self, notification: &Notification, error: DeliveryError) {
        warn!(
            provider = %self.name,
            identifier = notification.identifier(),
            token = %redact_token(notification.device_token()),
            reason = error.reason(),
            "skipping rejected notification"
        );
        metrics::counter!("pushwire_notifications_skipped_total", "provider" => self.name.clone())
            .increment(1);
        self.emit(DeliveryEvent::Skipped {
            identifier: notification.identifier(),
            error,
        });
    }

    fn abandoned(&self, batch: &[(Notification, Bytes)], retries: usize) {
        let identifiers: Vec<u64> = batch.iter().map(|(n, _)| n.identifier()).collect();
        warn!(
            provider = %self.name,
            dropped = identifiers.len(),
            retries,
            "retries exhausted, dropping batch"
        );
        metrics::counter!("pushwire_notifications_dropped_total", "provider" => self.name.clone())
            .increment(identifiers.len() as u64);
        self.emit(DeliveryEvent::Abandoned { identifiers, retries });
    }

    fn emit(&self, event: DeliveryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl<C: Connector> fmt::Debug for Provider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .field("feedback", &self.feedback)
            .field("policy", &self.policy)
            .field("batching", &self.is_batching())
            .finish_non_exhaustive()
    }
}

/// Collects notifications for [`Provider::batch`].
#[derive(Debug)]
pub struct BatchScope {
    sequence: Arc<IdentifierSequence>,
    notifications: Vec<Notification>,
}

impl BatchScope {
    fn new(sequence: Arc<IdentifierSequence>) -> Self {
        Self {
            sequence,
            notifications: Vec::new(),
        }
    }

    /// Buffer `payload` for every token; all tokens are validated first.
    pub fn notify<I, T>(
        &mut self,
        device_tokens: I,
        payload: impl Into<Arc<Payload>>,
    ) -> Result<(), NotificationError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let notifications = build_notifications(&self.sequence, device_tokens, payload.into())?;
        self.notifications.extend(notifications);
        Ok(())
    }

    /// Buffer a prepared notification.
    pub fn push(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Buffered notification count.
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

fn build_notifications<I, T>(
    sequence: &IdentifierSequence,
    device_tokens: I,
    payload: Arc<Payload>,
) -> Result<Vec<Notification>, NotificationError>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let tokens: Vec<String> = device_tokens.into_iter().map(Into::into).collect();
    for token in &tokens {
        let _ = DeviceToken::parse(token)?;
    }
    Ok(tokens
        .into_iter()
        .map(|token| Notification::new(sequence, token, Arc::clone(&payload)))
        .collect())
}

/// What one write-then-probe round observed.
#[derive(Debug, Default)]
struct Exchange {
    fault: Option<TransportFault>,
    response: Option<DeliveryError>,
}

/// Write every packet, flush, then wait up to `probe` for an error frame.
///
/// Writing stops at the first failure, but the flush and the probe still
/// run: the gateway may have explained the failure before hanging up.
/// End-of-stream counts as an empty frame.
async fn exchange<S: GatewayStream>(stream: &mut S, packets: Vec<Bytes>, probe: Duration) -> Exchange {
    let mut outcome = Exchange::default();

    for packet in &packets {
        if let Err(e) = stream.write_all(packet).await {
            outcome.fault = Some(TransportFault::Write(e));
            break;
        }
        debug!(bytes = packet.len(), "wrote packet");
    }
    if let Err(e) = stream.flush().await {
        let _ = outcome.fault.get_or_insert(TransportFault::Flush(e));
    }

    let mut frame = [0_u8; ERROR_FRAME_LEN];
    let mut filled = 0;
    let read = timeout(probe, async {
        while filled < ERROR_FRAME_LEN {
            let n = stream.read(&mut frame[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok::<(), std::io::Error>(())
    })
    .await;

    match read {
        Ok(Ok(())) => outcome.response = Some(DeliveryError::decode(&frame[..filled])),
        Ok(Err(e)) => {
            let _ = outcome.fault.get_or_insert(TransportFault::Read(e));
        }
        Err(_elapsed) if filled > 0 => {
            outcome.response = Some(DeliveryError::decode(&frame[..filled]));
        }
        Err(_elapsed) => {}
    }
    outcome
}
