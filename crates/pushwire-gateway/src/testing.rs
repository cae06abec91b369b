//! Scripted in-memory gateway for deterministic tests.
//!
//! Each connection the [`ScriptedConnector`] opens consumes the next
//! [`Script`]. When the scripts run out, sessions accept everything and
//! never answer. Every connect, packet write and teardown is logged as a
//! [`TransportEvent`] for assertions.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use pushwire_core::{DeliveryError, Endpoint};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::connection::{Connector, GatewayStream};
use crate::errors::ConnectionError;

/// What the gateway answers after the writes of one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Response {
    /// Nothing; reads stay pending.
    #[default]
    Silent,
    /// These bytes, then end-of-stream.
    Bytes(Vec<u8>),
    /// End-of-stream straight away.
    Eof,
    /// The read fails.
    ReadError,
}

/// Behaviour of one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// Zero-based index of the write that fails, if any.
    pub fail_write_at: Option<usize>,
    /// What reads return.
    pub response: Response,
}

impl Session {
    /// Accepts everything, answers nothing.
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Answers with an error frame naming `identifier`.
    pub fn rejecting(status: u8, identifier: u32) -> Self {
        Self {
            fail_write_at: None,
            response: Response::Bytes(DeliveryError::encode_frame(status, identifier).to_vec()),
        }
    }

    /// Every write fails; reads see end-of-stream.
    pub fn broken() -> Self {
        Self {
            fail_write_at: Some(0),
            response: Response::Eof,
        }
    }
}

/// Outcome of one connect attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Script {
    /// The connect attempt fails.
    Refuse,
    /// A session is opened.
    Open(Session),
}

impl From<Session> for Script {
    fn from(session: Session) -> Self {
        Self::Open(session)
    }
}

/// Something the scripted gateway observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect attempt was refused.
    Refused,
    /// Session `session` was opened.
    Connected {
        /// Zero-based session number.
        session: usize,
    },
    /// A packet was accepted.
    Wrote {
        /// Session the packet went to.
        session: usize,
        /// Wire identifier from the packet header.
        identifier: u32,
    },
    /// A write was failed on purpose.
    WriteFailed {
        /// Session the packet went to.
        session: usize,
    },
    /// Session `session` was torn down by the client.
    Closed {
        /// Zero-based session number.
        session: usize,
    },
}

#[derive(Debug, Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    events: Mutex<Vec<TransportEvent>>,
    sessions: Mutex<usize>,
    live: Mutex<Option<Arc<AtomicBool>>>,
}

impl Shared {
    fn log(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

/// A [`Connector`] driven by a queue of scripts.
///
/// Clones share the queue and the event log.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    /// A connector whose sessions are all healthy.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector that plays `scripts` in order.
    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let connector = Self::default();
        connector.shared.scripts.lock().extend(scripts);
        connector
    }

    /// A connector whose sessions play `sessions` in order.
    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self::with_scripts(sessions.into_iter().map(Script::Open))
    }

    /// Everything observed so far.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.shared.events.lock().clone()
    }

    /// Number of sessions opened.
    pub fn connect_count(&self) -> usize {
        *self.shared.sessions.lock()
    }

    /// Identifiers of accepted packets, across sessions.
    pub fn written_identifiers(&self) -> Vec<u32> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TransportEvent::Wrote { identifier, .. } => Some(*identifier),
                _ => None,
            })
            .collect()
    }

    /// Identifiers of accepted packets, one list per session.
    pub fn writes_per_session(&self) -> Vec<Vec<u32>> {
        let mut sessions: Vec<Vec<u32>> = vec![Vec::new(); self.connect_count()];
        for event in self.shared.events.lock().iter() {
            if let TransportEvent::Wrote { session, identifier } = event {
                if let Some(writes) = sessions.get_mut(*session) {
                    writes.push(*identifier);
                }
            }
        }
        sessions
    }

    /// Make the current session look closed by the peer.
    pub fn hang_up(&self) {
        if let Some(closed) = self.shared.live.lock().as_ref() {
            closed.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self, endpoint: &Endpoint) -> Result<ScriptedStream, ConnectionError> {
        let script = self
            .shared
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Open(Session::healthy()));

        let session = match script {
            Script::Refuse => {
                self.shared.log(TransportEvent::Refused);
                return Err(ConnectionError::Connect {
                    endpoint: endpoint.to_string(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "scripted refusal"),
                });
            }
            Script::Open(session) => session,
        };

        let id = {
            let mut sessions = self.shared.sessions.lock();
            let id = *sessions;
            *sessions += 1;
            id
        };
        let closed = Arc::new(AtomicBool::new(false));
        *self.shared.live.lock() = Some(Arc::clone(&closed));
        self.shared.log(TransportEvent::Connected { session: id });

        Ok(ScriptedStream {
            id,
            session,
            writes: 0,
            answered: false,
            closed,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn disconnect(&self, stream: ScriptedStream) {
        stream.closed.store(true, Ordering::SeqCst);
        self.shared.log(TransportEvent::Closed { session: stream.id });
    }
}

/// One scripted session.
#[derive(Debug)]
pub struct ScriptedStream {
    id: usize,
    session: Session,
    writes: usize,
    answered: bool,
    closed: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl GatewayStream for ScriptedStream {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let index = this.writes;
        this.writes += 1;

        if this.session.fail_write_at.is_some_and(|at| index >= at) {
            this.shared.log(TransportEvent::WriteFailed { session: this.id });
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }

        let identifier = buf
            .get(1..5)
            .and_then(|id| <[u8; 4]>::try_from(id).ok())
            .map_or(0, u32::from_be_bytes);
        this.shared.log(TransportEvent::Wrote {
            session: this.id,
            identifier,
        });
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match &this.session.response {
            Response::Silent => Poll::Pending,
            Response::Eof => Poll::Ready(Ok(())),
            Response::ReadError => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "scripted read failure",
            ))),
            Response::Bytes(bytes) => {
                if !this.answered {
                    let n = bytes.len().min(buf.remaining());
                    buf.put_slice(&bytes[..n]);
                    this.answered = true;
                }
                Poll::Ready(Ok(()))
            }
        }
    }
}
