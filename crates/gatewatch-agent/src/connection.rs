//! One connection per endpoint instance.
//!
//! A connection starts listening, is promoted to connected when a peer
//! attaches, and returns to listening when the peer goes away or misbehaves.
//! [`Connection::handle_readiness`] is the single dispatch entry for both
//! transitions and for message reads.

use crate::error::AgentError;
use crate::event::AnalysisEvent;
use crate::framing::{encode_frame, FrameReader};
use crate::handler::AgentHandler;
use crate::ipc::{IpcBinding, IpcListener, IpcStream, PeerInfo};
use gatewatch_proto::{decode_message, PeerToAgent};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Backoff between write attempts when the peer's receive buffer is full.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Transport handle shared between a connection and its outstanding events.
///
/// The connection marks the transport closed when it resets or shuts down;
/// an event that outlives the connection observes the flag and fails its
/// send with [`AgentError::Closed`] instead of writing to a dead peer. The
/// underlying stream stays alive until the last holder drops its reference.
pub(crate) struct SharedTransport {
    stream: IpcStream,
    closed: AtomicBool,
    // Writers serialize so concurrent event sends cannot interleave frame
    // bytes on the stream.
    write_lock: Mutex<()>,
}

impl SharedTransport {
    pub(crate) fn new(stream: IpcStream) -> Self {
        Self {
            stream,
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    /// Frame and write one message to the peer, blocking until every byte
    /// is drained or the transport fails. Callable from any thread. Empty
    /// payloads are suppressed.
    pub fn write_all(&self, payload: &[u8]) -> Result<(), AgentError> {
        if payload.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(payload)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut cursor = &frame[..];
        while !cursor.is_empty() {
            if self.is_closed() {
                return Err(AgentError::Closed);
            }
            match self.stream.try_write(cursor) {
                Ok(0) => return Err(AgentError::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => cursor = &cursor[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    return Err(AgentError::Closed)
                }
                Err(e) => return Err(AgentError::Io(e)),
            }
        }
        Ok(())
    }
}

/// Completion of one wait on a connection's readiness source.
pub(crate) enum Readiness {
    /// An accept finished on a listening connection.
    Accepted(io::Result<IpcStream>),
    /// The connected stream has bytes (or EOF) to consume.
    Readable(io::Result<()>),
}

enum ConnState {
    Listening(IpcListener),
    Connected {
        shared: Arc<SharedTransport>,
        reader: FrameReader,
        peer: PeerInfo,
    },
}

pub(crate) struct Connection {
    binding: Arc<IpcBinding>,
    handler: Arc<dyn AgentHandler>,
    state: ConnState,
}

impl Connection {
    /// Create a connection listening on the bound channel. `first` marks
    /// the one endpoint whose creation enforces single-agent exclusivity.
    pub fn new(
        binding: Arc<IpcBinding>,
        handler: Arc<dyn AgentHandler>,
        first: bool,
    ) -> Result<Self, AgentError> {
        let listener = binding.listen(first)?;
        Ok(Self {
            binding,
            handler,
            state: ConnState::Listening(listener),
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnState::Connected { .. })
    }

    /// Wait until this connection's readiness source signals: a peer
    /// attaching when listening, bytes arriving when connected.
    ///
    /// Cancel-safe; the reactor drops and re-creates this future on every
    /// loop turn.
    pub async fn readiness(&self) -> Readiness {
        match &self.state {
            ConnState::Listening(listener) => Readiness::Accepted(listener.accept().await),
            ConnState::Connected { shared, .. } => Readiness::Readable(shared.readable().await),
        }
    }

    /// Single dispatch entry for a signalled readiness source.
    ///
    /// Any error leaves recovery to the reactor's policy: reset to
    /// listening, or removal from the pool.
    pub fn handle_readiness(&mut self, readiness: Readiness) -> Result<(), AgentError> {
        match readiness {
            Readiness::Accepted(result) => self.on_accept(result),
            Readiness::Readable(result) => self.on_readable(result),
        }
    }

    fn on_accept(&mut self, result: io::Result<IpcStream>) -> Result<(), AgentError> {
        let stream = result?;
        let peer = stream.peer_info();
        debug!(pid = peer.pid, "peer connected");
        self.state = ConnState::Connected {
            shared: Arc::new(SharedTransport::new(stream)),
            reader: FrameReader::new(),
            peer: peer.clone(),
        };
        self.handler.on_connected(&peer);
        Ok(())
    }

    fn on_readable(&mut self, result: io::Result<()>) -> Result<(), AgentError> {
        result?;
        loop {
            let ConnState::Connected {
                shared,
                reader,
                peer,
            } = &mut self.state
            else {
                return Ok(());
            };
            match shared.try_read(reader.spare()) {
                // EOF: the peer closed its end.
                Ok(0) => return Err(AgentError::Closed),
                Ok(n) => {
                    if let Some(payload) = reader.advance(n)? {
                        Self::dispatch(&self.handler, shared, peer, &payload)?;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(AgentError::Io(e)),
            }
        }
    }

    /// Route one decoded message to the matching handler callback.
    fn dispatch(
        handler: &Arc<dyn AgentHandler>,
        shared: &Arc<SharedTransport>,
        peer: &PeerInfo,
        payload: &[u8],
    ) -> Result<(), AgentError> {
        let message: PeerToAgent = decode_message(payload).map_err(|e| {
            debug!(error = %e, "undecodable peer message");
            AgentError::MalformedMessage
        })?;
        match message {
            PeerToAgent::Request(request) => {
                if request.request_token.is_empty() {
                    return Err(AgentError::MissingRequestToken);
                }
                trace!(token = %request.request_token, "analysis requested");
                let event = AnalysisEvent::new(Arc::clone(shared), peer.clone(), request);
                handler.on_analysis_requested(event);
            }
            PeerToAgent::Ack(ack) => {
                trace!(token = %ack.request_token, "response acknowledged");
                handler.on_response_acknowledged(&ack);
            }
            PeerToAgent::Cancel(cancel) => {
                trace!(tokens = cancel.request_tokens.len(), "requests cancelled");
                handler.on_cancel_requests(&cancel);
            }
        }
        Ok(())
    }

    /// Return to listening, reusing this connection slot for a new peer.
    ///
    /// If a peer was attached the shared transport is closed and
    /// `on_disconnected` fires; outstanding events observe the closed flag
    /// on their next send.
    pub fn reset(&mut self) -> Result<(), AgentError> {
        let listener = self.binding.listen(false)?;
        self.drop_peer();
        self.state = ConnState::Listening(listener);
        Ok(())
    }

    fn drop_peer(&mut self) {
        if let ConnState::Connected { shared, peer, .. } = &self.state {
            shared.close();
            debug!(pid = peer.pid, "peer disconnected");
            self.handler.on_disconnected(peer);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.drop_peer();
    }
}
