//! Event loop owning the connection pool and the stop signal.

use crate::connection::{Connection, Readiness};
use crate::error::AgentError;
use crate::handler::AgentHandler;
use crate::ipc::IpcBinding;
use futures::future;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum number of connections kept in listening state, so that several
/// peers starting at the same time can all attach.
pub(crate) const MIN_LISTENERS: usize = 2;

/// Minimum number of wait-set entries: the listening connections plus the
/// stop signal.
pub(crate) const MIN_WAIT_SLOTS: usize = MIN_LISTENERS + 1;

enum Turn {
    Continue,
    Stopped,
}

/// Serves every connection cooperatively from one thread, waiting on all
/// readiness sources at once and dispatching whichever signals first.
pub(crate) struct Reactor {
    binding: Arc<IpcBinding>,
    handler: Arc<dyn AgentHandler>,
    // Boxed so pool mutations never relocate a connection's state.
    connections: Vec<Box<Connection>>,
    stop: CancellationToken,
}

impl Reactor {
    /// Pre-populate the pool with [`MIN_LISTENERS`] listening connections.
    /// The first one enforces single-agent exclusivity on the channel.
    pub fn new(
        binding: Arc<IpcBinding>,
        handler: Arc<dyn AgentHandler>,
        stop: CancellationToken,
    ) -> Result<Self, AgentError> {
        let mut connections = Vec::with_capacity(MIN_LISTENERS);
        for i in 0..MIN_LISTENERS {
            connections.push(Box::new(Connection::new(
                Arc::clone(&binding),
                Arc::clone(&handler),
                i == 0,
            )?));
        }
        Ok(Self {
            binding,
            handler,
            connections,
            stop,
        })
    }

    /// Drive the pool until the stop signal fires or the loop cannot
    /// continue. Drains the pool before returning.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        info!(listeners = self.connections.len(), "agent handling events");
        let result = loop {
            match self.turn().await {
                Ok(Turn::Continue) => {}
                Ok(Turn::Stopped) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.shutdown();
        result
    }

    async fn turn(&mut self) -> Result<Turn, AgentError> {
        if self.connections.len() + 1 < MIN_WAIT_SLOTS {
            return Err(AgentError::NotInitialized);
        }

        // The wait set is the connections in pool order with the stop
        // signal at the tail, so a ready index below the tail maps
        // directly to a connection.
        let (index, readiness) = {
            let mut waits: Vec<Pin<Box<dyn Future<Output = Option<Readiness>> + '_>>> =
                Vec::with_capacity(self.connections.len() + 1);
            for conn in &self.connections {
                waits.push(Box::pin(async move { Some(conn.readiness().await) }));
            }
            let stop = &self.stop;
            waits.push(Box::pin(async move {
                stop.cancelled().await;
                None
            }));

            let (ready, index, _pending) = future::select_all(waits).await;
            match ready {
                None => return Ok(Turn::Stopped),
                Some(readiness) => (index, readiness),
            }
        };

        let conn = &mut self.connections[index];
        let was_listening = !conn.is_connected();
        match conn.handle_readiness(readiness) {
            Ok(()) => {
                if was_listening && self.connections[index].is_connected() {
                    // A listener was promoted; replenish the pool so
                    // MIN_LISTENERS endpoints stay available.
                    let conn =
                        Connection::new(Arc::clone(&self.binding), Arc::clone(&self.handler), false)?;
                    self.connections.push(Box::new(conn));
                    debug!(pool = self.connections.len(), "listener replenished");
                }
            }
            Err(err) => {
                if matches!(err, AgentError::Closed) {
                    debug!("peer closed connection");
                } else {
                    warn!(error = %err, connected = !was_listening, "connection error");
                }
                if !was_listening && self.connections.len() > MIN_LISTENERS {
                    // Enough listeners remain; drop the failed peer's
                    // connection outright.
                    drop(self.connections.remove(index));
                    debug!(pool = self.connections.len(), "connection removed");
                } else {
                    self.connections[index].reset()?;
                }
            }
        }
        Ok(Turn::Continue)
    }

    /// Drain the pool. Dropping a connection closes its shared transport
    /// and fires `on_disconnected` for an attached peer; events still held
    /// by the handler fail their send with `Closed`.
    fn shutdown(&mut self) {
        debug!(pool = self.connections.len(), "reactor draining");
        self.connections.clear();
    }
}
