//! Public service facade.

use crate::error::AgentError;
use crate::handler::AgentHandler;
use crate::ipc::IpcBinding;
use crate::reactor::Reactor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Configuration for an [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Channel name peers use to rendezvous with the agent. Resolved to a
    /// platform endpoint address by the transport; must be non-empty.
    pub name: String,
    /// Run one agent instance per OS user, on a per-user endpoint.
    pub user_specific: bool,
}

/// The agent service: owns the named endpoint that peers connect to and
/// drives the handler callbacks.
///
/// Construction claims the channel; a second agent on the same name fails
/// with [`AgentError::AgentAlreadyExists`]. The instance is not thread-safe
/// except for stopping, which any thread may do through a [`StopHandle`].
pub struct Agent {
    config: AgentConfig,
    reactor: Reactor,
    stop: CancellationToken,
    // Declared last: connections must unwind before the I/O driver goes.
    runtime: tokio::runtime::Runtime,
}

impl Agent {
    /// Create an agent listening on the configured channel.
    ///
    /// # Errors
    /// Construction is the fatal-error boundary: [`InvalidChannelName`]
    /// (empty or unresolvable name), [`AgentAlreadyExists`] (the name is
    /// owned by another process), and [`StopSourceUnavailable`] (the loop
    /// machinery could not be built) all abort here, before any event is
    /// handled.
    ///
    /// [`InvalidChannelName`]: AgentError::InvalidChannelName
    /// [`AgentAlreadyExists`]: AgentError::AgentAlreadyExists
    /// [`StopSourceUnavailable`]: AgentError::StopSourceUnavailable
    pub fn new(config: AgentConfig, handler: Arc<dyn AgentHandler>) -> Result<Self, AgentError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| AgentError::StopSourceUnavailable)?;
        let stop = CancellationToken::new();

        let reactor = {
            let _enter = runtime.enter();
            let binding = Arc::new(IpcBinding::bind(&config.name, config.user_specific)?);
            Reactor::new(binding, handler, stop.clone())?
        };

        Ok(Self {
            config,
            reactor,
            stop,
            runtime,
        })
    }

    /// The configuration this agent was created with.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Block handling peer events, invoking the handler's callbacks, until
    /// the agent is stopped.
    ///
    /// # Errors
    /// Returns early if the reactor cannot keep its listening invariant
    /// (for example [`AgentError::NotInitialized`]).
    pub fn handle_events(&mut self) -> Result<(), AgentError> {
        let reactor = &mut self.reactor;
        self.runtime.block_on(reactor.run())
    }

    /// A handle that stops this agent from any thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Signal the event loop to return. Equivalent to
    /// `stop_handle().stop()`.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Cloneable cross-thread stop signal for an [`Agent`].
#[derive(Clone)]
pub struct StopHandle {
    stop: CancellationToken,
}

impl StopHandle {
    /// Unblock the agent's [`Agent::handle_events`]. Idempotent; the
    /// signal stays set, so a later `handle_events` returns immediately.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}
