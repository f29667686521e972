use std::io;
use thiserror::Error;

/// Errors surfaced by the agent-side IPC core.
///
/// Fatal errors abort service construction before the event loop is
/// entered; every other kind is recovered internally by resetting or
/// removing the affected connection, or reported to the handler from the
/// call that produced it.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configured channel name is empty or cannot be resolved to a
    /// platform endpoint address.
    #[error("invalid channel name")]
    InvalidChannelName,

    /// Another process already owns the channel name.
    #[error("an agent already exists for this channel")]
    AgentAlreadyExists,

    /// The machinery backing the agent stop signal could not be created.
    #[error("could not create the agent stop signal")]
    StopSourceUnavailable,

    /// The reactor's wait set is too small to handle events.
    #[error("agent is not initialized to handle events")]
    NotInitialized,

    /// A peer sent bytes that do not decode to a known message, an empty
    /// message, or one exceeding the size cap.
    #[error("malformed message from peer")]
    MalformedMessage,

    /// An analysis request arrived without a request token.
    #[error("request is missing a request token")]
    MissingRequestToken,

    /// `send` was called on an event whose response already went out.
    #[error("a response was already sent for this event")]
    AlreadySent,

    /// Operation on a closed event or a transport whose connection has
    /// been reset or shut down.
    #[error("operation on a closed event or transport")]
    Closed,

    /// The peer's process id could not be determined.
    #[error("cannot get peer process id")]
    PeerPidUnavailable,

    /// The peer's binary path could not be determined.
    #[error("cannot get peer binary path")]
    PeerPathUnavailable,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl AgentError {
    /// Whether this error aborts service construction rather than being
    /// recovered by connection reset or removal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidChannelName | Self::AgentAlreadyExists | Self::StopSourceUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_split() {
        assert!(AgentError::InvalidChannelName.is_fatal());
        assert!(AgentError::AgentAlreadyExists.is_fatal());
        assert!(AgentError::StopSourceUnavailable.is_fatal());

        assert!(!AgentError::MalformedMessage.is_fatal());
        assert!(!AgentError::AlreadySent.is_fatal());
        assert!(!AgentError::Closed.is_fatal());
        assert!(!AgentError::NotInitialized.is_fatal());
        assert!(!AgentError::Io(io::ErrorKind::BrokenPipe.into()).is_fatal());
    }
}
