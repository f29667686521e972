//! Windows named pipe endpoint implementation.

use super::PeerInfo;
use crate::error::AgentError;
use std::io;
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio::sync::Mutex;
use tracing::debug;

/// Prefix for Windows named pipes.
const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Maximum number of pipe instances (concurrent peers).
const MAX_INSTANCES: usize = 64;

/// Resolve a channel name to a pipe path.
///
/// Names already carrying the pipe prefix are taken as-is; otherwise the
/// prefix is applied. `user_specific` appends the user name so each OS user
/// rendezvouses on an independent endpoint.
fn resolve_address(name: &str, user_specific: bool) -> Result<String, AgentError> {
    if name.is_empty() {
        return Err(AgentError::InvalidChannelName);
    }
    let base = if name.starts_with(PIPE_PREFIX) {
        name.to_string()
    } else {
        format!("{PIPE_PREFIX}{name}")
    };
    if user_specific {
        let user = std::env::var("USERNAME").map_err(|_| AgentError::InvalidChannelName)?;
        Ok(format!("{base}.{user}"))
    } else {
        Ok(base)
    }
}

/// The agent's claim on a channel name.
///
/// On Windows exclusivity is enforced by the kernel pipe namespace: the
/// first instance is created with `first_pipe_instance`, which the system
/// refuses when another process already owns the name.
pub(crate) struct IpcBinding {
    address: String,
}

impl IpcBinding {
    pub fn bind(name: &str, user_specific: bool) -> Result<Self, AgentError> {
        let address = resolve_address(name, user_specific)?;
        Ok(Self { address })
    }

    /// Create one listening pipe instance.
    pub fn listen(&self, first: bool) -> Result<IpcListener, AgentError> {
        let server = ServerOptions::new()
            .first_pipe_instance(first)
            .max_instances(MAX_INSTANCES)
            .create(&self.address)
            .map_err(|e| {
                // ERROR_ACCESS_DENIED on the first instance means the name
                // is owned by another process.
                if first && e.kind() == io::ErrorKind::PermissionDenied {
                    AgentError::AgentAlreadyExists
                } else {
                    AgentError::Io(e)
                }
            })?;
        debug!(address = %self.address, first, "pipe instance created");
        Ok(IpcListener {
            server: Mutex::new(Some(server)),
        })
    }

    #[allow(dead_code)]
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// One pipe instance waiting for a peer to attach.
pub(crate) struct IpcListener {
    server: Mutex<Option<NamedPipeServer>>,
}

impl IpcListener {
    /// Wait for a peer to attach. Cancel-safe: the instance stays armed if
    /// the future is dropped before a peer connects.
    pub async fn accept(&self) -> io::Result<IpcStream> {
        let mut guard = self.server.lock().await;
        match guard.as_mut() {
            Some(server) => server.connect().await?,
            None => return Err(io::Error::other("pipe instance already promoted")),
        }
        let server = guard
            .take()
            .ok_or_else(|| io::Error::other("pipe instance already promoted"))?;
        Ok(IpcStream { inner: server })
    }
}

/// A connected peer.
pub(crate) struct IpcStream {
    inner: NamedPipeServer,
}

impl IpcStream {
    pub async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await
    }

    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.try_read(buf)
    }

    pub fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.try_write(buf)
    }

    /// Identity of the connected peer.
    ///
    /// Tokio's named-pipe API does not expose the client process id, so
    /// peer identity is unavailable here; both fields stay empty.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo::default()
    }
}
