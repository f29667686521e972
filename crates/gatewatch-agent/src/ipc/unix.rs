//! Unix domain socket endpoint implementation.

use super::PeerInfo;
use crate::error::AgentError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Resolve a channel name to a socket path.
///
/// Absolute names are taken verbatim. Relative names land in the system
/// temp directory; `user_specific` appends the calling user's uid so each
/// OS user rendezvouses on an independent endpoint.
fn resolve_address(name: &str, user_specific: bool) -> Result<PathBuf, AgentError> {
    if name.is_empty() {
        return Err(AgentError::InvalidChannelName);
    }
    if name.starts_with('/') {
        return Ok(PathBuf::from(name));
    }
    let file = if user_specific {
        let uid = unsafe { libc::getuid() };
        format!("{name}-{uid}.sock")
    } else {
        format!("{name}.sock")
    };
    Ok(std::env::temp_dir().join(file))
}

/// The agent's claim on a channel name.
///
/// Binding resolves the address, rejects the name if a live agent already
/// owns it, reclaims a stale socket left by an unclean shutdown, and holds
/// the listener that all listening endpoints share.
///
/// Must be created from within a tokio runtime context.
pub(crate) struct IpcBinding {
    path: PathBuf,
    listener: Arc<UnixListener>,
}

impl IpcBinding {
    pub fn bind(name: &str, user_specific: bool) -> Result<Self, AgentError> {
        let path = resolve_address(name, user_specific)?;

        if path.exists() {
            // A connectable socket means another agent owns the name; a
            // dead one is leftover state and can be reclaimed.
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(_) => return Err(AgentError::AgentAlreadyExists),
                Err(_) => {
                    debug!(path = %path.display(), "removing stale socket");
                    std::fs::remove_file(&path).map_err(AgentError::Io)?;
                }
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => AgentError::AgentAlreadyExists,
            _ => AgentError::Io(e),
        })?;
        debug!(path = %path.display(), "channel bound");
        Ok(Self {
            path,
            listener: Arc::new(listener),
        })
    }

    /// Create one listening endpoint. On Unix every endpoint shares the
    /// bound listener; first-instance exclusivity was already enforced by
    /// [`bind`](Self::bind).
    pub fn listen(&self, _first: bool) -> Result<IpcListener, AgentError> {
        Ok(IpcListener {
            listener: Arc::clone(&self.listener),
        })
    }

    #[allow(dead_code)]
    pub fn address(&self) -> &Path {
        &self.path
    }
}

impl Drop for IpcBinding {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One endpoint instance waiting for a peer to attach.
pub(crate) struct IpcListener {
    listener: Arc<UnixListener>,
}

impl IpcListener {
    /// Wait for a peer to attach. Cancel-safe: dropping the future before
    /// completion consumes no connection.
    pub async fn accept(&self) -> io::Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcStream { inner: stream })
    }
}

/// A connected peer.
pub(crate) struct IpcStream {
    inner: UnixStream,
}

impl IpcStream {
    /// Wait until the stream has bytes (or EOF) to consume. Cancel-safe.
    pub async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await
    }

    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.try_read(buf)
    }

    pub fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.try_write(buf)
    }

    /// Identity of the connected peer, resolved once at accept time.
    ///
    /// Best-effort: a missing credential or unreadable proc entry leaves
    /// the corresponding field empty rather than failing the connection.
    pub fn peer_info(&self) -> PeerInfo {
        let pid = match self.peer_pid() {
            Ok(pid) => pid,
            Err(err) => {
                warn!(error = %err, "peer pid unavailable");
                return PeerInfo::default();
            }
        };
        let binary_path = match Self::peer_binary_path(pid) {
            Ok(path) => path,
            Err(err) => {
                debug!(error = %err, pid, "peer binary path unavailable");
                PathBuf::new()
            }
        };
        PeerInfo { pid, binary_path }
    }

    fn peer_pid(&self) -> Result<u32, AgentError> {
        let cred = self
            .inner
            .peer_cred()
            .map_err(|_| AgentError::PeerPidUnavailable)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            cred.pid()
                .and_then(|pid| u32::try_from(pid).ok())
                .ok_or(AgentError::PeerPidUnavailable)
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = cred;
            Err(AgentError::PeerPidUnavailable)
        }
    }

    fn peer_binary_path(pid: u32) -> Result<PathBuf, AgentError> {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_link(format!("/proc/{pid}/exe"))
                .map_err(|_| AgentError::PeerPathUnavailable)
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            Err(AgentError::PeerPathUnavailable)
        }
    }

    /// Connected socket pair for exercising event/transport code in tests.
    #[cfg(test)]
    pub(crate) fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self { inner: a }, Self { inner: b }))
    }
}
