//! Error kinds shared by every adapter (spec: propagation policy in §7).

use thiserror::Error;

/// Errors produced by the debugger core.
///
/// Protocol errors abort the in-flight call; they are not retried by this
/// crate. The sole exception is [`DbgError::ConnectTimeout`], which is only
/// returned after the four-attempt/500ms connect loop has already been
/// exhausted by the caller of [`connect`](crate::adapter::Adapter::connect).
#[derive(Debug, Error)]
pub enum DbgError {
    /// Required backend tool (e.g. `gdbserver`) was not found on `PATH`.
    #[error("required backend tool not found on PATH: {0}")]
    NotInstalled(String),

    /// Launching the debuggee (fork/exec, or the native engine's spawn call)
    /// failed.
    #[error("failed to launch debuggee: {0}")]
    Launch(String),

    /// The remote stub did not accept a connection within the 4×500ms window.
    #[error("timed out connecting to remote stub at {host}:{port}")]
    ConnectTimeout {
        /// Host that was dialed.
        host: String,
        /// Port that was dialed.
        port: u16,
    },

    /// A malformed packet, checksum mismatch, or unexpected reply prefix.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A stop-reply (or other) packet surfaced an `E<code>` error reply.
    #[error("stub reported error code {0:#x}")]
    StubError(u8),

    /// The requested capability is not offered by this adapter or stub.
    #[error("unsupported capability: {0}")]
    Unsupported(&'static str),

    /// A write operation (register or memory) was attempted while the
    /// target was running.
    #[error("operation requires the target to be stopped")]
    NotStopped,

    /// A memory operation targeted an unmapped region.
    #[error("invalid address: {0:#x}")]
    InvalidAddress(u64),

    /// Any operation attempted after the debuggee has exited.
    #[error("target has exited")]
    TargetExited,

    /// Underlying I/O failure on the transport (socket, pipe, process spawn).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type DbgResult<T> = Result<T, DbgError>;
