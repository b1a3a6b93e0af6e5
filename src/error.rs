use thiserror::Error;

pub use color_eyre::eyre::eyre;

pub type Result<T> = core::result::Result<T, Error>;

// Client-library errno values that indicate the session itself is gone
// rather than the statement being bad.
const CR_CONNECTION_ERROR: u32 = 2002;
const CR_CONN_HOST_ERROR: u32 = 2003;
const CR_SERVER_GONE_ERROR: u32 = 2006;
const CR_SERVER_LOST: u32 = 2013;

#[derive(Debug, Error)]
pub enum Error {
    // ─── Connection lifecycle ────────────────────────────────────────────
    #[error("connect failed: {message}")]
    ConnectFailed { message: String },
    #[error("connection lost: {message}")]
    ConnectionLost { message: String },
    // ─── Statement ───────────────────────────────────────────────────────
    #[error("query failed (errno {server_errno}): {message}")]
    QueryFailed { server_errno: u32, message: String },
    // ─── Transaction ─────────────────────────────────────────────────────
    #[error("transaction already committed or rolled back")]
    TransactionFinished,
    // ─── Pool ────────────────────────────────────────────────────────────
    #[error("pool pending-statement queue is full")]
    PoolOverloaded,
    #[error("pool is closed")]
    PoolClosed,
    // ─── Incorrect Usage ─────────────────────────────────────────────────
    #[error("bad usage error: {0}")]
    BadUsageError(String),
    // ─── Temporary Error ─────────────────────────────────────────────────
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    // ─── Library Error ───────────────────────────────────────────────────
    #[error("a bug in nonblock-mysql: {0}")]
    LibraryBug(#[from] color_eyre::Report),
}

impl Error {
    /// Classify a statement-phase driver error. Errno in the client range
    /// that reports a dead session becomes [`Error::ConnectionLost`];
    /// everything else is a statement-level [`Error::QueryFailed`].
    pub(crate) fn from_driver(errno: u32, message: String) -> Self {
        match errno {
            CR_CONNECTION_ERROR | CR_CONN_HOST_ERROR | CR_SERVER_GONE_ERROR | CR_SERVER_LOST => {
                Error::ConnectionLost { message }
            }
            _ => Error::QueryFailed {
                server_errno: errno,
                message,
            },
        }
    }

    /// Returns true if the error means the originating connection cannot be
    /// reused and has been (or will be) retired by its pool.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectFailed { .. } | Error::ConnectionLost { .. } | Error::PoolClosed
        )
    }
}
