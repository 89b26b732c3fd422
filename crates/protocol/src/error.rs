use std::path::PathBuf;

/// Shared error vocabulary for the dtail workspace (spec §7).
///
/// Every fallible function across the client, server, transport, reader, and
/// query crates returns this type rather than minting crate-local error
/// enums, matching the teacher's practice of centralizing error vocabulary
/// in one crate that downstream crates depend on.
#[derive(Debug, thiserror::Error)]
pub enum DtailError {
    /// Invalid configuration, invalid flags, or a missing required query.
    #[error("config error: {0}")]
    Config(String),

    /// Authentication or authorization rejection at the transport layer.
    #[error("authentication failed for user {user}: {reason}")]
    Auth {
        /// User the session attempted to authenticate as.
        user: String,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// The requesting user lacks access to `path`.
    #[error("permission denied: {user} may not access {path}")]
    Permission {
        /// User that requested the path.
        user: String,
        /// Path that was rejected.
        path: PathBuf,
    },

    /// Dial/accept/read/write failure on the transport channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Framing violation, unknown command, or compat-version mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A file could not be opened, or a mid-stream I/O error was unrecoverable.
    #[error("cannot read {path}: {source}")]
    Reader {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A MapReduce query failed to parse or referenced an unknown column/aggregate.
    #[error("query error: {0}")]
    Query(String),

    /// A bounded slot pool (`cats` or `tails`) was full.
    #[error("limit exceeded: no free {pool} slot (capacity {capacity})")]
    LimitExceeded {
        /// Name of the exhausted pool (`cats` or `tails`).
        pool: &'static str,
        /// Configured capacity of the pool.
        capacity: usize,
    },

    /// A command-send, close-handshake, or read timeout expired.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl DtailError {
    /// Renders the single-line, user-visible form spec §7 requires for
    /// rejected paths and unreachable servers.
    #[must_use]
    pub fn user_line(&self) -> String {
        match self {
            DtailError::Permission { path, .. } => {
                format!("WARNING: permission denied: {}", path.display())
            }
            DtailError::Transport(_) | DtailError::Auth { .. } => {
                format!("CRITICAL: {self}")
            }
            other => format!("WARNING: {other}"),
        }
    }
}
