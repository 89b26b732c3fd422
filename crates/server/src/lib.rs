#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_server` is the session handler component (C6): authentication
//! recognition, per-user path permissions, the `cats`/`tails` slot limiters,
//! and command dispatch for cat/grep/tail/map/health/timeout.
//!
//! # Design
//!
//! - [`auth`] recognizes regular (public-key) and special (password + IP
//!   allow-list) users against a loaded [`dtail_config::Config`] (spec §4.6
//!   step 1). The actual SSH handshake lives in `dtail-transport`; this
//!   module only answers "is this user allowed at all".
//! - [`permissions`] compiles a user's path regex allow-list.
//! - [`limiter`] bounds concurrent cat/grep/map+cat and tail/map+tail jobs.
//! - [`session::ServerSession`] ties the above together: it reads framed,
//!   base64-enveloped commands off any `AsyncRead + AsyncWrite` half,
//!   dispatches them, and streams `WireMessage`s back until the peer
//!   requests the close handshake (spec §4.6, §4.7).
//!
//! # Invariants
//!
//! - A rejected path or a mid-stream reader error downgrades the session's
//!   exit status but never aborts it outright (spec §4.6 step 6: "must not
//!   be session-fatal").
//! - `dtail-server` never knows which transport carried its bytes; that
//!   decision belongs entirely to whoever calls [`session::ServerSession::run`].

/// Public-key and special-user authentication recognition (C6 step 1).
pub mod auth;
/// `cats`/`tails` concurrency limiters (C6 step 4).
pub mod limiter;
/// Per-user path permission sets (C6 step 3).
pub mod permissions;
/// Command dispatch loop tying the above together (C6).
pub mod session;

pub use limiter::Limiter;
pub use permissions::PermissionSet;
pub use session::ServerSession;
