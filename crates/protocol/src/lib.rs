#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_protocol` carries the wire-level substrate shared by the dtail
//! client and server: the error vocabulary both sides use to report
//! failures, the line framer that turns a byte stream into records, the
//! [`WireMessage`] envelope that distinguishes data/mapreduce/control
//! traffic, and the base64 command envelope used to ship binary-unsafe
//! command text across the channel.
//!
//! # Design
//!
//! - [`error::DtailError`] is the single error type returned by fallible
//!   functions across the workspace; downstream crates do not mint their own
//!   error enums.
//! - [`framer::LineFramer`] implements the delimiter-based splitting
//!   described for the line framer component, including overflow and
//!   partial-tail handling.
//! - [`wire`] defines [`wire::WireMessage`] and [`wire::Record`], plus their
//!   serialization to and from the delimited wire format.
//! - [`envelope`] implements the `protocol <version> base64 <b64>;` command
//!   envelope and the compat-version exchange.
//! - [`command`] parses the textual command grammar (`cat:`/`grep:`/`tail:`/
//!   `map `/`health`/`timeout `) into a structured [`command::Command`].
//!
//! # Invariants
//!
//! - The message-delimiter byte and field-delimiter byte are fixed constants
//!   ([`DELIMITER`], [`FIELD_DELIMITER`]) shared by every encoder/decoder in
//!   the workspace; nothing downstream hardcodes its own separator.
//! - A decoded `literal` match hint round-trips even when local detection at
//!   the receiving peer would have chosen differently (spec §4.1).

/// Command envelope and compat-version exchange.
pub mod envelope;
/// Textual command grammar parser.
pub mod command;
/// Shared error vocabulary (§7).
pub mod error;
/// Exit status ordering used by the client supervisor.
pub mod exit_status;
/// Line framer (C2).
pub mod framer;
/// `host[:port]` server address parsing.
pub mod server_addr;
/// Wire message envelope and record model (§3).
pub mod wire;

pub use error::DtailError;
pub use exit_status::ExitStatus;
pub use server_addr::ServerAddr;

/// Single byte terminating every wire message.
pub const DELIMITER: u8 = b'\n';
/// Single byte separating fields within one wire message.
pub const FIELD_DELIMITER: u8 = b'|';
/// Current wire compat version exchanged in the command envelope.
pub const COMPAT_VERSION: u32 = 1;
/// Default maximum line length before the framer enters overflow handling.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1 << 20;
/// Line length cap forced by `DTAIL_INTEGRATION_TEST_RUN_MODE=yes` (spec §6).
pub const INTEGRATION_TEST_MAX_LINE_LENGTH: usize = 1024;

/// Seconds both sides wait for the close handshake before hard-closing (spec §4.6, §5).
pub const CLOSE_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
/// Seconds the client waits to flush an outbound command before aborting (spec §4.7).
pub const COMMAND_SEND_TIMEOUT_SECS: u64 = 5;

/// Returns the effective max line length, honoring `DTAIL_INTEGRATION_TEST_RUN_MODE`.
#[must_use]
pub fn effective_max_line_length() -> usize {
    if std::env::var("DTAIL_INTEGRATION_TEST_RUN_MODE").as_deref() == Ok("yes") {
        INTEGRATION_TEST_MAX_LINE_LENGTH
    } else {
        DEFAULT_MAX_LINE_LENGTH
    }
}

/// Returns the hostname to stamp on outgoing records, honoring the test-mode
/// and override environment variables documented in spec §6.
#[must_use]
pub fn effective_hostname() -> String {
    if std::env::var("DTAIL_INTEGRATION_TEST_RUN_MODE").as_deref() == Ok("yes") {
        return "integrationtest".to_string();
    }
    if let Ok(override_name) = std::env::var("DTAIL_HOSTNAME_OVERRIDE") {
        if !override_name.is_empty() {
            return override_name;
        }
    }
    hostname_or_unknown()
}

/// Whether the record channel should use its higher-throughput capacity,
/// honoring `DTAIL_TURBOBOOST_DISABLE` (spec §6: "when `yes`: disable the
/// direct-write fast path, forcing records through the normal channel
/// pipeline"). Every record always flows through the channel in this
/// implementation; turbo boost widens its buffer so a fast reader is rarely
/// backpressured by a slower writer, and disabling it reverts to the
/// conservative default used everywhere else in the workspace.
#[must_use]
pub fn turboboost_enabled() -> bool {
    std::env::var("DTAIL_TURBOBOOST_DISABLE").as_deref() != Ok("yes")
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|out| String::from_utf8(out.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
