#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_client` is the client-side half of the fan-out pipeline:
//! [`handler::ClientHandler`] drives one command over one already-open
//! transport channel (C7), [`supervisor::ClientSupervisor`] discovers
//! servers and launches one worker per server under a global throttle (C9),
//! [`merger::GlobalMerger`] is the shared `GlobalGroupSet` every worker folds
//! `mapreduce` snapshots into, and [`stats`] periodically samples the whole
//! pipeline's health.
//!
//! # Design
//!
//! - A session carries exactly one top-level command; the handler
//!   half-closes its write side right after sending it so the server's
//!   command loop can move straight to the close handshake.
//! - The supervisor never constructs transports itself — callers (the
//!   binary crates) hand it a [`supervisor::ConnectorFactory`] so the same
//!   orchestration code drives both SSH and in-process connectors.
//! - [`shutdown_after`] implements the `--shutdownAfter` flag as a
//!   process-lifetime deadline (spec.md §9's open question, resolved in
//!   `DESIGN.md`): it cancels the supervisor's root token, which may
//!   terminate in-flight work mid-stream.

/// Outbound command send and inbound message dispatch (C7).
pub mod handler;
/// The shared client-side `GlobalGroupSet` (spec §4.5, §9).
pub mod merger;
/// Discovery, the global connection throttle, and worker fan-out (C9).
pub mod supervisor;
/// The `{connected, new, throttle, goroutines, cpus}` stats subsystem.
pub mod stats;

pub use handler::{ClientHandler, OutputLine};
pub use merger::GlobalMerger;
pub use supervisor::{ClientSupervisor, ConnectorFactory};
pub use stats::{StatsSnapshot, StatsTracker};

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Cancels `root` once `deadline` elapses, implementing `--shutdownAfter` as
/// a deadline on process lifetime rather than on any single session's work
/// (spec.md §9: "original behavior is reportedly the latter and may
/// terminate work mid-stream" — this implementation accepts that tradeoff
/// rather than inventing a softer per-session deadline the original does not
/// have).
pub fn spawn_shutdown_after(deadline: Option<Duration>, root: CancellationToken) {
    let Some(deadline) = deadline else {
        return;
    };
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = root.cancelled() => {}
            () = tokio::time::sleep(deadline) => {
                tracing::info!(?deadline, "shutdownAfter elapsed, cancelling");
                root.cancel();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_after_cancels_root_token_when_deadline_elapses() {
        let root = CancellationToken::new();
        spawn_shutdown_after(Some(Duration::from_millis(20)), root.clone());
        tokio::time::timeout(Duration::from_secs(1), root.cancelled())
            .await
            .expect("root token should be cancelled once the deadline elapses");
    }

    #[tokio::test]
    async fn shutdown_after_none_never_cancels() {
        let root = CancellationToken::new();
        spawn_shutdown_after(None, root.clone());
        let result = tokio::time::timeout(Duration::from_millis(50), root.cancelled()).await;
        assert!(result.is_err(), "root token should not be cancelled without a deadline");
    }
}
