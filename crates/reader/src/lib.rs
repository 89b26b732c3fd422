#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_reader` turns a file on disk into an ordered stream of
//! [`record::Record`]s (component C3), and layers grep's local-context
//! window (component C4) on top when a pattern is supplied.
//!
//! # Design
//!
//! - [`file_reader::FileReader`] owns the cat/tail state machine: cat reads
//!   sequentially to EOF and stops, tail seeks to the current end and polls
//!   for appends, detecting rotation/truncation via file size and inode.
//! - [`context_window::ContextWindow`] is generic over the emitted item type
//!   so it can be reused for both textual records and, later, any other
//!   sequence that needs before/after/max framing.
//! - [`run_grep`] composes a [`file_reader::FileReader`], a
//!   [`dtail_matcher::Matcher`], and a [`context_window::ContextWindow`] to
//!   implement "cat or tail piped through the matcher" (spec §4.3).

/// Local-context window (C4).
pub mod context_window;
/// File reader state machine (C3).
pub mod file_reader;
/// The `Record` entity shared by cat/tail/grep.
pub mod record;

pub use context_window::ContextWindow;
pub use file_reader::{BaseMode, FileReader, ReaderStats};
pub use record::Record;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_matcher::Matcher;
use dtail_protocol::error::DtailError;

/// Options controlling grep's local-context window (spec §3's `FileCommandOpts`).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrepWindowOpts {
    pub before: usize,
    pub after: usize,
    pub max: usize,
}

/// Runs a [`FileReader`] through a [`Matcher`] and [`ContextWindow`], sending
/// only the lines the window decides to emit.
///
/// This is the grep mode described in spec §4.3: matching and windowing are
/// applied as each record arrives, so a `tail`-backed grep can run
/// indefinitely without buffering the whole file.
pub async fn run_grep(
    reader: FileReader,
    matcher: Matcher,
    window_opts: GrepWindowOpts,
    tx: mpsc::Sender<Result<Record, DtailError>>,
    cancel: CancellationToken,
) -> ReaderStats {
    let (inner_tx, mut inner_rx) = mpsc::channel(256);
    let inner_cancel = cancel.clone();
    let reader_task = tokio::spawn(reader.run(inner_tx, inner_cancel));

    let mut window = ContextWindow::new(window_opts.before, window_opts.after, window_opts.max);
    let mut matched_count = 0u64;
    let mut not_matched_count = 0u64;

    while let Some(item) = inner_rx.recv().await {
        match item {
            Ok(record) => {
                if record.truncated {
                    // Truncation markers bypass the matcher: always shown when emitted.
                    if tx.send(Ok(record)).await.is_err() {
                        break;
                    }
                    continue;
                }
                let matched = matcher.is_match(&record.content);
                if matched {
                    matched_count += 1;
                } else {
                    not_matched_count += 1;
                }
                let (emitted, stop) = window.feed(record, matched);
                for out in emitted {
                    if tx.send(Ok(out)).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
                if stop {
                    cancel.cancel();
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                break;
            }
        }
    }

    let mut stats = reader_task.await.unwrap_or_default();
    stats.lines_matched = matched_count;
    stats.lines_not_matched = not_matched_count;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtail_matcher::MatchFlag;

    #[tokio::test]
    async fn run_grep_applies_matcher_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(
            &path,
            "INFO start\nERROR disk full\nINFO retrying\nINFO done\n",
        )
        .unwrap();

        let reader = FileReader::new(&path, BaseMode::Cat);
        let matcher = Matcher::compile("ERROR", MatchFlag::Default).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        run_grep(
            reader,
            matcher,
            GrepWindowOpts {
                before: 1,
                after: 1,
                max: 0,
            },
            tx,
            cancel,
        )
        .await;

        let mut lines = Vec::new();
        while let Some(record) = rx.recv().await {
            lines.push(String::from_utf8(record.unwrap().content).unwrap());
        }
        assert_eq!(lines, vec!["INFO start", "ERROR disk full", "INFO retrying"]);
    }

    #[tokio::test]
    async fn run_grep_stops_reading_once_max_and_after_are_satisfied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repeat.log");
        let content: String = (0..10).map(|_| "X\n").collect();
        std::fs::write(&path, content).unwrap();

        let reader = FileReader::new(&path, BaseMode::Cat);
        let matcher = Matcher::compile("X", MatchFlag::Default).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let stats = run_grep(
            reader,
            matcher,
            GrepWindowOpts {
                before: 0,
                after: 2,
                max: 3,
            },
            tx,
            cancel,
        )
        .await;

        let mut lines = Vec::new();
        while let Some(record) = rx.recv().await {
            lines.push(record.unwrap());
        }
        assert_eq!(lines.len(), 5);
        assert!(stats.lines_matched <= 10);
    }
}
