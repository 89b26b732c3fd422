#![deny(unsafe_code)]

//! Fixtures shared by integration tests across the workspace: a scratch log
//! directory, a stub [`dtail_config::Config`], and an in-memory duplex
//! transport pair standing in for the in-process ("serverless") connector's
//! bounded queues (spec §4.8).

use std::path::PathBuf;

use dtail_config::Config;
use tempfile::TempDir;
use tokio::io::DuplexStream;

/// Default buffer size for [`channel_pair`], matching the bounded-queue
/// sizing used elsewhere in the workspace to avoid unbounded memory growth.
pub const DEFAULT_CHANNEL_BUFFER: usize = 64 * 1024;

/// A temporary directory pre-populated with one or more log files, kept
/// alive for the lifetime of the returned guard.
pub struct LogDirFixture {
    dir: TempDir,
}

impl LogDirFixture {
    /// Creates an empty temp directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp log dir"),
        }
    }

    /// Writes `content` to `name` inside the fixture directory and returns
    /// its full path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture log file");
        path
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for LogDirFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal [`Config`] granting `user` access to every path the fixture
/// directory might contain, with small slot-limiter capacities suited to
/// fast test runs.
#[must_use]
pub fn stub_config(user: &str) -> Config {
    let mut config = Config::default();
    config.permissions.insert(
        user.to_string(),
        dtail_config::UserPermissions {
            path_regexes: vec![".*".to_string()],
        },
    );
    config.max_concurrent_cats = 4;
    config.max_concurrent_tails = 4;
    config
}

/// Builds a pair of connected, bounded, in-memory duplex streams standing in
/// for the two queues an in-process [`Connector`](dtail_protocol) uses to
/// bridge a client handler directly to a server handler without any real
/// transport (spec §4.8, §5's "bounded in-memory queues... to explicitly
/// prevent the classic bidirectional-copy deadlock").
#[must_use]
pub fn channel_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(DEFAULT_CHANNEL_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dir_fixture_writes_readable_files() {
        let fixture = LogDirFixture::new();
        let path = fixture.write_file("a.log", "line one\n");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "line one\n");
    }

    #[test]
    fn stub_config_grants_broad_access() {
        let config = stub_config("alice");
        assert!(config.permissions_for("alice").is_some());
    }

    #[tokio::test]
    async fn channel_pair_echoes_bytes_between_ends() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut a, mut b) = channel_pair();
        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
