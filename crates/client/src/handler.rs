use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_protocol::effective_max_line_length;
use dtail_protocol::envelope;
use dtail_protocol::error::DtailError;
use dtail_protocol::framer::{Frame, LineFramer};
use dtail_protocol::wire::{ControlMessage, ResultClass, WireMessage};
use dtail_protocol::{ExitStatus, COMMAND_SEND_TIMEOUT_SECS, DELIMITER};

use crate::merger::GlobalMerger;

/// One line of client-visible output, already retagged with the connector
/// that produced it (spec §4.7: "everything else -> printable message").
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub class: ResultClass,
    pub hostname: String,
    pub content: String,
}

/// Drives one command over one already-established transport channel (C7).
///
/// Owns nothing beyond the channel itself for the duration of one command:
/// the supervisor constructs a fresh handler per connection attempt and lets
/// it drop once the worker's job ends (spec.md §9: "one-way ownership...
/// the transport is passed into Handler at start and dropped on end").
pub struct ClientHandler {
    hostname: String,
    class: ResultClass,
}

impl ClientHandler {
    /// `class` is the identity this handler stamps onto every line it
    /// forwards, independent of whatever the server itself claimed — the
    /// networked connector always retags as [`ResultClass::Remote`], while
    /// the in-process ("serverless") connector passes the server's own
    /// `CLIENT`/`SERVER` tagging through unchanged.
    #[must_use]
    pub fn new(hostname: impl Into<String>, class: ResultClass) -> Self {
        Self {
            hostname: hostname.into(),
            class,
        }
    }

    /// Sends `command` and streams the response until the server requests
    /// the close handshake or `cancel` fires (spec §4.7).
    ///
    /// `command` may hold several newline-separated wire commands (e.g. a
    /// `map` line staging a query, followed by the `cat`/`tail` line that
    /// feeds it — spec §4.6 step 2: "on `map <raw>` stage a query and expect
    /// subsequent cat/tail commands"). Each line is enveloped and sent as
    /// its own framed message; the write side only half-closes once every
    /// line has gone out.
    #[tracing::instrument(skip(self, io, command, output, merger, cancel), fields(host = %self.hostname))]
    pub async fn run<IO>(
        &self,
        io: IO,
        command: &str,
        output: &mpsc::Sender<OutputLine>,
        merger: Option<&GlobalMerger>,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus, DtailError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut messages = FrameReader::new(read_half);

        let send = async {
            for line in command.lines() {
                let envelope = envelope::encode_command(line);
                write_half.write_all(envelope.as_bytes()).await?;
                write_half.write_all(&[DELIMITER]).await?;
            }
            write_half.flush().await
        };
        tokio::time::timeout(Duration::from_secs(COMMAND_SEND_TIMEOUT_SECS), send)
            .await
            .map_err(|_| DtailError::Timeout("command send timed out".to_string()))?
            .map_err(|e| DtailError::Transport(e.to_string()))?;
        // A session carries exactly one top-level command (or a `map` line
        // plus the file command that feeds it); half-closing the write side
        // tells the server's command loop there is nothing more to read once
        // these lines finish, so it can proceed straight to the close
        // handshake instead of blocking for another command.
        let _ = write_half.shutdown().await;

        let mut status = ExitStatus::Ok;
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = messages.next_message() => result,
            };
            let message = match message {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    status = status.combine(ExitStatus::Critical);
                    tracing::warn!(host = %self.hostname, error = %err, "malformed message from server");
                    continue;
                }
            };
            match message {
                WireMessage::Control(ControlMessage::SynClose) => {
                    let _ = write_half.write_all(&WireMessage::ack_close().encode()).await;
                    break;
                }
                WireMessage::Control(_) => {
                    // Other control markers are hidden from users (spec §3).
                }
                WireMessage::MapReduce(msg) => {
                    if let Some(merger) = merger {
                        merger.merge(&msg).await;
                    }
                }
                WireMessage::Data(data) => {
                    let retagged = OutputLine {
                        class: self.class.clone(),
                        hostname: data.hostname,
                        content: data.content,
                    };
                    if output.send(retagged).await.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(status)
    }
}

/// Reads framed [`WireMessage`]s off an `AsyncRead` half, buffering extra
/// frames a single `read()` call produces beyond the one the caller asked
/// for. Mirrors `dtail-server`'s `CommandReader`, but decodes wire messages
/// instead of command text.
struct FrameReader<R> {
    reader: R,
    framer: Option<LineFramer>,
    buf: Vec<u8>,
    pending: VecDeque<Frame>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            framer: Some(LineFramer::new(effective_max_line_length(), false)),
            buf: vec![0u8; 4096],
            pending: VecDeque::new(),
        }
    }

    async fn next_message(&mut self) -> Result<Option<WireMessage>, DtailError> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if let Frame::Line(bytes) = frame {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    return Ok(Some(WireMessage::decode(&text)?));
                }
            }
            let n = self
                .reader
                .read(&mut self.buf)
                .await
                .map_err(|e| DtailError::Transport(e.to_string()))?;
            if n == 0 {
                if let Some(framer) = self.framer.take() {
                    if let Some(Frame::Line(bytes)) = framer.finish() {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        return Ok(Some(WireMessage::decode(&text)?));
                    }
                }
                return Ok(None);
            }
            let framer = self
                .framer
                .as_mut()
                .expect("framer only taken on EOF, after which no further reads happen");
            self.pending.extend(framer.feed(&self.buf[..n]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtail_config::Config;
    use dtail_permissions_test_support::session_for;
    use dtail_test_support::{channel_pair, LogDirFixture};

    // A thin facade so this crate's tests can spin up a real
    // `dtail-server::ServerSession` without depending on its private test
    // helpers.
    mod dtail_permissions_test_support {
        use dtail_config::Config;
        use dtail_server::{Limiter, PermissionSet, ServerSession};
        use std::sync::Arc;

        pub fn session_for(user: &str, config: &Config) -> ServerSession {
            let permissions = config
                .permissions_for(user)
                .map(|p| PermissionSet::compile(p).unwrap())
                .unwrap_or_else(PermissionSet::empty);
            ServerSession::new(
                user.to_string(),
                permissions,
                Arc::new(Limiter::new("cats", config.max_concurrent_cats)),
                Arc::new(Limiter::new("tails", config.max_concurrent_tails)),
            )
        }
    }

    #[tokio::test]
    async fn streams_remote_data_and_honors_close_handshake() {
        let fixture = LogDirFixture::new();
        let path = fixture.write_file("a.log", "one\ntwo\n");
        let mut config = Config::default();
        config.permissions.insert(
            "alice".to_string(),
            dtail_config::UserPermissions {
                path_regexes: vec![".*".to_string()],
            },
        );

        let (client_io, server_io) = channel_pair();
        let cancel = CancellationToken::new();
        let session = session_for("alice", &config);
        let server_handle = tokio::spawn(session.run(server_io, cancel.clone()));

        let handler = ClientHandler::new("h1", ResultClass::Remote("h1".to_string()));
        let (tx, mut rx) = mpsc::channel(16);
        let command = format!("cat:quiet=false:spartan=false {}", path.display());
        let status = handler.run(client_io, &command, &tx, None, &cancel).await.unwrap();
        assert_eq!(status, ExitStatus::Ok);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "one");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.content, "two");

        let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
    }
}
