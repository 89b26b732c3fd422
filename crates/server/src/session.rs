use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_matcher::{MatchFlag, Matcher};
use dtail_protocol::command::{Command, FileMode};
use dtail_protocol::effective_hostname;
use dtail_protocol::envelope;
use dtail_protocol::error::DtailError;
use dtail_protocol::framer::{Frame, LineFramer};
use dtail_protocol::wire::{DataMessage, ResultClass, WireMessage};
use dtail_protocol::{ExitStatus, CLOSE_HANDSHAKE_TIMEOUT_SECS};
use dtail_query::{parse as parse_query, QueryEngine};
use dtail_reader::{run_grep, BaseMode, FileReader, GrepWindowOpts, Record};

use crate::limiter::Limiter;
use crate::permissions::PermissionSet;

/// Cadence for periodic `mapreduce` emission when a query does not set its
/// own `every` interval (spec §4.5).
const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(2);
/// Chunk size used to read command bytes off the wire.
const COMMAND_READ_CHUNK: usize = 4096;
/// Record channel capacity used when `DTAIL_TURBOBOOST_DISABLE=yes` forces
/// the conservative path (spec §6).
const RECORD_CHANNEL_CAPACITY: usize = 256;
/// Record channel capacity used by default, wide enough that a fast reader
/// rarely blocks on a slower writer.
const RECORD_CHANNEL_CAPACITY_TURBO: usize = 4096;

/// One authenticated peer's command session (C6, spec §4.6).
///
/// Owns nothing transport-specific: [`ServerSession::run`] takes any
/// `AsyncRead + AsyncWrite` half, so the exact same dispatch logic serves
/// both the SSH listener and the in-process ("serverless") connector.
pub struct ServerSession {
    user: String,
    permissions: PermissionSet,
    cats: Arc<Limiter>,
    tails: Arc<Limiter>,
    hostname: String,
}

impl ServerSession {
    #[must_use]
    pub fn new(user: String, permissions: PermissionSet, cats: Arc<Limiter>, tails: Arc<Limiter>) -> Self {
        Self {
            user,
            permissions,
            cats,
            tails,
            hostname: effective_hostname(),
        }
    }

    /// Runs the session to completion: reads commands until the peer closes
    /// the channel or `cancel` fires, dispatches each through [`Command`],
    /// and finally performs the close handshake (spec §4.6 step 7).
    #[tracing::instrument(skip(self, io, cancel), fields(user = %self.user, host = %self.hostname))]
    pub async fn run<IO>(mut self, io: IO, cancel: CancellationToken) -> ExitStatus
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(io);
        let mut commands = CommandReader::new(read_half);
        let mut status = ExitStatus::Ok;
        let mut staged_query: Option<QueryEngine> = None;

        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = commands.next_line() => result,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(user = %self.user, error = %err, "session read failed");
                    status = status.combine(ExitStatus::Critical);
                    break;
                }
            };

            let decoded = match envelope::decode_command(&line) {
                Ok(text) => text,
                Err(err) => {
                    status = status.combine(ExitStatus::Critical);
                    let _ = self.send_warning(&mut write_half, &err.to_string()).await;
                    continue;
                }
            };
            let command = match Command::parse(&decoded) {
                Ok(cmd) => cmd,
                Err(err) => {
                    status = status.combine(ExitStatus::Critical);
                    let _ = self.send_warning(&mut write_half, &err.to_string()).await;
                    continue;
                }
            };

            match self
                .run_command(command, &mut write_half, &cancel, &mut staged_query)
                .await
            {
                Ok(job_status) => status = status.combine(job_status),
                Err(err) => {
                    status = status.combine(ExitStatus::Critical);
                    let _ = self.send_warning(&mut write_half, &err.to_string()).await;
                }
            }
        }

        self.close_handshake(&mut write_half, &mut commands).await;
        status
    }

    /// Dispatches one parsed [`Command`]. Boxed because `timeout` wraps an
    /// inner command and async fns cannot recurse unboxed.
    fn run_command<'a, W>(
        &'a mut self,
        command: Command,
        writer: &'a mut W,
        cancel: &'a CancellationToken,
        staged_query: &'a mut Option<QueryEngine>,
    ) -> Pin<Box<dyn Future<Output = Result<ExitStatus, DtailError>> + Send + 'a>>
    where
        W: AsyncWrite + Unpin + Send,
    {
        Box::pin(async move {
            match command {
                Command::Health => {
                    self.write_message(
                        writer,
                        WireMessage::Data(DataMessage {
                            class: ResultClass::Server,
                            hostname: self.hostname.clone(),
                            content: "health: OK".to_string(),
                        }),
                    )
                    .await?;
                    Ok(ExitStatus::Ok)
                }
                Command::Map { query } => {
                    let parsed = parse_query(&query)?;
                    *staged_query = Some(QueryEngine::new(parsed));
                    Ok(ExitStatus::Ok)
                }
                Command::File { mode, opts, path, regex } => {
                    self.run_file_job(mode, opts, path, regex, writer, cancel, staged_query)
                        .await
                }
                Command::Timeout { seconds, inner } => {
                    match tokio::time::timeout(
                        Duration::from_secs(seconds),
                        self.run_command(*inner, writer, cancel, staged_query),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(DtailError::Timeout(format!("command exceeded {seconds}s"))),
                    }
                }
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_file_job<W>(
        &self,
        mode: FileMode,
        opts: dtail_protocol::command::FileCommandOpts,
        path: String,
        regex: Option<String>,
        writer: &mut W,
        cancel: &CancellationToken,
        staged_query: &mut Option<QueryEngine>,
    ) -> Result<ExitStatus, DtailError>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.permissions.allows(&path) {
            let err = DtailError::Permission {
                user: self.user.clone(),
                path: path.into(),
            };
            self.write_message(
                writer,
                WireMessage::Data(DataMessage {
                    class: ResultClass::Server,
                    hostname: self.hostname.clone(),
                    content: err.user_line(),
                }),
            )
            .await?;
            return Ok(ExitStatus::Warning);
        }

        let limiter = match mode {
            FileMode::Tail => &self.tails,
            FileMode::Cat | FileMode::Grep => &self.cats,
        };
        let Some(_permit) = limiter.acquire(cancel).await else {
            // Cancelled while waiting for a slot: silent teardown (spec §4.6).
            return Ok(ExitStatus::Ok);
        };

        let base_mode = match mode {
            FileMode::Tail => BaseMode::Tail,
            FileMode::Cat | FileMode::Grep => BaseMode::Cat,
        };
        let matcher = match &regex {
            Some(wire) => Some(
                Matcher::deserialize(wire)
                    .or_else(|_| Matcher::compile(wire, MatchFlag::Default))?,
            ),
            None => None,
        };

        let job_cancel = cancel.child_token();
        let channel_capacity = if dtail_protocol::turboboost_enabled() {
            RECORD_CHANNEL_CAPACITY_TURBO
        } else {
            RECORD_CHANNEL_CAPACITY
        };
        let (tx, rx) = mpsc::channel(channel_capacity);
        let reader = FileReader::new(path.clone(), base_mode);
        let reader_task = match matcher {
            Some(matcher) => tokio::spawn(run_grep(
                reader,
                matcher,
                GrepWindowOpts {
                    before: opts.before,
                    after: opts.after,
                    max: opts.max,
                },
                tx,
                job_cancel.clone(),
            )),
            None => tokio::spawn(reader.run(tx, job_cancel.clone())),
        };

        let status = self.pump_records(rx, writer, staged_query).await;
        let _ = reader_task.await;
        status
    }

    /// Consumes reader output, emitting each line directly (cat/grep/tail) or
    /// folding it into the staged query (map) while periodically emitting
    /// `mapreduce` snapshots at the query's interval (spec §4.5).
    async fn pump_records<W>(
        &self,
        mut rx: mpsc::Receiver<Result<Record, DtailError>>,
        writer: &mut W,
        staged_query: &mut Option<QueryEngine>,
    ) -> Result<ExitStatus, DtailError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut status = ExitStatus::Ok;
        let interval = staged_query
            .as_ref()
            .and_then(|engine| engine.query().interval)
            .unwrap_or(DEFAULT_QUERY_INTERVAL);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                biased;
                maybe_item = rx.recv() => {
                    match maybe_item {
                        Some(Ok(record)) => {
                            if let Some(engine) = staged_query.as_mut() {
                                if !record.truncated {
                                    let line = String::from_utf8_lossy(&record.content);
                                    engine.process_line(&line)?;
                                }
                            } else {
                                let content = if record.truncated {
                                    "[line truncated]".to_string()
                                } else {
                                    String::from_utf8_lossy(&record.content).into_owned()
                                };
                                self.write_message(writer, WireMessage::Data(DataMessage {
                                    class: ResultClass::Server,
                                    hostname: self.hostname.clone(),
                                    content,
                                })).await?;
                            }
                        }
                        Some(Err(err)) => {
                            status = status.combine(ExitStatus::Warning);
                            self.send_warning(writer, &err.to_string()).await?;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick(), if staged_query.is_some() => {
                    self.emit_query_snapshot(writer, staged_query).await?;
                }
            }
        }

        if staged_query.is_some() {
            self.emit_query_snapshot(writer, staged_query).await?;
        }
        Ok(status)
    }

    async fn emit_query_snapshot<W>(
        &self,
        writer: &mut W,
        staged_query: &mut Option<QueryEngine>,
    ) -> Result<(), DtailError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(engine) = staged_query.as_mut() else {
            return Ok(());
        };
        let cumulative = engine.query().cumulative();
        let messages = if cumulative {
            engine.wire_messages()
        } else {
            engine.wire_messages_swap()
        };
        for message in messages {
            self.write_message(writer, WireMessage::MapReduce(message)).await?;
        }
        Ok(())
    }

    async fn write_message<W>(&self, writer: &mut W, message: WireMessage) -> Result<(), DtailError>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&message.encode())
            .await
            .map_err(|e| DtailError::Transport(e.to_string()))
    }

    async fn send_warning<W>(&self, writer: &mut W, text: &str) -> Result<(), DtailError>
    where
        W: AsyncWrite + Unpin,
    {
        self.write_message(
            writer,
            WireMessage::Data(DataMessage {
                class: ResultClass::Server,
                hostname: self.hostname.clone(),
                content: format!("WARNING: {text}"),
            }),
        )
        .await
    }

    async fn close_handshake<R, W>(&self, writer: &mut W, commands: &mut CommandReader<R>)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.write_message(writer, WireMessage::syn_close()).await.is_err() {
            return;
        }
        let wait = tokio::time::timeout(
            Duration::from_secs(CLOSE_HANDSHAKE_TIMEOUT_SECS),
            commands.next_line(),
        )
        .await;
        match wait {
            Ok(Ok(Some(line))) => match WireMessage::decode(&line) {
                Ok(WireMessage::Control(dtail_protocol::wire::ControlMessage::AckClose)) => {}
                _ => tracing::debug!("peer sent unexpected close response: {line}"),
            },
            // A one-shot client half-closes its write side right after
            // sending its command; the resulting clean EOF here is the
            // expected shape of "the peer has nothing left to send", not a
            // stuck peer, so no ack is required in that case.
            Ok(Ok(None)) => {}
            _ => tracing::debug!("close handshake timed out waiting for the peer to vanish"),
        }
    }
}

/// Reads framed command lines off an `AsyncRead` half, buffering any extra
/// frames a single `read()` call produces beyond the one the caller asked
/// for (commands arrive one at a time, but the framer has no way to know
/// that in advance).
struct CommandReader<R> {
    reader: R,
    framer: Option<LineFramer>,
    buf: Vec<u8>,
    pending: VecDeque<Frame>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            framer: Some(LineFramer::new(dtail_protocol::effective_max_line_length(), false)),
            buf: vec![0u8; COMMAND_READ_CHUNK],
            pending: VecDeque::new(),
        }
    }

    /// Returns the next complete line, `None` on clean EOF.
    async fn next_line(&mut self) -> Result<Option<String>, DtailError> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if let Frame::Line(bytes) = frame {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
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
                        return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
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
