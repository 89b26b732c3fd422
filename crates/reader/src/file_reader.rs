use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_protocol::error::DtailError;
use dtail_protocol::framer::{Frame, LineFramer};

use crate::record::Record;

/// How a [`FileReader`] consumes its path (C3, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseMode {
    /// Read sequentially from the beginning, then close.
    Cat,
    /// Read from the current end of file, watching for appends and
    /// surviving truncation/rotation.
    Tail,
}

/// Counters maintained by a running reader (spec §4.3: used for periodic
/// stats and the transmitted percentage).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Total lines read, matched or not.
    pub lines_read: u64,
    /// Lines that matched (only meaningful when a matcher is applied).
    pub lines_matched: u64,
    /// Lines that did not match.
    pub lines_not_matched: u64,
}

/// Interval the tail poller sleeps between stat checks.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Chunk size used for sequential cat reads.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Opens `path` and produces an ordered sequence of [`Record`]s (C3).
pub struct FileReader {
    path: PathBuf,
    mode: BaseMode,
    max_line_length: usize,
}

impl FileReader {
    /// Creates a reader for `path` in the given mode.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, mode: BaseMode) -> Self {
        Self {
            path: path.into(),
            mode,
            max_line_length: dtail_protocol::effective_max_line_length(),
        }
    }

    /// Runs the reader to completion (cat) or until cancelled (tail),
    /// sending each [`Record`] to `tx` as it is produced.
    ///
    /// States per spec §4.3: `opening -> reading -> (eof | error | cancelled)`.
    pub async fn run(
        self,
        tx: mpsc::Sender<Result<Record, DtailError>>,
        cancel: CancellationToken,
    ) -> ReaderStats {
        match self.mode {
            BaseMode::Cat => self.run_cat(tx, cancel).await,
            BaseMode::Tail => self.run_tail(tx, cancel).await,
        }
    }

    async fn run_cat(
        &self,
        tx: mpsc::Sender<Result<Record, DtailError>>,
        cancel: CancellationToken,
    ) -> ReaderStats {
        let mut stats = ReaderStats::default();
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(source) => {
                let _ = tx
                    .send(Err(DtailError::Reader {
                        path: self.path.clone(),
                        source,
                    }))
                    .await;
                return stats;
            }
        };

        let mut framer = LineFramer::new(self.max_line_length, false);
        let mut source_id = 0u64;
        let mut line_number = 0u64;
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            if cancel.is_cancelled() {
                return stats;
            }
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return stats,
                result = file.read(&mut buf) => result,
            };
            match read {
                Ok(0) => {
                    if let Some(frame) = framer.finish() {
                        line_number += 1;
                        if !emit_frame(&tx, source_id, line_number, frame, &mut stats).await {
                            return stats;
                        }
                    }
                    return stats;
                }
                Ok(n) => {
                    for frame in framer.feed(&buf[..n]) {
                        line_number += 1;
                        if !emit_frame(&tx, source_id, line_number, frame, &mut stats).await {
                            return stats;
                        }
                    }
                }
                Err(source) => {
                    let _ = tx
                        .send(Err(DtailError::Reader {
                            path: self.path.clone(),
                            source,
                        }))
                        .await;
                    return stats;
                }
            }
        }
    }

    async fn run_tail(
        &self,
        tx: mpsc::Sender<Result<Record, DtailError>>,
        cancel: CancellationToken,
    ) -> ReaderStats {
        let mut stats = ReaderStats::default();
        let mut source_id = 0u64;
        let mut line_number = 0u64;

        let mut handle = match self.open_tail(&self.path).await {
            Ok(h) => h,
            Err(source) => {
                let _ = tx
                    .send(Err(DtailError::Reader {
                        path: self.path.clone(),
                        source,
                    }))
                    .await;
                return stats;
            }
        };

        let mut framer = LineFramer::new(self.max_line_length, true);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return stats,
                () = tokio::time::sleep(TAIL_POLL_INTERVAL) => {}
            }

            let current_meta = match tokio::fs::metadata(&self.path).await {
                Ok(meta) => meta,
                Err(_) => continue, // transient (file momentarily missing during rotation)
            };

            let rotated = tail_rotated(&handle, &current_meta);
            if rotated {
                source_id += 1;
                handle = match self.open_tail(&self.path).await {
                    Ok(h) => h,
                    Err(_) => continue,
                };
                framer = LineFramer::new(self.max_line_length, true);
                continue;
            }

            if current_meta.len() <= handle.last_len {
                continue;
            }

            match handle.file.read(&mut buf).await {
                Ok(0) => {}
                Ok(n) => {
                    handle.last_len += n as u64;
                    for frame in framer.feed(&buf[..n]) {
                        line_number += 1;
                        if !emit_frame(&tx, source_id, line_number, frame, &mut stats).await {
                            return stats;
                        }
                    }
                }
                Err(source) => {
                    let _ = tx
                        .send(Err(DtailError::Reader {
                            path: self.path.clone(),
                            source,
                        }))
                        .await;
                    return stats;
                }
            }
        }
    }

    async fn open_tail(&self, path: &Path) -> std::io::Result<TailHandle> {
        let mut file = tokio::fs::File::open(path).await?;
        let meta = file.metadata().await?;
        let last_len = meta.len();
        // seek to end: subsequent reads only observe new appends
        use tokio::io::AsyncSeekExt;
        file.seek(std::io::SeekFrom::End(0)).await?;
        Ok(TailHandle {
            file,
            last_len,
            #[cfg(unix)]
            ino: inode_of(&meta),
        })
    }
}

struct TailHandle {
    file: tokio::fs::File,
    last_len: u64,
    #[cfg(unix)]
    ino: u64,
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

/// Detects truncation (size decreased) or rotation (inode changed).
fn tail_rotated(handle: &TailHandle, current: &std::fs::Metadata) -> bool {
    if current.len() < handle.last_len {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if current.ino() != handle.ino {
            return true;
        }
    }
    false
}

async fn emit_frame(
    tx: &mpsc::Sender<Result<Record, DtailError>>,
    source_id: u64,
    line_number: u64,
    frame: Frame,
    stats: &mut ReaderStats,
) -> bool {
    let record = match frame {
        Frame::Line(content) => {
            stats.lines_read += 1;
            Record::new(source_id, line_number, content)
        }
        Frame::Overflow(prefix) => {
            stats.lines_read += 1;
            Record::new(source_id, line_number, prefix)
        }
        Frame::Truncated => Record::truncation_marker(source_id, line_number),
    };
    tx.send(Ok(record)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn cat_reads_entire_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.log");
        std::fs::write(&path, "Line 1\nLine 2\nLine 3 with no ending").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let reader = FileReader::new(&path, BaseMode::Cat);
        let stats = reader.run(tx, cancel).await;

        let mut lines = Vec::new();
        while let Some(record) = rx.recv().await {
            lines.push(record.unwrap());
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].content, b"Line 1");
        assert_eq!(lines[1].content, b"Line 2");
        assert_eq!(lines[2].content, b"Line 3 with no ending");
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[2].line_number, 3);
        assert_eq!(stats.lines_read, 3);
    }

    #[tokio::test]
    async fn cat_on_empty_file_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let reader = FileReader::new(&path, BaseMode::Cat);
        let stats = reader.run(tx, CancellationToken::new()).await;
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.lines_read, 0);
    }

    #[tokio::test]
    async fn cat_missing_file_reports_reader_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");

        let (tx, mut rx) = mpsc::channel(16);
        let reader = FileReader::new(&path, BaseMode::Cat);
        let _ = reader.run(tx, CancellationToken::new()).await;
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(DtailError::Reader { .. })));
    }

    #[tokio::test]
    async fn tail_streams_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let path_clone = path.clone();
        let reader_task = tokio::spawn(async move {
            let reader = FileReader::new(&path_clone, BaseMode::Tail);
            reader.run(tx, cancel_clone).await
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "hello").unwrap();
            f.flush().unwrap();
        }

        let record = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(record.content, b"hello");

        cancel.cancel();
        let _ = reader_task.await;
    }

    #[tokio::test]
    async fn tail_partial_line_is_withheld_until_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t2.log");
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let path_clone = path.clone();
        let reader_task = tokio::spawn(async move {
            let reader = FileReader::new(&path_clone, BaseMode::Tail);
            reader.run(tx, cancel_clone).await
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let mut f = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .unwrap();
            f.write_all(b"partial").await.unwrap();
            f.flush().await.unwrap();
        }
        // no delimiter yet: nothing should arrive within a short window
        let nothing_yet = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(nothing_yet.is_err());

        cancel.cancel();
        let _ = reader_task.await;
    }
}
