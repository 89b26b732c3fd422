/// One line read from a file, with enough identity to order it relative to
/// its siblings (spec §3's `Record` entity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Identifies the originating file within a multi-file job; bumped
    /// whenever a tailed file is reopened after rotation.
    pub source_id: u64,
    /// 1-based, monotonically increasing counter per `(job, source_id)`.
    pub line_number: u64,
    /// The line's bytes, delimiter stripped.
    pub content: Vec<u8>,
    /// 100 unless throttling truncated the payload.
    pub transmitted_pct: u8,
    /// Set on the synthetic marker emitted after an overflowed line.
    pub truncated: bool,
}

impl Record {
    /// Builds an ordinary, fully transmitted record.
    #[must_use]
    pub fn new(source_id: u64, line_number: u64, content: Vec<u8>) -> Self {
        Self {
            source_id,
            line_number,
            content,
            transmitted_pct: 100,
            truncated: false,
        }
    }

    /// Builds the marker record emitted once an overflowed line's delimiter
    /// finally arrives (spec §4.2).
    #[must_use]
    pub fn truncation_marker(source_id: u64, line_number: u64) -> Self {
        Self {
            source_id,
            line_number,
            content: b"[line truncated]".to_vec(),
            transmitted_pct: 100,
            truncated: true,
        }
    }
}
