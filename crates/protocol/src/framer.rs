use memchr::memchr;

/// Outcome of feeding bytes into a [`LineFramer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete record, delimiter stripped.
    Line(Vec<u8>),
    /// The line exceeded `max_line_length`; this is the accumulated prefix.
    /// A single [`Frame::Truncated`] follows once the next delimiter arrives.
    Overflow(Vec<u8>),
    /// Marks that bytes were discarded after an [`Frame::Overflow`].
    Truncated,
}

/// Splits a byte stream into records by [`crate::DELIMITER`], preserving
/// long lines up to `max_line_length` (C2, spec §4.2).
///
/// In `tail` mode the framer withholds a partial trailing line (no delimiter
/// yet seen) until more bytes arrive; in `cat`/`grep` mode the remainder is
/// flushed once [`LineFramer::finish`] is called on EOF.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line_length: usize,
    overflowing: bool,
    tail_mode: bool,
}

impl LineFramer {
    /// Creates a framer with the given overflow threshold.
    #[must_use]
    pub fn new(max_line_length: usize, tail_mode: bool) -> Self {
        Self {
            buf: Vec::new(),
            max_line_length,
            overflowing: false,
            tail_mode,
        }
    }

    /// Feeds a chunk of freshly read bytes, returning zero or more frames.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        loop {
            match memchr(crate::DELIMITER, rest) {
                Some(pos) => {
                    let (line, tail) = rest.split_at(pos);
                    rest = &tail[1..];
                    if self.overflowing {
                        self.overflowing = false;
                        self.buf.clear();
                        frames.push(Frame::Truncated);
                        continue;
                    }
                    self.buf.extend_from_slice(line);
                    if self.buf.len() > self.max_line_length {
                        frames.push(Frame::Overflow(std::mem::take(&mut self.buf)));
                        frames.push(Frame::Truncated);
                        continue;
                    }
                    frames.push(Frame::Line(std::mem::take(&mut self.buf)));
                }
                None => {
                    if self.overflowing {
                        // discard bytes until the next delimiter
                        return frames;
                    }
                    self.buf.extend_from_slice(rest);
                    if self.buf.len() > self.max_line_length {
                        self.overflowing = true;
                        frames.push(Frame::Overflow(std::mem::take(&mut self.buf)));
                    }
                    return frames;
                }
            }
        }
    }

    /// Flushes any partial line remaining at EOF. In `cat`/`grep` mode this
    /// emits the remainder (spec §4.2: "on EOF with a non-empty buffer...
    /// emit the remainder"); in `tail` mode a partial line is dropped since
    /// tail never emits a line without its terminating delimiter.
    pub fn finish(mut self) -> Option<Frame> {
        if self.buf.is_empty() || self.overflowing {
            return None;
        }
        if self.tail_mode {
            None
        } else {
            Some(Frame::Line(std::mem::take(&mut self.buf)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_only(frames: Vec<Frame>) -> Vec<Vec<u8>> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                Frame::Line(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn splits_simple_lines() {
        let mut framer = LineFramer::new(1024, false);
        let frames = framer.feed(b"abc\ndef\nghi");
        assert_eq!(lines_only(frames), vec![b"abc".to_vec(), b"def".to_vec()]);
        assert_eq!(framer.finish(), Some(Frame::Line(b"ghi".to_vec())));
    }

    #[test]
    fn tail_mode_withholds_partial_line() {
        let mut framer = LineFramer::new(1024, true);
        let frames = framer.feed(b"abc\ndef");
        assert_eq!(lines_only(frames), vec![b"abc".to_vec()]);
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn overflow_emits_prefix_then_truncation_marker() {
        let mut framer = LineFramer::new(4, false);
        let frames = framer.feed(b"abcdefgh\nnext\n");
        assert_eq!(
            frames,
            vec![
                Frame::Overflow(b"abcdefgh".to_vec()),
                Frame::Truncated,
                Frame::Line(b"next".to_vec()),
            ]
        );
    }

    #[test]
    fn overflow_spanning_multiple_feeds() {
        let mut framer = LineFramer::new(4, false);
        let mut frames = framer.feed(b"abcd");
        frames.extend(framer.feed(b"efgh"));
        frames.extend(framer.feed(b"ignored\n"));
        frames.extend(framer.feed(b"ok\n"));
        assert_eq!(
            frames,
            vec![
                Frame::Overflow(b"abcdefgh".to_vec()),
                Frame::Truncated,
                Frame::Line(b"ok".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_buffer_at_eof_emits_nothing() {
        let framer = LineFramer::new(1024, false);
        assert_eq!(framer.finish(), None);
    }
}
