use std::collections::VecDeque;

/// Local-context window applied to grep: buffers `before` lines, emits the
/// next `after` lines following a match, and enforces a `max`-match stop
/// (C4, spec §4.4).
///
/// `max == 0` means unbounded, matching [`crate::FileCommandOpts`]'s
/// convention. Once the max-match count is reached, the window enters a
/// fixed drain: it emits exactly the configured `after` lines regardless of
/// whether they themselves would match, then signals the caller to stop —
/// this is what lets `max` and `after` compose (spec §8 S4).
pub struct ContextWindow<T> {
    before_cap: usize,
    after: usize,
    after_remaining: usize,
    max_remaining: Option<usize>,
    max_reached: bool,
    ring_before: VecDeque<T>,
}

impl<T> ContextWindow<T> {
    /// Creates a window with the given before/after/max parameters.
    #[must_use]
    pub fn new(before: usize, after: usize, max: usize) -> Self {
        Self {
            before_cap: before,
            after,
            after_remaining: 0,
            max_remaining: (max > 0).then_some(max),
            max_reached: false,
            ring_before: VecDeque::with_capacity(before),
        }
    }

    /// Feeds one line plus whether the upstream matcher matched it. Returns
    /// the lines to emit (in ascending order) and whether the window is now
    /// exhausted and the caller should stop reading.
    pub fn feed(&mut self, line: T, matched: bool) -> (Vec<T>, bool) {
        let mut emitted = Vec::new();

        if self.max_reached {
            // Fixed post-max drain: the next `after` lines are emitted
            // unconditionally, ignoring `matched`, then we stop.
            if self.after_remaining > 0 {
                emitted.push(line);
                self.after_remaining -= 1;
            }
            return (emitted, self.after_remaining == 0);
        }

        if !matched {
            if self.after_remaining > 0 {
                emitted.push(line);
                self.after_remaining -= 1;
            } else if self.before_cap > 0 {
                if self.ring_before.len() == self.before_cap {
                    self.ring_before.pop_front();
                }
                self.ring_before.push_back(line);
            }
            return (emitted, false);
        }

        // Matched, and the max count has not yet been reached.
        self.after_remaining = self.after;
        while let Some(prior) = self.ring_before.pop_front() {
            emitted.push(prior);
        }
        emitted.push(line);

        if let Some(remaining) = self.max_remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                if self.after == 0 {
                    return (emitted, true);
                }
                self.max_reached = true;
            }
        }
        (emitted, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(before: usize, after: usize, max: usize, lines: &[(&str, bool)]) -> (Vec<String>, bool) {
        let mut window = ContextWindow::new(before, after, max);
        let mut out = Vec::new();
        let mut stopped = false;
        for (line, matched) in lines {
            let (emitted, stop) = window.feed((*line).to_string(), *matched);
            out.extend(emitted);
            if stop {
                stopped = true;
                break;
            }
        }
        (out, stopped)
    }

    #[test]
    fn s3_before_one_after_one_single_match() {
        let lines = [
            ("L1", false),
            ("L2", false),
            ("L3", false),
            ("L4", false),
            ("L5", true),
            ("L6", false),
            ("L7", false),
        ];
        let (emitted, stopped) = run(1, 1, 0, &lines);
        assert_eq!(emitted, vec!["L4", "L5", "L6"]);
        assert!(!stopped);
    }

    #[test]
    fn s4_max_without_after_stops_at_third_match() {
        let lines: Vec<(&str, bool)> = (1..=10).map(|_| ("X", true)).collect();
        let (emitted, stopped) = run(0, 0, 3, &lines);
        assert_eq!(emitted, vec!["X", "X", "X"]);
        assert!(stopped);
    }

    #[test]
    fn s4_max_with_after_drains_post_max_tail_ignoring_further_matches() {
        let lines: Vec<(&str, bool)> = (1..=10).map(|_| ("X", true)).collect();
        let (emitted, stopped) = run(0, 2, 3, &lines);
        assert_eq!(emitted, vec!["X", "X", "X", "X", "X"]);
        assert!(stopped);
    }

    #[test]
    fn before_window_has_fewer_entries_at_file_start() {
        let lines = [("L1", true), ("L2", false)];
        let (emitted, stopped) = run(3, 1, 0, &lines);
        assert_eq!(emitted, vec!["L1", "L2"]);
        assert!(!stopped);
    }

    #[test]
    fn unbounded_max_never_stops() {
        let lines: Vec<(&str, bool)> = (1..=50).map(|_| ("X", true)).collect();
        let (emitted, stopped) = run(0, 0, 0, &lines);
        assert_eq!(emitted.len(), 50);
        assert!(!stopped);
    }
}
