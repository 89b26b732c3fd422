#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_matcher` implements the pattern matcher described as component C1:
//! pattern compilation with a literal-string fast path, normal or inverted
//! matching, and a wire-serializable form so a peer reproduces the same
//! match behavior without re-running detection.
//!
//! # Design
//!
//! A large fraction of real grep workloads are plain substring searches
//! over log lines; [`Matcher::compile`] detects that case and stores the
//! pattern for [`memchr`]-backed substring search rather than paying a
//! regex engine's per-line overhead — the single biggest throughput win in
//! grep mode, per spec §4.1.

use dtail_protocol::error::DtailError;

/// Whether a compiled matcher negates its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFlag {
    /// Report `true` when the pattern matches.
    Default,
    /// Report `true` when the pattern does *not* match.
    Invert,
    /// Always report `true`, regardless of content (no compiled pattern).
    Noop,
}

#[derive(Debug, Clone)]
enum Backend {
    /// Matches everything.
    Noop,
    /// Substring search fast path.
    Literal(String),
    /// Full regex engine.
    Regex(regex::bytes::Regex),
}

/// A compiled pattern, ready to test byte slices (C1).
#[derive(Debug, Clone)]
pub struct Matcher {
    backend: Backend,
    flag: MatchFlag,
    /// The original pattern text, kept for serialization.
    pattern: String,
    /// Set when the backend was forced to `Literal` by an explicit hint
    /// from a serialized peer, even if local detection would differ.
    literal_hint: bool,
}

const REGEX_METACHARACTERS: &[char] = &['.', '+', '*', '?', '^', '$', '[', ']', '{', '}', '(', ')', '|', '\\'];

impl Matcher {
    /// Compiles `pattern` under `flag`.
    ///
    /// An empty pattern, `"."`, or `".*"` compiles to a no-op matcher that
    /// always reports a match (spec §4.1). Otherwise the pattern is scanned
    /// for regex metacharacters; if none are present it is stored as a
    /// literal and matched via substring search, else it is compiled as a
    /// full regex.
    pub fn compile(pattern: &str, flag: MatchFlag) -> Result<Self, DtailError> {
        if pattern.is_empty() || pattern == "." || pattern == ".*" {
            return Ok(Self {
                backend: Backend::Noop,
                flag: MatchFlag::Noop,
                pattern: pattern.to_string(),
                literal_hint: false,
            });
        }
        let backend = if pattern.chars().any(|c| REGEX_METACHARACTERS.contains(&c)) {
            let compiled = regex::bytes::Regex::new(pattern)
                .map_err(|e| DtailError::Query(format!("invalid pattern '{pattern}': {e}")))?;
            Backend::Regex(compiled)
        } else {
            Backend::Literal(pattern.to_string())
        };
        Ok(Self {
            backend,
            flag,
            pattern: pattern.to_string(),
            literal_hint: false,
        })
    }

    /// Tests `bytes` against the compiled pattern, honoring [`MatchFlag::Invert`].
    #[must_use]
    pub fn is_match(&self, bytes: &[u8]) -> bool {
        let raw = match &self.backend {
            Backend::Noop => true,
            Backend::Literal(needle) => memchr::memmem::find(bytes, needle.as_bytes()).is_some(),
            Backend::Regex(re) => re.is_match(bytes),
        };
        match self.flag {
            MatchFlag::Invert => !raw,
            _ => raw,
        }
    }

    /// Serializes this matcher as `regex:<flags> <pattern>` (spec §4.1).
    /// `<flags>` is a comma list that may include `invert` and/or `literal`.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut flags = Vec::new();
        if self.flag == MatchFlag::Invert {
            flags.push("invert");
        }
        if matches!(self.backend, Backend::Literal(_)) || self.literal_hint {
            flags.push("literal");
        }
        format!("regex:{} {}", flags.join(","), self.pattern)
    }

    /// Deserializes a matcher produced by [`Matcher::serialize`]. A `literal`
    /// flag is trusted even if local detection of `pattern` would otherwise
    /// choose a regex backend (spec §4.1: "Deserialization that sees
    /// `literal` trusts it even if local detection disagrees").
    pub fn deserialize(wire: &str) -> Result<Self, DtailError> {
        let rest = wire
            .strip_prefix("regex:")
            .ok_or_else(|| DtailError::Protocol(format!("not a serialized matcher: '{wire}'")))?;
        let (flags_str, pattern) = rest
            .split_once(' ')
            .ok_or_else(|| DtailError::Protocol(format!("malformed matcher wire form: '{wire}'")))?;
        let flags: Vec<&str> = if flags_str.is_empty() {
            Vec::new()
        } else {
            flags_str.split(',').collect()
        };
        let invert = flags.contains(&"invert");
        let literal_hint = flags.contains(&"literal");
        let flag = if invert { MatchFlag::Invert } else { MatchFlag::Default };

        if pattern.is_empty() || pattern == "." || pattern == ".*" {
            return Ok(Self {
                backend: Backend::Noop,
                flag: MatchFlag::Noop,
                pattern: pattern.to_string(),
                literal_hint: false,
            });
        }
        let backend = if literal_hint {
            Backend::Literal(pattern.to_string())
        } else if pattern.chars().any(|c| REGEX_METACHARACTERS.contains(&c)) {
            let compiled = regex::bytes::Regex::new(pattern)
                .map_err(|e| DtailError::Query(format!("invalid pattern '{pattern}': {e}")))?;
            Backend::Regex(compiled)
        } else {
            Backend::Literal(pattern.to_string())
        };
        Ok(Self {
            backend,
            flag,
            pattern: pattern.to_string(),
            literal_hint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_dot_patterns_are_noop() {
        for pattern in ["", ".", ".*"] {
            let m = Matcher::compile(pattern, MatchFlag::Default).unwrap();
            assert!(m.is_match(b"anything at all"));
            assert!(m.is_match(b""));
        }
    }

    #[test]
    fn literal_fast_path_is_used_for_plain_substrings() {
        let m = Matcher::compile("ERROR", MatchFlag::Default).unwrap();
        assert!(m.is_match(b"2024 ERROR disk full"));
        assert!(!m.is_match(b"all good"));
        assert!(m.serialize().contains("literal"));
    }

    #[test]
    fn regex_backend_used_when_metacharacters_present() {
        let m = Matcher::compile(r"err\d+", MatchFlag::Default).unwrap();
        assert!(m.is_match(b"err42"));
        assert!(!m.is_match(b"errx"));
        assert!(!m.serialize().contains("literal"));
    }

    #[test]
    fn invert_flips_the_result() {
        let default = Matcher::compile("ERROR", MatchFlag::Default).unwrap();
        let inverted = Matcher::compile("ERROR", MatchFlag::Invert).unwrap();
        for line in [&b"has ERROR"[..], &b"no match here"[..]] {
            assert_eq!(default.is_match(line), !inverted.is_match(line));
        }
    }

    #[test]
    fn serialize_round_trips() {
        for (pattern, flag) in [("ERROR", MatchFlag::Default), (r"err\d+", MatchFlag::Invert)] {
            let m = Matcher::compile(pattern, flag).unwrap();
            let wire = m.serialize();
            let restored = Matcher::deserialize(&wire).unwrap();
            for line in [&b"err42"[..], &b"ERROR seen"[..], &b"nope"[..]] {
                assert_eq!(m.is_match(line), restored.is_match(line));
            }
        }
    }

    #[test]
    fn deserialize_trusts_literal_hint_over_local_detection() {
        // A pattern containing a metacharacter, but serialized with an
        // explicit `literal` hint: the receiver must honor the hint and
        // search for the literal text `a.b`, not compile it as a regex.
        let wire = "regex:literal a.b";
        let m = Matcher::deserialize(wire).unwrap();
        assert!(m.is_match(b"contains a.b here"));
        assert!(!m.is_match(b"contains axb here"));
    }
}
