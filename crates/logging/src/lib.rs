#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_logging` wires up [`tracing`] for every dtail binary: a single
//! global subscriber, a verbosity level derived from repeated `-v` flags or
//! an explicit `--logLevel`, and `RUST_LOG` as an escape hatch that always
//! wins when set.
//!
//! # Design
//!
//! Every binary calls [`init`] exactly once, early in `main`. A second call
//! within the same process (tests spawning multiple binaries' `run()`
//! functions in-process, for instance) is a harmless no-op, guarded by a
//! [`std::sync::OnceLock`].

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Verbosity requested on the command line, from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Derives a verbosity level from a repeated `-v` flag count (spec §6:
    /// `-v`/`-vv`) or an explicit `--logLevel` name, the latter taking
    /// precedence when both are given.
    #[must_use]
    pub fn from_flags(verbose_count: u8, log_level: Option<&str>) -> Self {
        if let Some(level) = log_level {
            return match level.to_ascii_lowercase().as_str() {
                "quiet" | "error" | "warn" => Self::Quiet,
                "debug" | "trace" => Self::Debug,
                "verbose" | "info" => Self::Verbose,
                _ => Self::Normal,
            };
        }
        match verbose_count {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Debug => "trace",
        }
    }
}

/// Initializes the global `tracing` subscriber.
///
/// `RUST_LOG`, when set, always wins over `verbosity`; this mirrors how
/// every other component in the workspace treats explicit environment
/// overrides as authoritative over CLI-derived defaults.
pub fn init(verbosity: Verbosity) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_flag_overrides_verbose_count() {
        assert_eq!(Verbosity::from_flags(0, Some("debug")), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(2, Some("quiet")), Verbosity::Quiet);
    }

    #[test]
    fn verbose_count_maps_to_increasing_levels() {
        assert_eq!(Verbosity::from_flags(0, None), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(1, None), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(5, None), Verbosity::Debug);
    }

    #[test]
    fn ordering_reflects_increasing_loudness() {
        assert!(Verbosity::Quiet < Verbosity::Normal);
        assert!(Verbosity::Normal < Verbosity::Verbose);
        assert!(Verbosity::Verbose < Verbosity::Debug);
    }
}
