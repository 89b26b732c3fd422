#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_cli` is the thin command-line front-end shared by every binary in
//! `bin/`: each `bin/*/src/main.rs` is a few lines that hand
//! `std::env::args_os` and stdio to this crate's per-command `run` function
//! and translate the returned [`dtail_protocol::ExitStatus`] into a process
//! exit code.
//!
//! # Design
//!
//! [`common`] holds everything every client binary needs: flag parsing for
//! discovery/connection flags, `--cfg` loading, connector-factory
//! construction (SSH vs. in-process "serverless"), output printing, and the
//! SIGINT/SIGTERM/SIGHUP/SIGQUIT interrupt policy (spec §5). Each command
//! module (`dcat`, `dgrep`, `dtail`, `dmap`, `dtailhealth`, `dserver`) only
//! adds its own flags and assembles the one or two [`dtail_protocol::command::Command`]s
//! its row of spec §6 describes.

/// Shared discovery, connector, output, and signal-handling plumbing.
pub mod common;
/// `dcat --servers S --files F`.
pub mod dcat;
/// `dserver --cfg path|none --bindAddress H --port P`.
pub mod dserver;
/// `dgrep --servers S --files F --regex|--grep P`.
pub mod dgrep;
/// `dmap --query Q [--servers S] [files…]`.
pub mod dmap;
/// `dtail --servers S --files F [--query Q] [--shutdownAfter sec]`.
pub mod dtail;
/// `dtailhealth --server S`.
pub mod dtailhealth;
