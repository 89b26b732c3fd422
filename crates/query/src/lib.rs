#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_query` implements the streaming MapReduce engine described as
//! component C5: a small SQL-like grammar, a set of associative/commutative
//! aggregates, a server-local streaming evaluator, and a client-side outfile
//! writer with truncate/append disposition.
//!
//! # Design
//!
//! - [`parser::parse`] turns query text into an [`ast::Query`].
//! - [`aggregate::Accumulator`] implements each aggregate's `init`/`fold`/
//!   `merge`/`finalize` quartet so cross-server merge only ever needs to
//!   know the aggregate kind, never the query shape.
//! - [`group_set::GroupSet`] is the ordered group-key → accumulator-vector
//!   map; merge and deterministic row ordering live here.
//! - [`engine::QueryEngine`] drives one query end to end: tokenizing
//!   `MAPREDUCE:` lines, applying `where`/`set`, folding into groups, and
//!   producing either cumulative snapshots or non-cumulative swap-outs.
//! - [`outfile::OutfileWriter`] renders result rows to a client-side file,
//!   atomically on truncate, by concatenation on append, plus the `.query`
//!   sidecar.

pub mod aggregate;
pub mod ast;
pub mod engine;
pub mod group_set;
pub mod outfile;
pub mod parser;

pub use ast::Query;
pub use engine::QueryEngine;
pub use group_set::{GroupSet, Row};
pub use outfile::OutfileWriter;
pub use parser::parse;
