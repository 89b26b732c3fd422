#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_transport` implements component C8, the connector: it binds one
//! authenticated, bidirectional byte-stream channel to a handler pair. Two
//! variants share the [`connector::Connector`] interface — [`ssh::SshConnector`]
//! dials a real SSH session, and [`in_process::InProcessConnector`] wires a
//! client directly to a local server handler through bounded in-memory
//! queues, used when no servers are configured.
//!
//! # Design
//!
//! Both variants produce the same [`connector::BoxedIo`] type so the client
//! supervisor (C9) drives them identically, including the shared
//! [`connector::RetryingConnector`] backoff wrapper for long-lived modes.
//! [`ssh_server`] is the accept side `dserver` binds: it turns each
//! authenticated SSH channel into the same `BoxedIo` shape `SshConnector`
//! produces on the client side, so `dtail-server`'s transport-agnostic
//! `ServerSession` never has to know which side of the wire it is on.

/// The `Connector` trait, its boxed-IO return type, and the retry wrapper.
pub mod connector;
/// In-process ("serverless") connector variant.
pub mod in_process;
/// Networked SSH connector variant (client side).
pub mod ssh;
/// The SSH listener `dserver` binds (server side).
pub mod ssh_server;

pub use connector::{AsyncDuplex, BoxedIo, Connector, RetryingConnector};
pub use in_process::{in_process_pair, InProcessConnector};
pub use ssh::{SshAuth, SshConnector};
pub use ssh_server::{serve as serve_ssh, SshServerAuth};
