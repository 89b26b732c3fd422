use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::ClientHandler;
use dtail_logging::Verbosity;
use dtail_protocol::command::Command;
use dtail_protocol::server_addr::ServerAddr;
use dtail_protocol::wire::ResultClass;
use dtail_protocol::ExitStatus;
use dtail_transport::{Connector, RetryingConnector, SshConnector};

use crate::common::{resolve_ssh_auth, resolve_user, CommonClientArgs};

/// `dtailhealth --server S` (spec §6, §8's health scenarios): a single
/// bounded connection attempt to one server, sending `health` and reporting
/// the worst-case classification the monitoring system expects.
#[derive(Parser, Debug)]
#[command(name = "dtailhealth", about = "Check a single dtail server's health")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonClientArgs,
    /// The single `host[:port]` to probe; omitting it is a misconfiguration,
    /// not an outage, so it reports `WARNING` rather than `CRITICAL`.
    #[arg(long = "server")]
    pub server: Option<String>,
    /// How long to wait for the connection and the `health` round-trip.
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,
}

/// Parses `args`, probes the target server once, and returns the
/// [`ExitStatus`] the monitoring integration expects (`OK`, `WARNING` for a
/// missing `--server`, `CRITICAL` for an unreachable one).
pub async fn run<I, T>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);
    dtail_logging::init(Verbosity::from_flags(args.common.verbose, args.common.log_level.as_deref()));

    let Some(server_text) = &args.server else {
        tracing::warn!("WARNING: no --server given, nothing to check");
        return ExitStatus::Warning;
    };
    let server: ServerAddr = match server_text.parse() {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, "CRITICAL: {}", err.user_line());
            return ExitStatus::Critical;
        }
    };

    let connector = RetryingConnector::new(
        SshConnector::new(server.clone(), resolve_user(&args.common), resolve_ssh_auth(&args.common)),
        Duration::from_secs(1),
    )
    .with_max_attempts(1);

    let cancel = CancellationToken::new();
    let probe = async {
        let io = connector.connect(cancel.clone()).await?;
        let (tx, mut rx) = mpsc::channel(16);
        let handler = ClientHandler::new(server.host.clone(), ResultClass::Remote(server.host.clone()));
        let command = Command::Health.to_wire();
        let status = handler.run(io, &command, &tx, None, &cancel).await?;
        drop(tx);
        while rx.recv().await.is_some() {}
        Ok::<_, dtail_protocol::error::DtailError>(status)
    };

    match tokio::time::timeout(Duration::from_secs(args.timeout), probe).await {
        Ok(Ok(_)) => {
            tracing::info!(%server, "OK: All fine at {server} :-)");
            ExitStatus::Ok
        }
        Ok(Err(err)) => {
            tracing::error!(%server, error = %err, "CRITICAL: {}", err.user_line());
            ExitStatus::Critical
        }
        Err(_) => {
            tracing::error!(%server, "CRITICAL: timed out probing {server}");
            ExitStatus::Critical
        }
    }
}
