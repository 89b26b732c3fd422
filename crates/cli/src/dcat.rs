use std::ffi::OsString;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::ClientSupervisor;
use dtail_logging::Verbosity;
use dtail_protocol::command::{Command, FileCommandOpts, FileMode};
use dtail_protocol::ExitStatus;

use crate::common::{
    build_connector_factory, install_signal_handlers, load_config, parse_file_list, print_output,
    resolve_servers, resolve_ssh_auth, resolve_user, spawn_stats_logger, CommonClientArgs,
};

/// `dcat --servers S --files F [--plain] [--noColor] [--cfg none|path]`
/// (spec §6): read every file on every server and print the concatenated
/// output.
#[derive(Parser, Debug)]
#[command(name = "dcat", about = "Read files on one or more dtail servers")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonClientArgs,
    /// Comma-separated list of remote file paths to read.
    #[arg(long = "files")]
    pub files: String,
}

/// Parses `args`, runs every `cat` job against the discovered (or
/// serverless) server set, and returns the worst [`ExitStatus`].
pub async fn run<I, T>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);
    dtail_logging::init(Verbosity::from_flags(args.common.verbose, args.common.log_level.as_deref()));

    let config = match load_config(&args.common.cfg) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };
    let (servers, serverless) = match resolve_servers(&args.common) {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };

    let cancel = CancellationToken::new();
    let supervisor = ClientSupervisor::new(args.common.cpc, cancel.clone());
    install_signal_handlers(cancel.clone(), supervisor.stats());
    spawn_stats_logger(&supervisor, cancel.clone());
    let factory = build_connector_factory(
        serverless,
        config,
        resolve_user(&args.common),
        resolve_ssh_auth(&args.common),
        !serverless,
    );

    let (tx, rx) = mpsc::channel(1024);
    let printer = tokio::spawn(print_output(rx, args.common.plain, args.common.no_color));

    let opts = FileCommandOpts {
        quiet: args.common.plain,
        spartan: args.common.plain,
        ..FileCommandOpts::default()
    };
    let mut status = ExitStatus::Ok;
    for path in parse_file_list(&args.files) {
        let command: Arc<str> = Command::File {
            mode: FileMode::Cat,
            opts,
            path,
            regex: None,
        }
        .to_wire()
        .into();
        let result = supervisor
            .run(servers.clone(), command, factory.clone(), tx.clone(), None)
            .await;
        status = status.combine(result);
    }

    drop(tx);
    let _ = printer.await;
    status
}
