use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::{spawn_shutdown_after, ClientSupervisor, GlobalMerger};
use dtail_logging::Verbosity;
use dtail_matcher::MatchFlag;
use dtail_protocol::command::{Command, FileCommandOpts, FileMode};
use dtail_protocol::ExitStatus;

use crate::common::{
    build_connector_factory, install_signal_handlers, load_config, parse_file_list, print_output,
    resolve_servers, resolve_ssh_auth, resolve_user, spawn_stats_logger, CommonClientArgs,
};

/// `dtail --servers S --files F [--regex P] [--grep P] [--query Q]
/// [--shutdownAfter sec]` (spec §6): follow, switching to streaming
/// MapReduce when `--query` is given.
#[derive(Parser, Debug)]
#[command(name = "dtail", about = "Follow files on one or more dtail servers")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonClientArgs,
    /// Comma-separated list of remote file paths to follow.
    #[arg(long = "files")]
    pub files: String,
    /// Filter pattern (alias `--grep`).
    #[arg(long = "regex", visible_alias = "grep")]
    pub pattern: Option<String>,
    /// Invert the filter pattern.
    #[arg(long)]
    pub invert: bool,
    /// A streaming MapReduce query; switches from plain follow to
    /// query mode, emitted periodically per `interval` (spec §4.5).
    #[arg(long)]
    pub query: Option<String>,
    /// Cancel the whole process after this many seconds (spec §9's
    /// open question, resolved as a process-lifetime deadline).
    #[arg(long = "shutdownAfter")]
    pub shutdown_after: Option<u64>,
}

/// Parses `args`, runs every `tail` (or `map`+`tail`) job against the
/// discovered (or serverless) server set, and returns the worst
/// [`ExitStatus`].
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
    spawn_shutdown_after(args.shutdown_after.map(Duration::from_secs), cancel.clone());
    let factory = build_connector_factory(
        serverless,
        config,
        resolve_user(&args.common),
        resolve_ssh_auth(&args.common),
        true,
    );

    let (tx, rx) = mpsc::channel(1024);
    let printer = tokio::spawn(print_output(rx, args.common.plain, args.common.no_color));

    let merger = match &args.query {
        Some(query_text) => match dtail_query::parse(query_text) {
            Ok(query) => Some(Arc::new(GlobalMerger::new(query))),
            Err(err) => {
                tracing::error!(error = %err, "{}", err.user_line());
                drop(tx);
                let _ = printer.await;
                return ExitStatus::Critical;
            }
        },
        None => None,
    };

    let regex = match &args.pattern {
        Some(pattern) => {
            let flag = if args.invert { MatchFlag::Invert } else { MatchFlag::Default };
            match dtail_matcher::Matcher::compile(pattern, flag) {
                Ok(matcher) => Some(matcher.serialize()),
                Err(err) => {
                    tracing::error!(error = %err, "{}", err.user_line());
                    drop(tx);
                    let _ = printer.await;
                    return ExitStatus::Critical;
                }
            }
        }
        None => None,
    };

    let opts = FileCommandOpts {
        quiet: args.common.plain,
        spartan: args.common.plain,
        ..FileCommandOpts::default()
    };

    let mut status = ExitStatus::Ok;
    for path in parse_file_list(&args.files) {
        let file_command = Command::File {
            mode: FileMode::Tail,
            opts,
            path,
            regex: regex.clone(),
        }
        .to_wire();
        let wire: Arc<str> = match &args.query {
            Some(query_text) => format!("map {query_text}\n{file_command}").into(),
            None => file_command.into(),
        };
        let result = supervisor
            .run(servers.clone(), wire, factory.clone(), tx.clone(), merger.clone())
            .await;
        status = status.combine(result);
    }

    drop(tx);
    let _ = printer.await;
    status
}
