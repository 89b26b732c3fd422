use std::ffi::OsString;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::ClientSupervisor;
use dtail_logging::Verbosity;
use dtail_matcher::MatchFlag;
use dtail_protocol::command::{Command, FileCommandOpts, FileMode};
use dtail_protocol::ExitStatus;

use crate::common::{
    build_connector_factory, install_signal_handlers, load_config, parse_file_list, print_output,
    resolve_servers, resolve_ssh_auth, resolve_user, spawn_stats_logger, CommonClientArgs,
};

/// `dgrep --servers S --files F --regex|--grep P [--invert] [--before N]
/// [--after N] [--max N]` (spec §6): filtered read with local context.
#[derive(Parser, Debug)]
#[command(name = "dgrep", about = "Grep files on one or more dtail servers")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonClientArgs,
    /// Comma-separated list of remote file paths to grep.
    #[arg(long = "files")]
    pub files: String,
    /// Pattern to match (alias `--grep`).
    #[arg(long = "regex", visible_alias = "grep")]
    pub pattern: String,
    /// Invert the match (emit non-matching lines).
    #[arg(long)]
    pub invert: bool,
    /// Lines of context before each match.
    #[arg(long, default_value_t = 0)]
    pub before: usize,
    /// Lines of context after each match.
    #[arg(long, default_value_t = 0)]
    pub after: usize,
    /// Stop after this many matches (0 = unbounded).
    #[arg(long, default_value_t = 0)]
    pub max: usize,
}

/// Parses `args`, runs every `grep` job against the discovered (or
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

    let flag = if args.invert { MatchFlag::Invert } else { MatchFlag::Default };
    let regex = match dtail_matcher::Matcher::compile(&args.pattern, flag) {
        Ok(matcher) => matcher.serialize(),
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            drop(tx);
            let _ = printer.await;
            return ExitStatus::Critical;
        }
    };
    let opts = FileCommandOpts {
        quiet: args.common.plain,
        spartan: args.common.plain,
        before: args.before,
        after: args.after,
        max: args.max,
    };

    let mut status = ExitStatus::Ok;
    for path in parse_file_list(&args.files) {
        let command: Arc<str> = Command::File {
            mode: FileMode::Grep,
            opts,
            path,
            regex: Some(regex.clone()),
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
