use std::ffi::OsString;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::{ClientSupervisor, GlobalMerger};
use dtail_logging::Verbosity;
use dtail_protocol::command::{Command, FileCommandOpts, FileMode};
use dtail_protocol::ExitStatus;
use dtail_query::OutfileWriter;

use crate::common::{
    build_connector_factory, install_signal_handlers, load_config, parse_file_list, print_output,
    resolve_servers, resolve_ssh_auth, resolve_user, spawn_stats_logger, CommonClientArgs,
};

/// `dmap --query Q [--servers S] [files…]` (spec §6): a one-shot MapReduce
/// run against every discovered file, printed once every file has reached
/// EOF, or written to the query's `outfile` when one is configured.
#[derive(Parser, Debug)]
#[command(name = "dmap", about = "Run a one-shot MapReduce query against dtail servers")]
pub struct Args {
    #[command(flatten)]
    pub common: CommonClientArgs,
    /// The MapReduce query text (spec §4.5's SELECT/GROUP BY/WHERE/ORDER BY
    /// /SET/LIMIT dialect).
    #[arg(long)]
    pub query: String,
    /// Comma-separated list of remote file paths, as an alternative to the
    /// positional form.
    #[arg(long = "files")]
    pub files: Option<String>,
    /// Positional file paths.
    pub positional_files: Vec<String>,
}

/// Parses `args`, runs the query against every discovered file once, and
/// returns the worst [`ExitStatus`].
pub async fn run<I, T>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);
    dtail_logging::init(Verbosity::from_flags(args.common.verbose, args.common.log_level.as_deref()));

    let query = match dtail_query::parse(&args.query) {
        Ok(query) => query,
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };

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

    let files: Vec<String> = match &args.files {
        Some(list) => parse_file_list(list),
        None => args.positional_files.clone(),
    };
    if files.is_empty() {
        tracing::error!("dmap requires at least one file, via --files or positionally");
        return ExitStatus::Critical;
    }

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

    let outfile = query.outfile.clone();
    let log_format = query.log_format;
    let raw = query.raw.clone();
    let merger = Arc::new(GlobalMerger::new(query));

    let opts = FileCommandOpts {
        quiet: args.common.plain,
        spartan: args.common.plain,
        ..FileCommandOpts::default()
    };

    let mut status = ExitStatus::Ok;
    for path in files {
        let file_command = Command::File {
            mode: FileMode::Cat,
            opts,
            path,
            regex: None,
        }
        .to_wire();
        let wire: Arc<str> = format!("map {raw}\n{file_command}").into();
        let result = supervisor
            .run(servers.clone(), wire, factory.clone(), tx.clone(), Some(merger.clone()))
            .await;
        status = status.combine(result);
    }
    drop(tx);
    let _ = printer.await;

    let header = merger.header().await;
    let rows = if merger.cumulative().await {
        merger.snapshot_rows().await
    } else {
        merger.swap_out_rows().await
    };

    match outfile {
        Some(spec) => {
            let mut writer = OutfileWriter::new(spec, raw.clone());
            if let Err(err) = writer.write(&header, &rows, log_format).await {
                tracing::error!(error = %err, "{}", err.user_line());
                return status.combine(ExitStatus::Critical);
            }
        }
        None => {
            let delimiter = match log_format {
                dtail_query::ast::LogFormat::Default => " | ",
                dtail_query::ast::LogFormat::Csv => ",",
            };
            let mut stdout = String::new();
            stdout.push_str(&header.join(delimiter));
            stdout.push('\n');
            for row in &rows {
                stdout.push_str(&row.values.join(delimiter));
                stdout.push('\n');
            }
            print!("{stdout}");
        }
    }

    status
}
