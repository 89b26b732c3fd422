use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dtail_client::{ConnectorFactory, OutputLine, StatsTracker};
use dtail_config::{Config, UserPermissions};
use dtail_protocol::error::DtailError;
use dtail_protocol::server_addr::ServerAddr;
use dtail_protocol::wire::ResultClass;
use dtail_protocol::ExitStatus;
use dtail_server::{Limiter, PermissionSet, ServerSession};
use dtail_transport::{BoxedIo, Connector, InProcessConnector, RetryingConnector, SshAuth, SshConnector};

/// Shared discovery/connection flags every client binary accepts (spec §6's
/// "Common flags" row): `--servers`, `--serverFile`, `--discovery`, `--cfg`,
/// `--cpc`, `--trustAllHosts`, plus the output and logging flags that apply
/// uniformly across `dcat`/`dgrep`/`dtail`/`dmap`/`dtailhealth`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CommonClientArgs {
    /// Comma-separated `host[:port]` discovery list (spec §4.9 method 1).
    #[arg(long)]
    pub servers: Option<String>,
    /// Newline-delimited server list file (spec §4.9 method 2).
    #[arg(long = "serverFile")]
    pub server_file: Option<PathBuf>,
    /// Hostname regex filtering the discovered candidates (spec §4.9 method 3).
    #[arg(long)]
    pub discovery: Option<String>,
    /// `none`, or a path to a TOML config file.
    #[arg(long, default_value = "none")]
    pub cfg: String,
    /// Connections-per-CPU, sizing the global connection throttle.
    #[arg(long = "cpc", default_value_t = 2)]
    pub cpc: usize,
    /// Accepted for CLI compatibility; host-key verification is out of
    /// scope (spec §1), so this never changes connection behavior.
    #[arg(long = "trustAllHosts")]
    pub trust_all_hosts: bool,
    /// Suppress hostname/channel-class prefixing; print raw content only.
    #[arg(long)]
    pub plain: bool,
    /// Disable ANSI colorization of the hostname prefix.
    #[arg(long = "noColor")]
    pub no_color: bool,
    /// Repeatable `-v` verbosity flag.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Explicit log level name, overriding `-v` (but not `RUST_LOG`).
    #[arg(long = "logLevel")]
    pub log_level: Option<String>,
    /// SSH username; defaults to `$USER`.
    #[arg(long = "user")]
    pub user: Option<String>,
    /// Private key path; defaults to `DTAIL_SSH_PRIVATE_KEYFILE_PATH`.
    #[arg(long = "key")]
    pub key: Option<PathBuf>,
}

/// Loads configuration per `--cfg`: the literal string `"none"` maps to
/// `Config::default()`, anything else is treated as a path (spec §6's
/// supplemental `--cfg none|path` surface, `SPEC_FULL.md` §6).
pub fn load_config(cfg: &str) -> Result<Config, DtailError> {
    if cfg.eq_ignore_ascii_case("none") {
        Ok(Config::default())
    } else {
        Config::load(Some(Path::new(cfg)))
    }
}

/// Runs all three discovery methods spec §4.9 names, in order of
/// precedence (`--serverFile` beats `--servers`), then filters by
/// `--discovery` and shuffles for load-spread. An empty result means
/// "serverless": the caller falls back to the in-process connector.
pub fn discover_servers(args: &CommonClientArgs) -> Result<Vec<ServerAddr>, DtailError> {
    let mut servers = if let Some(file) = &args.server_file {
        dtail_client::supervisor::discover_from_file(file)?
    } else if let Some(list) = &args.servers {
        dtail_client::supervisor::discover_from_list(list)?
    } else {
        Vec::new()
    };
    if let Some(pattern) = &args.discovery {
        servers = dtail_client::supervisor::discover_by_regex(&servers, pattern)?;
    }
    dtail_client::supervisor::shuffle_for_load_spread(&mut servers);
    Ok(servers)
}

/// A placeholder address the supervisor spawns exactly one worker for when
/// no real servers were discovered; the in-process connector factory below
/// ignores it entirely, matching the "serverless" glossary entry.
const SERVERLESS_PLACEHOLDER: &str = "serverless";

/// Resolves `--servers`/`--serverFile`/`--discovery` to a concrete worklist,
/// falling back to the one-entry serverless placeholder when nothing was
/// discovered (spec §4.8: "used when no remote servers are configured, to
/// preserve identical semantics for local execution").
pub fn resolve_servers(args: &CommonClientArgs) -> Result<(Vec<ServerAddr>, bool), DtailError> {
    let servers = discover_servers(args)?;
    if servers.is_empty() {
        Ok((vec![ServerAddr::new(SERVERLESS_PLACEHOLDER, 0)], true))
    } else {
        Ok((servers, false))
    }
}

/// The SSH username to authenticate as, or to log as the serverless
/// session's identity.
#[must_use]
pub fn resolve_user(args: &CommonClientArgs) -> String {
    args.user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "dtail".to_string())
}

/// Resolves `--key`, falling back to `DTAIL_SSH_PRIVATE_KEYFILE_PATH`, and
/// finally to password auth from `DTAIL_SSH_PASSWORD` (spec §6).
#[must_use]
pub fn resolve_ssh_auth(args: &CommonClientArgs) -> SshAuth {
    let key_path = args
        .key
        .clone()
        .or_else(|| std::env::var("DTAIL_SSH_PRIVATE_KEYFILE_PATH").ok().map(PathBuf::from));
    match key_path {
        Some(path) => SshAuth::PrivateKey {
            path,
            passphrase: std::env::var("DTAIL_SSH_KEY_PASSPHRASE").ok(),
        },
        None => SshAuth::Password(std::env::var("DTAIL_SSH_PASSWORD").unwrap_or_default()),
    }
}

/// Builds the `PermissionSet` + limiter-backed `ServerSession` the
/// in-process connector spawns for a given user. Open Question decision: a
/// serverless session has no real network boundary to enforce path
/// permissions across, so an unconfigured user gets an allow-all set rather
/// than the deny-everything empty set a *networked* unconfigured user would
/// get — local execution should behave like running the reader directly.
#[must_use]
pub fn build_local_session(config: &Config, user: &str) -> ServerSession {
    let permissions = match config.permissions_for(user) {
        Some(raw) => PermissionSet::compile(raw).unwrap_or_else(|_| PermissionSet::empty()),
        None => PermissionSet::compile(&UserPermissions {
            path_regexes: vec![".*".to_string()],
        })
        .expect("'.*' always compiles"),
    };
    ServerSession::new(
        user.to_string(),
        permissions,
        Arc::new(Limiter::new("cats", config.max_concurrent_cats)),
        Arc::new(Limiter::new("tails", config.max_concurrent_tails)),
    )
}

/// Builds the connector factory the supervisor drives: in-process when
/// `serverless`, a backoff-retrying `SshConnector` otherwise.
#[must_use]
pub fn build_connector_factory(
    serverless: bool,
    config: Arc<Config>,
    user: String,
    auth: SshAuth,
    retry: bool,
) -> Arc<dyn ConnectorFactory> {
    if serverless {
        Arc::new(move |_addr: &ServerAddr| -> Box<dyn Connector> {
            let config = config.clone();
            let user = user.clone();
            Box::new(InProcessConnector::new(move |server_io: BoxedIo| {
                let config = config.clone();
                let user = user.clone();
                Box::pin(async move {
                    let session = build_local_session(&config, &user);
                    session.run(server_io, CancellationToken::new()).await;
                }) as BoxFuture<'static, ()>
            }))
        })
    } else {
        Arc::new(move |addr: &ServerAddr| -> Box<dyn Connector> {
            let connector = SshConnector::new(addr.clone(), user.clone(), auth.clone());
            if retry {
                Box::new(RetryingConnector::new(connector, Duration::from_secs(2)))
            } else {
                Box::new(RetryingConnector::new(connector, Duration::from_secs(2)).with_max_attempts(1))
            }
        })
    }
}

/// Splits a `--files`-style comma list into individual paths.
#[must_use]
pub fn parse_file_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Prints every [`OutputLine`] received until the channel closes, honoring
/// `--plain` (content only) and `--noColor` (spec §6, §8's S1/S2 scenarios).
pub async fn print_output(mut rx: mpsc::Receiver<OutputLine>, plain: bool, no_color: bool) {
    let mut stdout = std::io::stdout().lock();
    while let Some(line) = rx.recv().await {
        if plain {
            let _ = writeln!(stdout, "{}", line.content);
            continue;
        }
        // Non-`--plain` display normalizes CR-LF line endings (spec §8's S2
        // scenario); `--plain` above preserves the server's raw bytes.
        let content = line.content.strip_suffix('\r').unwrap_or(&line.content);
        let label = match &line.class {
            ResultClass::Client => "CLIENT".to_string(),
            ResultClass::Server => "SERVER".to_string(),
            ResultClass::Remote(host) => host.clone(),
        };
        if no_color {
            let _ = writeln!(stdout, "{label}: {content}");
        } else {
            let _ = writeln!(stdout, "\x1b[36m{label}\x1b[0m: {content}");
        }
    }
}

/// Installs the interrupt policy spec §5 describes: the first `SIGINT`
/// dumps a stats snapshot, the second cancels; `SIGHUP`/`SIGTERM`/`SIGQUIT`
/// always cancel immediately; a 5s safety timer forces exit if cleanup
/// stalls after cancellation.
pub fn install_signal_handlers(cancel: CancellationToken, stats: Arc<StatsTracker>) {
    let seen_interrupt = Arc::new(AtomicBool::new(false));

    {
        let cancel = cancel.clone();
        let seen_interrupt = seen_interrupt.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if seen_interrupt.swap(true, Ordering::SeqCst) {
                    cancel.cancel();
                    return;
                }
                let snapshot = stats.snapshot(0);
                tracing::info!(%snapshot, "interrupted, stats dump (press again to cancel)");
            }
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut term) = signal(SignalKind::terminate()) else { return };
            let Ok(mut hup) = signal(SignalKind::hangup()) else { return };
            let Ok(mut quit) = signal(SignalKind::quit()) else { return };
            tokio::select! {
                _ = term.recv() => {}
                _ = hup.recv() => {}
                _ = quit.recv() => {}
            }
            cancel.cancel();
        });
    }

    tokio::spawn(async move {
        cancel.cancelled().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        tracing::warn!("cleanup did not finish within the 5s safety window, forcing exit");
        std::process::exit(ExitStatus::Critical.rank().into());
    });
}

/// How often [`spawn_stats_logger`] samples the supervisor's stats subsystem
/// (spec §4.9: "every few seconds").
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns the background task that periodically logs `{connected, new,
/// throttle, goroutines, cpus}` for the lifetime of one command invocation
/// (spec §4.9), complementing the interrupt-driven dump
/// [`install_signal_handlers`] already wires up.
pub fn spawn_stats_logger(supervisor: &dtail_client::ClientSupervisor, cancel: CancellationToken) {
    tokio::spawn(dtail_client::stats::run_periodic_log(
        supervisor.stats(),
        supervisor.throttle(),
        STATS_LOG_INTERVAL,
        cancel,
    ));
}
