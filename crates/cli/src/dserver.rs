use std::ffi::OsString;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use dtail_config::Config;
use dtail_logging::Verbosity;
use dtail_protocol::ExitStatus;
use dtail_server::{auth, Limiter, PermissionSet, ServerSession};
use dtail_transport::{serve_ssh, BoxedIo, SshServerAuth};

use crate::common::load_config;

/// `dserver --cfg path|none --bindAddress H --port P [--logLevel L]
/// [--shutdownAfter sec] [--ssh-subsystem]` (spec §6): the SSH server
/// daemon, run either as a standalone listener or, when invoked as a
/// forced command by an externally configured system `sshd`, directly over
/// the inherited stdio channel.
#[derive(Parser, Debug)]
#[command(name = "dserver", about = "Run the dtail server daemon")]
pub struct Args {
    /// `none`, or a path to a TOML config file.
    #[arg(long, default_value = "none")]
    pub cfg: String,
    /// Address the standalone listener binds to.
    #[arg(long = "bindAddress", default_value = "0.0.0.0")]
    pub bind_address: String,
    /// Port the standalone listener binds to; `0` means "use the config's
    /// `bind_port`".
    #[arg(long, default_value_t = 0)]
    pub port: u16,
    /// Repeatable `-v` verbosity flag.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Explicit log level name, overriding `-v`.
    #[arg(long = "logLevel")]
    pub log_level: Option<String>,
    /// Cancel the whole process after this many seconds.
    #[arg(long = "shutdownAfter")]
    pub shutdown_after: Option<u64>,
    /// Run as a forced command over inherited stdio instead of binding a
    /// listener (the mode the client's hardcoded `REMOTE_COMMAND` invokes).
    #[arg(long = "ssh-subsystem")]
    pub ssh_subsystem: bool,
}

/// Parses `args` and runs the daemon in whichever of the two deployment
/// modes was requested, returning once the process is told to stop.
pub async fn run<I, T>(args: I) -> ExitStatus
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Args::parse_from(args);
    dtail_logging::init(Verbosity::from_flags(args.verbose, args.log_level.as_deref()));

    let config = match load_config(&args.cfg) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };

    let cancel = CancellationToken::new();
    dtail_client::spawn_shutdown_after(args.shutdown_after.map(Duration::from_secs), cancel.clone());

    if args.ssh_subsystem {
        run_subsystem(&config, cancel).await
    } else {
        run_standalone(config, &args, cancel).await
    }
}

/// Runs one session directly over the process's own stdin/stdout, the mode
/// a system `sshd` forced command invokes (spec §1's note that SSH
/// handshake details are out of scope: here there simply is no handshake,
/// `sshd` already performed it).
async fn run_subsystem(config: &Config, cancel: CancellationToken) -> ExitStatus {
    let user = std::env::var("USER").unwrap_or_else(|_| "dtail".to_string());
    let session = build_session(config, &user);
    let stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    session.run(stdio, cancel).await
}

/// Binds a standalone SSH listener and serves connections until cancelled,
/// loading (or generating, for first-run convenience) a host key.
async fn run_standalone(config: Arc<Config>, args: &Args, cancel: CancellationToken) -> ExitStatus {
    let port = if args.port == 0 { config.bind_port } else { args.port };
    let host_key = match load_or_generate_host_key(&config) {
        Ok(key) => key,
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };

    let authenticator = Arc::new(ConfigAuth { config: config.clone() });
    let config_for_sessions = config.clone();
    let serve = serve_ssh(
        (args.bind_address.clone(), port),
        vec![host_key],
        authenticator,
        move |io: BoxedIo, user: String| {
            let config = config_for_sessions.clone();
            let cancel = cancel.child_token();
            async move {
                let session = build_session(&config, &user);
                let _ = session.run(io, cancel).await;
            }
        },
    );

    tracing::info!(address = %args.bind_address, port, "dserver listening");
    match serve.await {
        Ok(()) => ExitStatus::Ok,
        Err(err) => {
            tracing::error!(error = %err, "{}", err.user_line());
            ExitStatus::Critical
        }
    }
}

fn build_session(config: &Config, user: &str) -> ServerSession {
    let permissions = config
        .permissions_for(user)
        .map(|raw| PermissionSet::compile(raw).unwrap_or_else(|_| PermissionSet::empty()))
        .unwrap_or_else(PermissionSet::empty);
    ServerSession::new(
        user.to_string(),
        permissions,
        Arc::new(Limiter::new("cats", config.max_concurrent_cats)),
        Arc::new(Limiter::new("tails", config.max_concurrent_tails)),
    )
}

fn load_or_generate_host_key(config: &Config) -> Result<russh_keys::key::KeyPair, dtail_protocol::error::DtailError> {
    match &config.host_key_path {
        Some(path) => russh_keys::load_secret_key(path, None).map_err(|e| dtail_protocol::error::DtailError::Config(
            format!("loading host key {}: {e}", path.display()),
        )),
        None => {
            tracing::warn!("no host_key_path configured, generating an ephemeral host key");
            Ok(russh_keys::key::KeyPair::generate_ed25519()
                .expect("ed25519 key generation cannot fail"))
        }
    }
}

/// Bridges [`SshServerAuth`] to [`dtail_config::Config`] and [`dtail_server::auth`]
/// (spec §4.6 step 1).
struct ConfigAuth {
    config: Arc<Config>,
}

impl SshServerAuth for ConfigAuth {
    fn accepts_public_key(&self, user: &str) -> bool {
        auth::accepts_public_key_user(&self.config, user)
    }

    fn accepts_password(&self, user: &str, password: &str, peer_addr: Option<SocketAddr>) -> bool {
        auth::accepts_special_user(&self.config, user, password, peer_addr.map(|addr| addr.ip()))
    }
}
