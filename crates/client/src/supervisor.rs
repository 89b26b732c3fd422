use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use dtail_protocol::error::DtailError;
use dtail_protocol::server_addr::{parse_server_list, ServerAddr};
use dtail_protocol::wire::ResultClass;
use dtail_protocol::ExitStatus;
use dtail_transport::Connector;

use crate::handler::{ClientHandler, OutputLine};
use crate::merger::GlobalMerger;
use crate::stats::StatsTracker;

/// Reads a newline-delimited server list file (one `host[:port]` per line,
/// `#`-prefixed lines ignored), the second of the three discovery methods
/// spec §4.9 names.
pub fn discover_from_file(path: &Path) -> Result<Vec<ServerAddr>, DtailError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DtailError::Config(format!("reading server list {}: {e}", path.display())))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// Filters a candidate address list by a hostname regex, the third
/// discovery method spec §4.9 names ("regex-filter predicate").
pub fn discover_by_regex(candidates: &[ServerAddr], pattern: &str) -> Result<Vec<ServerAddr>, DtailError> {
    let re = regex::Regex::new(pattern)
        .map_err(|e| DtailError::Config(format!("invalid discovery regex '{pattern}': {e}")))?;
    Ok(candidates
        .iter()
        .filter(|addr| re.is_match(&addr.host))
        .cloned()
        .collect())
}

/// Parses the comma-separated `--servers` discovery list, the first method
/// spec §4.9 names.
pub fn discover_from_list(raw: &str) -> Result<Vec<ServerAddr>, DtailError> {
    parse_server_list(raw)
}

/// Shuffles discovered servers in place to spread load across workers that
/// race for the global throttle (spec §4.9: "shuffles for load-spread").
pub fn shuffle_for_load_spread(servers: &mut [ServerAddr]) {
    servers.shuffle(&mut rand::thread_rng());
}

/// Builds a [`Connector`] for one discovered server. Implemented once per
/// binary (SSH for networked modes, in-process for the serverless default),
/// so the supervisor never has to know which kind it is driving.
pub trait ConnectorFactory: Send + Sync {
    fn build(&self, server: &ServerAddr) -> Box<dyn Connector>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&ServerAddr) -> Box<dyn Connector> + Send + Sync,
{
    fn build(&self, server: &ServerAddr) -> Box<dyn Connector> {
        self(server)
    }
}

/// Component C9: discovers servers, launches one worker per server under a
/// global connection throttle, and aggregates the worst exit status.
pub struct ClientSupervisor {
    throttle: Arc<Semaphore>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
}

impl ClientSupervisor {
    /// `connections_per_cpu` times the detected CPU count sets the global
    /// throttle capacity (spec §4.9: "capacity `connectionsPerCPU × ncpu`").
    #[must_use]
    pub fn new(connections_per_cpu: usize, cancel: CancellationToken) -> Self {
        let capacity = (connections_per_cpu * num_cpus::get()).max(1);
        Self {
            throttle: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(StatsTracker::new()),
            cancel,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StatsTracker> {
        self.stats.clone()
    }

    #[must_use]
    pub fn throttle(&self) -> Arc<Semaphore> {
        self.throttle.clone()
    }

    /// Launches one worker per server, each taking a throttle permit before
    /// connecting, and returns `max(statuses)` once every worker has
    /// finished (spec §4.9, §8's boundary behavior: "output from the N-k
    /// others is complete" even when k servers fail to dial).
    pub async fn run(
        &self,
        servers: Vec<ServerAddr>,
        command: Arc<str>,
        connectors: Arc<dyn ConnectorFactory>,
        output: mpsc::Sender<OutputLine>,
        merger: Option<Arc<GlobalMerger>>,
    ) -> ExitStatus {
        let mut workers = Vec::with_capacity(servers.len());
        for server in servers {
            let throttle = self.throttle.clone();
            let stats = self.stats.clone();
            let cancel = self.cancel.child_token();
            let command = command.clone();
            let connectors = connectors.clone();
            let output = output.clone();
            let merger = merger.clone();
            workers.push(tokio::spawn(async move {
                run_one_server(server, throttle, stats, cancel, command, connectors, output, merger).await
            }));
        }

        let mut status = ExitStatus::Ok;
        for worker in workers {
            match worker.await {
                Ok(worker_status) => status = status.combine(worker_status),
                Err(_) => status = status.combine(ExitStatus::Critical),
            }
        }
        status
    }
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(throttle, stats, cancel, command, connectors, output, merger), fields(server = %server))]
async fn run_one_server(
    server: ServerAddr,
    throttle: Arc<Semaphore>,
    stats: Arc<StatsTracker>,
    cancel: CancellationToken,
    command: Arc<str>,
    connectors: Arc<dyn ConnectorFactory>,
    output: mpsc::Sender<OutputLine>,
    merger: Option<Arc<GlobalMerger>>,
) -> ExitStatus {
    stats.task_started();
    let _guard = task_guard(&stats);

    let _permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return ExitStatus::Ok,
        permit = throttle.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ExitStatus::Critical,
        },
    };

    let connector = connectors.build(&server);
    let io = match connector.connect(cancel.clone()).await {
        Ok(io) => io,
        Err(err) => {
            tracing::error!(server = %server, error = %err, "{}", err.user_line());
            return ExitStatus::Critical;
        }
    };
    stats.connection_opened();

    let handler = ClientHandler::new(server.host.clone(), ResultClass::Remote(server.host.clone()));
    let result = handler
        .run(io, &command, &output, merger.as_deref(), &cancel)
        .await;
    stats.connection_closed();

    match result {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(server = %server, error = %err, "connection ended with an error");
            ExitStatus::Critical
        }
    }
}

/// Decrements the goroutine counter on every exit path out of
/// `run_one_server`, including the early `return`s.
fn task_guard(stats: &Arc<StatsTracker>) -> impl Drop + '_ {
    struct Guard<'a>(&'a StatsTracker);
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.0.task_finished();
        }
    }
    Guard(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn discover_from_list_parses_comma_separated_hosts() {
        let servers = discover_from_list("web1,web2:2201").unwrap();
        assert_eq!(servers.len(), 2);
    }

    #[test]
    fn discover_from_file_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "web1:2200").unwrap();
        let servers = discover_from_file(file.path()).unwrap();
        assert_eq!(servers, vec![ServerAddr::new("web1", 2200)]);
    }

    #[test]
    fn discover_by_regex_filters_matching_hosts() {
        let candidates = vec![ServerAddr::new("web1", 22), ServerAddr::new("db1", 22)];
        let filtered = discover_by_regex(&candidates, "^web").unwrap();
        assert_eq!(filtered, vec![ServerAddr::new("web1", 22)]);
    }

    #[test]
    fn shuffle_preserves_all_elements() {
        let mut servers: Vec<ServerAddr> = (0..10).map(|i| ServerAddr::new(format!("h{i}"), 22)).collect();
        let original = servers.clone();
        shuffle_for_load_spread(&mut servers);
        assert_eq!(servers.len(), original.len());
        for addr in &original {
            assert!(servers.contains(addr));
        }
    }
}
