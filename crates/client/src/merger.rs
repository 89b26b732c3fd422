use tokio::sync::Mutex;

use dtail_protocol::wire::MapReduceMessage;
use dtail_query::{Query, QueryEngine, Row};

/// The client-side `GlobalGroupSet`: the one shared accumulator that every
/// connection's [`crate::handler::ClientHandler`] folds its `mapreduce`
/// messages into (spec.md §9's global mutable state item (b), spec §4.5).
///
/// Every other task only ever observes it through [`GlobalMerger::snapshot_rows`]
/// or [`GlobalMerger::swap_out_rows`]; mutation happens exclusively inside
/// [`GlobalMerger::merge`].
pub struct GlobalMerger {
    engine: Mutex<QueryEngine>,
}

impl GlobalMerger {
    #[must_use]
    pub fn new(query: Query) -> Self {
        Self {
            engine: Mutex::new(QueryEngine::new(query)),
        }
    }

    /// Folds one remote server's wire-encoded tuple into the shared state.
    pub async fn merge(&self, message: &MapReduceMessage) {
        self.engine.lock().await.merge_wire_message(message);
    }

    /// Snapshots the live state without disturbing it (cumulative display).
    pub async fn snapshot_rows(&self) -> Vec<Row> {
        self.engine.lock().await.snapshot_rows()
    }

    /// Swaps the live state for an empty one, returning what accumulated so
    /// far (non-cumulative display, outfile interval flushes).
    pub async fn swap_out_rows(&self) -> Vec<Row> {
        self.engine.lock().await.swap_out_rows()
    }

    /// Header labels for the select list, in order.
    pub async fn header(&self) -> Vec<String> {
        self.engine.lock().await.header()
    }

    /// Whether the query accumulates across intervals (`outfile` set) or
    /// resets every interval.
    pub async fn cumulative(&self) -> bool {
        self.engine.lock().await.query().cumulative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtail_query::parse;

    #[tokio::test]
    async fn merges_wire_tuples_from_two_simulated_servers() {
        let query = parse("from STATS select count($line) group by $hostname").unwrap();
        let merger = GlobalMerger::new(query);

        let mut server_a = QueryEngine::new(parse("from STATS select count($line) group by $hostname").unwrap());
        for _ in 0..5 {
            server_a.process_line("MAPREDUCE:STATS|hostname=h1").unwrap();
        }
        for message in server_a.wire_messages() {
            merger.merge(&message).await;
        }

        let mut server_b = QueryEngine::new(parse("from STATS select count($line) group by $hostname").unwrap());
        for _ in 0..3 {
            server_b.process_line("MAPREDUCE:STATS|hostname=h1").unwrap();
        }
        for message in server_b.wire_messages() {
            merger.merge(&message).await;
        }

        let rows = merger.snapshot_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], "8");
    }
}
