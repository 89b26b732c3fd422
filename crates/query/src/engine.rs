use std::collections::HashMap;

use dtail_protocol::error::DtailError;
use dtail_protocol::wire::MapReduceMessage;

use crate::aggregate::Accumulator;
use crate::ast::{CompareOp, Expr, Predicate, Query};
use crate::group_set::{GroupSet, Row};

/// Tokenizes a `MAPREDUCE:<table>|k=v|k=v` data line into its table name and
/// a field map, per spec §4.5 step 1. Returns `None` if the line does not
/// carry the `MAPREDUCE:` marker at all.
#[must_use]
pub fn tokenize_mapreduce_line(line: &str) -> Option<(String, HashMap<String, String>)> {
    let rest = line.strip_prefix("MAPREDUCE:")?;
    let mut parts = rest.split('|');
    let table = parts.next()?.to_string();
    let mut fields = HashMap::new();
    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            fields.insert(k.to_string(), v.to_string());
        }
    }
    Some((table, fields))
}

fn resolve(expr: &Expr, line: &str, fields: &HashMap<String, String>) -> String {
    match expr {
        Expr::Literal(lit) => lit.clone(),
        Expr::Column(name) if name == "line" => line.to_string(),
        Expr::Column(name) => fields.get(name).cloned().unwrap_or_default(),
        Expr::Call(func, inner) => {
            let value = resolve(inner, line, fields);
            match func {
                crate::ast::FuncName::MaskDigits => crate::aggregate::mask_digits(&value),
                crate::ast::FuncName::Md5Sum => crate::aggregate::md5_hex(&value),
                _ => value,
            }
        }
    }
}

fn eval_predicate(pred: &Predicate, line: &str, fields: &HashMap<String, String>) -> bool {
    match pred {
        Predicate::Compare(left, op, right) => {
            let l = resolve(left, line, fields);
            let r = resolve(right, line, fields);
            compare(&l, &r, *op)
        }
        Predicate::And(a, b) => eval_predicate(a, line, fields) && eval_predicate(b, line, fields),
        Predicate::Or(a, b) => eval_predicate(a, line, fields) || eval_predicate(b, line, fields),
        Predicate::Not(inner) => !eval_predicate(inner, line, fields),
    }
}

fn compare(l: &str, r: &str, op: CompareOp) -> bool {
    let numeric = l.parse::<f64>().ok().zip(r.parse::<f64>().ok());
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Lt => numeric.map_or_else(|| l < r, |(a, b)| a < b),
        CompareOp::Le => numeric.map_or_else(|| l <= r, |(a, b)| a <= b),
        CompareOp::Gt => numeric.map_or_else(|| l > r, |(a, b)| a > b),
        CompareOp::Ge => numeric.map_or_else(|| l >= r, |(a, b)| a >= b),
    }
}

/// Extracts the aggregate function at the root of a select-list expression,
/// if any; select items with a bare column or literal are folded as `last`
/// so group-by display columns still track the most recent value.
fn template_for(expr: &Expr) -> Accumulator {
    match expr {
        Expr::Call(func, _) => Accumulator::init(*func),
        _ => Accumulator::init(crate::ast::FuncName::Last),
    }
}

fn fold_value(expr: &Expr) -> Expr {
    match expr {
        Expr::Call(_, inner) => (**inner).clone(),
        other => other.clone(),
    }
}

/// Server-local streaming MapReduce evaluator (C5). Consumes one data line
/// at a time, folding it into the live [`GroupSet`].
pub struct QueryEngine {
    query: Query,
    templates: Vec<Accumulator>,
    fold_exprs: Vec<Expr>,
    order_index: Option<usize>,
    groups: GroupSet,
}

impl QueryEngine {
    /// Builds an engine for `query`.
    #[must_use]
    pub fn new(query: Query) -> Self {
        let templates: Vec<Accumulator> = query.select.iter().map(|item| template_for(&item.expr)).collect();
        let fold_exprs: Vec<Expr> = query.select.iter().map(|item| fold_value(&item.expr)).collect();
        let order_index = query.order_by.as_ref().and_then(|order_by| {
            query.select.iter().position(|item| item.expr == order_by.expr)
        });
        Self {
            query,
            templates,
            fold_exprs,
            order_index,
            groups: GroupSet::new(),
        }
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Feeds one raw record line through table-match, `where`, `set`, and
    /// group-by/fold (spec §4.5 steps 1-4). A line for a different table, or
    /// one the `where` predicate rejects, is silently skipped.
    pub fn process_line(&mut self, line: &str) -> Result<(), DtailError> {
        let Some((table, mut fields)) = tokenize_mapreduce_line(line) else {
            return Ok(());
        };
        if !self.query.table.matches(&table) {
            return Ok(());
        }
        if let Some(pred) = &self.query.where_pred {
            if !eval_predicate(pred, line, &fields) {
                return Ok(());
            }
        }
        for (name, expr) in &self.query.set_assignments {
            let value = resolve(expr, line, &fields);
            fields.insert(name.clone(), value);
        }

        let key: Vec<String> = self
            .query
            .group_by
            .iter()
            .map(|col| {
                if col == "line" {
                    line.to_string()
                } else {
                    fields.get(col).cloned().unwrap_or_default()
                }
            })
            .collect();

        let bucket = self.groups.bucket_mut(key, &self.templates);
        for (slot, expr) in bucket.iter_mut().zip(self.fold_exprs.iter()) {
            slot.fold(&resolve(expr, line, &fields));
        }
        Ok(())
    }

    /// Snapshots the current accumulator state into ordered, limited rows
    /// without disturbing it (used by cumulative emission).
    #[must_use]
    pub fn snapshot_rows(&self) -> Vec<Row> {
        self.groups
            .rows(self.query.order_by.as_ref(), self.order_index, self.query.limit)
    }

    /// Atomically swaps the live accumulator for an empty one and returns the
    /// rows computed from what was swapped out (spec §4.5's non-cumulative
    /// double buffering).
    pub fn swap_out_rows(&mut self) -> Vec<Row> {
        let swapped = self.groups.swap_out();
        swapped.rows(self.query.order_by.as_ref(), self.order_index, self.query.limit)
    }

    /// Merges a remote `GroupSet` snapshot into this engine's state (client
    /// side `GlobalGroupSet` merge, spec §4.5).
    pub fn merge_groups(&mut self, other: GroupSet) {
        self.groups.merge(other);
    }

    /// The header labels for the select list, in order.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        self.query.select.iter().map(|item| item.label.clone()).collect()
    }

    /// Encodes the live accumulator state as `mapreduce` wire messages
    /// without disturbing it (cumulative emission, spec §4.5).
    #[must_use]
    pub fn wire_messages(&self) -> Vec<MapReduceMessage> {
        self.groups.to_wire_messages(&self.query.group_by, &self.header())
    }

    /// Atomically swaps the live accumulator for an empty one and encodes
    /// what was swapped out as wire messages (non-cumulative emission,
    /// spec §4.5's double buffering).
    pub fn wire_messages_swap(&mut self) -> Vec<MapReduceMessage> {
        let swapped = self.groups.swap_out();
        swapped.to_wire_messages(&self.query.group_by, &self.header())
    }

    /// Merges one incoming `mapreduce` wire message into this engine's
    /// `GroupSet` (client-side `GlobalGroupSet` merge, spec §4.5).
    pub fn merge_wire_message(&mut self, msg: &MapReduceMessage) {
        let labels = self.header();
        self.groups
            .merge_wire_message(msg, &self.query.group_by, &labels, &self.templates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn groups_by_hostname_and_counts_matching_lines() {
        let query = parse("from STATS select count($line),$hostname group by $hostname").unwrap();
        let mut engine = QueryEngine::new(query);
        for host in ["h1", "h1", "h2"] {
            engine
                .process_line(&format!("MAPREDUCE:STATS|hostname={host}|latency=5"))
                .unwrap();
        }
        let rows = engine.snapshot_rows();
        assert_eq!(rows.len(), 2);
        let h1 = rows.iter().find(|r| r.key == vec!["h1".to_string()]).unwrap();
        assert_eq!(h1.values[0], "2");
    }

    #[test]
    fn where_predicate_filters_rows() {
        let query = parse("from STATS select count($line) where $level == 'ERROR'").unwrap();
        let mut engine = QueryEngine::new(query);
        engine
            .process_line("MAPREDUCE:STATS|level=ERROR|msg=boom")
            .unwrap();
        engine
            .process_line("MAPREDUCE:STATS|level=INFO|msg=ok")
            .unwrap();
        let rows = engine.snapshot_rows();
        assert_eq!(rows[0].values[0], "1");
    }

    #[test]
    fn non_matching_table_is_ignored() {
        let query = parse("from STATS select count($line)").unwrap();
        let mut engine = QueryEngine::new(query);
        engine.process_line("MAPREDUCE:OTHER|x=1").unwrap();
        let rows = engine.snapshot_rows();
        assert!(rows.is_empty());
    }

    #[test]
    fn swap_out_resets_state_for_non_cumulative_emission() {
        let query = parse("from STATS select count($line)").unwrap();
        let mut engine = QueryEngine::new(query);
        engine.process_line("MAPREDUCE:STATS|x=1").unwrap();
        let first = engine.swap_out_rows();
        assert_eq!(first[0].values[0], "1");
        let second = engine.snapshot_rows();
        assert!(second.is_empty());
    }

    #[test]
    fn order_by_desc_orders_counts_descending() {
        let query =
            parse("from STATS select count($line),$hostname group by $hostname order by count($line) desc")
                .unwrap();
        let mut engine = QueryEngine::new(query);
        for (host, n) in [("h1", 1), ("h2", 3), ("h3", 2)] {
            for _ in 0..n {
                engine
                    .process_line(&format!("MAPREDUCE:STATS|hostname={host}"))
                    .unwrap();
            }
        }
        let rows = engine.snapshot_rows();
        let hosts: Vec<&str> = rows.iter().map(|r| r.key[0].as_str()).collect();
        assert_eq!(hosts, vec!["h2", "h3", "h1"]);
    }

    #[test]
    fn wire_messages_merge_across_two_server_engines() {
        let query_text = "from STATS select count($line) group by $hostname";
        let mut server_a = QueryEngine::new(parse(query_text).unwrap());
        let mut server_b = QueryEngine::new(parse(query_text).unwrap());
        for _ in 0..20 {
            server_a
                .process_line("MAPREDUCE:STATS|hostname=h1")
                .unwrap();
        }
        for _ in 0..20 {
            server_b
                .process_line("MAPREDUCE:STATS|hostname=h1")
                .unwrap();
        }

        let mut client = QueryEngine::new(parse(query_text).unwrap());
        for msg in server_a.wire_messages() {
            client.merge_wire_message(&msg);
        }
        for msg in server_b.wire_messages() {
            client.merge_wire_message(&msg);
        }

        let rows = client.snapshot_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], "40");
    }
}
