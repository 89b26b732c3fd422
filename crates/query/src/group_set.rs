use std::collections::HashMap;

use dtail_protocol::wire::MapReduceMessage;

use crate::aggregate::Accumulator;
use crate::ast::{OrderBy, OrderDirection};

/// One finalized output row: the group key and the rendered select-list values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: Vec<String>,
    pub values: Vec<String>,
}

/// An ordered map from group-key tuple to a parallel accumulator vector (one
/// slot per select-list aggregate), per spec §3's `GroupSet` entity.
///
/// Iteration order has no semantic meaning on its own; [`GroupSet::rows`]
/// imposes the deterministic ORDER BY + group-key tie-break ordering.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    buckets: HashMap<Vec<String>, Vec<Accumulator>>,
}

impl GroupSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Returns the accumulator vector for `key`, initializing it from
    /// `template` (the identity accumulators for the select list) if absent.
    pub fn bucket_mut(&mut self, key: Vec<String>, template: &[Accumulator]) -> &mut Vec<Accumulator> {
        self.buckets.entry(key).or_insert_with(|| template.to_vec())
    }

    /// Merges `other` into `self`, per-aggregate, per spec §3's invariant
    /// that merge is associative and commutative and `emptyGroupSet` is the
    /// identity.
    pub fn merge(&mut self, other: GroupSet) {
        for (key, accs) in other.buckets {
            match self.buckets.get_mut(&key) {
                Some(existing) => {
                    for (slot, incoming) in existing.iter_mut().zip(accs.iter()) {
                        slot.merge(incoming);
                    }
                }
                None => {
                    self.buckets.insert(key, accs);
                }
            }
        }
    }

    /// Swaps out the live state for a fresh empty `GroupSet`, returning what
    /// was accumulated so far (spec §4.5's non-cumulative double buffering).
    pub fn swap_out(&mut self) -> GroupSet {
        std::mem::take(self)
    }

    /// Produces finalized rows ordered by `order_by` (default ascending by
    /// group key), breaking ties byte-wise on the stringified group key, and
    /// bounded by `limit`.
    #[must_use]
    pub fn rows(
        &self,
        order_by: Option<&OrderBy>,
        order_index: Option<usize>,
        limit: Option<usize>,
    ) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .buckets
            .iter()
            .map(|(key, accs)| Row {
                key: key.clone(),
                values: accs.iter().map(Accumulator::finalize).collect(),
            })
            .collect();

        rows.sort_by(|a, b| {
            let primary = match order_index {
                Some(idx) => compare_values(&a.values[idx], &b.values[idx]),
                None => std::cmp::Ordering::Equal,
            };
            let primary = match order_by.map(|o| o.direction) {
                Some(OrderDirection::Desc) => primary.reverse(),
                _ => primary,
            };
            primary.then_with(|| a.key.join("\u{0}").cmp(&b.key.join("\u{0}")))
        });

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Encodes every bucket as a `mapreduce` wire message (spec §3: "a
    /// key-value aggregated tuple payload"), one per group, carrying each
    /// aggregate's raw state (not its finalized display string) so the
    /// receiver can merge associatively via [`Accumulator::merge_wire`].
    #[must_use]
    pub fn to_wire_messages(&self, group_by: &[String], labels: &[String]) -> Vec<MapReduceMessage> {
        self.buckets
            .iter()
            .map(|(key, accs)| {
                let mut fields = Vec::new();
                for (col, value) in group_by.iter().zip(key.iter()) {
                    fields.push((col.clone(), value.clone()));
                }
                for (label, acc) in labels.iter().zip(accs.iter()) {
                    fields.extend(acc.wire_fields(label));
                }
                MapReduceMessage { fields }
            })
            .collect()
    }

    /// Merges one incoming wire tuple into this `GroupSet`: reconstructs the
    /// group key from `group_by` and folds each aggregate's wire fields via
    /// [`Accumulator::merge_wire`] (client-side `GlobalGroupSet` merge, spec
    /// §4.5).
    pub fn merge_wire_message(
        &mut self,
        msg: &MapReduceMessage,
        group_by: &[String],
        labels: &[String],
        template: &[Accumulator],
    ) {
        let field_map: HashMap<String, String> = msg.fields.iter().cloned().collect();
        let key: Vec<String> = group_by
            .iter()
            .map(|col| field_map.get(col).cloned().unwrap_or_default())
            .collect();
        let bucket = self.bucket_mut(key, template);
        for (slot, label) in bucket.iter_mut().zip(labels.iter()) {
            slot.merge_wire(label, &field_map);
        }
    }
}

/// Compares two rendered values numerically when both parse as numbers,
/// otherwise lexically; keeps `ORDER BY count(...)` sane while still
/// supporting ordering by string columns.
fn compare_values(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FuncName;

    #[test]
    fn merge_combines_same_key_buckets_associatively() {
        let mut a = GroupSet::new();
        let template = vec![Accumulator::init(FuncName::Count)];
        a.bucket_mut(vec!["h1".into()], &template)[0].fold("x");

        let mut b = GroupSet::new();
        b.bucket_mut(vec!["h1".into()], &template)[0].fold("y");
        b.bucket_mut(vec!["h2".into()], &template)[0].fold("z");

        a.merge(b);
        let rows = a.rows(None, None, None);
        assert_eq!(rows.len(), 2);
        let h1 = rows.iter().find(|r| r.key == vec!["h1".to_string()]).unwrap();
        assert_eq!(h1.values, vec!["2".to_string()]);
    }

    #[test]
    fn rows_break_ties_by_group_key_byte_order() {
        let mut set = GroupSet::new();
        let template = vec![Accumulator::init(FuncName::Count)];
        for host in ["h3", "h1", "h2"] {
            set.bucket_mut(vec![host.into()], &template)[0].fold("x");
        }
        let rows = set.rows(None, None, None);
        let keys: Vec<&str> = rows.iter().map(|r| r.key[0].as_str()).collect();
        assert_eq!(keys, vec!["h1", "h2", "h3"]);
    }

    #[test]
    fn swap_out_resets_to_empty_and_returns_prior_state() {
        let mut set = GroupSet::new();
        let template = vec![Accumulator::init(FuncName::Count)];
        set.bucket_mut(vec!["h1".into()], &template)[0].fold("x");

        let swapped = set.swap_out();
        assert!(set.is_empty());
        assert!(!swapped.is_empty());
    }

    #[test]
    fn limit_truncates_after_ordering() {
        let mut set = GroupSet::new();
        let template = vec![Accumulator::init(FuncName::Count)];
        for host in ["h1", "h2", "h3"] {
            set.bucket_mut(vec![host.into()], &template)[0].fold("x");
        }
        let rows = set.rows(None, None, Some(2));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn wire_round_trip_merges_counts_from_two_servers() {
        let template = vec![Accumulator::init(FuncName::Count)];
        let group_by = vec!["hostname".to_string()];
        let labels = vec!["count($line)".to_string()];

        let mut server_a = GroupSet::new();
        server_a.bucket_mut(vec!["h1".into()], &template)[0].fold("x");
        server_a.bucket_mut(vec!["h1".into()], &template)[0].fold("x");

        let mut server_b = GroupSet::new();
        server_b.bucket_mut(vec!["h1".into()], &template)[0].fold("x");

        let mut client_global = GroupSet::new();
        for msg in server_a.to_wire_messages(&group_by, &labels) {
            client_global.merge_wire_message(&msg, &group_by, &labels, &template);
        }
        for msg in server_b.to_wire_messages(&group_by, &labels) {
            client_global.merge_wire_message(&msg, &group_by, &labels, &template);
        }

        let rows = client_global.rows(None, None, None);
        assert_eq!(rows[0].values[0], "3");
    }
}
