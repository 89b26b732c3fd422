use md5::{Digest, Md5};

use crate::ast::FuncName;

/// Per-group accumulator state for one selected aggregate (spec §4.5:
/// `(init, fold(line), merge(a,b), finalize)`).
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count(u64),
    Sum(f64),
    Min(Option<f64>),
    Max(Option<f64>),
    Avg { sum: f64, count: u64 },
    First(Option<String>),
    Last(Option<String>),
    /// Scalar transform applied per row; last value wins (spec §4.5 notes
    /// `maskdigits`/`md5sum` are "scalar transforms via set").
    MaskDigits(Option<String>),
    Md5Sum(Option<String>),
}

impl Accumulator {
    /// `init`: the identity accumulator for a function.
    #[must_use]
    pub fn init(func: FuncName) -> Self {
        match func {
            FuncName::Count => Self::Count(0),
            FuncName::Sum => Self::Sum(0.0),
            FuncName::Min => Self::Min(None),
            FuncName::Max => Self::Max(None),
            FuncName::Avg => Self::Avg { sum: 0.0, count: 0 },
            FuncName::First => Self::First(None),
            FuncName::Last => Self::Last(None),
            FuncName::MaskDigits => Self::MaskDigits(None),
            FuncName::Md5Sum => Self::Md5Sum(None),
        }
    }

    /// `fold(line)`: incorporates one raw field value into this accumulator.
    pub fn fold(&mut self, value: &str) {
        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(total) => *total += value.parse::<f64>().unwrap_or(0.0),
            Self::Min(current) => {
                if let Ok(v) = value.parse::<f64>() {
                    *current = Some(current.map_or(v, |c| c.min(v)));
                }
            }
            Self::Max(current) => {
                if let Ok(v) = value.parse::<f64>() {
                    *current = Some(current.map_or(v, |c| c.max(v)));
                }
            }
            Self::Avg { sum, count } => {
                if let Ok(v) = value.parse::<f64>() {
                    *sum += v;
                    *count += 1;
                }
            }
            Self::First(current) => {
                if current.is_none() {
                    *current = Some(value.to_string());
                }
            }
            Self::Last(current) => *current = Some(value.to_string()),
            Self::MaskDigits(current) => *current = Some(mask_digits(value)),
            Self::Md5Sum(current) => *current = Some(md5_hex(value)),
        }
    }

    /// `merge(a, b)`: combines two accumulators of the same kind
    /// (associative, commutative, as required for cross-server merge).
    pub fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Self::Count(a), Self::Count(b)) => *a += b,
            (Self::Sum(a), Self::Sum(b)) => *a += b,
            (Self::Min(a), Self::Min(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (Some(x), None) => Some(x),
                    (None, other) => other,
                };
            }
            (Self::Max(a), Self::Max(b)) => {
                *a = match (*a, *b) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (Some(x), None) => Some(x),
                    (None, other) => other,
                };
            }
            (Self::Avg { sum: sa, count: ca }, Self::Avg { sum: sb, count: cb }) => {
                *sa += sb;
                *ca += cb;
            }
            (Self::First(a), Self::First(b)) => {
                if a.is_none() {
                    *a = b.clone();
                }
            }
            (Self::Last(a), Self::Last(b)) => {
                if b.is_some() {
                    *a = b.clone();
                }
            }
            (Self::MaskDigits(a), Self::MaskDigits(b)) => {
                if b.is_some() {
                    *a = b.clone();
                }
            }
            (Self::Md5Sum(a), Self::Md5Sum(b)) => {
                if b.is_some() {
                    *a = b.clone();
                }
            }
            _ => {}
        }
    }

    /// `finalize`: renders the accumulator's current value as output text.
    #[must_use]
    pub fn finalize(&self) -> String {
        match self {
            Self::Count(n) => n.to_string(),
            Self::Sum(total) => format_number(*total),
            Self::Min(v) | Self::Max(v) => v.map(format_number).unwrap_or_default(),
            Self::Avg { sum, count } => {
                if *count == 0 {
                    String::new()
                } else {
                    format_number(sum / *count as f64)
                }
            }
            Self::First(v) | Self::Last(v) | Self::MaskDigits(v) | Self::Md5Sum(v) => {
                v.clone().unwrap_or_default()
            }
        }
    }
}

impl Accumulator {
    /// Encodes this accumulator's raw state as wire fields keyed off
    /// `label`, so a peer can reconstruct it via [`Accumulator::merge_wire`]
    /// without losing precision to a finalized display string — `avg`
    /// cannot be re-averaged from its finalized value alone, so its sum and
    /// count travel as separate fields (spec §4.5, §3's `mapreduce`
    /// "key-value aggregated tuple payload").
    #[must_use]
    pub fn wire_fields(&self, label: &str) -> Vec<(String, String)> {
        match self {
            Self::Count(n) => vec![(label.to_string(), n.to_string())],
            Self::Sum(v) => vec![(label.to_string(), v.to_string())],
            Self::Min(v) | Self::Max(v) => {
                vec![(label.to_string(), v.map(|x| x.to_string()).unwrap_or_default())]
            }
            Self::Avg { sum, count } => vec![
                (format!("{label}.sum"), sum.to_string()),
                (format!("{label}.count"), count.to_string()),
            ],
            Self::First(v) | Self::Last(v) | Self::MaskDigits(v) | Self::Md5Sum(v) => {
                vec![(label.to_string(), v.clone().unwrap_or_default())]
            }
        }
    }

    /// Merges wire-encoded fields (produced by [`Accumulator::wire_fields`])
    /// addressed to `label` into `self`. Used on the client to fold a
    /// remote server's snapshot into the `GlobalGroupSet` (spec §4.5).
    pub fn merge_wire(&mut self, label: &str, fields: &std::collections::HashMap<String, String>) {
        match self {
            Self::Count(n) => {
                if let Some(v) = fields.get(label).and_then(|s| s.parse::<u64>().ok()) {
                    *n += v;
                }
            }
            Self::Sum(total) => {
                if let Some(v) = fields.get(label).and_then(|s| s.parse::<f64>().ok()) {
                    *total += v;
                }
            }
            Self::Min(current) => {
                if let Some(v) = fields.get(label).and_then(|s| s.parse::<f64>().ok()) {
                    *current = Some(current.map_or(v, |c| c.min(v)));
                }
            }
            Self::Max(current) => {
                if let Some(v) = fields.get(label).and_then(|s| s.parse::<f64>().ok()) {
                    *current = Some(current.map_or(v, |c| c.max(v)));
                }
            }
            Self::Avg { sum, count } => {
                if let Some(v) = fields
                    .get(&format!("{label}.sum"))
                    .and_then(|s| s.parse::<f64>().ok())
                {
                    *sum += v;
                }
                if let Some(v) = fields
                    .get(&format!("{label}.count"))
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    *count += v;
                }
            }
            Self::First(current) => {
                if current.is_none() {
                    if let Some(v) = fields.get(label) {
                        if !v.is_empty() {
                            *current = Some(v.clone());
                        }
                    }
                }
            }
            Self::Last(current) | Self::MaskDigits(current) | Self::Md5Sum(current) => {
                if let Some(v) = fields.get(label) {
                    if !v.is_empty() {
                        *current = Some(v.clone());
                    }
                }
            }
        }
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v}")
    }
}

/// Replaces every ASCII digit with `#`, a common masking convention for
/// values that might carry sensitive numeric data (IDs, ports, PII).
#[must_use]
pub fn mask_digits(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_digit() { '#' } else { c })
        .collect()
}

#[must_use]
pub fn md5_hex(value: &str) -> String {
    let digest = Md5::digest(value.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_folds_and_merges() {
        let mut a = Accumulator::init(FuncName::Count);
        a.fold("x");
        a.fold("y");
        let mut b = Accumulator::init(FuncName::Count);
        b.fold("z");
        a.merge(&b);
        assert_eq!(a.finalize(), "3");
    }

    #[test]
    fn avg_merges_sum_and_count() {
        let mut a = Accumulator::init(FuncName::Avg);
        a.fold("10");
        a.fold("20");
        let mut b = Accumulator::init(FuncName::Avg);
        b.fold("30");
        a.merge(&b);
        assert_eq!(a.finalize(), "20");
    }

    #[test]
    fn min_max_ignore_non_numeric() {
        let mut min = Accumulator::init(FuncName::Min);
        min.fold("5");
        min.fold("notanumber");
        min.fold("2");
        assert_eq!(min.finalize(), "2");
    }

    #[test]
    fn first_keeps_earliest_last_keeps_latest() {
        let mut first = Accumulator::init(FuncName::First);
        first.fold("a");
        first.fold("b");
        assert_eq!(first.finalize(), "a");

        let mut last = Accumulator::init(FuncName::Last);
        last.fold("a");
        last.fold("b");
        assert_eq!(last.finalize(), "b");
    }

    #[test]
    fn maskdigits_replaces_ascii_digits() {
        assert_eq!(mask_digits("user42 port=8080"), "user## port=####");
    }

    #[test]
    fn merge_is_associative_for_sum() {
        let mut a = Accumulator::init(FuncName::Sum);
        a.fold("1");
        let mut b = Accumulator::init(FuncName::Sum);
        b.fold("2");
        let mut c = Accumulator::init(FuncName::Sum);
        c.fold("3");

        let mut ab_then_c = a.clone();
        ab_then_c.merge(&b);
        ab_then_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_then_bc = a.clone();
        a_then_bc.merge(&bc);

        assert_eq!(ab_then_c.finalize(), a_then_bc.finalize());
    }

    #[test]
    fn wire_roundtrip_preserves_count() {
        let mut a = Accumulator::init(FuncName::Count);
        a.fold("x");
        a.fold("y");
        let fields: std::collections::HashMap<String, String> =
            a.wire_fields("count($line)").into_iter().collect();

        let mut receiver = Accumulator::init(FuncName::Count);
        receiver.merge_wire("count($line)", &fields);
        assert_eq!(receiver.finalize(), "2");
    }

    #[test]
    fn avg_wire_fields_carry_sum_and_count_separately() {
        let mut a = Accumulator::init(FuncName::Avg);
        a.fold("10");
        a.fold("20");
        let fields_a: std::collections::HashMap<String, String> =
            a.wire_fields("avg(latency)").into_iter().collect();
        assert_eq!(fields_a.get("avg(latency).sum").unwrap(), "30");
        assert_eq!(fields_a.get("avg(latency).count").unwrap(), "2");

        let mut b = Accumulator::init(FuncName::Avg);
        b.fold("100");
        let fields_b: std::collections::HashMap<String, String> =
            b.wire_fields("avg(latency)").into_iter().collect();

        let mut merged = Accumulator::init(FuncName::Avg);
        merged.merge_wire("avg(latency)", &fields_a);
        merged.merge_wire("avg(latency)", &fields_b);
        // (10 + 20 + 100) / 3, not a naive average of two averages.
        let value: f64 = merged.finalize().parse().unwrap();
        assert!((value - 130.0 / 3.0).abs() < 1e-9);
    }
}
