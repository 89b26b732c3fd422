use std::path::PathBuf;
use std::time::Duration;

/// Which aggregate/scalar function a [`Expr::Call`] invokes (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncName {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    First,
    Last,
    MaskDigits,
    Md5Sum,
}

impl FuncName {
    /// Parses a function name case-insensitively.
    #[must_use]
    pub fn from_str(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "avg" => Self::Avg,
            "first" => Self::First,
            "last" => Self::Last,
            "maskdigits" => Self::MaskDigits,
            "md5sum" => Self::Md5Sum,
            _ => return None,
        })
    }
}

/// A scalar expression: a field reference, a literal, or a function call
/// over a nested expression (spec §4.5 grammar: `column | literal | aggregate`).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A `$name` field reference, or the special `$line` (the full raw line).
    Column(String),
    /// A bare literal (number or quoted string).
    Literal(String),
    /// `funcName(expr)`.
    Call(FuncName, Box<Expr>),
}

/// A comparison operator usable in a `where` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A `where` clause predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(Expr, CompareOp, Expr),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// One `select` list entry, with its rendered header label.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub label: String,
}

/// `asc`/`desc` for `order by`; `reverse` is a synonym for `desc` (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
}

/// `default` (pipe-delimited) or `csv` rendering of result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Default,
    Csv,
}

/// `outfile PATH` or `outfile append:PATH`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutfileSpec {
    pub path: PathBuf,
    pub append: bool,
}

/// Which input table a query consumes; `*`/`.`/empty all mean "any table".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelector {
    Any,
    Named(String),
}

impl TableSelector {
    #[must_use]
    pub fn matches(&self, table: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Named(name) => name.eq_ignore_ascii_case(table),
        }
    }
}

/// A fully parsed MapReduce program (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: TableSelector,
    pub select: Vec<SelectItem>,
    pub where_pred: Option<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub set_assignments: Vec<(String, Expr)>,
    pub log_format: LogFormat,
    pub outfile: Option<OutfileSpec>,
    pub interval: Option<Duration>,
    /// The exact text this query was parsed from, kept for the `.query` sidecar.
    pub raw: String,
}

impl Query {
    /// Whether accumulator state should persist across emission intervals.
    /// Default is non-cumulative unless an outfile is configured (spec §4.5).
    #[must_use]
    pub fn cumulative(&self) -> bool {
        self.outfile.is_some()
    }
}
