use std::time::Duration;

use dtail_protocol::error::DtailError;

use crate::ast::{
    CompareOp, Expr, FuncName, LogFormat, OrderBy, OrderDirection, OutfileSpec, Predicate, Query,
    SelectItem, TableSelector,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Symbol(char),
    Op(&'static str),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, DtailError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c == '\'' || c == '"' {
                tokens.push(Token::Literal(self.read_quoted(c)?));
            } else if c == '(' || c == ')' || c == ',' {
                self.chars.next();
                tokens.push(Token::Symbol(c));
            } else if "=!<>".contains(c) {
                tokens.push(Token::Op(self.read_op()));
            } else {
                tokens.push(Token::Ident(self.read_word()));
            }
        }
        Ok(tokens)
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, DtailError> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => {
                    return Err(DtailError::Query(format!(
                        "unterminated string literal starting with {quote}"
                    )))
                }
            }
        }
    }

    fn read_op(&mut self) -> &'static str {
        let first = self.chars.next().unwrap();
        let second = self.chars.peek().copied();
        match (first, second) {
            ('=', Some('=')) => {
                self.chars.next();
                "=="
            }
            ('!', Some('=')) => {
                self.chars.next();
                "!="
            }
            ('<', Some('=')) => {
                self.chars.next();
                "<="
            }
            ('>', Some('=')) => {
                self.chars.next();
                ">="
            }
            ('=', _) => "==",
            ('<', _) => "<",
            ('>', _) => ">",
            _ => "==",
        }
    }

    fn read_word(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || "(),=!<>".contains(c) {
                break;
            }
            out.push(c);
            self.chars.next();
        }
        out
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), DtailError> {
        if self.peek_keyword(kw) {
            self.pos += 1;
            Ok(())
        } else {
            Err(DtailError::Query(format!(
                "expected keyword '{kw}' at token {}",
                self.pos
            )))
        }
    }

    fn expect_symbol(&mut self, sym: char) -> Result<(), DtailError> {
        match self.bump() {
            Some(Token::Symbol(s)) if s == sym => Ok(()),
            other => Err(DtailError::Query(format!(
                "expected '{sym}', found {other:?}"
            ))),
        }
    }

    fn parse_query(&mut self, raw: &str) -> Result<Query, DtailError> {
        let table = if self.peek_keyword("from") {
            self.pos += 1;
            parse_table(self.bump())?
        } else {
            TableSelector::Any
        };

        self.expect_keyword("select")?;
        let mut select = vec![self.parse_select_item()?];
        while matches!(self.peek(), Some(Token::Symbol(','))) {
            self.pos += 1;
            select.push(self.parse_select_item()?);
        }

        let where_pred = if self.peek_keyword("where") {
            self.pos += 1;
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.peek_keyword("group") {
            self.pos += 1;
            self.expect_keyword("by")?;
            group_by.push(self.parse_group_by_column()?);
            while matches!(self.peek(), Some(Token::Symbol(','))) {
                self.pos += 1;
                group_by.push(self.parse_group_by_column()?);
            }
        }

        let order_by = if self.peek_keyword("order") {
            self.pos += 1;
            self.expect_keyword("by")?;
            let expr = self.parse_expr()?;
            let direction = if self.peek_keyword("desc") || self.peek_keyword("reverse") {
                self.pos += 1;
                OrderDirection::Desc
            } else if self.peek_keyword("asc") {
                self.pos += 1;
                OrderDirection::Asc
            } else {
                OrderDirection::Asc
            };
            Some(OrderBy { expr, direction })
        } else {
            None
        };

        let limit = if self.peek_keyword("limit") {
            self.pos += 1;
            match self.bump() {
                Some(Token::Ident(n)) => Some(n.parse::<usize>().map_err(|_| {
                    DtailError::Query(format!("invalid limit '{n}'"))
                })?),
                other => return Err(DtailError::Query(format!("expected number after limit, found {other:?}"))),
            }
        } else {
            None
        };

        let mut set_assignments = Vec::new();
        if self.peek_keyword("set") {
            self.pos += 1;
            loop {
                let name = self.parse_ident_or_column()?;
                self.expect_op("==")?;
                let expr = self.parse_expr()?;
                set_assignments.push((name, expr));
                if matches!(self.peek(), Some(Token::Symbol(','))) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let log_format = if self.peek_keyword("logformat") {
            self.pos += 1;
            match self.bump() {
                Some(Token::Ident(fmt)) if fmt.eq_ignore_ascii_case("csv") => LogFormat::Csv,
                Some(Token::Ident(fmt)) if fmt.eq_ignore_ascii_case("default") => LogFormat::Default,
                other => return Err(DtailError::Query(format!("unknown logformat {other:?}"))),
            }
        } else {
            LogFormat::Default
        };

        let outfile = if self.peek_keyword("outfile") {
            self.pos += 1;
            match self.bump() {
                Some(Token::Ident(spec)) => Some(parse_outfile_spec(&spec)),
                other => return Err(DtailError::Query(format!("expected outfile path, found {other:?}"))),
            }
        } else {
            None
        };

        let interval = if self.peek_keyword("interval") {
            self.pos += 1;
            match self.bump() {
                Some(Token::Ident(dur)) => Some(parse_duration(&dur)?),
                other => return Err(DtailError::Query(format!("expected duration, found {other:?}"))),
            }
        } else {
            None
        };

        Ok(Query {
            table,
            select,
            where_pred,
            group_by,
            order_by,
            limit,
            set_assignments,
            log_format,
            outfile,
            interval,
            raw: raw.to_string(),
        })
    }

    fn expect_op(&mut self, op: &str) -> Result<(), DtailError> {
        match self.bump() {
            Some(Token::Op(o)) if o == op || (op == "==" && o == "=") => Ok(()),
            other => Err(DtailError::Query(format!("expected '{op}', found {other:?}"))),
        }
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, DtailError> {
        let expr = self.parse_expr()?;
        let label = render_label(&expr);
        Ok(SelectItem { expr, label })
    }

    fn parse_ident_or_column(&mut self) -> Result<String, DtailError> {
        match self.bump() {
            Some(Token::Ident(w)) => Ok(w),
            other => Err(DtailError::Query(format!("expected identifier, found {other:?}"))),
        }
    }

    /// Parses a `group by` column, stripping the leading `$` the same way
    /// [`Self::parse_expr`] does for select columns, so `group_by` entries
    /// match the un-prefixed keys `tokenize_mapreduce_line` produces.
    fn parse_group_by_column(&mut self) -> Result<String, DtailError> {
        match self.parse_expr()? {
            Expr::Column(name) => Ok(name),
            other => Err(DtailError::Query(format!(
                "group by expects a column reference, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, DtailError> {
        match self.bump() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Ident(word)) => {
                if matches!(self.peek(), Some(Token::Symbol('('))) {
                    let func = FuncName::from_str(&word)
                        .ok_or_else(|| DtailError::Query(format!("unknown function '{word}'")))?;
                    self.pos += 1;
                    let inner = self.parse_expr()?;
                    self.expect_symbol(')')?;
                    Ok(Expr::Call(func, Box::new(inner)))
                } else if let Some(rest) = word.strip_prefix('$') {
                    Ok(Expr::Column(rest.to_string()))
                } else if word.parse::<f64>().is_ok() {
                    Ok(Expr::Literal(word))
                } else {
                    Ok(Expr::Column(word))
                }
            }
            other => Err(DtailError::Query(format!("expected expression, found {other:?}"))),
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, DtailError> {
        let mut left = self.parse_and_predicate()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and_predicate()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_predicate(&mut self) -> Result<Predicate, DtailError> {
        let mut left = self.parse_compare_predicate()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_compare_predicate()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare_predicate(&mut self) -> Result<Predicate, DtailError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.parse_compare_predicate()?)));
        }
        if matches!(self.peek(), Some(Token::Symbol('('))) {
            self.pos += 1;
            let inner = self.parse_predicate()?;
            self.expect_symbol(')')?;
            return Ok(inner);
        }
        let left = self.parse_expr()?;
        let op = match self.bump() {
            Some(Token::Op("==")) | Some(Token::Op("=")) => CompareOp::Eq,
            Some(Token::Op("!=")) => CompareOp::Ne,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::Le,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::Ge,
            other => return Err(DtailError::Query(format!("expected comparison operator, found {other:?}"))),
        };
        let right = self.parse_expr()?;
        Ok(Predicate::Compare(left, op, right))
    }
}

fn parse_table(token: Option<Token>) -> Result<TableSelector, DtailError> {
    match token {
        Some(Token::Ident(name)) if name == "*" || name == "." || name.is_empty() => {
            Ok(TableSelector::Any)
        }
        Some(Token::Ident(name)) => Ok(TableSelector::Named(name)),
        other => Err(DtailError::Query(format!(
            "expected table name after 'from', found {other:?}"
        ))),
    }
}

fn parse_outfile_spec(spec: &str) -> OutfileSpec {
    if let Some(path) = spec.strip_prefix("append:") {
        OutfileSpec {
            path: path.into(),
            append: true,
        }
    } else {
        OutfileSpec {
            path: spec.into(),
            append: false,
        }
    }
}

fn parse_duration(text: &str) -> Result<Duration, DtailError> {
    humantime::parse_duration(text)
        .map_err(|e| DtailError::Query(format!("invalid interval '{text}': {e}")))
}

fn render_label(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => format!("${name}"),
        Expr::Literal(lit) => lit.clone(),
        Expr::Call(func, inner) => {
            let func_name = match func {
                FuncName::Count => "count",
                FuncName::Sum => "sum",
                FuncName::Min => "min",
                FuncName::Max => "max",
                FuncName::Avg => "avg",
                FuncName::First => "first",
                FuncName::Last => "last",
                FuncName::MaskDigits => "maskdigits",
                FuncName::Md5Sum => "md5sum",
            };
            format!("{func_name}({})", render_label(inner))
        }
    }
}

/// Parses a MapReduce query program (spec §4.5 grammar).
pub fn parse(raw: &str) -> Result<Query, DtailError> {
    let tokens = Lexer::new(raw).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_query(raw)?;
    if parser.pos != parser.tokens.len() {
        return Err(DtailError::Query(format!(
            "unexpected trailing tokens in query: '{raw}'"
        )));
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FuncName;

    #[test]
    fn parses_minimal_select() {
        let q = parse("select $line").unwrap();
        assert_eq!(q.table, TableSelector::Any);
        assert_eq!(q.select.len(), 1);
        assert_eq!(q.select[0].expr, Expr::Column("line".to_string()));
    }

    #[test]
    fn parses_full_groupby_query() {
        let q = parse(
            "from STATS select count($line), $hostname group by $hostname order by count($line) desc",
        )
        .unwrap();
        assert_eq!(q.table, TableSelector::Named("STATS".to_string()));
        assert_eq!(q.select.len(), 2);
        assert!(matches!(q.select[0].expr, Expr::Call(FuncName::Count, _)));
        assert_eq!(q.group_by, vec!["hostname".to_string()]);
        assert_eq!(q.order_by.as_ref().unwrap().direction, OrderDirection::Desc);
    }

    #[test]
    fn parses_where_and_set_and_outfile_append() {
        let q = parse(
            "select count($line) where $level == 'ERROR' set masked == maskdigits($line) outfile append:/tmp/out.txt",
        )
        .unwrap();
        assert!(q.where_pred.is_some());
        assert_eq!(q.set_assignments.len(), 1);
        let outfile = q.outfile.unwrap();
        assert!(outfile.append);
        assert_eq!(outfile.path, std::path::PathBuf::from("/tmp/out.txt"));
    }

    #[test]
    fn parses_interval_and_limit() {
        let q = parse("select count($line) limit 10 interval 5s").unwrap();
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_unknown_function() {
        let err = parse("select bogus($line)").unwrap_err();
        assert!(matches!(err, DtailError::Query(_)));
    }
}
