use crate::error::DtailError;

/// Which file-reading mode a command requests (C3, spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Whole-file read from beginning to end.
    Cat,
    /// Filtered read, optionally with local context.
    Grep,
    /// Read from file end and stream appends, surviving rotation.
    Tail,
}

/// Local-context and display options shared by cat/grep/tail commands
/// (spec §3: `opts = "quiet=" bool ":spartan=" bool [":before=" N]
/// [":after=" N] [":max=" N]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCommandOpts {
    /// Suppress per-file summary/stat lines.
    pub quiet: bool,
    /// Suppress hostname/channel-class prefixing (minimal output).
    pub spartan: bool,
    /// Lines of context to emit before a match (C4).
    pub before: usize,
    /// Lines of context to emit after a match (C4).
    pub after: usize,
    /// Stop after this many matches, 0 meaning unbounded (C4).
    pub max: usize,
}

impl Default for FileCommandOpts {
    fn default() -> Self {
        Self {
            quiet: false,
            spartan: false,
            before: 0,
            after: 0,
            max: 0,
        }
    }
}

/// A single parsed server command (spec §3's `Command` entity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `mode:opts path [regexSpec]`
    File {
        /// cat, grep, or tail.
        mode: FileMode,
        /// Parsed `opts` segment.
        opts: FileCommandOpts,
        /// Path to read.
        path: String,
        /// Optional pattern, serialized per [`crate`]'s matcher format.
        regex: Option<String>,
    },
    /// `map <rawQuery>`
    Map {
        /// The raw, unparsed MapReduce query text (parsed by `dtail-query`).
        query: String,
    },
    /// `health`
    Health,
    /// `timeout <seconds> <command>`
    Timeout {
        /// Deadline in seconds for the inner command.
        seconds: u64,
        /// The command the deadline applies to.
        inner: Box<Command>,
    },
}

impl FileCommandOpts {
    /// Renders the `opts` segment of the command grammar (the inverse of
    /// [`parse_opts`]), used by the client to build outbound commands.
    #[must_use]
    pub fn to_wire(self) -> String {
        format!(
            "quiet={}:spartan={}:before={}:after={}:max={}",
            self.quiet, self.spartan, self.before, self.after, self.max
        )
    }
}

impl Command {
    /// Renders this command back into the textual wire grammar (the inverse
    /// of [`Command::parse`]), used by the client to build outbound
    /// commands from structured arguments.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Command::File { mode, opts, path, regex } => {
                let mode_str = match mode {
                    FileMode::Cat => "cat",
                    FileMode::Grep => "grep",
                    FileMode::Tail => "tail",
                };
                match regex {
                    Some(r) => format!("{mode_str}:{} {path} {r}", opts.to_wire()),
                    None => format!("{mode_str}:{} {path}", opts.to_wire()),
                }
            }
            Command::Map { query } => format!("map {query}"),
            Command::Health => "health".to_string(),
            Command::Timeout { seconds, inner } => format!("timeout {seconds} {}", inner.to_wire()),
        }
    }

    /// Parses the textual command grammar (spec §3).
    pub fn parse(line: &str) -> Result<Self, DtailError> {
        let line = line.trim();
        if line == "health" {
            return Ok(Command::Health);
        }
        if let Some(rest) = line.strip_prefix("timeout ") {
            let (secs, rest) = rest
                .split_once(' ')
                .ok_or_else(|| DtailError::Protocol("timeout command missing body".into()))?;
            let seconds: u64 = secs
                .parse()
                .map_err(|_| DtailError::Protocol(format!("invalid timeout seconds '{secs}'")))?;
            let inner = Command::parse(rest)?;
            return Ok(Command::Timeout {
                seconds,
                inner: Box::new(inner),
            });
        }
        if let Some(rest) = line.strip_prefix("map ") {
            if rest.trim().is_empty() {
                return Err(DtailError::Query("map command has an empty query".into()));
            }
            return Ok(Command::Map {
                query: rest.to_string(),
            });
        }
        let (head, rest) = line
            .split_once(' ')
            .ok_or_else(|| DtailError::Protocol(format!("malformed command '{line}'")))?;
        let (mode_str, opts_str) = head
            .split_once(':')
            .ok_or_else(|| DtailError::Protocol(format!("command missing ':' in '{head}'")))?;
        let mode = match mode_str {
            "cat" => FileMode::Cat,
            "grep" => FileMode::Grep,
            "tail" => FileMode::Tail,
            other => {
                return Err(DtailError::Protocol(format!("unknown command mode '{other}'")))
            }
        };
        let opts = parse_opts(opts_str)?;
        let (path, regex) = match rest.split_once(' ') {
            Some((path, regex)) => (path.to_string(), Some(regex.to_string())),
            None => (rest.to_string(), None),
        };
        if path.is_empty() {
            return Err(DtailError::Protocol("command missing path".into()));
        }
        Ok(Command::File {
            mode,
            opts,
            path,
            regex,
        })
    }
}

fn parse_opts(s: &str) -> Result<FileCommandOpts, DtailError> {
    let mut opts = FileCommandOpts {
        quiet: false,
        spartan: false,
        before: 0,
        after: 0,
        max: 0,
    };
    let mut saw_quiet = false;
    let mut saw_spartan = false;
    for kv in s.split(':') {
        let (key, value) = kv
            .split_once('=')
            .ok_or_else(|| DtailError::Protocol(format!("malformed option '{kv}'")))?;
        match key {
            "quiet" => {
                opts.quiet = parse_bool(value)?;
                saw_quiet = true;
            }
            "spartan" => {
                opts.spartan = parse_bool(value)?;
                saw_spartan = true;
            }
            "before" => opts.before = parse_usize(value)?,
            "after" => opts.after = parse_usize(value)?,
            "max" => opts.max = parse_usize(value)?,
            other => return Err(DtailError::Protocol(format!("unknown option '{other}'"))),
        }
    }
    if !saw_quiet || !saw_spartan {
        return Err(DtailError::Protocol(
            "command options must set quiet and spartan".into(),
        ));
    }
    Ok(opts)
}

fn parse_bool(value: &str) -> Result<bool, DtailError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DtailError::Protocol(format!("invalid boolean '{other}'"))),
    }
}

fn parse_usize(value: &str) -> Result<usize, DtailError> {
    value
        .parse()
        .map_err(|_| DtailError::Protocol(format!("invalid integer '{value}'")))
}
