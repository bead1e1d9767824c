//! Trace log parsing: attribute file accesses to build tasks.
//!
//! The tracer produces one interleaved log for the whole build process tree,
//! each line prefixed with the operating-system process id that made the
//! call. This module reconstructs per-task file access sets from that log:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      raw trace log                           │
//! │   1234 chdir("/repo/proj-a") = 0                             │
//! │   1234 clone(...) = 1250                                     │
//! │   1250 openat(AT_FDCWD, "src/index.ts", O_RDONLY) = 20       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    TraceLogParser                            │
//! │   pid → task attribution (chdir markers, fork inheritance)   │
//! │   syscall record grammar (open/creat/rename/unlink/mkdir)    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!            task id → { read_files, write_files }
//! ```
//!
//! Attribution is order-dependent: a process inherits its task for its whole
//! lifetime, and children inherit it through fork/clone records, so the log
//! must be processed strictly in file order, in a single pass. A pid that
//! never matches a task's start marker contributes nothing - the tracer
//! inevitably captures ambient process activity, and only registered tasks
//! matter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use memchr::memmem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::resolver::Operation;

/// A task registered for attribution: a package name plus the working
/// directory its build runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub task_id: String,
    pub working_directory: PathBuf,
}

/// Per-task parse state. Created once before parsing, mutated only by the
/// parse loop, read out as the result afterwards.
#[derive(Debug)]
struct TaskParseContext {
    spec: TaskSpec,
    /// The exact log-line substring that signals "this process has begun
    /// executing this task".
    marker: String,
    started: bool,
    read_paths: BTreeSet<String>,
    write_paths: BTreeSet<String>,
}

impl TaskParseContext {
    fn new(spec: TaskSpec) -> Self {
        let marker = format!("chdir(\"{}\")", spec.working_directory.display());
        Self {
            spec,
            marker,
            started: false,
            read_paths: BTreeSet::new(),
            write_paths: BTreeSet::new(),
        }
    }
}

/// Counters describing one parse run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStats {
    /// Lines consumed from the log.
    pub total_lines: u64,
    /// Lines attributed to some task.
    pub attributed_lines: u64,
    /// Lines with a pid but no attributable task.
    pub unattributed_lines: u64,
    /// Lines with no pid prefix.
    pub missing_pid_lines: u64,
    /// Child pids bound through fork/clone records.
    pub fork_bindings: u64,
    /// File access records extracted.
    pub file_accesses: u64,
}

/// One task's accumulated file accesses (sets serialized as sorted arrays).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAccess {
    pub read_files: Vec<String>,
    pub write_files: Vec<String>,
    /// Whether the task's start marker was ever observed.
    pub started: bool,
}

/// The full parse result, keyed by task id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceParseResult {
    pub tasks: BTreeMap<String, TaskAccess>,
    pub stats: ParseStats,
}

/// Parse failure. The log itself cannot be malformed - unrecognized lines
/// are skipped - so the only failures are I/O.
#[derive(Debug)]
pub enum ParseError {
    Io(std::io::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "trace log I/O error: {e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Streams a trace log and attributes file accesses to registered tasks.
pub struct TraceLogParser {
    contexts: Vec<TaskParseContext>,
    /// pid → index into `contexts`. A pid keeps its attribution for its
    /// lifetime; only a fork record can (re)bind a pid.
    attribution: HashMap<u32, usize>,
    side_log_dir: Option<PathBuf>,
    side_logs: Vec<Option<BufWriter<File>>>,
    stats: ParseStats,
}

impl std::fmt::Debug for TraceLogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceLogParser")
            .field("tasks", &self.contexts.len())
            .field("attributed_pids", &self.attribution.len())
            .finish()
    }
}

impl TraceLogParser {
    /// Create a parser for the given task set.
    ///
    /// When `side_log_dir` is set, every attributed raw line is also appended
    /// to `<dir>/<task id>.trace.log` for later inspection.
    #[must_use]
    pub fn new(tasks: impl IntoIterator<Item = TaskSpec>, side_log_dir: Option<PathBuf>) -> Self {
        let contexts: Vec<TaskParseContext> =
            tasks.into_iter().map(TaskParseContext::new).collect();
        let side_logs = contexts.iter().map(|_| None).collect();
        Self {
            contexts,
            attribution: HashMap::new(),
            side_log_dir,
            side_logs,
            stats: ParseStats::default(),
        }
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.contexts.len()
    }

    /// Consume the log and produce per-task access sets.
    ///
    /// Lines are processed strictly in order; attribution state from earlier
    /// lines decides how later lines are handled. Invalid UTF-8 is replaced
    /// lossily - strace escapes most binary data, but argument payloads can
    /// still carry raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Io`] when the log or a per-task side log cannot
    /// be read or written.
    pub fn parse<R: BufRead>(mut self, mut reader: R) -> Result<TraceParseResult, ParseError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            self.process_line(line)?;
        }
        self.finish()
    }

    fn process_line(&mut self, line: &str) -> Result<(), ParseError> {
        self.stats.total_lines += 1;

        let Some((pid, record)) = split_pid(line) else {
            self.stats.missing_pid_lines += 1;
            return Ok(());
        };

        if let Some(&idx) = self.attribution.get(&pid) {
            self.stats.attributed_lines += 1;
            self.append_side_log(idx, line)?;

            if let Some(child) = parse_fork_child(record) {
                // Children inherit the parent's task. A reused pid is
                // rebound here - fork is the one re-attribution path.
                self.attribution.insert(child, idx);
                self.stats.fork_bindings += 1;
                return Ok(());
            }

            for access in parse_file_access(record) {
                self.stats.file_accesses += 1;
                let ctx = &mut self.contexts[idx];
                let path = absolutize(&access.path, &ctx.spec.working_directory);
                match access.operation {
                    Operation::Read => ctx.read_paths.insert(path),
                    Operation::Write => ctx.write_paths.insert(path),
                };
            }
            return Ok(());
        }

        // Unattributed pid: look for a task start marker among tasks that
        // have not started yet. First match in registration order wins.
        let mut matched = None;
        for (idx, ctx) in self.contexts.iter_mut().enumerate() {
            if ctx.started {
                continue;
            }
            if memmem::find(line.as_bytes(), ctx.marker.as_bytes()).is_some() {
                ctx.started = true;
                matched = Some(idx);
                break;
            }
        }

        match matched {
            Some(idx) => {
                debug!(pid, task = %self.contexts[idx].spec.task_id, "attributed process");
                self.attribution.insert(pid, idx);
                self.stats.attributed_lines += 1;
                self.append_side_log(idx, line)?;
            }
            None => {
                self.stats.unattributed_lines += 1;
            }
        }
        Ok(())
    }

    fn append_side_log(&mut self, idx: usize, line: &str) -> Result<(), ParseError> {
        let Some(dir) = &self.side_log_dir else {
            return Ok(());
        };

        if self.side_logs[idx].is_none() {
            let name = format!("{}.trace.log", sanitize_task_id(&self.contexts[idx].spec.task_id));
            let file = File::create(dir.join(name))?;
            self.side_logs[idx] = Some(BufWriter::new(file));
        }
        if let Some(writer) = &mut self.side_logs[idx] {
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<TraceParseResult, ParseError> {
        for writer in self.side_logs.iter_mut().flatten() {
            writer.flush()?;
        }

        let tasks = self
            .contexts
            .into_iter()
            .map(|ctx| {
                let access = TaskAccess {
                    read_files: ctx.read_paths.into_iter().collect(),
                    write_files: ctx.write_paths.into_iter().collect(),
                    started: ctx.started,
                };
                (ctx.spec.task_id, access)
            })
            .collect();

        Ok(TraceParseResult {
            tasks,
            stats: self.stats,
        })
    }
}

/// Split the pid prefix off a trace line. Lines without one carry no
/// attributable information.
fn split_pid(line: &str) -> Option<(u32, &str)> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let pid = line[..digits].parse().ok()?;
    Some((pid, rest.trim_start()))
}

/// A single extracted file access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccess {
    pub operation: Operation,
    pub path: String,
}

// Record grammar for strace's verbose output. Each regex anchors at the
// syscall name and requires a successful return value, so failed calls
// (`= -1 ENOENT ...`) and unfinished records never match.
static FORK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:clone3?|vfork|fork)\(.*\)\s*=\s*(\d+)\s*$").unwrap());
static FORK_RESUMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<\.\.\. (?:clone3?|vfork|fork) resumed>.*=\s*(\d+)\s*$").unwrap()
});
static OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^open\("((?:[^"\\]|\\.)*)",\s*([A-Z0-9_|]+)(?:,\s*[0-7]+)?\)\s*=\s*\d+"#)
        .unwrap()
});
static OPENAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^openat\((?:[A-Z0-9_]+|\d+),\s*"((?:[^"\\]|\\.)*)",\s*([A-Z0-9_|]+)(?:,\s*[0-7]+)?\)\s*=\s*\d+"#,
    )
    .unwrap()
});
static CREAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^creat\("((?:[^"\\]|\\.)*)",\s*[0-7]+\)\s*=\s*\d+"#).unwrap());
static UNLINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^unlink\("((?:[^"\\]|\\.)*)"\)\s*=\s*0"#).unwrap());
static UNLINKAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^unlinkat\([^,]+,\s*"((?:[^"\\]|\\.)*)"[^)]*\)\s*=\s*0"#).unwrap()
});
static MKDIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^mkdir\("((?:[^"\\]|\\.)*)",\s*[0-7]+\)\s*=\s*0"#).unwrap());
static MKDIRAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^mkdirat\([^,]+,\s*"((?:[^"\\]|\\.)*)",\s*[0-7]+\)\s*=\s*0"#).unwrap()
});
static RENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^rename\("((?:[^"\\]|\\.)*)",\s*"((?:[^"\\]|\\.)*)"\)\s*=\s*0"#).unwrap()
});
static RENAMEAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^renameat2?\([^,]+,\s*"((?:[^"\\]|\\.)*)",\s*[^,]+,\s*"((?:[^"\\]|\\.)*)"[^)]*\)\s*=\s*0"#,
    )
    .unwrap()
});
static SYMLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^symlink\("(?:[^"\\]|\\.)*",\s*"((?:[^"\\]|\\.)*)"\)\s*=\s*0"#).unwrap()
});
static SYMLINKAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^symlinkat\("(?:[^"\\]|\\.)*",\s*[^,]+,\s*"((?:[^"\\]|\\.)*)"\)\s*=\s*0"#)
        .unwrap()
});

/// Extract the child pid from a fork/clone record, if this is one.
#[must_use]
pub fn parse_fork_child(record: &str) -> Option<u32> {
    let captures = if record.starts_with('<') {
        FORK_RESUMED_RE.captures(record)?
    } else {
        FORK_RE.captures(record)?
    };
    captures.get(1)?.as_str().parse().ok()
}

/// Extract file accesses from a syscall record.
///
/// Returns an empty vec for records that are not file accesses, failed
/// calls, and unfinished records. `rename` yields two writes (both
/// directory entries change); everything else yields at most one access.
#[must_use]
pub fn parse_file_access(record: &str) -> Vec<FileAccess> {
    // The syscall name ends at the first '('; dispatching on it avoids
    // running every regex against every record.
    let Some(paren) = memchr::memchr(b'(', record.as_bytes()) else {
        return Vec::new();
    };
    let name = &record[..paren];

    match name {
        "open" => OPEN_RE
            .captures(record)
            .map(|c| {
                vec![FileAccess {
                    operation: flags_operation(c.get(2).map_or("", |m| m.as_str())),
                    path: unescape_strace_path(c.get(1).map_or("", |m| m.as_str())),
                }]
            })
            .unwrap_or_default(),
        "openat" => OPENAT_RE
            .captures(record)
            .map(|c| {
                vec![FileAccess {
                    operation: flags_operation(c.get(2).map_or("", |m| m.as_str())),
                    path: unescape_strace_path(c.get(1).map_or("", |m| m.as_str())),
                }]
            })
            .unwrap_or_default(),
        "creat" => single_write(&CREAT_RE, record),
        "unlink" => single_write(&UNLINK_RE, record),
        "unlinkat" => single_write(&UNLINKAT_RE, record),
        "mkdir" => single_write(&MKDIR_RE, record),
        "mkdirat" => single_write(&MKDIRAT_RE, record),
        "rename" | "renameat" | "renameat2" => {
            let re = if name == "rename" {
                &RENAME_RE
            } else {
                &RENAMEAT_RE
            };
            re.captures(record)
                .map(|c| {
                    [1, 2]
                        .iter()
                        .filter_map(|&i| c.get(i))
                        .map(|m| FileAccess {
                            operation: Operation::Write,
                            path: unescape_strace_path(m.as_str()),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        "symlink" => single_write(&SYMLINK_RE, record),
        "symlinkat" => single_write(&SYMLINKAT_RE, record),
        _ => Vec::new(),
    }
}

fn single_write(re: &Regex, record: &str) -> Vec<FileAccess> {
    re.captures(record)
        .and_then(|c| c.get(1))
        .map(|m| {
            vec![FileAccess {
                operation: Operation::Write,
                path: unescape_strace_path(m.as_str()),
            }]
        })
        .unwrap_or_default()
}

/// Classify an open-flags string. `O_RDONLY` is the absence of the
/// write-intent flags.
fn flags_operation(flags: &str) -> Operation {
    let write = flags.split('|').any(|f| {
        matches!(
            f,
            "O_WRONLY" | "O_RDWR" | "O_APPEND" | "O_CREAT" | "O_TRUNC" | "O_TMPFILE"
        )
    });
    if write {
        Operation::Write
    } else {
        Operation::Read
    }
}

/// Undo strace's string escaping (`\"`, `\\`, control escapes, `\NNN`).
fn unescape_strace_path(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(d @ '0'..='7') => {
                let mut value = d as u32 - '0' as u32;
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&n @ '0'..='7') => {
                            value = value * 8 + (n as u32 - '0' as u32);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// Join a relative record path to the task's working directory.
fn absolutize(path: &str, working_directory: &Path) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        working_directory.join(path).display().to_string()
    }
}

/// Make a task id usable as a file name (`@scope/pkg` → `@scope-pkg`).
fn sanitize_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            c => c,
        })
        .collect()
}
