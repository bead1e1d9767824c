//! Trace execution: run the build under a syscall tracer.
//!
//! The engine treats tracing as an opaque external process: given a command
//! and an output path, the executor must produce a chronological,
//! pid-prefixed log of every system call in the build process tree, or fail
//! before the parser ever runs. Platform selection is a factory - Linux gets
//! the `strace` backend, every other OS is a clean error up front.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::TraceConfig;

/// What to trace: the build command, where to run it, where the log goes.
#[derive(Debug, Clone)]
pub struct TraceSpec {
    /// The build command and its arguments.
    pub command: Vec<String>,
    /// Directory to spawn the command in.
    pub working_directory: PathBuf,
    /// Where the raw trace log is written.
    pub log_path: PathBuf,
}

/// A completed trace run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOutcome {
    /// Path of the produced log file.
    pub log_path: PathBuf,
}

/// Tracer failures. Everything here is fatal: the parser must not run over
/// a log from a failed build.
#[derive(Debug)]
pub enum ExecutorError {
    /// No tracing backend exists for this operating system.
    UnsupportedPlatform { os: &'static str },
    /// The tracer binary could not be found.
    MissingBinary { binary: String },
    /// The tracer process could not be spawned.
    Spawn { binary: String, source: io::Error },
    /// The traced build exited with a non-zero status.
    TraceFailed { code: Option<i32> },
    /// The build command was empty.
    EmptyCommand,
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedPlatform { os } => {
                write!(f, "no tracing backend for platform {os:?} (only linux is supported)")
            }
            Self::MissingBinary { binary } => {
                write!(f, "tracer binary {binary:?} not found on PATH")
            }
            Self::Spawn { binary, source } => {
                write!(f, "failed to spawn tracer {binary:?}: {source}")
            }
            Self::TraceFailed { code: Some(code) } => {
                write!(f, "traced build failed with exit code {code}")
            }
            Self::TraceFailed { code: None } => {
                write!(f, "traced build was terminated by a signal")
            }
            Self::EmptyCommand => write!(f, "empty build command"),
        }
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A platform-specific process that produces the raw trace log.
pub trait TraceExecutor {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Run the build under tracing.
    ///
    /// # Errors
    ///
    /// Fails fast on a missing tracer, and fails with the exit code when the
    /// traced build does not succeed - a log from a failed build must never
    /// be parsed.
    fn trace(&self, spec: &TraceSpec) -> Result<TraceOutcome, ExecutorError>;
}

/// Select the tracing backend for the host operating system.
///
/// # Errors
///
/// Returns [`ExecutorError::UnsupportedPlatform`] everywhere except Linux.
pub fn platform_executor(config: &TraceConfig) -> Result<Box<dyn TraceExecutor>, ExecutorError> {
    if cfg!(target_os = "linux") {
        Ok(Box::new(StraceExecutor::new(config)))
    } else {
        Err(ExecutorError::UnsupportedPlatform {
            os: std::env::consts::OS,
        })
    }
}

/// The `strace` backend.
#[derive(Debug, Clone)]
pub struct StraceExecutor {
    binary: String,
    string_limit: u32,
}

impl StraceExecutor {
    #[must_use]
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            string_limit: config.string_limit,
        }
    }

    /// Verify the tracer binary is reachable before running anything.
    fn locate(&self) -> Result<(), ExecutorError> {
        let found = if self.binary.contains('/') {
            Path::new(&self.binary).is_file()
        } else {
            std::env::var_os("PATH")
                .map(|paths| {
                    std::env::split_paths(&paths).any(|dir| dir.join(&self.binary).is_file())
                })
                .unwrap_or(false)
        };

        if found {
            Ok(())
        } else {
            Err(ExecutorError::MissingBinary {
                binary: self.binary.clone(),
            })
        }
    }

    /// The tracer invocation for a spec (exposed for inspection in tests).
    #[must_use]
    pub fn build_args(&self, spec: &TraceSpec) -> Vec<String> {
        let mut args = vec![
            // Follow forks: child processes must land in the same log.
            "-f".to_string(),
            // Long enough for real path arguments.
            "-s".to_string(),
            self.string_limit.to_string(),
            // Only file and process syscalls; keeps the log tractable.
            "-e".to_string(),
            "trace=file,process".to_string(),
            "-o".to_string(),
            spec.log_path.display().to_string(),
            "--".to_string(),
        ];
        args.extend(spec.command.iter().cloned());
        args
    }
}

impl TraceExecutor for StraceExecutor {
    fn name(&self) -> &'static str {
        "strace"
    }

    fn trace(&self, spec: &TraceSpec) -> Result<TraceOutcome, ExecutorError> {
        if spec.command.is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }
        self.locate()?;

        let args = self.build_args(spec);
        debug!(binary = %self.binary, ?args, "starting traced build");

        let status = Command::new(&self.binary)
            .args(&args)
            .current_dir(&spec.working_directory)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| ExecutorError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !status.success() {
            warn!(code = ?status.code(), "traced build failed");
            return Err(ExecutorError::TraceFailed {
                code: status.code(),
            });
        }

        Ok(TraceOutcome {
            log_path: spec.log_path.clone(),
        })
    }
}
