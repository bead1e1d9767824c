#![forbid(unsafe_code)]
//! cachetrace library.
//!
//! Audits build-cache safety for monorepo task pipelines: run a task under a
//! syscall tracer, attribute every file access in the interleaved
//! multi-process log to the task that performed it, and classify each
//! touched path into a risk tier through an ordered, overridable rule
//! pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TraceExecutor                             │
//! │  (strace backend; runs the build, produces the raw trace log)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TraceLogParser                            │
//! │  (pid → task attribution, fork inheritance, access extraction)  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Analyzer + FileResolver                        │
//! │  pattern overrides → project-safe → categories → high fallback  │
//! │            (then kind overrides adjust the level)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                per-task {safe, low, high} risk report
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cachetrace::parser::{TaskSpec, TraceLogParser};
//! use cachetrace::resolver::FileResolver;
//! use cachetrace::analyzer::Analyzer;
//! use cachetrace::logging::DecisionLogger;
//!
//! let parser = TraceLogParser::new(tasks, Some(out_dir));
//! let result = parser.parse(std::io::BufReader::new(log_file))?;
//!
//! let analyzer = Analyzer::new(FileResolver::for_reads(), FileResolver::for_writes());
//! let reports = analyzer.analyze(&result, &DecisionLogger::disabled())?;
//! ```

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod executor;
pub mod logging;
pub mod matcher;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod workspace;

// Re-export commonly used types
pub use analyzer::{AccessKind, Analyzer, Risk, TaskRiskReport};
pub use config::{Config, FilterConfig, LoadedConfig, MatchRule};
pub use executor::{ExecutorError, StraceExecutor, TraceExecutor, TraceSpec, platform_executor};
pub use logging::{DecisionLogger, LogFormat, LoggingConfig};
pub use matcher::{InvalidPathError, PathMatcher, PatternError};
pub use parser::{ParseError, ParseStats, TaskAccess, TaskSpec, TraceLogParser, TraceParseResult};
pub use report::{RESULT_SCHEMA_VERSION, write_audit_report, write_trace_result};
pub use resolver::{
    DecisionSource, FileResolver, Operation, PathKind, Resolution, RiskLevel,
};
pub use workspace::{ProjectDescriptor, Workspace, WorkspaceError};
