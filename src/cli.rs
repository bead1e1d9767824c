//! CLI argument parsing and command handling.
//!
//! Three subcommands cover the pipeline:
//! - `audit` - trace a project's build, parse the log, classify, report.
//! - `parse` - re-run parsing and classification over an existing log.
//! - `resolve` - classify a single path and explain which layer decided.
//!
//! Exit codes: 0 = no high-risk accesses, 1 = high-risk accesses found,
//! 2 = the audit itself failed.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use crate::analyzer::{Analyzer, TaskRiskReport};
use crate::config::LoadedConfig;
use crate::executor::{TraceSpec, platform_executor};
use crate::logging::DecisionLogger;
use crate::parser::TraceLogParser;
use crate::report;
use crate::resolver::{FileResolver, Operation};
use crate::workspace::Workspace;

/// Audit build-cache safety by tracing file accesses.
///
/// cachetrace runs a monorepo task under a syscall tracer, attributes every
/// file read and write to the task that performed it (across forked child
/// processes), and classifies each touched path into a risk tier.
#[derive(Parser, Debug)]
#[command(name = "cachetrace")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Trace a project's build and produce a risk report.
    Audit(AuditArgs),

    /// Parse an existing trace log and produce a risk report.
    Parse(ParseArgs),

    /// Classify a single path and explain the decision.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Project (package name) to audit.
    pub project: String,

    /// Monorepo root directory.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Directory of project descriptor files.
    #[arg(long)]
    pub projects: PathBuf,

    /// Output directory for logs and result artifacts.
    #[arg(long, default_value = "cachetrace-out")]
    pub out: PathBuf,

    /// Override the build command (whitespace-split).
    #[arg(long)]
    pub command: Option<String>,
}

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Project (package name) the log belongs to.
    pub project: String,

    /// Existing raw trace log to parse.
    #[arg(long)]
    pub log: PathBuf,

    /// Monorepo root directory.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Directory of project descriptor files.
    #[arg(long)]
    pub projects: PathBuf,

    /// Output directory for result artifacts.
    #[arg(long, default_value = "cachetrace-out")]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Absolute path to classify.
    pub path: PathBuf,

    /// Which resolver to consult.
    #[arg(long, value_enum, default_value_t = OperationArg::Read)]
    pub operation: OperationArg,

    /// Treat this root (and its subtree) as project-owned.
    #[arg(long)]
    pub project_root: Vec<PathBuf>,

    /// Monorepo root directory (anchors config discovery).
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

/// Clap-facing mirror of [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Read,
    Write,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Read => Self::Read,
            OperationArg::Write => Self::Write,
        }
    }
}

/// Dispatch a parsed command line. Returns the process exit code.
#[must_use]
pub fn run(cli: Cli) -> i32 {
    let result = match cli.command {
        Command::Audit(args) => run_audit(&args),
        Command::Parse(args) => run_parse(&args),
        Command::Resolve(args) => run_resolve(&args),
    };

    match result {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{} {message}", "error:".red().bold());
            2
        }
    }
}

fn run_audit(args: &AuditArgs) -> Result<i32, String> {
    let config = LoadedConfig::load(Some(&args.root));
    report_rule_errors(&config);

    // Fail fast on unsupported platforms and missing tracer binaries,
    // before any descriptor or filesystem work.
    let executor = platform_executor(&config.trace).map_err(|e| e.to_string())?;

    let workspace = Workspace::load(&args.root, &args.projects).map_err(|e| e.to_string())?;
    let tasks = workspace.task_specs(&args.project).map_err(|e| e.to_string())?;
    let target = workspace
        .project(&args.project)
        .ok_or_else(|| format!("unknown project {:?}", args.project))?;

    std::fs::create_dir_all(&args.out)
        .map_err(|e| format!("cannot create output directory: {e}"))?;

    let command = match &args.command {
        Some(raw) => raw.split_whitespace().map(ToString::to_string).collect(),
        None => target.build_command(),
    };
    let spec = TraceSpec {
        command,
        working_directory: workspace.project_dir(target),
        log_path: args.out.join("raw.trace.log"),
    };

    let outcome = executor.trace(&spec).map_err(|e| e.to_string())?;

    classify_log(&config, tasks, &outcome.log_path, &args.out)
}

fn run_parse(args: &ParseArgs) -> Result<i32, String> {
    let config = LoadedConfig::load(Some(&args.root));
    report_rule_errors(&config);

    let workspace = Workspace::load(&args.root, &args.projects).map_err(|e| e.to_string())?;
    let tasks = workspace.task_specs(&args.project).map_err(|e| e.to_string())?;

    std::fs::create_dir_all(&args.out)
        .map_err(|e| format!("cannot create output directory: {e}"))?;

    classify_log(&config, tasks, &args.log, &args.out)
}

fn classify_log(
    config: &LoadedConfig,
    tasks: Vec<crate::parser::TaskSpec>,
    log_path: &Path,
    out_dir: &Path,
) -> Result<i32, String> {
    let task_dirs: Vec<PathBuf> = tasks.iter().map(|t| t.working_directory.clone()).collect();

    let log = File::open(log_path)
        .map_err(|e| format!("cannot open trace log {}: {e}", log_path.display()))?;
    let parser = TraceLogParser::new(tasks, Some(out_dir.to_path_buf()));
    let parse_result = parser
        .parse(BufReader::new(log))
        .map_err(|e| e.to_string())?;

    report::write_trace_result(out_dir, &parse_result)
        .map_err(|e| format!("cannot write trace result: {e}"))?;

    let (read_resolver, write_resolver) = build_resolvers(config, &task_dirs)?;
    let analyzer = Analyzer::new(read_resolver, write_resolver);
    let logger = DecisionLogger::new(&config.logging);
    let reports = analyzer
        .analyze(&parse_result, &logger)
        .map_err(|e| e.to_string())?;

    report::write_audit_report(out_dir, &reports)
        .map_err(|e| format!("cannot write audit report: {e}"))?;
    report::print_summary(&reports);

    Ok(exit_code(&reports))
}

fn run_resolve(args: &ResolveArgs) -> Result<i32, String> {
    let config = LoadedConfig::load(Some(&args.root));
    report_rule_errors(&config);

    let (read_resolver, write_resolver) = build_resolvers(&config, &args.project_root)?;
    let resolver = match args.operation.into() {
        Operation::Read => &read_resolver,
        Operation::Write => &write_resolver,
    };

    let explained = resolver.explain(&args.path).map_err(|e| e.to_string())?;
    let kind = explained
        .resolution
        .kind
        .map_or("-", |k| k.label());

    println!(
        "{} level={} kind={} decided-by={}{}",
        args.path.display(),
        explained.resolution.level.label().bold(),
        kind,
        explained.source.label(),
        if explained.overridden_by_kind {
            " (level overridden by kind rule)"
        } else {
            ""
        },
    );
    Ok(0)
}

/// Build read and write resolvers from loaded configuration plus the
/// project-owned roots, applying the two-pass rule load.
fn build_resolvers(
    config: &LoadedConfig,
    safe_roots: &[PathBuf],
) -> Result<(FileResolver, FileResolver), String> {
    let mut read_resolver = FileResolver::for_reads();
    let mut write_resolver = FileResolver::for_writes();

    for root in safe_roots {
        read_resolver
            .add_safe_project_root(root)
            .map_err(|e| e.to_string())?;
        write_resolver
            .add_safe_project_root(root)
            .map_err(|e| e.to_string())?;
    }

    read_resolver.load_global_filter_config(&config.global_rules);
    write_resolver.load_global_filter_config(&config.global_rules);
    read_resolver.load_project_filter_config(&config.project_rules);
    write_resolver.load_project_filter_config(&config.project_rules);

    for invalid in read_resolver
        .invalid_rules()
        .iter()
        .chain(write_resolver.invalid_rules())
    {
        eprintln!(
            "{} skipping filter rule with invalid pattern {:?}: {}",
            "warning:".yellow().bold(),
            invalid.pattern,
            invalid.error,
        );
    }

    Ok((read_resolver, write_resolver))
}

fn report_rule_errors(config: &LoadedConfig) {
    for error in &config.rule_errors {
        eprintln!(
            "{} skipping invalid filter rule: {error}",
            "warning:".yellow().bold(),
        );
    }
}

fn exit_code(reports: &[TaskRiskReport]) -> i32 {
    let has_high = reports.iter().any(|r| !r.high_risk.is_empty());
    i32::from(has_high)
}
