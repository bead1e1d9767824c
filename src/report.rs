//! Result artifacts and the terminal summary.
//!
//! Two JSON files land in the output directory after a run:
//! - `trace-result.json` - the raw per-task access sets from the parser.
//! - `audit-report.json` - the classified risk buckets from the analyzer.
//!
//! Both carry a schema version so downstream tooling can detect format
//! changes. The terminal summary prints counts per task and names every
//! high-risk path; it is always written to the JSON artifacts first, so the
//! full result survives regardless of risk outcome.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::analyzer::TaskRiskReport;
use crate::parser::TraceParseResult;

/// Bumped on any breaking change to the JSON artifact shapes.
pub const RESULT_SCHEMA_VERSION: u32 = 1;

/// File name of the raw parse artifact.
pub const TRACE_RESULT_FILE: &str = "trace-result.json";

/// File name of the classified report artifact.
pub const AUDIT_REPORT_FILE: &str = "audit-report.json";

/// The envelope written to `trace-result.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResultArtifact {
    pub schema_version: u32,
    pub generated_at: String,
    #[serde(flatten)]
    pub result: TraceParseResult,
}

/// The envelope written to `audit-report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReportArtifact {
    pub schema_version: u32,
    pub generated_at: String,
    pub tasks: Vec<TaskRiskReport>,
}

/// Persist the raw parse result.
///
/// # Errors
///
/// Fails when the output directory is not writable or serialization fails.
pub fn write_trace_result(out_dir: &Path, result: &TraceParseResult) -> io::Result<PathBuf> {
    let artifact = TraceResultArtifact {
        schema_version: RESULT_SCHEMA_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        result: result.clone(),
    };
    write_json(out_dir, TRACE_RESULT_FILE, &artifact)
}

/// Persist the classified audit report.
///
/// # Errors
///
/// Fails when the output directory is not writable or serialization fails.
pub fn write_audit_report(out_dir: &Path, tasks: &[TaskRiskReport]) -> io::Result<PathBuf> {
    let artifact = AuditReportArtifact {
        schema_version: RESULT_SCHEMA_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        tasks: tasks.to_vec(),
    };
    write_json(out_dir, AUDIT_REPORT_FILE, &artifact)
}

fn write_json<T: Serialize>(out_dir: &Path, name: &str, value: &T) -> io::Result<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(name);
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Render the per-task summary to a string (separated from printing so
/// tests can assert on it).
#[must_use]
pub fn render_summary(tasks: &[TaskRiskReport]) -> String {
    let mut out = String::new();

    for report in tasks {
        let verdict = if report.high_risk.is_empty() {
            if report.low_risk.is_empty() {
                "cache-safe".green().bold()
            } else {
                "review".yellow().bold()
            }
        } else {
            "unsafe to cache".red().bold()
        };

        out.push_str(&format!(
            "{} {} - {} high, {} low, {} safe\n",
            report.task_id.bold(),
            verdict,
            report.high_risk.len(),
            report.low_risk.len(),
            report.safe.len(),
        ));

        for risk in &report.high_risk {
            out.push_str(&format!(
                "  {} {} {}\n",
                "high".red(),
                risk.kind.label(),
                risk.file_path,
            ));
        }
    }

    out
}

/// Print the summary to stdout.
pub fn print_summary(tasks: &[TaskRiskReport]) {
    print!("{}", render_summary(tasks));
}
