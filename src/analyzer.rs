//! Risk aggregation: combine parse results with resolver decisions.
//!
//! The analyzer walks every task's read and write sets, resolves each path
//! through the matching resolver, and buckets the outcomes per task. It is
//! the last stage of the pipeline; its output feeds the report artifact and
//! the terminal summary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logging::DecisionLogger;
use crate::matcher::InvalidPathError;
use crate::parser::TraceParseResult;
use crate::resolver::{FileResolver, Operation, PathKind, RiskLevel};

/// Which direction an access was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessKind {
    ReadFile,
    WriteFile,
}

impl AccessKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ReadFile => "read",
            Self::WriteFile => "write",
        }
    }
}

/// One classified file access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Risk {
    pub kind: AccessKind,
    pub file_path: String,
    pub level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_kind: Option<PathKind>,
}

/// Per-task risk buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRiskReport {
    pub task_id: String,
    pub safe: Vec<Risk>,
    pub low_risk: Vec<Risk>,
    pub high_risk: Vec<Risk>,
}

impl TaskRiskReport {
    /// True when no access resolved above `Safe`.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.high_risk.is_empty() && self.low_risk.is_empty()
    }
}

/// Combines resolver decisions over a parse result.
pub struct Analyzer {
    read_resolver: FileResolver,
    write_resolver: FileResolver,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer").finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Build an analyzer from configured read and write resolvers.
    #[must_use]
    pub fn new(read_resolver: FileResolver, write_resolver: FileResolver) -> Self {
        Self {
            read_resolver,
            write_resolver,
        }
    }

    /// Classify every accessed path of every task.
    ///
    /// # Errors
    ///
    /// Propagates [`InvalidPathError`] from the resolvers - a path the
    /// resolver cannot normalize indicates a parser bug, not user error, and
    /// must not be silently dropped.
    pub fn analyze(
        &self,
        result: &TraceParseResult,
        logger: &DecisionLogger,
    ) -> Result<Vec<TaskRiskReport>, InvalidPathError> {
        let mut reports = Vec::with_capacity(result.tasks.len());

        for (task_id, access) in &result.tasks {
            let mut report = TaskRiskReport {
                task_id: task_id.clone(),
                ..Default::default()
            };

            for path in &access.read_files {
                let resolution = self.read_resolver.resolve(Path::new(path))?;
                logger.log_resolution(task_id, Operation::Read, Path::new(path), resolution);
                push_risk(&mut report, AccessKind::ReadFile, path, resolution);
            }
            for path in &access.write_files {
                let resolution = self.write_resolver.resolve(Path::new(path))?;
                logger.log_resolution(task_id, Operation::Write, Path::new(path), resolution);
                push_risk(&mut report, AccessKind::WriteFile, path, resolution);
            }

            reports.push(report);
        }

        Ok(reports)
    }
}

fn push_risk(
    report: &mut TaskRiskReport,
    kind: AccessKind,
    path: &str,
    resolution: crate::resolver::Resolution,
) {
    let risk = Risk {
        kind,
        file_path: path.to_string(),
        level: resolution.level,
        path_kind: resolution.kind,
    };
    match resolution.level {
        RiskLevel::Safe => report.safe.push(risk),
        RiskLevel::Low => report.low_risk.push(risk),
        RiskLevel::High => report.high_risk.push(risk),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TaskAccess;
    use std::collections::BTreeMap;

    fn parse_result(task_id: &str, reads: &[&str], writes: &[&str]) -> TraceParseResult {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            task_id.to_string(),
            TaskAccess {
                read_files: reads.iter().map(ToString::to_string).collect(),
                write_files: writes.iter().map(ToString::to_string).collect(),
                started: true,
            },
        );
        TraceParseResult {
            tasks,
            ..Default::default()
        }
    }

    #[test]
    fn buckets_follow_resolver_levels() {
        let mut write_resolver = FileResolver::for_writes();
        write_resolver
            .add_safe_project_root(std::path::Path::new("/repo/proj-a/dist"))
            .unwrap();
        let analyzer = Analyzer::new(FileResolver::for_reads(), write_resolver);

        let result = parse_result(
            "proj-a",
            &["/usr/lib/libc.so", "/workspace/unknown.bin"],
            &["/repo/proj-a/dist/out.js", "/tmp/scratch", "/elsewhere/x"],
        );
        let reports = analyzer
            .analyze(&result, &DecisionLogger::disabled())
            .unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.task_id, "proj-a");

        // reads: /usr -> low, unknown -> high
        // writes: dist -> safe, /tmp -> low, elsewhere -> high
        assert_eq!(report.safe.len(), 1);
        assert_eq!(report.low_risk.len(), 2);
        assert_eq!(report.high_risk.len(), 2);
        assert!(!report.is_cacheable());

        assert_eq!(report.safe[0].file_path, "/repo/proj-a/dist/out.js");
        assert_eq!(report.safe[0].kind, AccessKind::WriteFile);
        assert_eq!(report.safe[0].path_kind, Some(PathKind::Project));
    }

    #[test]
    fn clean_task_is_cacheable() {
        let mut read_resolver = FileResolver::for_reads();
        read_resolver
            .add_safe_project_root(std::path::Path::new("/repo/proj-a"))
            .unwrap();
        let analyzer = Analyzer::new(read_resolver, FileResolver::for_writes());

        let result = parse_result("proj-a", &["/repo/proj-a/src/index.ts"], &[]);
        let reports = analyzer
            .analyze(&result, &DecisionLogger::disabled())
            .unwrap();
        assert!(reports[0].is_cacheable());
    }

    #[test]
    fn invalid_path_from_parser_is_propagated() {
        let analyzer = Analyzer::new(FileResolver::for_reads(), FileResolver::for_writes());
        let result = parse_result("proj-a", &["not-absolute"], &[]);
        assert!(analyzer
            .analyze(&result, &DecisionLogger::disabled())
            .is_err());
    }

    #[test]
    fn risk_serializes_with_camel_case_keys() {
        let risk = Risk {
            kind: AccessKind::WriteFile,
            file_path: "/x".to_string(),
            level: RiskLevel::High,
            path_kind: None,
        };
        let json = serde_json::to_string(&risk).unwrap();
        assert!(json.contains("\"kind\":\"writeFile\""));
        assert!(json.contains("\"filePath\":\"/x\""));
        assert!(!json.contains("pathKind"));
    }
}
