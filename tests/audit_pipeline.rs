//! End-to-end pipeline test over a synthetic trace log.
//!
//! Exercises the post-trace pipeline the way the `parse` subcommand does:
//! register tasks from descriptors, stream the log, classify every access,
//! and persist both JSON artifacts.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use cachetrace::analyzer::Analyzer;
use cachetrace::logging::DecisionLogger;
use cachetrace::parser::TraceLogParser;
use cachetrace::report::{
    self, AUDIT_REPORT_FILE, RESULT_SCHEMA_VERSION, TRACE_RESULT_FILE,
};
use cachetrace::resolver::{FileResolver, RiskLevel};
use cachetrace::workspace::Workspace;

/// A trace of two tasks: `app` (pid 100, forks 101) and its dependency
/// `lib-a` (pid 200). Includes ambient noise that must not be attributed.
const TRACE_LOG: &str = "\
strace: Process 100 attached
100 chdir(\"/repo/apps/app\") = 0
100 openat(AT_FDCWD, \"/usr/lib/libnode.so\", O_RDONLY|O_CLOEXEC) = 3
100 clone(child_stack=NULL, flags=CLONE_CHILD_CLEARTID|SIGCHLD) = 101
101 openat(AT_FDCWD, \"src/main.ts\", O_RDONLY) = 4
101 openat(AT_FDCWD, \"dist/main.js\", O_WRONLY|O_CREAT|O_TRUNC, 0666) = 5
101 openat(AT_FDCWD, \"/repo/secrets.env\", O_RDONLY) = 6
200 chdir(\"/repo/libs/a\") = 0
200 openat(AT_FDCWD, \"/repo/node_modules/typescript/lib/tsc.js\", O_RDONLY) = 3
200 rename(\"dist/.tmp\", \"dist/index.js\") = 0
999 openat(AT_FDCWD, \"/etc/ambient-daemon.conf\", O_RDONLY) = 3
";

fn descriptor_dir(dir: &Path) {
    fs::write(
        dir.join("app.toml"),
        "name = \"app\"\npath = \"apps/app\"\ndependencies = [\"lib-a\"]\n",
    )
    .unwrap();
    fs::write(dir.join("lib-a.toml"), "name = \"lib-a\"\npath = \"libs/a\"\n").unwrap();
}

#[test]
fn pipeline_classifies_and_persists() {
    let tmp = tempfile::tempdir().unwrap();
    let descriptors = tmp.path().join("descriptors");
    let out = tmp.path().join("out");
    fs::create_dir_all(&descriptors).unwrap();
    fs::create_dir_all(&out).unwrap();

    descriptor_dir(&descriptors);
    let workspace = Workspace::load(Path::new("/repo"), &descriptors).unwrap();
    let tasks = workspace.task_specs("app").unwrap();
    assert_eq!(tasks.len(), 2);

    // Parse
    let parser = TraceLogParser::new(tasks.clone(), Some(out.clone()));
    let result = parser
        .parse(BufReader::new(TRACE_LOG.as_bytes()))
        .unwrap();

    let app = &result.tasks["app"];
    assert!(app.started);
    assert_eq!(
        app.read_files,
        vec![
            "/repo/apps/app/src/main.ts",
            "/repo/secrets.env",
            "/usr/lib/libnode.so",
        ],
    );
    assert_eq!(app.write_files, vec!["/repo/apps/app/dist/main.js"]);

    let lib = &result.tasks["lib-a"];
    assert_eq!(
        lib.read_files,
        vec!["/repo/node_modules/typescript/lib/tsc.js"],
    );
    assert_eq!(
        lib.write_files,
        vec!["/repo/libs/a/dist/.tmp", "/repo/libs/a/dist/index.js"],
    );

    // Ambient pid 999 contributed nothing.
    assert_eq!(result.stats.unattributed_lines, 1);
    for access in result.tasks.values() {
        assert!(!access.read_files.iter().any(|p| p.contains("ambient")));
    }

    // Per-task side logs contain only attributed lines.
    let app_log = fs::read_to_string(out.join("app.trace.log")).unwrap();
    assert!(app_log.contains("chdir(\"/repo/apps/app\")"));
    assert!(!app_log.contains("ambient-daemon"));
    let lib_log = fs::read_to_string(out.join("lib-a.trace.log")).unwrap();
    assert!(lib_log.contains("rename"));

    // Classify: each task's own tree is project-safe.
    let mut read_resolver = FileResolver::for_reads();
    let mut write_resolver = FileResolver::for_writes();
    for task in &tasks {
        read_resolver
            .add_safe_project_root(&task.working_directory)
            .unwrap();
        write_resolver
            .add_safe_project_root(&task.working_directory)
            .unwrap();
    }

    let analyzer = Analyzer::new(read_resolver, write_resolver);
    let reports = analyzer.analyze(&result, &DecisionLogger::disabled()).unwrap();
    assert_eq!(reports.len(), 2);

    let app_report = reports.iter().find(|r| r.task_id == "app").unwrap();
    // /repo/secrets.env is the one unknown access.
    assert_eq!(app_report.high_risk.len(), 1);
    assert_eq!(app_report.high_risk[0].file_path, "/repo/secrets.env");
    assert_eq!(app_report.high_risk[0].level, RiskLevel::High);
    // /usr/lib read is low; src + dist are project-safe.
    assert_eq!(app_report.low_risk.len(), 1);
    assert_eq!(app_report.safe.len(), 2);

    let lib_report = reports.iter().find(|r| r.task_id == "lib-a").unwrap();
    // node_modules read is safe (tool), dist writes are project-safe.
    assert!(lib_report.is_cacheable());
    assert_eq!(lib_report.safe.len(), 3);

    // Persist artifacts.
    report::write_trace_result(&out, &result).unwrap();
    report::write_audit_report(&out, &reports).unwrap();

    let trace_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(TRACE_RESULT_FILE)).unwrap()).unwrap();
    assert_eq!(trace_json["schemaVersion"], RESULT_SCHEMA_VERSION);
    assert_eq!(
        trace_json["tasks"]["app"]["writeFiles"][0],
        "/repo/apps/app/dist/main.js",
    );

    let report_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(AUDIT_REPORT_FILE)).unwrap()).unwrap();
    let tasks_json = report_json["tasks"].as_array().unwrap();
    assert_eq!(tasks_json.len(), 2);
    let app_json = tasks_json
        .iter()
        .find(|t| t["taskId"] == "app")
        .unwrap();
    assert_eq!(app_json["highRisk"][0]["filePath"], "/repo/secrets.env");
    assert_eq!(app_json["highRisk"][0]["kind"], "readFile");
}

#[test]
fn parse_result_is_reproducible() {
    let tmp = tempfile::tempdir().unwrap();
    let descriptors = tmp.path().join("descriptors");
    fs::create_dir_all(&descriptors).unwrap();
    descriptor_dir(&descriptors);

    let workspace = Workspace::load(Path::new("/repo"), &descriptors).unwrap();

    let run = || {
        TraceLogParser::new(workspace.task_specs("app").unwrap(), None)
            .parse(BufReader::new(TRACE_LOG.as_bytes()))
            .unwrap()
    };

    // Same log, same tasks, same result - including set ordering.
    assert_eq!(run(), run());
}
