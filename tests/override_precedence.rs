//! Regression suite for override precedence.
//!
//! Two behaviors here are easy to "fix" by accident and must stay exactly
//! as they are:
//!
//! 1. Post-classification kind overrides are first-loaded-wins, not
//!    last-loaded-wins: the after-list is scanned front-to-back and stops
//!    at the first kind match, no matter how many rules were loaded.
//! 2. The write resolver prepends project-scope rules and appends
//!    global-scope rules; the read resolver always appends. Which single
//!    rule ends up "first" - and therefore wins - depends on this.

use std::path::Path;

use cachetrace::config::{FilterConfig, MatchRule};
use cachetrace::resolver::{FileResolver, Operation, PathKind, Resolution, RiskLevel};

fn kind_rule(operate: Operation, level: RiskLevel, kind: PathKind) -> MatchRule {
    MatchRule {
        operate,
        level,
        kind: Some(kind),
        pattern: None,
    }
}

fn pattern_rule(operate: Operation, level: RiskLevel, pattern: &str) -> MatchRule {
    MatchRule {
        operate,
        level,
        kind: None,
        pattern: Some(pattern.to_string()),
    }
}

fn filter(rules: Vec<MatchRule>) -> FilterConfig {
    FilterConfig { rules }
}

#[test]
fn second_kind_override_for_same_kind_is_never_consulted() {
    let mut resolver = FileResolver::for_reads();
    resolver.load_global_filter_config(&filter(vec![
        kind_rule(Operation::Read, RiskLevel::Safe, PathKind::System),
        kind_rule(Operation::Read, RiskLevel::High, PathKind::System),
    ]));

    // Both rules target kind=system; only the first ever runs.
    let r = resolver.resolve(Path::new("/usr/lib/libssl.so")).unwrap();
    assert_eq!(r.level, RiskLevel::Safe);
}

#[test]
fn write_prepend_makes_last_project_rule_win() {
    // Project rules are prepended one at a time (unshift semantics), so the
    // LAST rule in the project file ends up FIRST in the after-list.
    let mut resolver = FileResolver::for_writes();
    resolver.load_project_filter_config(&filter(vec![
        kind_rule(Operation::Write, RiskLevel::High, PathKind::System),
        kind_rule(Operation::Write, RiskLevel::Safe, PathKind::System),
    ]));

    let r = resolver.resolve(Path::new("/tmp/build-scratch")).unwrap();
    assert_eq!(r.level, RiskLevel::Safe);
}

#[test]
fn read_append_makes_first_global_rule_win() {
    let mut resolver = FileResolver::for_reads();
    resolver.load_global_filter_config(&filter(vec![kind_rule(
        Operation::Read,
        RiskLevel::High,
        PathKind::Node,
    )]));
    resolver.load_project_filter_config(&filter(vec![kind_rule(
        Operation::Read,
        RiskLevel::Safe,
        PathKind::Node,
    )]));

    // Read resolvers append project rules, so the global rule stays first.
    let r = resolver.resolve(Path::new("/home/ci/.pnpm-store/x")).unwrap();
    assert_eq!(r.level, RiskLevel::High);
}

#[test]
fn write_project_rule_beats_earlier_global_rule() {
    let mut resolver = FileResolver::for_writes();
    resolver.load_global_filter_config(&filter(vec![kind_rule(
        Operation::Write,
        RiskLevel::High,
        PathKind::Node,
    )]));
    resolver.load_project_filter_config(&filter(vec![kind_rule(
        Operation::Write,
        RiskLevel::Low,
        PathKind::Node,
    )]));

    let r = resolver
        .resolve(Path::new("/home/ci/.pnpm-store/v3/files/ab"))
        .unwrap();
    assert_eq!(r.level, RiskLevel::Low);
}

#[test]
fn write_project_pattern_rules_run_before_global_pattern_rules() {
    let mut resolver = FileResolver::for_writes();
    resolver.load_global_filter_config(&filter(vec![pattern_rule(
        Operation::Write,
        RiskLevel::High,
        r"^/shared/",
    )]));
    resolver.load_project_filter_config(&filter(vec![pattern_rule(
        Operation::Write,
        RiskLevel::Safe,
        r"^/shared/cache/",
    )]));

    // Both patterns match; the prepended project rule is consulted first.
    let r = resolver
        .resolve(Path::new("/shared/cache/blob.bin"))
        .unwrap();
    assert_eq!(r, Resolution::new(RiskLevel::Safe, None));

    // Paths only the global pattern matches still use it.
    let r = resolver.resolve(Path::new("/shared/other.bin")).unwrap();
    assert_eq!(r.level, RiskLevel::High);
}

#[test]
fn read_pattern_rules_keep_load_order() {
    let mut resolver = FileResolver::for_reads();
    resolver.load_global_filter_config(&filter(vec![pattern_rule(
        Operation::Read,
        RiskLevel::Low,
        r"^/shared/",
    )]));
    resolver.load_project_filter_config(&filter(vec![pattern_rule(
        Operation::Read,
        RiskLevel::Safe,
        r"^/shared/cache/",
    )]));

    // Appended project rule comes second; the global rule wins the overlap.
    let r = resolver
        .resolve(Path::new("/shared/cache/blob.bin"))
        .unwrap();
    assert_eq!(r.level, RiskLevel::Low);
}

#[test]
fn pattern_overrides_short_circuit_everything() {
    let mut resolver = FileResolver::for_writes();
    resolver
        .add_safe_project_root(Path::new("/repo/dist"))
        .unwrap();
    resolver.load_global_filter_config(&filter(vec![
        pattern_rule(Operation::Write, RiskLevel::High, r"\.env$"),
        // This kind rule would fire for project paths, but pattern rules
        // run first and return without a kind.
        kind_rule(Operation::Write, RiskLevel::Low, PathKind::Project),
    ]));

    let r = resolver.resolve(Path::new("/repo/dist/prod.env")).unwrap();
    assert_eq!(r, Resolution::new(RiskLevel::High, None));
}

#[test]
fn mixed_rule_files_split_by_operation() {
    // One config file feeds both resolvers; each picks out its own rules.
    let rules = filter(vec![
        kind_rule(Operation::Read, RiskLevel::High, PathKind::Tool),
        kind_rule(Operation::Write, RiskLevel::Safe, PathKind::Tool),
    ]);

    let mut read_resolver = FileResolver::for_reads();
    let mut write_resolver = FileResolver::for_writes();
    read_resolver.load_global_filter_config(&rules);
    write_resolver.load_global_filter_config(&rules);

    let read = read_resolver.resolve(Path::new("/repo/.git/HEAD")).unwrap();
    let write = write_resolver.resolve(Path::new("/repo/.git/HEAD")).unwrap();
    assert_eq!(read.level, RiskLevel::High);
    assert_eq!(write.level, RiskLevel::Safe);
}
