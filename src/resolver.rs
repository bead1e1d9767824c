//! Path-to-risk resolution pipeline.
//!
//! A [`FileResolver`] turns an absolute path into a [`Resolution`] - a risk
//! level plus an optional kind explaining why. Read and write accesses use
//! separate resolver instances with distinct default category tables.
//!
//! # Precedence
//!
//! Evaluation short-circuits in this order (highest first):
//!
//! 1. **Pattern overrides** (pre-classification) - user-supplied regex rules
//!    checked against the raw path before any default matcher runs.
//! 2. **Project-safe roots** - paths declared as the project's own
//!    source/output resolve to `Safe`/`Project`.
//! 3. **Default categories** - system paths, package-manager caches, VCS
//!    metadata, installed dependency trees; first registered matcher wins.
//! 4. **Fallback** - nothing matched: `High` with no kind. Unknown file
//!    touches are assumed unsafe to cache.
//!
//! After steps 2–3 produce a kind, **kind overrides** (post-classification)
//! are consulted: the first rule in the after-list whose kind matches
//! overrides the level, and the scan stops there. Later rules for the same
//! kind are never consulted, even if they disagree - first loaded wins, not
//! last. Callers that load rules in two passes (global, then project) must
//! go through [`FileResolver::load_global_filter_config`] and
//! [`FileResolver::load_project_filter_config`] so the insertion order is
//! exact: read resolvers always append; the write resolver appends global
//! rules and prepends project rules.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{FilterConfig, MatchRule};
use crate::matcher::{InvalidPathError, PathMatcher};

/// How risky a file access is for build-cache correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Access is known not to affect cacheability.
    Safe,
    /// Access is outside the declared inputs but in a well-understood area.
    Low,
    /// Unknown access; assume it breaks cache correctness.
    High,
}

impl RiskLevel {
    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// Why a path was classified, independent of level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    /// Operating-system paths (`/usr`, `/etc`, `/proc`, ...).
    System,
    /// Package-manager cache and configuration paths.
    Node,
    /// Toolchain-owned paths (VCS metadata, installed dependency trees).
    Tool,
    /// Paths declared as belonging to the project itself.
    Project,
}

impl PathKind {
    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Node => "node",
            Self::Tool => "tool",
            Self::Project => "project",
        }
    }
}

/// Whether a rule or resolver applies to reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// The outcome of resolving one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PathKind>,
}

impl Resolution {
    #[must_use]
    pub const fn new(level: RiskLevel, kind: Option<PathKind>) -> Self {
        Self { level, kind }
    }

    /// The conservative fallback for paths nothing claimed.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            level: RiskLevel::High,
            kind: None,
        }
    }
}

/// Which layer of the pipeline produced a decision (for explain output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSource {
    /// A pre-classification pattern override matched the raw path.
    PatternOverride { pattern: String },
    /// The path is under a declared project-safe root.
    ProjectSafe,
    /// A default category matcher claimed the path.
    Category,
    /// Nothing matched; the conservative default applied.
    Fallback,
}

impl DecisionSource {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PatternOverride { .. } => "pattern-override",
            Self::ProjectSafe => "project-safe",
            Self::Category => "category",
            Self::Fallback => "fallback",
        }
    }
}

/// A resolution plus the layer that produced it and whether a kind override
/// adjusted the level afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainedResolution {
    pub resolution: Resolution,
    pub source: DecisionSource,
    /// Set when a post-classification kind rule overrode the level.
    pub overridden_by_kind: bool,
}

/// A compiled pre-classification override (regex over the raw path).
#[derive(Debug)]
struct PatternRule {
    regex: fancy_regex::Regex,
    pattern: String,
    level: RiskLevel,
}

impl PatternRule {
    #[inline]
    fn is_match(&self, raw: &str) -> bool {
        self.regex.is_match(raw).unwrap_or(false)
    }
}

/// A post-classification override keyed by the resolved kind.
#[derive(Debug, Clone, Copy)]
struct KindRule {
    kind: PathKind,
    level: RiskLevel,
}

/// A filter rule that could not be compiled (kept for diagnostics).
#[derive(Debug, Clone)]
pub struct InvalidRule {
    pub pattern: String,
    pub error: String,
}

/// A default category: a matcher tagged with its classification outcome.
struct Category {
    matcher: PathMatcher,
    level: RiskLevel,
    kind: PathKind,
}

/// Which configuration pass a rule list came from. Drives insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleScope {
    Global,
    Project,
}

/// Default read categories, in registration order (first match wins).
const READ_CATEGORIES: &[(&[&str], RiskLevel, PathKind)] = &[
    // Installed dependency trees are content-addressed by the lockfile; a
    // read there is the one "tool" access that is safe by construction.
    (&["node_modules/"], RiskLevel::Safe, PathKind::Tool),
    (
        &[
            "/usr/", "/lib/", "/lib64/", "/bin/", "/sbin/", "/etc/", "/proc/", "/sys/", "/dev/",
            "/opt/",
        ],
        RiskLevel::Low,
        PathKind::System,
    ),
    (
        &[
            ".npm/",
            ".pnpm/",
            ".pnpm-store/",
            ".yarn/",
            ".npmrc",
            ".cache/",
            ".config/",
        ],
        RiskLevel::Low,
        PathKind::Node,
    ),
    (&[".git/", ".hg/", ".svn/"], RiskLevel::Low, PathKind::Tool),
];

/// Default write categories, in registration order.
const WRITE_CATEGORIES: &[(&[&str], RiskLevel, PathKind)] = &[
    (
        &["/tmp/", "/var/tmp/", "/dev/", "/proc/"],
        RiskLevel::Low,
        PathKind::System,
    ),
    (
        &[".npm/", ".pnpm-store/", ".yarn/", ".cache/"],
        RiskLevel::Low,
        PathKind::Node,
    ),
    (&[".git/"], RiskLevel::Low, PathKind::Tool),
];

/// Central path-to-risk decision function for one operation direction.
///
/// Construct with [`FileResolver::for_reads`] or [`FileResolver::for_writes`]
/// - the two keep distinct default-category tables and distinct override
/// insertion behavior.
pub struct FileResolver {
    operation: Operation,
    project_safe: PathMatcher,
    categories: Vec<Category>,
    before: Vec<PatternRule>,
    after: Vec<KindRule>,
    invalid_rules: Vec<InvalidRule>,
}

impl std::fmt::Debug for FileResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileResolver")
            .field("operation", &self.operation)
            .field("categories", &self.categories.len())
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl FileResolver {
    /// Resolver for read accesses.
    #[must_use]
    pub fn for_reads() -> Self {
        Self::with_categories(Operation::Read, READ_CATEGORIES)
    }

    /// Resolver for write accesses.
    #[must_use]
    pub fn for_writes() -> Self {
        Self::with_categories(Operation::Write, WRITE_CATEGORIES)
    }

    fn with_categories(operation: Operation, table: &[(&[&str], RiskLevel, PathKind)]) -> Self {
        let categories = table
            .iter()
            .map(|(patterns, level, kind)| Category {
                matcher: PathMatcher::with_patterns(patterns.iter().copied())
                    .expect("default category patterns are valid gitignore globs"),
                level: *level,
                kind: *kind,
            })
            .collect();

        Self {
            operation,
            project_safe: PathMatcher::new(),
            categories,
            before: Vec::new(),
            after: Vec::new(),
            invalid_rules: Vec::new(),
        }
    }

    /// The operation direction this resolver serves.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Declare a root whose subtree belongs to the project itself.
    ///
    /// Paths under it resolve to `Safe`/`Project` unless a pattern override
    /// or a `project` kind override says otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] when `root` is not an absolute path.
    pub fn add_safe_project_root(&mut self, root: &Path) -> Result<(), InvalidPathError> {
        if !root.is_absolute() {
            return Err(InvalidPathError {
                path: root.to_path_buf(),
                message: "project root must be absolute".to_string(),
            });
        }
        let root = root.to_string_lossy();
        let root = root.trim_end_matches('/');
        self.project_safe
            .add([root.to_string(), format!("{root}/")])
            .map_err(|e| InvalidPathError {
                path: Path::new(&e.pattern).to_path_buf(),
                message: format!("project root is not a valid pattern: {e}"),
            })
    }

    /// Load monorepo-wide filter rules. Call before the project pass.
    pub fn load_global_filter_config(&mut self, config: &FilterConfig) {
        self.load_rules(&config.rules, RuleScope::Global);
    }

    /// Load task-specific filter rules. For the write resolver these take
    /// precedence over previously loaded global rules; for the read resolver
    /// they are appended in load order.
    pub fn load_project_filter_config(&mut self, config: &FilterConfig) {
        self.load_rules(&config.rules, RuleScope::Project);
    }

    fn load_rules(&mut self, rules: &[MatchRule], scope: RuleScope) {
        // unshift per rule, so a prepended batch ends up reversed relative
        // to its file order, matching the reference loader.
        let prepend = self.operation == Operation::Write && scope == RuleScope::Project;

        for rule in rules {
            if rule.operate != self.operation {
                continue;
            }

            if let Some(pattern) = &rule.pattern {
                match fancy_regex::Regex::new(pattern) {
                    Ok(regex) => {
                        let compiled = PatternRule {
                            regex,
                            pattern: pattern.clone(),
                            level: rule.level,
                        };
                        if prepend {
                            self.before.insert(0, compiled);
                        } else {
                            self.before.push(compiled);
                        }
                    }
                    Err(e) => self.invalid_rules.push(InvalidRule {
                        pattern: pattern.clone(),
                        error: e.to_string(),
                    }),
                }
            } else if let Some(kind) = rule.kind {
                let compiled = KindRule {
                    kind,
                    level: rule.level,
                };
                if prepend {
                    self.after.insert(0, compiled);
                } else {
                    self.after.push(compiled);
                }
            }
        }
    }

    /// Filter rules whose pattern failed to compile (fail-open diagnostics).
    #[must_use]
    pub fn invalid_rules(&self) -> &[InvalidRule] {
        &self.invalid_rules
    }

    /// Resolve a path into a risk level and kind.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] when the path cannot be expressed
    /// relative to the filesystem root. Never errors for "no match" - the
    /// conservative `High` fallback applies instead.
    pub fn resolve(&self, path: &Path) -> Result<Resolution, InvalidPathError> {
        self.explain(path).map(|d| d.resolution)
    }

    /// Resolve a path and report which layer decided.
    ///
    /// # Errors
    ///
    /// Same contract as [`FileResolver::resolve`].
    pub fn explain(&self, path: &Path) -> Result<ExplainedResolution, InvalidPathError> {
        // Pattern overrides run on the raw path before default matchers -
        // and before path validation, which only the matchers require.
        let raw = path.to_string_lossy();
        for rule in &self.before {
            if rule.is_match(&raw) {
                return Ok(ExplainedResolution {
                    resolution: Resolution::new(rule.level, None),
                    source: DecisionSource::PatternOverride {
                        pattern: rule.pattern.clone(),
                    },
                    overridden_by_kind: false,
                });
            }
        }

        let (mut resolution, source) = if self.project_safe.matches(path)? {
            (
                Resolution::new(RiskLevel::Safe, Some(PathKind::Project)),
                DecisionSource::ProjectSafe,
            )
        } else if let Some(category) = self.matching_category(path)? {
            (
                Resolution::new(category.level, Some(category.kind)),
                DecisionSource::Category,
            )
        } else {
            return Ok(ExplainedResolution {
                resolution: Resolution::unknown(),
                source: DecisionSource::Fallback,
                overridden_by_kind: false,
            });
        };

        let mut overridden = false;
        for rule in &self.after {
            if Some(rule.kind) == resolution.kind {
                // First rule for the kind wins; later ones are never
                // consulted.
                resolution.level = rule.level;
                overridden = true;
                break;
            }
        }

        Ok(ExplainedResolution {
            resolution,
            source,
            overridden_by_kind: overridden,
        })
    }

    fn matching_category(&self, path: &Path) -> Result<Option<&Category>, InvalidPathError> {
        for category in &self.categories {
            if category.matcher.matches(path)? {
                return Ok(Some(category));
            }
        }
        Ok(None)
    }
}


#[cfg(test)]
mod proptest_invariants {
    use super::*;
    use proptest::prelude::*;

    fn abs_path_strategy() -> impl Strategy<Value = String> {
        // Absolute paths with normal components only.
        proptest::collection::vec("[a-zA-Z0-9._-]{1,12}", 1..6)
            .prop_map(|parts| format!("/{}", parts.join("/")))
    }

    proptest! {
        /// Resolution is deterministic under unchanged configuration.
        #[test]
        fn resolution_is_deterministic(path in abs_path_strategy()) {
            let resolver = FileResolver::for_reads();
            let a = resolver.resolve(Path::new(&path)).unwrap();
            let b = resolver.resolve(Path::new(&path)).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Unmatched paths carry no kind - the fallback is `(High, None)`.
        #[test]
        fn fallback_paths_have_no_kind(path in abs_path_strategy()) {
            let resolver = FileResolver::for_writes();
            let r = resolver.resolve(Path::new(&path)).unwrap();
            if r.level == RiskLevel::High {
                prop_assert_eq!(r.kind, None);
            }
        }

        /// Arbitrary (possibly invalid) paths never panic the resolver.
        #[test]
        fn resolve_never_panics(path in "\\PC{0,80}") {
            let resolver = FileResolver::for_reads();
            let _ = resolver.resolve(Path::new(&path));
        }
    }
}
