//! Configuration system for cachetrace.
//!
//! Supports layered configuration from multiple sources:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.cachetrace.toml` at the monorepo root)
//! 3. User config (`~/.config/cachetrace/config.toml`)
//! 4. Compiled defaults (lowest priority)
//!
//! Filter rules are deliberately NOT merged across layers: the resolver
//! consumes the global and project rule lists in two separate passes because
//! the insertion order of each pass is part of the override precedence
//! contract (see the resolver module docs).

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::resolver::{Operation, PathKind, RiskLevel};

/// Environment variable prefix for all config options.
const ENV_PREFIX: &str = "CACHETRACE";

/// User-level config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Project-level config file name.
const PROJECT_CONFIG_NAME: &str = ".cachetrace.toml";

/// A declarative classification override.
///
/// Exactly one of `kind` and `pattern` must be set:
/// - `pattern` rules run **before** classification, as a regex over the raw
///   path; a match returns the rule's level immediately.
/// - `kind` rules run **after** classification and override the level when
///   the resolved kind matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    /// Whether the rule applies to read or write accesses.
    pub operate: Operation,
    /// The level the rule assigns.
    pub level: RiskLevel,
    /// Post-classification selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PathKind>,
    /// Pre-classification selector (regular expression over the raw path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// An ordered list of filter rules from one configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub rules: Vec<MatchRule>,
}

/// A filter rule that failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleError {
    /// Index of the offending `[[rules]]` entry in its file.
    pub index: usize,
    pub message: String,
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule #{}: {}", self.index, self.message)
    }
}

impl FilterConfig {
    /// Drop structurally invalid rules, returning one error per dropped rule.
    ///
    /// Invalid entries must not abort the load - the audit still runs with
    /// the rules that do parse, and the errors are surfaced as diagnostics.
    pub fn sanitize(&mut self) -> Vec<RuleError> {
        let mut errors = Vec::new();
        let mut index = 0usize;
        self.rules.retain(|rule| {
            let current = index;
            index += 1;
            match (&rule.kind, &rule.pattern) {
                (None, None) => {
                    errors.push(RuleError {
                        index: current,
                        message: "missing selector: set one of kind, pattern".to_string(),
                    });
                    false
                }
                (Some(_), Some(_)) => {
                    errors.push(RuleError {
                        index: current,
                        message: "ambiguous selector: set exactly one of kind, pattern".to_string(),
                    });
                    false
                }
                _ => true,
            }
        });
        errors
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Color output mode: "auto", "always", "never".
    pub color: String,
    /// Whether to show verbose output.
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            color: "auto".to_string(),
            verbose: false,
        }
    }
}

/// Tracer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Tracer binary name or path.
    pub binary: String,
    /// Maximum string length the tracer records per argument.
    pub string_limit: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            binary: "strace".to_string(),
            string_limit: 4096,
        }
    }
}

/// One configuration file's contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub trace: TraceConfig,
    pub logging: LoggingConfig,
    /// Filter rules declared in this file.
    pub rules: Vec<MatchRule>,
}

/// Fully loaded configuration with layered rule lists kept separate.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub general: GeneralConfig,
    pub trace: TraceConfig,
    pub logging: LoggingConfig,
    /// Monorepo-wide filter rules (user config layer).
    pub global_rules: FilterConfig,
    /// Task-specific filter rules (project config layer).
    pub project_rules: FilterConfig,
    /// Structurally invalid rules dropped during the load.
    pub rule_errors: Vec<RuleError>,
}

impl LoadedConfig {
    /// Load configuration from all sources.
    ///
    /// `project_dir` anchors the upward search for `.cachetrace.toml`;
    /// pass the monorepo root when known, or `None` for the current
    /// directory.
    #[must_use]
    pub fn load(project_dir: Option<&Path>) -> Self {
        let user = Config::load_user_config();
        let project = Config::load_project_config(project_dir);
        Self::from_layers(user, project)
    }

    /// Assemble a loaded configuration from explicit layers (test seam).
    #[must_use]
    pub fn from_layers(user: Option<Config>, project: Option<Config>) -> Self {
        let mut loaded = Self::default();

        if let Some(user) = user {
            loaded.general = user.general;
            loaded.trace = user.trace;
            loaded.logging = user.logging;
            loaded.global_rules = FilterConfig { rules: user.rules };
        }

        if let Some(project) = project {
            // Project layer wins for scalar settings; rules stay separate
            // so the resolver can apply its two-pass insertion order.
            if project.general.color != "auto" {
                loaded.general.color = project.general.color;
            }
            if project.general.verbose {
                loaded.general.verbose = true;
            }
            if project.trace.binary != TraceConfig::default().binary {
                loaded.trace.binary = project.trace.binary;
            }
            if project.logging.enabled {
                loaded.logging = project.logging;
            }
            loaded.project_rules = FilterConfig {
                rules: project.rules,
            };
        }

        loaded.apply_env_overrides();

        let mut errors = loaded.global_rules.sanitize();
        errors.extend(loaded.project_rules.sanitize());
        loaded.rule_errors = errors;

        loaded
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // CACHETRACE_VERBOSE=1
        if env::var(format!("{ENV_PREFIX}_VERBOSE")).is_ok() {
            self.general.verbose = true;
        }

        // CACHETRACE_COLOR=never
        if let Ok(color) = env::var(format!("{ENV_PREFIX}_COLOR")) {
            self.general.color = color;
        }

        // CACHETRACE_STRACE=/opt/strace/bin/strace
        if let Ok(binary) = env::var(format!("{ENV_PREFIX}_STRACE")) {
            self.trace.binary = binary;
        }
    }
}

impl Config {
    /// Load configuration from a specific file.
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    /// Load user configuration.
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let path = config_dir.join("cachetrace").join(CONFIG_FILE_NAME);
        Self::load_from_file(&path)
    }

    /// Load project-level configuration by searching upward from `start`.
    fn load_project_config(start: Option<&Path>) -> Option<Self> {
        let mut current = match start {
            Some(dir) => dir.to_path_buf(),
            None => env::current_dir().ok()?,
        };

        loop {
            let config_path = current.join(PROJECT_CONFIG_NAME);
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }

            // A .git directory marks the repo root; stop there.
            if current.join(".git").exists() {
                return None;
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Generate a sample configuration string with comments.
    #[must_use]
    pub fn generate_sample_config() -> String {
        r#"# cachetrace configuration

[general]
# Color output: "auto" | "always" | "never"
color = "auto"
verbose = false

[trace]
# Tracer binary (must support -f and -o)
binary = "strace"
string_limit = 4096

[logging]
# Structured decision log (one entry per classified path)
enabled = false
# file = "~/.local/share/cachetrace/decisions.log"
# format = "json"

# Filter rules. Exactly one of `kind` / `pattern` per rule.
#
# Pattern rules run before classification and short-circuit it:
# [[rules]]
# operate = "read"
# level = "safe"
# pattern = '^/opt/toolchains/'
#
# Kind rules run after classification and override the level:
# [[rules]]
# operate = "write"
# level = "high"
# kind = "node"
"#
        .to_string()
    }
}
