//! Gitignore-style path matching against a conceptual filesystem root.
//!
//! A [`PathMatcher`] wraps an ordered set of gitignore-syntax glob patterns
//! and answers whether an absolute path falls inside that set. Matchers are
//! rooted at `/`, so patterns see the full absolute path (`/usr/`,
//! `.pnpm-store/`, `node_modules/`, ...) with the usual gitignore anchoring
//! and directory semantics.
//!
//! Design goals:
//! - Patterns are registered incrementally via [`PathMatcher::add`]; invalid
//!   pattern syntax surfaces immediately, not at match time.
//! - Matching never guesses: a path that cannot be expressed relative to the
//!   root (not absolute, or escaping via `..`) is an [`InvalidPathError`],
//!   because a malformed path indicates an upstream data bug.

use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// A path could not be expressed relative to the filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPathError {
    pub path: PathBuf,
    pub message: String,
}

impl InvalidPathError {
    fn new(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for InvalidPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid path {:?}: {}", self.path, self.message)
    }
}

impl std::error::Error for InvalidPathError {}

/// A registered glob pattern was not valid gitignore syntax.
#[derive(Debug)]
pub struct PatternError {
    pub pattern: String,
    pub source: ignore::Error,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid glob pattern {:?}: {}", self.pattern, self.source)
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// An ordered set of gitignore-style patterns matched against absolute paths.
pub struct PathMatcher {
    builder: GitignoreBuilder,
    compiled: Gitignore,
}

impl std::fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMatcher")
            .field("patterns", &self.compiled.len())
            .finish()
    }
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PathMatcher {
    /// Create an empty matcher rooted at `/`.
    #[must_use]
    pub fn new() -> Self {
        let builder = GitignoreBuilder::new("/");
        let compiled = Gitignore::empty();
        Self { builder, compiled }
    }

    /// Create a matcher pre-loaded with `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for the first syntactically invalid pattern.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::new();
        matcher.add(patterns)?;
        Ok(matcher)
    }

    /// Register additional patterns into the matcher's set.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] for the first syntactically invalid pattern.
    /// Previously registered patterns remain in effect.
    pub fn add<I, S>(&mut self, patterns: I) -> Result<(), PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref();
            self.builder
                .add_line(None, pattern)
                .map_err(|source| PatternError {
                    pattern: pattern.to_string(),
                    source,
                })?;
        }
        self.compiled = self.builder.build().map_err(|source| PatternError {
            pattern: String::new(),
            source,
        })?;
        Ok(())
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// True if no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Check whether `path` falls inside this matcher's pattern set.
    ///
    /// `path` must be absolute. Matching considers parent directories, so a
    /// pattern like `node_modules/` matches every path beneath any
    /// `node_modules` directory.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] when the path is not absolute or escapes
    /// the root via `..` components.
    pub fn matches(&self, path: &Path) -> Result<bool, InvalidPathError> {
        let normalized = normalize_absolute(path)?;
        Ok(self
            .compiled
            .matched_path_or_any_parents(&normalized, false)
            .is_ignore())
    }
}

/// Normalize an absolute path, resolving `.` and `..` components lexically.
///
/// Fails when the path is relative or `..` would climb above the root.
pub(crate) fn normalize_absolute(path: &Path) -> Result<PathBuf, InvalidPathError> {
    if !path.is_absolute() {
        return Err(InvalidPathError::new(path, "expected an absolute path"));
    }

    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => {}
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() || normalized.as_os_str().is_empty() {
                    return Err(InvalidPathError::new(path, "path escapes the root"));
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> PathMatcher {
        PathMatcher::with_patterns(patterns.iter().copied()).expect("valid patterns")
    }

    #[test]
    fn anchored_directory_pattern_matches_subtree() {
        let m = matcher(&["/usr/"]);
        assert!(m.matches(Path::new("/usr/lib/libc.so")).unwrap());
        assert!(m.matches(Path::new("/usr/bin/node")).unwrap());
        assert!(!m.matches(Path::new("/opt/usr/file")).unwrap());
    }

    #[test]
    fn unanchored_pattern_matches_anywhere() {
        let m = matcher(&[".pnpm-store/"]);
        assert!(m.matches(Path::new("/root/.pnpm-store/v3/files/ab")).unwrap());
        assert!(m.matches(Path::new("/home/ci/.pnpm-store/x")).unwrap());
        assert!(!m.matches(Path::new("/home/ci/src/index.ts")).unwrap());
    }

    #[test]
    fn negation_excludes_from_set() {
        let m = matcher(&["/etc/", "!/etc/hosts"]);
        assert!(m.matches(Path::new("/etc/passwd")).unwrap());
        assert!(!m.matches(Path::new("/etc/hosts")).unwrap());
    }

    #[test]
    fn relative_path_is_rejected() {
        let m = matcher(&["/usr/"]);
        let err = m.matches(Path::new("usr/lib")).unwrap_err();
        assert!(err.message.contains("absolute"));
    }

    #[test]
    fn escaping_path_is_rejected() {
        let m = matcher(&["/usr/"]);
        let err = m.matches(Path::new("/usr/../../etc")).unwrap_err();
        assert!(err.message.contains("escapes"));
    }

    #[test]
    fn dot_components_are_normalized() {
        let m = matcher(&["/usr/"]);
        assert!(m.matches(Path::new("/usr/./lib/../lib/x.so")).unwrap());
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let m = PathMatcher::new();
        assert!(m.is_empty());
        assert!(!m.matches(Path::new("/anything")).unwrap());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut m = PathMatcher::new();
        let err = m.add(["a["]).expect_err("unclosed class must not parse");
        assert_eq!(err.pattern, "a[");
    }

    #[test]
    fn incremental_add_extends_set() {
        let mut m = matcher(&["/usr/"]);
        assert!(!m.matches(Path::new("/lib/ld.so")).unwrap());
        m.add(["/lib/"]).unwrap();
        assert!(m.matches(Path::new("/lib/ld.so")).unwrap());
        assert!(m.matches(Path::new("/usr/lib/x")).unwrap());
    }
}
