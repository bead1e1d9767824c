//! Monorepo project descriptors (read-only boundary).
//!
//! The monorepo's own configuration is out of scope; the audit consumes a
//! directory of small TOML descriptors, one per project, and resolves the
//! target project plus its transitive dependencies into the task set the
//! parser registers. Descriptors are external input: unreadable or invalid
//! files fail the load with a structured error rather than a panic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::TaskSpec;

/// One project's descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    /// Package name (the task id).
    pub name: String,
    /// The project's working directory, absolute or relative to the
    /// workspace root.
    pub path: PathBuf,
    /// Names of workspace projects this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Build command, split into argv. Defaults to `npm run build`.
    #[serde(default)]
    pub build: Vec<String>,
}

impl ProjectDescriptor {
    /// The build command, with the default applied.
    #[must_use]
    pub fn build_command(&self) -> Vec<String> {
        if self.build.is_empty() {
            vec!["npm".to_string(), "run".to_string(), "build".to_string()]
        } else {
            self.build.clone()
        }
    }
}

/// Descriptor loading failures.
#[derive(Debug)]
pub enum WorkspaceError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    DuplicateProject { name: String },
    UnknownProject { name: String },
}

impl std::fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read descriptor {}: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "invalid descriptor {}: {message}", path.display())
            }
            Self::DuplicateProject { name } => {
                write!(f, "duplicate project descriptor for {name:?}")
            }
            Self::UnknownProject { name } => write!(f, "unknown project {name:?}"),
        }
    }
}

impl std::error::Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The loaded set of project descriptors.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    root: PathBuf,
    projects: BTreeMap<String, ProjectDescriptor>,
}

impl Workspace {
    /// Load every `*.toml` descriptor in `dir`.
    ///
    /// `root` anchors relative project paths.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, invalid TOML, and duplicate project names.
    pub fn load(root: &Path, dir: &Path) -> Result<Self, WorkspaceError> {
        let mut projects = BTreeMap::new();

        let entries = fs::read_dir(dir).map_err(|source| WorkspaceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        // Sort for deterministic load order regardless of readdir order.
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path).map_err(|source| WorkspaceError::Io {
                path: path.clone(),
                source,
            })?;
            let descriptor: ProjectDescriptor =
                toml::from_str(&content).map_err(|e| WorkspaceError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            if projects.contains_key(&descriptor.name) {
                return Err(WorkspaceError::DuplicateProject {
                    name: descriptor.name,
                });
            }
            projects.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self {
            root: root.to_path_buf(),
            projects,
        })
    }

    /// Number of loaded projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// True when no descriptors were loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Look up a project by name.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&ProjectDescriptor> {
        self.projects.get(name)
    }

    /// A project's working directory, absolute.
    #[must_use]
    pub fn project_dir(&self, descriptor: &ProjectDescriptor) -> PathBuf {
        if descriptor.path.is_absolute() {
            descriptor.path.clone()
        } else {
            self.root.join(&descriptor.path)
        }
    }

    /// The target project plus its transitive dependencies, breadth-first
    /// from the target, deduplicated. The target comes first; ties are
    /// broken by declaration order. Dependency cycles are tolerated (each
    /// project appears once).
    ///
    /// # Errors
    ///
    /// Fails when `name` or any referenced dependency has no descriptor.
    pub fn closure(&self, name: &str) -> Result<Vec<&ProjectDescriptor>, WorkspaceError> {
        let target = self
            .projects
            .get(name)
            .ok_or_else(|| WorkspaceError::UnknownProject {
                name: name.to_string(),
            })?;

        let mut ordered = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();

        seen.insert(target.name.as_str());
        queue.push_back(target);

        while let Some(project) = queue.pop_front() {
            ordered.push(project);
            for dep in &project.dependencies {
                if seen.contains(dep.as_str()) {
                    continue;
                }
                let dep_project =
                    self.projects
                        .get(dep)
                        .ok_or_else(|| WorkspaceError::UnknownProject {
                            name: dep.clone(),
                        })?;
                seen.insert(dep_project.name.as_str());
                queue.push_back(dep_project);
            }
        }

        Ok(ordered)
    }

    /// The task set the parser registers for auditing `name`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Workspace::closure`].
    pub fn task_specs(&self, name: &str) -> Result<Vec<TaskSpec>, WorkspaceError> {
        Ok(self
            .closure(name)?
            .into_iter()
            .map(|p| TaskSpec {
                task_id: p.name.clone(),
                working_directory: self.project_dir(p),
            })
            .collect())
    }
}
