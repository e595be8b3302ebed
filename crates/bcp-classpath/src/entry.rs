use std::path::{Path, PathBuf};

use bcp_bazel::{BazelInfo, JarSet, Label};
use serde::Serialize;

/// A jar on the classpath, with its optional source attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LibraryEntry {
    pub jar: PathBuf,
    pub source_jar: Option<PathBuf>,
    pub test_only: bool,
    /// Target the jar was found through.
    pub origin: Option<Label>,
}

/// Another IDE project on the classpath.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectEntry {
    pub name: String,
    pub test_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClasspathEntry {
    Library(LibraryEntry),
    Project(ProjectEntry),
}

impl ClasspathEntry {
    pub fn is_test_only(&self) -> bool {
        match self {
            Self::Library(library) => library.test_only,
            Self::Project(project) => project.test_only,
        }
    }

    pub(crate) fn with_test_only(mut self, test_only: bool) -> Self {
        match &mut self {
            Self::Library(library) => library.test_only = test_only,
            Self::Project(project) => project.test_only = test_only,
        }
        self
    }

    /// Identity used when merging main and test entries.
    pub(crate) fn key(&self) -> String {
        match self {
            Self::Library(library) => library.jar.to_string_lossy().into_owned(),
            Self::Project(project) => format!("project:{}", project.name),
        }
    }
}

/// Referenced artifacts that were absent on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissingArtifacts {
    pub found_missing_jars: bool,
    pub found_missing_source_jars: bool,
    pub missing_jar_count: usize,
}

impl MissingArtifacts {
    pub fn merge(&mut self, other: MissingArtifacts) {
        self.found_missing_jars |= other.found_missing_jars;
        self.found_missing_source_jars |= other.found_missing_source_jars;
        self.missing_jar_count += other.missing_jar_count;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClasspathResult {
    pub entries: Vec<ClasspathEntry>,
    /// Projects this one depends on, in discovery order.
    pub project_references: Vec<String>,
    /// `false` when a requested target produced no aspect info.
    pub complete: bool,
    pub missing: MissingArtifacts,
}

impl Default for ClasspathResult {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            project_references: Vec::new(),
            complete: true,
            missing: MissingArtifacts::default(),
        }
    }
}

impl ClasspathResult {
    pub fn library_entries(&self) -> impl Iterator<Item = &LibraryEntry> {
        self.entries.iter().filter_map(|entry| match entry {
            ClasspathEntry::Library(library) => Some(library),
            ClasspathEntry::Project(_) => None,
        })
    }

    pub fn project_entries(&self) -> impl Iterator<Item = &ProjectEntry> {
        self.entries.iter().filter_map(|entry| match entry {
            ClasspathEntry::Project(project) => Some(project),
            ClasspathEntry::Library(_) => None,
        })
    }
}

/// Resolves execution-root-relative jar paths to files on disk and counts
/// the ones that are missing.
#[derive(Debug, Clone)]
pub struct JarResolver {
    execution_root: PathBuf,
    output_base: PathBuf,
    missing: MissingArtifacts,
}

impl JarResolver {
    pub fn new(info: &BazelInfo) -> Self {
        Self {
            execution_root: info.execution_root.clone(),
            output_base: info.output_base.clone(),
            missing: MissingArtifacts::default(),
        }
    }

    pub fn missing(&self) -> MissingArtifacts {
        self.missing
    }

    /// Absolute location of an execution-root-relative path.
    ///
    /// `external/<repo>` lives next to the execution root (under the output
    /// base) in newer Bazel releases; that location is used when the path
    /// does not exist below the execution root.
    pub fn locate(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let candidate = self.execution_root.join(path);
        if !candidate.exists() && relative.starts_with("external/") {
            let sibling = self.output_base.join(path);
            if sibling.exists() {
                return sibling;
            }
        }
        candidate
    }

    /// Library entry for a jar set; `None` (and counted as missing) when the
    /// jar is not a regular file.
    pub fn resolve(
        &mut self,
        jars: &JarSet,
        test_only: bool,
        origin: Option<&Label>,
    ) -> Option<LibraryEntry> {
        let relative = jars.class_jar.as_deref().or(jars.interface_jar.as_deref())?;
        self.resolve_path(relative, jars.source_jar.as_deref(), test_only, origin)
    }

    pub fn resolve_path(
        &mut self,
        jar: &str,
        source_jar: Option<&str>,
        test_only: bool,
        origin: Option<&Label>,
    ) -> Option<LibraryEntry> {
        let located = self.locate(jar);
        let Some(jar_path) = real_file(&located) else {
            tracing::debug!(target = "bcp.classpath", jar = %located.display(), "jar missing on disk");
            self.missing.found_missing_jars = true;
            self.missing.missing_jar_count += 1;
            return None;
        };

        let source_jar = source_jar.map(|source| {
            let located = self.locate(source);
            real_file(&located).unwrap_or_else(|| {
                tracing::debug!(target = "bcp.classpath", source_jar = %located.display(), "source jar missing on disk");
                self.missing.found_missing_source_jars = true;
                located
            })
        });

        Some(LibraryEntry {
            jar: jar_path,
            source_jar,
            test_only,
            origin: origin.cloned(),
        })
    }
}

/// `path` itself when it is a regular file, its target when it is a symlink
/// to one. Dangling links and anything else yield `None`.
fn real_file(path: &Path) -> Option<PathBuf> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    if metadata.file_type().is_symlink() {
        return std::fs::canonicalize(path).ok().filter(|target| target.is_file());
    }
    metadata.is_file().then(|| path.to_path_buf())
}

/// Execution-root-relative path of a file label: `[external/<repo>/]<package>/<name>`,
/// below `bazel_bin` for generated files.
pub fn label_file_path(label: &Label, bazel_bin: Option<&Path>) -> String {
    let package_dir = label.package_dir();
    let mut path = match bazel_bin {
        Some(bin) => bin.to_string_lossy().trim_end_matches('/').to_string(),
        None => String::new(),
    };
    for part in [package_dir.as_str(), label.target_name()] {
        if part.is_empty() {
            continue;
        }
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(part);
    }
    path
}
