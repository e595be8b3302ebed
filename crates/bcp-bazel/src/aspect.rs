//! Per-target facts produced by the `bzljavasdk` aspect.
//!
//! Each target built with the aspect writes a `<target>.bzljavasdk-data.json`
//! file. Bazel names those files on stderr (`>>>/abs/path`) because the build
//! runs with `--experimental_show_artifacts`.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{BazelError, Result},
    label::Label,
};

pub const ASPECT_FILE_SUFFIX: &str = ".bzljavasdk-data.json";
pub const ASPECT_REPOSITORY: &str = "bazeljavasdk_aspect";
pub const DEFAULT_ASPECT_LABEL: &str = "//:bzljavasdk_aspect.bzl%bzljavasdk_aspect";
pub const OUTPUT_GROUPS: &str =
    "intellij-info-generic,intellij-info-java-direct-deps,intellij-resolve-java-direct-deps";
/// Targets per `bazel build` invocation.
pub const ASPECT_BATCH_SIZE: usize = 25;

/// Class jar with its optional interface (ijar/hjar) and source jar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JarSet {
    pub class_jar: Option<String>,
    pub interface_jar: Option<String>,
    pub source_jar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub label: Label,
    /// Rule class, e.g. `java_library`.
    pub kind: String,
    pub build_file: Option<String>,
    /// Workspace-relative source paths.
    pub sources: Vec<String>,
    pub deps: Vec<Label>,
    pub jars: Vec<JarSet>,
    pub generated_jars: Vec<JarSet>,
    pub main_class: Option<String>,
}

impl TargetInfo {
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn is_test(&self) -> bool {
        self.kind.ends_with("_test")
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    build_file_artifact_location: Option<RawArtifact>,
    #[serde(default)]
    kind_string: Option<String>,
    key: RawKey,
    #[serde(default)]
    deps: Vec<RawDep>,
    #[serde(default)]
    java_ide_info: Option<RawJavaIdeInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct RawKey {
    label: String,
}

#[derive(Debug, Deserialize)]
struct RawDep {
    #[serde(default)]
    target: RawKey,
}

#[derive(Debug, Default, Deserialize)]
struct RawJavaIdeInfo {
    #[serde(default)]
    jars: Vec<RawJar>,
    #[serde(default)]
    generated_jars: Vec<RawJar>,
    #[serde(default)]
    sources: Vec<RawArtifact>,
    #[serde(default)]
    main_class: Option<String>,
}

/// Either `{jar: {...}, interface_jar: {...}, source_jar: {...}}` or a flat
/// artifact carrying `relative_path` next to the other two.
#[derive(Debug, Default, Deserialize)]
struct RawJar {
    #[serde(default)]
    jar: Option<RawArtifact>,
    #[serde(default)]
    relative_path: Option<String>,
    #[serde(default)]
    root_execution_path_fragment: Option<String>,
    #[serde(default)]
    interface_jar: Option<RawArtifact>,
    #[serde(default)]
    source_jar: Option<RawArtifact>,
}

#[derive(Debug, Default, Deserialize)]
struct RawArtifact {
    #[serde(default)]
    relative_path: String,
    #[serde(default)]
    root_execution_path_fragment: Option<String>,
}

impl RawArtifact {
    /// Generated artifacts are prefixed with their execution-root fragment.
    fn path(&self) -> Option<String> {
        artifact_path(&self.relative_path, self.root_execution_path_fragment.as_deref())
    }
}

fn artifact_path(relative: &str, fragment: Option<&str>) -> Option<String> {
    if relative.is_empty() {
        return None;
    }
    match fragment.filter(|f| !f.is_empty()) {
        Some(fragment) => Some(format!("{}/{relative}", fragment.trim_end_matches('/'))),
        None => Some(relative.to_string()),
    }
}

impl RawJar {
    fn into_jar_set(self) -> JarSet {
        let class_jar = match &self.jar {
            Some(jar) => jar.path(),
            None => self.relative_path.as_deref().and_then(|relative| {
                artifact_path(relative, self.root_execution_path_fragment.as_deref())
            }),
        };
        JarSet {
            class_jar,
            interface_jar: self.interface_jar.as_ref().and_then(RawArtifact::path),
            source_jar: self.source_jar.as_ref().and_then(RawArtifact::path),
        }
    }
}

/// Parse one aspect JSON document.
///
/// A missing `java_ide_info` block yields empty jars/sources and no main
/// class. Jar order is preserved.
pub fn parse_aspect_json(text: &str) -> Result<TargetInfo> {
    let raw: RawInfo = serde_json::from_str(text).map_err(|err| BazelError::Parse {
        what: "aspect json".to_string(),
        message: err.to_string(),
    })?;

    let label = Label::parse(&raw.key.label)?;
    let deps = raw
        .deps
        .into_iter()
        .filter_map(|dep| match Label::parse(&dep.target.label) {
            Ok(label) => Some(label),
            Err(err) => {
                tracing::debug!(target = "bcp.bazel", dep = %dep.target.label, error = %err, "skipping unparseable dependency label");
                None
            }
        })
        .collect();

    let ide = raw.java_ide_info.unwrap_or_default();
    Ok(TargetInfo {
        label,
        kind: raw.kind_string.unwrap_or_default(),
        build_file: raw
            .build_file_artifact_location
            .and_then(|location| location.path()),
        sources: ide.sources.iter().filter_map(RawArtifact::path).collect(),
        deps,
        jars: ide.jars.into_iter().map(RawJar::into_jar_set).collect(),
        generated_jars: ide
            .generated_jars
            .into_iter()
            .map(RawJar::into_jar_set)
            .collect(),
        main_class: ide.main_class.filter(|main| !main.is_empty()),
    })
}

/// Parse an aspect file, logging and returning `None` when it is unreadable
/// or malformed so the caller can skip it.
pub fn parse_aspect_file(path: &Path) -> Option<TargetInfo> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(target = "bcp.bazel", path = %path.display(), error = %err, "failed to read aspect file");
            return None;
        }
    };
    match parse_aspect_json(&text) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!(target = "bcp.bazel", path = %path.display(), error = %err, "skipping malformed aspect file");
            None
        }
    }
}

/// Aspect file paths named on the stderr of an aspect build.
pub fn aspect_files_from_stderr(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(">>>"))
        .filter(|path| path.ends_with(ASPECT_FILE_SUFFIX))
        .map(|path| path.trim().to_string())
        .collect()
}

/// Derive the owning label from an aspect file path such as
/// `bazel-out/k8-fastbuild/bin/a/b/lib.bzljavasdk-data.json`.
pub fn label_from_aspect_path(path: &str) -> Option<Label> {
    let file_name = path.rsplit('/').next()?;
    let target = file_name.strip_suffix(ASPECT_FILE_SUFFIX)?;
    let (_, after_bin) = path.split_once("/bin/")?;
    let package = after_bin
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or_default();

    let text = match package.strip_prefix("external/") {
        Some(rest) => {
            let (repo, package) = rest.split_once('/').unwrap_or((rest, ""));
            format!("@{repo}//{package}:{target}")
        }
        None => format!("//{package}:{target}"),
    };
    Label::parse(&text).ok()
}

/// All parsed infos of one resolution pass, indexed by label.
#[derive(Debug, Clone, Default)]
pub struct AspectIndex {
    infos: BTreeMap<Label, TargetInfo>,
}

impl AspectIndex {
    pub fn new(infos: impl IntoIterator<Item = TargetInfo>) -> Self {
        Self {
            infos: infos
                .into_iter()
                .map(|info| (info.label.clone(), info))
                .collect(),
        }
    }

    pub fn get(&self, label: &Label) -> Option<&TargetInfo> {
        self.infos.get(label)
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetInfo> {
        self.infos.values()
    }

    /// Breadth-first closure over `deps`, excluding `start` itself unless it
    /// is a `java_test` or `java_import`. Deps without an info are skipped.
    pub fn transitive_closure<'a>(&'a self, start: &'a TargetInfo) -> Vec<&'a TargetInfo> {
        let mut closure = Vec::new();
        if start.is_kind("java_test") || start.is_kind("java_import") {
            closure.push(start);
        }

        let mut visited: HashSet<&Label> = HashSet::from([&start.label]);
        let mut queue: VecDeque<&'a TargetInfo> = VecDeque::from([start]);
        while let Some(info) = queue.pop_front() {
            for dep in &info.deps {
                if !visited.insert(dep) {
                    continue;
                }
                match self.infos.get(dep) {
                    Some(dep_info) => {
                        closure.push(dep_info);
                        queue.push_back(dep_info);
                    }
                    None => {
                        tracing::trace!(target = "bcp.bazel", %dep, "no aspect info; excluded with its descendants");
                    }
                }
            }
        }
        closure
    }
}

/// Resolve an aspect file path named by Bazel against the workspace root.
pub fn aspect_file_location(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
