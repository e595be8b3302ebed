//! Mapping source files to the IDE projects that own them, and the
//! dependency edges between those projects.

use std::collections::{BTreeMap, HashSet};

use bcp_bazel::{AspectIndex, Label, TargetInfo};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::ClasspathError;

/// A source directory of a project, with optional filters over the paths
/// below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    /// Workspace-relative directory with `/` separators.
    pub path: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl SourceRoot {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDefinition {
    pub name: String,
    /// The Bazel targets the project is built from.
    pub targets: Vec<Label>,
    pub source_roots: Vec<SourceRoot>,
}

impl ProjectDefinition {
    pub fn new(name: impl Into<String>, targets: Vec<Label>) -> Self {
        Self {
            name: name.into(),
            targets,
            source_roots: Vec::new(),
        }
    }

    pub fn with_source_root(mut self, root: SourceRoot) -> Self {
        self.source_roots.push(root);
        self
    }

    /// `label` is one of the targets, or matched by a wildcard target.
    pub fn has_target(&self, label: &Label) -> bool {
        self.targets.iter().any(|target| covers(target, label))
    }
}

fn covers(pattern: &Label, label: &Label) -> bool {
    if pattern == label {
        return true;
    }
    if pattern.is_concrete() || pattern.repository() != label.repository() {
        return false;
    }
    let package = pattern.package_path();
    if !pattern.is_recursive() {
        return label.package_path() == package;
    }
    package.is_empty()
        || label.package_path() == package
        || label
            .package_path()
            .strip_prefix(package)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Infos a project target stands for: itself, or every matching info for a wildcard.
pub(crate) fn requested_infos<'i>(infos: &'i AspectIndex, target: &Label) -> Vec<&'i TargetInfo> {
    if target.is_concrete() {
        return infos.get(target).into_iter().collect();
    }
    infos
        .iter()
        .filter(|info| covers(target, &info.label))
        .collect()
}

#[derive(Debug)]
struct CompiledRoot {
    prefix: String,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl CompiledRoot {
    fn compile(root: &SourceRoot) -> Result<Self, ClasspathError> {
        Ok(Self {
            prefix: root.path.trim_matches('/').to_string(),
            include: build_globset(&root.include)?,
            exclude: build_globset(&root.exclude)?,
        })
    }

    fn admits(&self, path: &str) -> bool {
        let remainder = if self.prefix.is_empty() {
            path
        } else {
            match path
                .strip_prefix(self.prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => rest,
                None => return false,
            }
        };
        if self.exclude.as_ref().is_some_and(|set| set.is_match(remainder)) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(remainder))
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, ClasspathError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| ClasspathError::InvalidGlob {
            pattern: pattern.clone(),
            message: err.to_string(),
        })?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|err| ClasspathError::InvalidGlob {
        pattern: patterns.join(", "),
        message: err.to_string(),
    })?;
    Ok(Some(set))
}

/// Every known project, in definition order.
#[derive(Debug, Default)]
pub struct ProjectIndex {
    projects: Vec<ProjectDefinition>,
    roots: Vec<Vec<CompiledRoot>>,
}

impl ProjectIndex {
    pub fn new(projects: Vec<ProjectDefinition>) -> Result<Self, ClasspathError> {
        let roots = projects
            .iter()
            .map(|project| {
                project
                    .source_roots
                    .iter()
                    .map(CompiledRoot::compile)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { projects, roots })
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectDefinition> {
        self.projects.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ProjectDefinition> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// The first project that lists `label` among its targets.
    pub fn project_for_target(&self, label: &Label) -> Option<&ProjectDefinition> {
        self.projects.iter().find(|project| project.has_target(label))
    }

    /// The first project with a source root that is a directory prefix of
    /// `path` and whose filters admit the rest of the path.
    pub fn owning_project(&self, path: &str) -> Option<&ProjectDefinition> {
        let path = path.trim_start_matches('/');
        self.projects
            .iter()
            .zip(&self.roots)
            .find(|(_, roots)| roots.iter().any(|root| root.admits(path)))
            .map(|(project, _)| project)
    }

    /// Owner of the first source of `info` that has one.
    pub fn owner_of(&self, info: &TargetInfo) -> Option<&ProjectDefinition> {
        info.sources
            .iter()
            .find_map(|source| self.owning_project(source))
    }

    /// Other projects reachable from the targets of `project`, in discovery order.
    pub fn resolve_project_dependencies(&self, project: &str, infos: &AspectIndex) -> Vec<String> {
        let Some(definition) = self.get(project) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut dependencies = Vec::new();
        for target in &definition.targets {
            for dep in requested_infos(infos, target)
                .into_iter()
                .flat_map(|info| infos.transitive_closure(info))
            {
                let Some(owner) = self.owner_of(dep) else {
                    continue;
                };
                if owner.name != definition.name && seen.insert(owner.name.clone()) {
                    dependencies.push(owner.name.clone());
                }
            }
        }
        dependencies
    }

    /// Project names ordered so that every project comes before the projects
    /// it depends on. Projects in a cycle are all emitted, in no guaranteed
    /// order relative to each other.
    pub fn deletion_order(&self, infos: &AspectIndex) -> Vec<String> {
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for project in &self.projects {
            for dependency in self.resolve_project_dependencies(&project.name, infos) {
                if let Some(dependency) = self.get(&dependency) {
                    dependents
                        .entry(dependency.name.as_str())
                        .or_default()
                        .push(project.name.as_str());
                }
            }
        }

        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            visit(project.name.as_str(), &dependents, &mut visited, &mut order);
        }
        order
    }
}

fn visit<'a>(
    name: &'a str,
    dependents: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    order: &mut Vec<String>,
) {
    if !visited.insert(name) {
        return;
    }
    for dependent in dependents.get(name).into_iter().flatten() {
        visit(dependent, dependents, visited, order);
    }
    order.push(name.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(label: &str, sources: &[&str], deps: &[&str]) -> TargetInfo {
        TargetInfo {
            label: Label::parse(label).unwrap(),
            kind: "java_library".to_string(),
            build_file: None,
            sources: sources.iter().map(|s| s.to_string()).collect(),
            deps: deps.iter().map(|d| Label::parse(d).unwrap()).collect(),
            jars: Vec::new(),
            generated_jars: Vec::new(),
            main_class: None,
        }
    }

    fn project(name: &str, target: &str, root: SourceRoot) -> ProjectDefinition {
        ProjectDefinition::new(name, vec![Label::parse(target).unwrap()]).with_source_root(root)
    }

    #[test]
    fn ownership_is_separator_aware_and_filtered() {
        let index = ProjectIndex::new(vec![
            project(
                "core",
                "//core",
                SourceRoot::new("core/src").with_exclude("**/generated/**"),
            ),
            project("core-ext", "//core-ext", SourceRoot::new("core-ext/src")),
            project("tools", "//tools", SourceRoot::new("tools").with_include("**/*.java")),
        ])
        .unwrap();

        let owner = |path: &str| index.owning_project(path).map(|p| p.name.as_str());
        assert_eq!(owner("core/src/a/A.java"), Some("core"));
        assert_eq!(owner("core-ext/src/b/B.java"), Some("core-ext"));
        assert_eq!(owner("core/src/generated/G.java"), None);
        assert_eq!(owner("tools/x/X.java"), Some("tools"));
        assert_eq!(owner("tools/x/notes.txt"), None);
        assert_eq!(owner("core/srcfoo/A.java"), None);
    }

    #[test]
    fn wildcard_targets_cover_their_packages() {
        let project = ProjectDefinition::new(
            "app",
            vec![Label::parse("//app:all").unwrap(), Label::parse("//tools/...").unwrap()],
        );
        let has = |label: &str| project.has_target(&Label::parse(label).unwrap());
        assert!(has("//app:lib"));
        assert!(has("//tools/gen:gen"));
        assert!(has("//tools:tools"));
        assert!(!has("//app/sub:lib"));
        assert!(!has("//toolsx:lib"));
        assert!(!has("@ext//app:lib"));
    }

    #[test]
    fn invalid_glob_is_reported() {
        let err = ProjectIndex::new(vec![project("a", "//a", SourceRoot::new("a").with_include("a/{b"))])
            .unwrap_err();
        assert!(matches!(err, ClasspathError::InvalidGlob { ref pattern, .. } if pattern == "a/{b"));
    }

    #[test]
    fn dependencies_and_deletion_order() {
        let index = ProjectIndex::new(vec![
            project("base", "//base", SourceRoot::new("base")),
            project("app", "//app", SourceRoot::new("app")),
            project("util", "//util", SourceRoot::new("util")),
            project("standalone", "//standalone", SourceRoot::new("standalone")),
        ])
        .unwrap();
        let infos = AspectIndex::new([
            info("//app", &["app/App.java"], &["//util", "//third_party:guava"]),
            info("//util", &["util/Util.java"], &["//base"]),
            info("//base", &["base/Base.java"], &[]),
            info("//third_party:guava", &[], &[]),
            info("//standalone", &["standalone/S.java"], &[]),
        ]);

        assert_eq!(index.resolve_project_dependencies("app", &infos), ["util", "base"]);
        assert_eq!(index.resolve_project_dependencies("util", &infos), ["base"]);
        assert!(index.resolve_project_dependencies("missing", &infos).is_empty());
        assert_eq!(index.deletion_order(&infos), ["app", "util", "base", "standalone"]);
    }

    #[test]
    fn cycles_pass_through() {
        let index = ProjectIndex::new(vec![
            project("a", "//a", SourceRoot::new("a")),
            project("b", "//b", SourceRoot::new("b")),
        ])
        .unwrap();
        let infos = AspectIndex::new([
            info("//a", &["a/A.java"], &["//b"]),
            info("//b", &["b/B.java"], &["//a"]),
        ]);

        let order = index.deletion_order(&infos);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&"a".to_string()) && order.contains(&"b".to_string()));
    }
}
