use std::path::{Path, PathBuf};

use bcp_bazel::{check_cancelled, BazelWorkspace, CancellationToken, CommandRunner, Label};

use crate::{ProjectError, ProjectStructure};

/// A Bazel package on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocation {
    pub workspace_root: PathBuf,
    /// Workspace-relative package path with `/` separators; empty for the root package.
    pub package_path: String,
}

impl PackageLocation {
    pub fn new(workspace_root: impl Into<PathBuf>, package_path: &str) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            package_path: package_path.trim_matches('/').to_string(),
        }
    }

    pub fn package_dir(&self) -> PathBuf {
        if self.package_path.is_empty() {
            self.workspace_root.clone()
        } else {
            self.workspace_root.join(&self.package_path)
        }
    }

    /// `//<package>:*`, every target of the package.
    pub fn label(&self) -> Result<Label, ProjectError> {
        Ok(Label::parse(&format!("//{}:*", self.package_path))?)
    }

    /// Workspace-relative path of `relative` inside this package.
    pub fn workspace_relative(&self, relative: &str) -> String {
        match (self.package_path.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => self.package_path.clone(),
            (false, false) => format!("{}/{relative}", self.package_path),
        }
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.workspace_root.join(self.workspace_relative(relative)).exists()
    }
}

/// Source of `kind('source file', deps(//pkg:*))` results.
pub trait SourceFileQuery {
    fn source_files(
        &self,
        package: &Label,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProjectError>;
}

impl<R: CommandRunner> SourceFileQuery for BazelWorkspace<R> {
    fn source_files(
        &self,
        package: &Label,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProjectError> {
        Ok(self.query_source_files(package, cancel)?)
    }
}

/// One way of deriving a package's source layout.
pub trait ProjectStructureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Required strategies cannot be switched off with
    /// [`StrategyRegistry::set_optional_enabled`] or
    /// [`StrategyRegistry::set_enabled`].
    fn is_required(&self) -> bool {
        false
    }

    /// `Ok(None)` when this strategy does not recognise the package.
    fn analyze(
        &self,
        package: &PackageLocation,
        query: &dyn SourceFileQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<ProjectStructure>, ProjectError>;
}

struct Entry {
    strategy: Box<dyn ProjectStructureStrategy>,
    enabled: bool,
}

/// Ordered strategies, tried until one recognises the package. The fallback
/// (the query strategy) always runs last.
pub struct StrategyRegistry {
    strategies: Vec<Entry>,
    fallback: Option<Entry>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.entries()
                    .map(|entry| (entry.strategy.name(), entry.enabled)),
            )
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new(fallback: Option<Box<dyn ProjectStructureStrategy>>) -> Self {
        Self {
            strategies: Vec::new(),
            fallback: fallback.map(|strategy| Entry {
                strategy,
                enabled: true,
            }),
        }
    }

    /// Add a strategy after the ones already registered, ahead of the fallback.
    pub fn register(&mut self, strategy: Box<dyn ProjectStructureStrategy>) {
        self.strategies.push(Entry {
            strategy,
            enabled: true,
        });
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.strategies.iter().chain(self.fallback.iter())
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.strategies.iter_mut().chain(self.fallback.iter_mut())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries().map(|entry| entry.strategy.name()).collect()
    }

    /// Returns `false` when no optional strategy has that name. Required
    /// strategies always stay enabled.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for entry in self
            .entries_mut()
            .filter(|entry| entry.strategy.name() == name && !entry.strategy.is_required())
        {
            entry.enabled = enabled;
            found = true;
        }
        found
    }

    /// Switch every non-required strategy on or off.
    pub fn set_optional_enabled(&mut self, enabled: bool) {
        for entry in self.entries_mut().filter(|entry| !entry.strategy.is_required()) {
            entry.enabled = enabled;
        }
    }

    pub fn determine(
        &self,
        package: &PackageLocation,
        query: &dyn SourceFileQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<ProjectStructure>, ProjectError> {
        for entry in self.entries().filter(|entry| entry.enabled) {
            check_cancelled(cancel)?;
            if let Some(structure) = entry.strategy.analyze(package, query, cancel)? {
                tracing::info!(
                    target = "bcp.project",
                    package = %package.package_path,
                    strategy = entry.strategy.name(),
                    "package layout resolved"
                );
                return Ok(Some(structure));
            }
            tracing::debug!(
                target = "bcp.project",
                package = %package.package_path,
                strategy = entry.strategy.name(),
                "strategy did not recognise package"
            );
        }
        Ok(None)
    }
}

pub(crate) fn is_dir(root: &Path, relative: &str) -> bool {
    root.join(relative).is_dir()
}
