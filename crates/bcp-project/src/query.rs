use std::collections::HashSet;

use bcp_bazel::CancellationToken;

use crate::{
    fs_tree::FsTree,
    splitter::SplitterRegistry,
    strategy::{PackageLocation, ProjectStructureStrategy, SourceFileQuery},
    ProjectError, ProjectStructure,
};

pub const DEFAULT_TEST_FOLDER_MARKERS: [&str; 2] = ["test", "tests"];

/// General-purpose layout detection: asks Bazel which source files the
/// package's targets use and derives source roots from them. Correct for
/// custom layouts but costs a query, so it runs last.
#[derive(Debug, Clone)]
pub struct QueryStructureStrategy {
    test_folder_markers: Vec<String>,
    splitters: SplitterRegistry,
}

impl Default for QueryStructureStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_FOLDER_MARKERS.iter().map(|m| m.to_string()).collect())
    }
}

impl QueryStructureStrategy {
    pub fn new(test_folder_markers: Vec<String>) -> Self {
        Self {
            test_folder_markers,
            splitters: SplitterRegistry::default(),
        }
    }

    pub fn with_splitters(mut self, splitters: SplitterRegistry) -> Self {
        self.splitters = splitters;
        self
    }

    fn is_test_path(&self, path: &str) -> bool {
        path.split('/')
            .any(|segment| self.test_folder_markers.iter().any(|marker| marker == segment))
    }

    /// Derive the structure from package-relative query results. `None` when
    /// there are no results at all.
    pub fn process_query_results(
        &self,
        package: &PackageLocation,
        results: &[String],
    ) -> Option<ProjectStructure> {
        if results.is_empty() {
            tracing::info!(target = "bcp.project", package = %package.package_path, "no source files found");
            return None;
        }

        let package_dir = package.package_dir();
        let mut structure = ProjectStructure::new(package_dir.clone());
        let mut seen_source_dirs: HashSet<String> = HashSet::new();
        let mut resources = FsTree::new();

        for path in results {
            // Files of other packages show up through deps(); they do not exist here.
            if !package.exists(path) {
                continue;
            }
            if seen_source_dirs
                .iter()
                .any(|dir| path.strip_prefix(dir.as_str()).is_some_and(|rest| rest.starts_with('/')))
            {
                continue;
            }

            let Some(splitter) = self.splitters.splitter_for(path) else {
                resources.add(path, true);
                continue;
            };
            let Some(split) = splitter.split(&package_dir, path) else {
                tracing::info!(target = "bcp.project", path = %path, package = %package.package_path, "could not derive source dir");
                continue;
            };

            let dir = package.workspace_relative(&split.source_dir);
            tracing::debug!(target = "bcp.project", source_dir = %dir, "found source dir");
            if self.is_test_path(&split.source_dir) {
                structure.test_source_dirs.push(dir);
            } else {
                structure.main_source_dirs.push(dir);
            }
            seen_source_dirs.insert(split.source_dir);
        }

        for resource_dir in resources.meaningful_directories() {
            let dir = package.workspace_relative(&resource_dir);
            if self.is_test_path(&resource_dir) {
                structure.test_source_dirs.push(dir);
            } else {
                structure.main_source_dirs.push(dir);
            }
        }

        structure.main_source_dirs.sort();
        structure.test_source_dirs.sort();
        Some(structure)
    }
}

impl ProjectStructureStrategy for QueryStructureStrategy {
    fn name(&self) -> &'static str {
        "query"
    }

    fn is_required(&self) -> bool {
        true
    }

    fn analyze(
        &self,
        package: &PackageLocation,
        query: &dyn SourceFileQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<ProjectStructure>, ProjectError> {
        let label = package.label()?;
        let results = query.source_files(&label, cancel)?;
        Ok(self.process_query_results(package, &results))
    }
}
