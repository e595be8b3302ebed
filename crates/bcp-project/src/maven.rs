use bcp_bazel::CancellationToken;

use crate::{
    strategy::{is_dir, PackageLocation, ProjectStructureStrategy, SourceFileQuery},
    ProjectError, ProjectStructure,
};

/// Recognises the Maven layout without running Bazel: `src/main/java` and
/// `src/test/java` must both exist; the resource dirs are added when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct MavenStructureStrategy;

impl ProjectStructureStrategy for MavenStructureStrategy {
    fn name(&self) -> &'static str {
        "maven"
    }

    fn analyze(
        &self,
        package: &PackageLocation,
        _query: &dyn SourceFileQuery,
        _cancel: &CancellationToken,
    ) -> Result<Option<ProjectStructure>, ProjectError> {
        let root = &package.workspace_root;
        let main_java = package.workspace_relative("src/main/java");
        let test_java = package.workspace_relative("src/test/java");
        if !is_dir(root, &main_java) || !is_dir(root, &test_java) {
            tracing::debug!(target = "bcp.project", package = %package.package_path, "not a maven-like package");
            return Ok(None);
        }

        let mut structure = ProjectStructure::new(package.package_dir());
        structure.main_source_dirs.push(main_java);
        let main_resources = package.workspace_relative("src/main/resources");
        if is_dir(root, &main_resources) {
            structure.main_source_dirs.push(main_resources);
        }
        structure.test_source_dirs.push(test_java);
        let test_resources = package.workspace_relative("src/test/resources");
        if is_dir(root, &test_resources) {
            structure.test_source_dirs.push(test_resources);
        }
        Ok(Some(structure))
    }
}
