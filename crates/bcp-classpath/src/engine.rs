use std::{collections::HashSet, sync::Arc};

use bcp_bazel::{
    check_cancelled, AspectIndex, BazelWorkspace, CancellationToken, CommandRunner, Label,
};

use crate::{
    assembly::ClasspathAssembler,
    entry::{ClasspathResult, JarResolver},
    external::ExternalLibrariesDiscovery,
    generated::GeneratedLibrariesDiscovery,
    implicit::{BazelToolsTestRunner, ImplicitDependencies, NoImplicitDependencies},
    projects::{ProjectDefinition, ProjectIndex},
    ClasspathError,
};

/// Name of the synthetic project used for ad-hoc target lists.
pub const AD_HOC_PROJECT: &str = "<targets>";

/// Computes classpaths for the projects of one Bazel workspace.
pub struct ClasspathEngine<R: CommandRunner> {
    workspace: Arc<BazelWorkspace<R>>,
    projects: ProjectIndex,
    external: ExternalLibrariesDiscovery,
    explicit_java_test_deps: Option<bool>,
}

impl<R: CommandRunner> std::fmt::Debug for ClasspathEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClasspathEngine")
            .field("root", &self.workspace.root())
            .field("projects", &self.projects.len())
            .field("explicit_java_test_deps", &self.explicit_java_test_deps)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> ClasspathEngine<R> {
    pub fn new(workspace: Arc<BazelWorkspace<R>>, projects: ProjectIndex) -> Result<Self, ClasspathError> {
        Ok(Self {
            workspace,
            projects,
            external: ExternalLibrariesDiscovery::new("*")?,
            explicit_java_test_deps: None,
        })
    }

    pub fn with_external_repository_filter(mut self, filter: &str) -> Result<Self, ClasspathError> {
        self.external = ExternalLibrariesDiscovery::new(filter)?;
        Ok(self)
    }

    /// Overrides `--explicit_java_test_deps` from the workspace rc files.
    pub fn with_explicit_java_test_deps(mut self, explicit: Option<bool>) -> Self {
        self.explicit_java_test_deps = explicit;
        self
    }

    pub fn workspace(&self) -> &BazelWorkspace<R> {
        &self.workspace
    }

    pub fn projects(&self) -> &ProjectIndex {
        &self.projects
    }

    /// Classpath of a configured project.
    pub fn project_classpath(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ClasspathResult, ClasspathError> {
        let project = self
            .projects
            .get(name)
            .ok_or_else(|| ClasspathError::UnknownProject(name.to_string()))?;
        self.assemble(project, cancel)
    }

    /// Classpath of a list of targets. Targets owned by a single configured
    /// project are resolved as that project; anything else as an ad-hoc
    /// project without sources.
    pub fn target_classpath(
        &self,
        targets: &[Label],
        cancel: &CancellationToken,
    ) -> Result<ClasspathResult, ClasspathError> {
        let owners: HashSet<&str> = targets
            .iter()
            .filter_map(|target| self.projects.project_for_target(target))
            .map(|project| project.name.as_str())
            .collect();
        let ad_hoc;
        let project = match owners.iter().next() {
            Some(owner) if owners.len() == 1 => {
                let mut project = self
                    .projects
                    .get(owner)
                    .cloned()
                    .ok_or_else(|| ClasspathError::UnknownProject(owner.to_string()))?;
                project.targets = targets.to_vec();
                ad_hoc = project;
                &ad_hoc
            }
            _ => {
                ad_hoc = ProjectDefinition::new(AD_HOC_PROJECT, targets.to_vec());
                &ad_hoc
            }
        };
        self.assemble(project, cancel)
    }

    /// Java rules declared in `packages`, in query order. Useful for seeding
    /// a project's targets from its packages.
    pub fn java_targets_in_packages(
        &self,
        packages: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Vec<Label>, ClasspathError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }
        let rules = self.workspace.query_rules_in_packages(packages, cancel)?;
        Ok(rules
            .into_iter()
            .filter(|(kind, _)| kind.starts_with("java_"))
            .map(|(_, label)| label)
            .collect())
    }

    /// Other projects `name` depends on.
    pub fn project_dependencies(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ClasspathError> {
        let project = self
            .projects
            .get(name)
            .ok_or_else(|| ClasspathError::UnknownProject(name.to_string()))?;
        let infos = self.workspace.load_target_infos(&project.targets, cancel)?;
        Ok(self.projects.resolve_project_dependencies(name, &infos))
    }

    /// Every project, dependents before their dependencies.
    pub fn deletion_order(&self, cancel: &CancellationToken) -> Result<Vec<String>, ClasspathError> {
        let targets: Vec<Label> = self
            .projects
            .iter()
            .flat_map(|project| project.targets.iter().cloned())
            .collect();
        let infos = self.workspace.load_target_infos(&targets, cancel)?;
        Ok(self.projects.deletion_order(&infos))
    }

    /// Jars of external repositories followed by jars generated in the workspace.
    pub fn workspace_libraries(&self, cancel: &CancellationToken) -> Result<ClasspathResult, ClasspathError> {
        let mut result = self.external.discover(&self.workspace, cancel)?;
        check_cancelled(cancel)?;
        let generated = GeneratedLibrariesDiscovery.discover(&self.workspace, cancel)?;

        let mut seen: HashSet<_> = result.entries.iter().cloned().collect();
        result
            .entries
            .extend(generated.entries.into_iter().filter(|entry| seen.insert(entry.clone())));
        result.missing.merge(generated.missing);
        Ok(result)
    }

    fn assemble(
        &self,
        project: &ProjectDefinition,
        cancel: &CancellationToken,
    ) -> Result<ClasspathResult, ClasspathError> {
        check_cancelled(cancel)?;
        let infos = self.workspace.load_target_infos(&project.targets, cancel)?;
        let info = self.workspace.info(cancel)?;
        check_cancelled(cancel)?;

        let shim;
        let implicit: &dyn ImplicitDependencies = if has_test_target(project, &infos) {
            shim = BazelToolsTestRunner::new(&info.bazel_bin, self.explicit_test_deps(cancel)?);
            &shim
        } else {
            &NoImplicitDependencies
        };

        let result = ClasspathAssembler::new(&self.projects, JarResolver::new(&info))
            .assemble(project, &infos, implicit);
        tracing::info!(
            target = "bcp.classpath",
            project = %project.name,
            entries = result.entries.len(),
            references = result.project_references.len(),
            complete = result.complete,
            missing_jars = result.missing.missing_jar_count,
            "classpath computed"
        );
        Ok(result)
    }

    fn explicit_test_deps(&self, cancel: &CancellationToken) -> Result<bool, ClasspathError> {
        match self.explicit_java_test_deps {
            Some(explicit) => Ok(explicit),
            None => Ok(self.workspace.command_options(cancel)?.explicit_java_test_deps()),
        }
    }
}

fn has_test_target(project: &ProjectDefinition, infos: &AspectIndex) -> bool {
    infos
        .iter()
        .any(|info| info.is_test() && project.has_target(&info.label))
}
