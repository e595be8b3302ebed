//! Jars of external repositories (`java_import` and `rules_jvm_external`).

use bcp_bazel::{
    check_cancelled, rules, BazelWorkspace, CancellationToken, CommandRunner, QueryRule,
};
use globset::{Glob, GlobMatcher};

use crate::{
    discovery::{repository_set, rule_query_flags, LibraryCollector},
    entry::ClasspathResult,
    ClasspathError,
};

pub const JAVA_IMPORT_REPOSITORY_RULES: [&str; 2] = ["jvm_import_external", "compat_repository"];
pub const COURSIER_REPOSITORY_RULES: [&str; 2] = ["coursier_fetch", "pinned_coursier_fetch"];
/// Repositories carrying this tag are never put on IDE classpaths.
pub const NO_IDE_TAG: &str = "no-ide";
pub const UNPINNED_PREFIX: &str = "unpinned_";

const REPOSITORY_QUERY_FLAGS: [&str; 3] = [
    "--noproto:rule_inputs_and_outputs",
    "--noproto:locations",
    "--noproto:default_values",
];

/// Repository rule name: the `name` attribute, or the target name of `//external:<name>`.
pub(crate) fn repository_name(rule: &QueryRule) -> String {
    rule.string_attr("name")
        .map(str::to_string)
        .unwrap_or_else(|| rule.name.target_name().to_string())
}

/// Repository rules of the workspace (`//external:*`).
pub fn external_repositories<R: CommandRunner>(
    workspace: &BazelWorkspace<R>,
    cancel: &CancellationToken,
) -> Result<Vec<QueryRule>, ClasspathError> {
    let targets = workspace.query_targets("//external:*", &REPOSITORY_QUERY_FLAGS, cancel)?;
    Ok(rules(targets).collect())
}

/// Finds the jars external repositories provide.
#[derive(Debug, Clone)]
pub struct ExternalLibrariesDiscovery {
    filter: GlobMatcher,
}

impl ExternalLibrariesDiscovery {
    /// `repository_filter` is a glob over repository names.
    pub fn new(repository_filter: &str) -> Result<Self, ClasspathError> {
        let glob = Glob::new(repository_filter).map_err(|err| ClasspathError::InvalidGlob {
            pattern: repository_filter.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            filter: glob.compile_matcher(),
        })
    }

    /// Names of the repositories created by one of `rule_classes` that pass
    /// the filter and are not tagged `no-ide`.
    pub fn select_repositories(&self, repositories: &[QueryRule], rule_classes: &[&str]) -> Vec<String> {
        repositories
            .iter()
            .filter(|rule| rule_classes.contains(&rule.rule_class.as_str()))
            .filter(|rule| !rule.has_tag(NO_IDE_TAG))
            .map(repository_name)
            .filter(|name| self.filter.is_match(name))
            .collect()
    }

    pub fn discover<R: CommandRunner>(
        &self,
        workspace: &BazelWorkspace<R>,
        cancel: &CancellationToken,
    ) -> Result<ClasspathResult, ClasspathError> {
        let info = workspace.info(cancel)?;
        let repositories = external_repositories(workspace, cancel)?;
        let mut collector = LibraryCollector::new(&info);

        let java_imports = self.select_repositories(&repositories, &JAVA_IMPORT_REPOSITORY_RULES);
        collect_imports(workspace, &mut collector, "java_import", &java_imports, false, cancel)?;
        check_cancelled(cancel)?;

        // Pinned `maven_install` repositories; their jars are generated below bazel-bin.
        let pinned: Vec<String> = self
            .select_repositories(&repositories, &COURSIER_REPOSITORY_RULES)
            .into_iter()
            .filter(|name| !name.starts_with(UNPINNED_PREFIX))
            .collect();
        collect_imports(workspace, &mut collector, "jvm_import", &pinned, true, cancel)?;
        check_cancelled(cancel)?;

        let result = collector.finish();
        tracing::debug!(
            target = "bcp.classpath",
            jars = result.entries.len(),
            missing = result.missing.missing_jar_count,
            "external jar discovery done"
        );
        Ok(result)
    }
}

/// Query the `<kind>` rules of `repositories` and collect their jars.
pub(crate) fn collect_imports<R: CommandRunner>(
    workspace: &BazelWorkspace<R>,
    collector: &mut LibraryCollector,
    kind: &str,
    repositories: &[String],
    generated: bool,
    cancel: &CancellationToken,
) -> Result<(), ClasspathError> {
    if repositories.is_empty() {
        return Ok(());
    }
    let expr = format!("kind('{kind} rule', set( {} ))", repository_set(repositories));
    let flags = rule_query_flags("srcjar,jars,testonly");
    let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
    let targets = workspace.query_targets(&expr, &flags, cancel)?;

    for rule in rules(targets) {
        let source_jar = rule
            .string_attr("srcjar")
            .and_then(|jar| collector.jar_path(jar, generated));
        let jars: Vec<String> = rule
            .string_list_attr("jars")
            .iter()
            .filter_map(|jar| collector.jar_path(jar, generated))
            .collect();
        collector.collect(&jars, source_jar.as_deref(), rule.bool_attr("testonly"), &rule.name);
    }
    Ok(())
}
