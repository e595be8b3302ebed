//! Jars produced by rules of the workspace itself (e.g. protobuf or
//! annotation-processor outputs).

use std::collections::{BTreeMap, BTreeSet};

use bcp_bazel::{
    check_cancelled, rules, BazelWorkspace, CancellationToken, CommandRunner, Label, QueryRule,
    QueryTarget,
};

use crate::{
    discovery::{rule_query_flags, LibraryCollector},
    entry::ClasspathResult,
    external::{collect_imports, external_repositories, repository_name, COURSIER_REPOSITORY_RULES, UNPINNED_PREFIX},
    ClasspathError,
};

pub const GENERATED_JARS_QUERY: &str = r#"filter(".*\.jar$", kind("generated file", //...:*))"#;
const SOURCE_JAR_SUFFIXES: [&str; 2] = ["-src.jar", "-sources.jar"];
/// Rule classes whose outputs are not meant to be depended on.
const IGNORED_RULE_CLASSES: [&str; 1] = ["java_binary"];

pub fn is_potential_source_jar(name: &str) -> bool {
    SOURCE_JAR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Generated jar file names grouped by the rule producing them.
pub fn group_by_generating_rule(targets: Vec<QueryTarget>) -> BTreeMap<Label, BTreeSet<String>> {
    let mut grouped: BTreeMap<Label, BTreeSet<String>> = BTreeMap::new();
    for target in targets {
        if let QueryTarget::GeneratedFile {
            name,
            generating_rule,
        } = target
        {
            grouped
                .entry(generating_rule)
                .or_default()
                .insert(name.target_name().to_string());
        }
    }
    grouped
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedLibrariesDiscovery;

impl GeneratedLibrariesDiscovery {
    pub fn discover<R: CommandRunner>(
        &self,
        workspace: &BazelWorkspace<R>,
        cancel: &CancellationToken,
    ) -> Result<ClasspathResult, ClasspathError> {
        let info = workspace.info(cancel)?;
        let mut collector = LibraryCollector::new(&info);

        let generated = workspace.query_targets(GENERATED_JARS_QUERY, &[], cancel)?;
        let grouped = group_by_generating_rule(generated);
        check_cancelled(cancel)?;
        if !grouped.is_empty() {
            let generating_rules = query_rules(workspace, grouped.keys(), cancel)?;
            for (label, jars) in &grouped {
                let Some(rule) = generating_rules.get(label) else {
                    tracing::debug!(target = "bcp.classpath", rule = %label, "generating rule not found");
                    continue;
                };
                collect_rule_outputs(&mut collector, rule, jars);
            }
        }
        check_cancelled(cancel)?;

        // Unpinned `maven_install` repositories only exist until the lock file is written.
        let unpinned: Vec<String> = external_repositories(workspace, cancel)?
            .iter()
            .filter(|rule| COURSIER_REPOSITORY_RULES.contains(&rule.rule_class.as_str()))
            .map(repository_name)
            .filter(|name| name.starts_with(UNPINNED_PREFIX))
            .collect();
        collect_imports(workspace, &mut collector, "jvm_import", &unpinned, true, cancel)?;
        check_cancelled(cancel)?;

        Ok(collector.finish())
    }
}

fn query_rules<'a, R: CommandRunner>(
    workspace: &BazelWorkspace<R>,
    labels: impl Iterator<Item = &'a Label>,
    cancel: &CancellationToken,
) -> Result<BTreeMap<Label, QueryRule>, ClasspathError> {
    let set = labels.map(Label::to_string).collect::<Vec<_>>().join(" ");
    let flags = rule_query_flags("testonly");
    let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
    let targets = workspace.query_targets(&format!("set({set})"), &flags, cancel)?;
    Ok(rules(targets).map(|rule| (rule.name.clone(), rule)).collect())
}

fn collect_rule_outputs(collector: &mut LibraryCollector, rule: &QueryRule, jars: &BTreeSet<String>) {
    if IGNORED_RULE_CLASSES.contains(&rule.rule_class.as_str()) {
        return;
    }

    let (source_jars, class_jars): (Vec<&String>, Vec<&String>) =
        jars.iter().partition(|name| is_potential_source_jar(name));
    if source_jars.len() > 1 {
        tracing::warn!(
            target = "bcp.classpath",
            rule = %rule.name,
            ?source_jars,
            "more than one source jar; only the first is attached"
        );
    }

    let output_label = |name: &str| rule.name.with_target(name).to_string();
    let source_jar = source_jars
        .first()
        .and_then(|name| collector.jar_path(&output_label(name), true));
    let class_jars: Vec<String> = class_jars
        .iter()
        .filter_map(|name| collector.jar_path(&output_label(name), true))
        .collect();
    if class_jars.is_empty() {
        tracing::debug!(target = "bcp.classpath", rule = %rule.name, "no class jars left");
        return;
    }
    collector.collect(&class_jars, source_jar.as_deref(), rule.bool_attr("testonly"), &rule.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn generated(name: &str, rule: &str) -> QueryTarget {
        QueryTarget::GeneratedFile {
            name: Label::parse(name).unwrap(),
            generating_rule: Label::parse(rule).unwrap(),
        }
    }

    #[test]
    fn outputs_are_grouped_per_rule() {
        let grouped = group_by_generating_rule(vec![
            generated("//gen:libproto.jar", "//gen:proto"),
            generated("//gen:libproto-src.jar", "//gen:proto"),
            generated("//app:app_deploy.jar", "//app:app"),
            QueryTarget::Other,
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped[&Label::parse("//gen:proto").unwrap()],
            BTreeSet::from(["libproto-src.jar".to_string(), "libproto.jar".to_string()])
        );
    }

    #[test]
    fn source_jar_suffixes() {
        assert!(is_potential_source_jar("libfoo-src.jar"));
        assert!(is_potential_source_jar("foo-sources.jar"));
        assert!(!is_potential_source_jar("foo.jar"));
        assert!(!is_potential_source_jar("foo-src.zip"));
    }
}
