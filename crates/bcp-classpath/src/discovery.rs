use std::{collections::HashSet, path::PathBuf};

use bcp_bazel::{BazelInfo, Label};

use crate::entry::{label_file_path, ClasspathEntry, ClasspathResult, JarResolver};

/// `--output=streamed_jsonproto` flags for rule queries that only need a few
/// attributes.
pub(crate) fn rule_query_flags(attrs: &str) -> [String; 4] {
    [
        format!("--proto:output_rule_attrs={attrs}"),
        "--noproto:rule_inputs_and_outputs".to_string(),
        "--noproto:locations".to_string(),
        "--noproto:default_values".to_string(),
    ]
}

/// `@a//... @b//...` for a `set(...)` expression.
pub(crate) fn repository_set(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("@{name}//..."))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collects library entries found by a discovery pass, once per jar.
#[derive(Debug)]
pub(crate) struct LibraryCollector {
    resolver: JarResolver,
    bazel_bin: PathBuf,
    seen: HashSet<PathBuf>,
    result: ClasspathResult,
}

impl LibraryCollector {
    pub(crate) fn new(info: &BazelInfo) -> Self {
        Self {
            resolver: JarResolver::new(info),
            bazel_bin: info.bazel_bin_relative(),
            seen: HashSet::new(),
            result: ClasspathResult::default(),
        }
    }

    /// Execution-root-relative path of a jar label; generated jars live below
    /// `bazel-bin`. Invalid labels yield `None`.
    pub(crate) fn jar_path(&self, jar: &str, generated: bool) -> Option<String> {
        if jar.trim().is_empty() {
            return None;
        }
        match Label::parse(jar) {
            Ok(label) => Some(label_file_path(
                &label,
                generated.then_some(self.bazel_bin.as_path()),
            )),
            Err(err) => {
                tracing::debug!(target = "bcp.classpath", jar, error = %err, "ignoring invalid jar label");
                None
            }
        }
    }

    pub(crate) fn collect(
        &mut self,
        jars: &[String],
        source_jar: Option<&str>,
        test_only: bool,
        origin: &Label,
    ) {
        for jar in jars {
            let Some(entry) = self
                .resolver
                .resolve_path(jar, source_jar, test_only, Some(origin))
            else {
                continue;
            };
            if self.seen.insert(entry.jar.clone()) {
                self.result.entries.push(ClasspathEntry::Library(entry));
            }
        }
    }

    pub(crate) fn finish(mut self) -> ClasspathResult {
        self.result.missing = self.resolver.missing();
        self.result
    }
}
