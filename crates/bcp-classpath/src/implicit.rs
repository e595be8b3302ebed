//! Test dependencies Bazel adds to `java_test` targets on its own.
//!
//! Unless a workspace sets `--explicit_java_test_deps`, Bazel puts its
//! bundled test runner (JUnit and Hamcrest included) on the runtime classpath
//! of every `java_test`. Those jars never show up in aspect output, so the
//! runner jar is located in the output tree instead. Where it lives is a
//! property of the Bazel release, hence the layout version below.

use std::path::{Path, PathBuf};

use bcp_bazel::TargetInfo;
use walkdir::WalkDir;

use crate::entry::LibraryEntry;

/// Source of classpath entries a test target receives implicitly.
pub trait ImplicitDependencies {
    fn implicit_test_dependencies(&self, target: &TargetInfo) -> Vec<LibraryEntry>;
}

/// No implicit dependencies at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImplicitDependencies;

impl ImplicitDependencies for NoImplicitDependencies {
    fn implicit_test_dependencies(&self, _target: &TargetInfo) -> Vec<LibraryEntry> {
        Vec::new()
    }
}

/// The `bazel_tools` test runner as laid out by Bazel 1.x through 7.x.
#[derive(Debug, Clone)]
pub struct BazelToolsTestRunner {
    bazel_bin: PathBuf,
    explicit_java_test_deps: bool,
}

impl BazelToolsTestRunner {
    pub const LAYOUT_VERSION: u32 = 1;
    /// Directory below `bazel-bin` holding the runner's interface jars.
    pub const RUNNER_DIR: &'static str = "external/bazel_tools/tools/jdk/_ijar/TestRunner";
    pub const RUNNER_JAR_SUFFIX: &'static str = "Runner_deploy-ijar.jar";
    const MAX_DEPTH: usize = 5;

    pub fn new(bazel_bin: impl Into<PathBuf>, explicit_java_test_deps: bool) -> Self {
        Self {
            bazel_bin: bazel_bin.into(),
            explicit_java_test_deps,
        }
    }

    pub fn runner_dir(&self) -> PathBuf {
        self.bazel_bin.join(Self::RUNNER_DIR)
    }

    /// The runner jar, canonicalized; `None` when dependencies are explicit
    /// or the runner has not been built.
    pub fn find_runner_jar(&self) -> Option<PathBuf> {
        if self.explicit_java_test_deps {
            return None;
        }
        let dir = self.runner_dir();
        if !dir.is_dir() {
            tracing::error!(
                target = "bcp.classpath",
                dir = %dir.display(),
                "test runner directory missing; build a java_test target first"
            );
            return None;
        }
        let jar = find_file_with_suffix(&dir, Self::RUNNER_JAR_SUFFIX)?;
        match std::fs::canonicalize(&jar) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(target = "bcp.classpath", jar = %jar.display(), error = %err, "cannot resolve test runner jar");
                None
            }
        }
    }
}

impl ImplicitDependencies for BazelToolsTestRunner {
    fn implicit_test_dependencies(&self, target: &TargetInfo) -> Vec<LibraryEntry> {
        let Some(jar) = self.find_runner_jar() else {
            return Vec::new();
        };
        tracing::debug!(target = "bcp.classpath", test = %target.label, jar = %jar.display(), "adding implicit test runner");
        vec![LibraryEntry {
            jar,
            source_jar: None,
            test_only: true,
            origin: None,
        }]
    }
}

fn find_file_with_suffix(dir: &Path, suffix: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .max_depth(BazelToolsTestRunner::MAX_DEPTH)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(suffix)
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcp_bazel::Label;

    fn test_target() -> TargetInfo {
        TargetInfo {
            label: Label::parse("//app:AppTest").unwrap(),
            kind: "java_test".to_string(),
            build_file: None,
            sources: Vec::new(),
            deps: Vec::new(),
            jars: Vec::new(),
            generated_jars: Vec::new(),
            main_class: None,
        }
    }

    #[test]
    fn runner_jar_is_found_below_bazel_bin() {
        let dir = tempfile::tempdir().unwrap();
        let runner_dir = dir.path().join(BazelToolsTestRunner::RUNNER_DIR);
        let nested = runner_dir.join("external/remote_java_tools/java_tools");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Runner_deploy-ijar.jar"), "").unwrap();

        let shim = BazelToolsTestRunner::new(dir.path(), false);
        let entries = shim.implicit_test_dependencies(&test_target());
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].jar,
            std::fs::canonicalize(nested.join("Runner_deploy-ijar.jar")).unwrap()
        );
        assert!(entries[0].test_only);
    }

    #[test]
    fn explicit_deps_or_missing_runner_add_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BazelToolsTestRunner::new(dir.path(), false)
            .implicit_test_dependencies(&test_target())
            .is_empty());

        let runner_dir = dir.path().join(BazelToolsTestRunner::RUNNER_DIR);
        std::fs::create_dir_all(&runner_dir).unwrap();
        std::fs::write(runner_dir.join("Runner_deploy-ijar.jar"), "").unwrap();
        assert!(BazelToolsTestRunner::new(dir.path(), true)
            .implicit_test_dependencies(&test_target())
            .is_empty());
    }
}
