//! Locating the params files that describe a test's runtime classpath.

use std::{path::PathBuf, sync::Arc};

use bcp_process::CancellationToken;

use crate::{
    cache::CacheKey,
    command::CommandRunner,
    error::{BazelError, Result},
    label::Label,
    params::{ParamFileResult, ParamsKind},
    workspace::BazelWorkspace,
};

impl<R: CommandRunner> BazelWorkspace<R> {
    /// Where Bazel writes the params file of test rule `label`.
    pub fn params_file_path(&self, label: &Label, kind: ParamsKind) -> PathBuf {
        let mut path = self.bazel_bin_link();
        let package_dir = label.package_dir();
        if !package_dir.is_empty() {
            path.push(package_dir);
        }
        path.push(kind.file_name(label.target_name()));
        path
    }

    /// Params files of every test under `targets` (`tests(<target>)`).
    /// Tests whose params file does not exist are reported as unrunnable.
    pub fn find_params_files_for_targets(
        &self,
        targets: &[Label],
        is_source: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<ParamFileResult>> {
        let names: Vec<String> = targets.iter().map(Label::to_string).collect();
        let key = CacheKey::new(is_source, None, names.iter().map(String::as_str));
        let kind = ParamsKind::from_is_source(is_source);

        self.params_cache().get_or_try_insert_with(key, || {
            let mut result = ParamFileResult::default();
            for target in &names {
                for test in self.query_labels(&format!("tests({target})"), cancel)? {
                    let path = self.params_file_path(&test, kind);
                    if path.is_file() {
                        if !result.params_files.contains(&path) {
                            result.params_files.push(path);
                        }
                    } else {
                        tracing::debug!(target = "bcp.bazel", %test, path = %path.display(), "no params file");
                        result.unrunnable.insert(test.to_string());
                    }
                }
            }
            Ok(result)
        })
    }

    /// Params file of the rule running `test_class` below `target`.
    ///
    /// Tries, in order: the path implied by the class name under each test
    /// source dir; the rule found by `attr(test_class, ...)`; building that
    /// rule's deploy jar. A class with no owning rule is an error.
    pub fn find_params_file_for_test_class(
        &self,
        test_class: &str,
        target: &Label,
        is_source: bool,
        cancel: &CancellationToken,
    ) -> Result<Arc<ParamFileResult>> {
        let target_name = target.to_string();
        let key = CacheKey::new(is_source, Some(test_class), [target_name.as_str()]);
        let kind = ParamsKind::from_is_source(is_source);

        self.params_cache().get_or_try_insert_with(key, || {
            if let Some(path) = self.guess_params_file(test_class, target, kind) {
                return Ok(ParamFileResult {
                    params_files: vec![path],
                    ..ParamFileResult::default()
                });
            }

            let expr = format!("attr(test_class, {test_class}$, {target_name})");
            let rules = self.query_labels(&expr, cancel)?;
            if rules.is_empty() {
                return Err(BazelError::Invariant(format!(
                    "no test rule under {target_name} runs {test_class}"
                )));
            }

            let mut result = ParamFileResult::default();
            for rule in rules {
                let mut path = self.params_file_path(&rule, kind);
                if !path.is_file() {
                    let deploy_jar = rule.with_target(&format!("{}_deploy.jar", rule.target_name()));
                    tracing::info!(target = "bcp.bazel", %deploy_jar, "params file missing; building deploy jar");
                    self.build(&[deploy_jar.to_string()], cancel)?;
                    path = self.params_file_path(&rule, kind);
                }
                if path.is_file() {
                    result.params_files.push(path);
                } else {
                    result.unrunnable.insert(rule.to_string());
                }
            }
            Ok(result)
        })
    }

    /// Rule names of generated tests usually mirror the class path
    /// (`src/test/java/demo/FooTest`). A miss here proves nothing.
    fn guess_params_file(&self, test_class: &str, target: &Label, kind: ParamsKind) -> Option<PathBuf> {
        let class_path = test_class.replace('.', "/");
        self.test_source_dirs().iter().find_map(|dir| {
            let dir = dir.trim_matches('/');
            let rule_name = if dir.is_empty() {
                class_path.clone()
            } else {
                format!("{dir}/{class_path}")
            };
            let candidate = self.params_file_path(&target.with_target(&rule_name), kind);
            candidate.is_file().then_some(candidate)
        })
    }
}
