use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use bcp_process::CancellationToken;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    aspect::{
        aspect_file_location, aspect_files_from_stderr, label_from_aspect_path,
        parse_aspect_file, AspectIndex, ASPECT_BATCH_SIZE, ASPECT_REPOSITORY,
        DEFAULT_ASPECT_LABEL, OUTPUT_GROUPS,
    },
    command::{CommandOutput, CommandRunner},
    error::{check_cancelled, BazelError, Result},
    label::Label,
    options::CommandOptions,
    query::{
        is_build_file, parse_label_kind_output, parse_label_output, parse_source_file_output,
        parse_streamed_jsonproto, QueryTarget,
    },
    cache::ParamFileCache,
    version::{detect_version, ToolSnapshot, ToolState, ToolVersion},
};

/// Walk upwards from `start` to the directory holding `WORKSPACE`,
/// `WORKSPACE.bazel` or `MODULE.bazel`.
pub fn bazel_workspace_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let mut dir = if start.is_file() {
        start.parent()?
    } else {
        start
    };

    loop {
        if is_bazel_workspace(dir) {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

pub fn is_bazel_workspace(root: &Path) -> bool {
    ["WORKSPACE", "WORKSPACE.bazel", "MODULE.bazel"]
        .iter()
        .any(|marker| root.join(marker).is_file())
}

/// Output locations reported by `bazel info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BazelInfo {
    pub execution_root: PathBuf,
    pub output_base: PathBuf,
    pub bazel_bin: PathBuf,
}

impl BazelInfo {
    fn parse(stdout: &str) -> Option<Self> {
        let mut execution_root = None;
        let mut output_base = None;
        let mut bazel_bin = None;
        for line in stdout.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = PathBuf::from(value.trim());
            match key.trim() {
                "execution_root" => execution_root = Some(value),
                "output_base" => output_base = Some(value),
                "bazel-bin" => bazel_bin = Some(value),
                _ => {}
            }
        }
        Some(Self {
            execution_root: execution_root?,
            output_base: output_base?,
            bazel_bin: bazel_bin?,
        })
    }

    /// `bazel-bin` relative to the execution root, e.g. `bazel-out/k8-fastbuild/bin`.
    pub fn bazel_bin_relative(&self) -> PathBuf {
        self.bazel_bin
            .strip_prefix(&self.execution_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.bazel_bin.clone())
    }
}

/// How aspect builds are invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectOptions {
    /// Directory holding the aspect's `.bzl` file, mounted as `@bazeljavasdk_aspect`.
    pub directory: Option<PathBuf>,
    /// Aspect label inside that repository.
    pub label: String,
}

impl Default for AspectOptions {
    fn default() -> Self {
        Self {
            directory: None,
            label: DEFAULT_ASPECT_LABEL.to_string(),
        }
    }
}

impl AspectOptions {
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        if let Some(directory) = &self.directory {
            args.push(format!(
                "--override_repository={ASPECT_REPOSITORY}={}",
                directory.display()
            ));
        }
        args.extend(
            [
                format!("--aspects=@{ASPECT_REPOSITORY}{}", self.label),
                "-k".to_string(),
                format!("--output_groups={OUTPUT_GROUPS}"),
                "--nobuild_event_binary_file_path_conversion".to_string(),
                "--noexperimental_run_validations".to_string(),
                "--experimental_show_artifacts".to_string(),
                "--curses=no".to_string(),
                "--progress_in_terminal_title=no".to_string(),
            ],
        );
        args
    }
}

/// One Bazel workspace and the shared state used to query it.
///
/// Cheap to share between concurrent resolutions: the tool snapshot is
/// copy-on-write and the memoised `bazel info` / rc options are filled once.
#[derive(Debug)]
pub struct BazelWorkspace<R: CommandRunner> {
    root: PathBuf,
    runner: Arc<R>,
    tool: Arc<ToolState>,
    aspect: AspectOptions,
    info: Mutex<Option<BazelInfo>>,
    options: Mutex<Option<CommandOptions>>,
    params_cache: ParamFileCache,
    test_source_dirs: Vec<String>,
}

impl<R: CommandRunner> BazelWorkspace<R> {
    pub fn new(root: PathBuf, runner: R) -> Result<Self> {
        if !root.is_dir() {
            return Err(BazelError::Config(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        if !is_bazel_workspace(&root) {
            return Err(BazelError::Config(format!(
                "{} has no WORKSPACE, WORKSPACE.bazel or MODULE.bazel file",
                root.display()
            )));
        }
        Ok(Self {
            root,
            runner: Arc::new(runner),
            tool: Arc::new(ToolState::new("bazel")),
            aspect: AspectOptions::default(),
            info: Mutex::new(None),
            options: Mutex::new(None),
            params_cache: ParamFileCache::default(),
            test_source_dirs: vec!["src/test/java".to_string()],
        })
    }

    pub fn with_executable(self, executable: impl Into<String>) -> Self {
        self.tool.reconfigure(executable);
        self
    }

    pub fn with_aspect_options(mut self, aspect: AspectOptions) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_params_cache_ttl(mut self, ttl: Duration) -> Self {
        self.params_cache = ParamFileCache::new(ttl);
        self
    }

    /// Source roots tried by the cheap params-file lookup, relative to a package.
    pub fn with_test_source_dirs(mut self, dirs: Vec<String>) -> Self {
        self.test_source_dirs = dirs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn params_cache(&self) -> &ParamFileCache {
        &self.params_cache
    }

    pub fn test_source_dirs(&self) -> &[String] {
        &self.test_source_dirs
    }

    /// The `bazel-bin` convenience link at the workspace root.
    pub fn bazel_bin_link(&self) -> PathBuf {
        self.root.join("bazel-bin")
    }

    pub fn tool(&self) -> Arc<ToolSnapshot> {
        self.tool.snapshot()
    }

    /// Run the tool and fail on a non-zero exit.
    pub fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<CommandOutput> {
        let snapshot = self.tool.snapshot();
        let output = self.run_unchecked_with(&snapshot, args, cancel)?;
        Ok(output.check(&snapshot.executable, args)?)
    }

    /// Run the tool and return its output whatever the exit code.
    pub fn run_unchecked(
        &self,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let snapshot = self.tool.snapshot();
        self.run_unchecked_with(&snapshot, args, cancel)
    }

    fn run_unchecked_with(
        &self,
        snapshot: &ToolSnapshot,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        check_cancelled(cancel)?;
        tracing::debug!(target = "bcp.bazel", executable = %snapshot.executable, ?args, "running bazel");
        Ok(self
            .runner
            .run(&self.root, &snapshot.executable, args, cancel)?)
    }

    /// Detect the tool version now, blocking the caller.
    pub fn detect_version(&self, cancel: &CancellationToken) -> ToolVersion {
        let snapshot = self.tool.snapshot();
        let version = detect_version(&*self.runner, &self.root, &snapshot.executable, cancel);
        self.tool.record_version(&snapshot, version);
        version
    }

    /// Point at a different executable. The version resets to unknown until
    /// detection (started here on a background thread) finishes.
    pub fn reconfigure_executable(&self, executable: impl Into<String>) -> thread::JoinHandle<()>
    where
        R: 'static,
    {
        self.tool.reconfigure(executable);
        *self.info.lock() = None;
        *self.options.lock() = None;
        self.params_cache.flush();
        self.spawn_version_detection()
    }

    /// Drop cached params-file lookups when any of `paths` is a BUILD file.
    /// Returns whether the cache was flushed.
    pub fn notify_files_changed<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> bool {
        let Some(build_file) = paths.into_iter().find(|path| is_build_file(path)) else {
            return false;
        };
        tracing::debug!(target = "bcp.bazel", build_file, "BUILD file changed; flushing params cache");
        self.params_cache.flush();
        true
    }

    /// Detect the version on a background thread so callers are never blocked on it.
    pub fn spawn_version_detection(&self) -> thread::JoinHandle<()>
    where
        R: 'static,
    {
        let runner = self.runner.clone();
        let tool = self.tool.clone();
        let root = self.root.clone();
        thread::spawn(move || {
            let snapshot = tool.snapshot();
            let version = detect_version(&*runner, &root, &snapshot.executable, &CancellationToken::new());
            if !tool.record_version(&snapshot, version) {
                tracing::debug!(target = "bcp.bazel", "discarding version of a replaced executable");
            }
        })
    }

    /// `bazel info execution_root output_base bazel-bin`, memoised.
    pub fn info(&self, cancel: &CancellationToken) -> Result<BazelInfo> {
        if let Some(info) = self.info.lock().clone() {
            return Ok(info);
        }
        let output = self.run(&["info", "execution_root", "output_base", "bazel-bin"], cancel)?;
        let info = BazelInfo::parse(&output.stdout).ok_or_else(|| BazelError::Parse {
            what: "bazel info output".to_string(),
            message: output.stdout.trim().to_string(),
        })?;
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }

    /// Options from the workspace rc files (`bazel test --announce_rc`), memoised.
    pub fn command_options(&self, cancel: &CancellationToken) -> Result<CommandOptions> {
        if let Some(options) = self.options.lock().clone() {
            return Ok(options);
        }
        // Without targets the command fails, but the rc files are echoed first.
        let output = self.run_unchecked(&["test", "--announce_rc", "--check_up_to_date"], cancel)?;
        let options = CommandOptions::parse(output.stderr_lines());
        *self.options.lock() = Some(options.clone());
        Ok(options)
    }

    pub fn query_labels(&self, expr: &str, cancel: &CancellationToken) -> Result<Vec<Label>> {
        let output = self.run(&["query", expr, "--output=label"], cancel)?;
        Ok(parse_label_output(&output.stdout))
    }

    pub fn query_label_kinds(
        &self,
        expr: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Label)>> {
        let output = self.run(&["query", expr, "--output=label_kind"], cancel)?;
        Ok(parse_label_kind_output(&output.stdout))
    }

    /// Structured query via `--output=streamed_jsonproto`.
    pub fn query_targets(
        &self,
        expr: &str,
        extra_flags: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryTarget>> {
        let mut args = vec!["query", expr, "--output=streamed_jsonproto"];
        args.extend_from_slice(extra_flags);
        let output = self.run(&args, cancel)?;
        Ok(parse_streamed_jsonproto(&output.stdout))
    }

    /// Rules (kind and label) declared in the given packages: `kind(rule, set(//a:* //b:*))`.
    pub fn query_rules_in_packages(
        &self,
        packages: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Label)>> {
        let set = packages
            .iter()
            .map(|package| package.with_target("*").to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.query_label_kinds(&format!("kind(rule, set({set}))"), cancel)
    }

    /// Package-relative source files seen by the package's targets.
    pub fn query_source_files(
        &self,
        package: &Label,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let expr = format!(
            "kind('source file', deps({}))",
            package.with_target("*")
        );
        let output = self.run(&["query", &expr], cancel)?;
        Ok(parse_source_file_output(&output.stdout))
    }

    /// `bazel build <targets>`; returns the exit code.
    pub fn build(&self, targets: &[String], cancel: &CancellationToken) -> Result<i32> {
        let mut args = vec!["build"];
        args.extend(targets.iter().map(String::as_str));
        let output = self.run_unchecked(&args, cancel)?;
        if !output.success() {
            tracing::warn!(target = "bcp.bazel", ?targets, exit_code = output.exit_code, "bazel build failed");
        }
        Ok(output.exit_code)
    }

    /// Build `targets` with the aspect, 25 per invocation, and return the
    /// aspect files per target label.
    pub fn run_aspect(
        &self,
        targets: &[Label],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<Label, BTreeSet<PathBuf>>> {
        let base_args = self.aspect.build_args();
        let mut files: BTreeMap<Label, BTreeSet<PathBuf>> = BTreeMap::new();

        for (batch_index, batch) in targets.chunks(ASPECT_BATCH_SIZE).enumerate() {
            check_cancelled(cancel)?;
            tracing::info!(
                target = "bcp.bazel",
                first = batch_index * ASPECT_BATCH_SIZE,
                count = batch.len(),
                total = targets.len(),
                "building aspect"
            );

            let labels: Vec<String> = batch.iter().map(Label::to_string).collect();
            let mut args: Vec<&str> = base_args.iter().map(String::as_str).collect();
            args.extend(labels.iter().map(String::as_str));

            // `-k`: a failing target still leaves the aspect files of the others.
            let output = self.run_unchecked(&args, cancel)?;
            if !output.success() {
                tracing::warn!(target = "bcp.bazel", exit_code = output.exit_code, "aspect build reported errors");
            }

            for path in aspect_files_from_stderr(&output.stderr) {
                let location = aspect_file_location(&self.root, &path);
                let label = label_from_aspect_path(&path)
                    .or_else(|| parse_aspect_file(&location).map(|info| info.label));
                match label {
                    Some(label) => {
                        files.entry(label).or_default().insert(location);
                    }
                    None => {
                        tracing::warn!(target = "bcp.bazel", path = %path, "could not attribute aspect file to a target");
                    }
                }
            }
        }

        Ok(files)
    }

    /// Run the aspect and parse every file it produced. Malformed files are skipped.
    pub fn load_target_infos(
        &self,
        targets: &[Label],
        cancel: &CancellationToken,
    ) -> Result<AspectIndex> {
        let files = self.run_aspect(targets, cancel)?;
        check_cancelled(cancel)?;
        let infos = files
            .values()
            .flatten()
            .filter_map(|path| parse_aspect_file(path));
        Ok(AspectIndex::new(infos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_output_is_parsed() {
        let info = BazelInfo::parse(
            "execution_root: /cache/execroot/ws\noutput_base: /cache\nbazel-bin: /cache/execroot/ws/bazel-out/k8-fastbuild/bin\n",
        )
        .unwrap();
        assert_eq!(info.execution_root, PathBuf::from("/cache/execroot/ws"));
        assert_eq!(
            info.bazel_bin_relative(),
            PathBuf::from("bazel-out/k8-fastbuild/bin")
        );
        assert!(BazelInfo::parse("output_base: /cache\n").is_none());
    }

    #[test]
    fn aspect_args_are_verbatim() {
        let args = AspectOptions {
            directory: Some(PathBuf::from("/opt/aspect")),
            label: DEFAULT_ASPECT_LABEL.to_string(),
        }
        .build_args();
        assert_eq!(
            args,
            vec![
                "build",
                "--override_repository=bazeljavasdk_aspect=/opt/aspect",
                "--aspects=@bazeljavasdk_aspect//:bzljavasdk_aspect.bzl%bzljavasdk_aspect",
                "-k",
                "--output_groups=intellij-info-generic,intellij-info-java-direct-deps,intellij-resolve-java-direct-deps",
                "--nobuild_event_binary_file_path_conversion",
                "--noexperimental_run_validations",
                "--experimental_show_artifacts",
                "--curses=no",
                "--progress_in_terminal_title=no",
            ]
        );
    }
}
