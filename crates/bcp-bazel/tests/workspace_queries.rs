use bcp_bazel::{
    BazelError, BazelWorkspace, CancellationToken, CommandError, CommandOutput, CommandRunner,
    Label, QueryTarget, ToolVersion,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::tempdir;

#[derive(Clone, Debug, Default)]
struct TestRunner {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    outputs: Arc<HashMap<String, CommandOutput>>,
}

impl TestRunner {
    fn new(outputs: impl IntoIterator<Item = (&'static str, CommandOutput)>) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            outputs: Arc::new(
                outputs
                    .into_iter()
                    .map(|(args, output)| (args.to_string(), output))
                    .collect(),
            ),
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for TestRunner {
    fn run(
        &self,
        _cwd: &Path,
        program: &str,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        self.calls
            .lock()
            .unwrap()
            .push(std::iter::once(program).chain(args.iter().copied()).map(str::to_string).collect());
        Ok(self
            .outputs
            .get(&args.join(" "))
            .cloned()
            .unwrap_or_default())
    }
}

fn stdout(text: &str) -> CommandOutput {
    CommandOutput {
        stdout: text.to_string(),
        ..CommandOutput::default()
    }
}

fn workspace_dir() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("WORKSPACE"), "").unwrap();
    dir
}

#[test]
fn non_workspace_root_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let err = BazelWorkspace::new(dir.path().to_path_buf(), TestRunner::default()).unwrap_err();
    assert!(err.is_configuration(), "{err}");
}

#[test]
fn info_is_memoised() {
    let dir = workspace_dir();
    let runner = TestRunner::new([(
        "info execution_root output_base bazel-bin",
        stdout("execution_root: /x/execroot/ws\noutput_base: /x\nbazel-bin: /x/execroot/ws/bazel-out/k8-fastbuild/bin\n"),
    )]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();
    let cancel = CancellationToken::new();

    let first = workspace.info(&cancel).unwrap();
    let second = workspace.info(&cancel).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.bazel_bin_relative(), PathBuf::from("bazel-out/k8-fastbuild/bin"));
    assert_eq!(runner.calls().len(), 1);
}

#[test]
fn failed_query_carries_stderr() {
    let dir = workspace_dir();
    let runner = TestRunner::new([(
        "query //broken:* --output=label",
        CommandOutput {
            exit_code: 7,
            stdout: String::new(),
            stderr: "ERROR: no such package 'broken'".to_string(),
        },
    )]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner).unwrap();

    let err = workspace
        .query_labels("//broken:*", &CancellationToken::new())
        .unwrap_err();
    match err {
        BazelError::Command(CommandError::Failed { exit_code, stderr, .. }) => {
            assert_eq!(exit_code, 7);
            assert!(stderr.contains("no such package"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn cancelled_token_stops_before_running() {
    let dir = workspace_dir();
    let runner = TestRunner::default();
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = workspace.query_labels("//...", &cancel).unwrap_err();
    assert!(err.is_cancelled());
    assert!(runner.calls().is_empty());
}

#[test]
fn source_files_and_structured_queries() {
    let dir = workspace_dir();
    let runner = TestRunner::new([
        (
            "query kind('source file', deps(//apple-api:*))",
            stdout("//apple-api:source/dev/demo/Apple.java\n//apple-api:BUILD\n@maven//:pom.xml\n"),
        ),
        (
            "query //a:* --output=streamed_jsonproto --noproto:locations",
            stdout("{\"type\":\"RULE\",\"rule\":{\"name\":\"//a:lib\",\"ruleClass\":\"java_library\"}}\n"),
        ),
    ]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner).unwrap();
    let cancel = CancellationToken::new();

    let files = workspace
        .query_source_files(&Label::parse("//apple-api").unwrap(), &cancel)
        .unwrap();
    assert_eq!(files, vec!["source/dev/demo/Apple.java"]);

    let targets = workspace
        .query_targets("//a:*", &["--noproto:locations"], &cancel)
        .unwrap();
    assert!(matches!(&targets[..], [QueryTarget::Rule(rule)] if rule.rule_class == "java_library"));
}

#[test]
fn rules_in_packages_use_one_kind_query() {
    let dir = workspace_dir();
    let runner = TestRunner::new([(
        "query kind(rule, set(//a:* //b/c:*)) --output=label_kind",
        stdout("java_library rule //a:lib\njava_test rule //a:LibTest\ngenrule rule //b/c:gen\n"),
    )]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();

    let rules = workspace
        .query_rules_in_packages(
            &[Label::parse("//a").unwrap(), Label::parse("//b/c:all").unwrap()],
            &CancellationToken::new(),
        )
        .unwrap();
    let rules: Vec<(String, String)> = rules
        .into_iter()
        .map(|(kind, label)| (kind, label.to_string()))
        .collect();
    assert_eq!(
        rules,
        vec![
            ("java_library".to_string(), "//a:lib".to_string()),
            ("java_test".to_string(), "//a:LibTest".to_string()),
            ("genrule".to_string(), "//b/c:gen".to_string()),
        ]
    );
    assert_eq!(
        runner.calls(),
        vec![vec![
            "bazel".to_string(),
            "query".to_string(),
            "kind(rule, set(//a:* //b/c:*))".to_string(),
            "--output=label_kind".to_string(),
        ]]
    );
}

#[test]
fn rc_options_come_from_stderr() {
    let dir = workspace_dir();
    let runner = TestRunner::new([(
        "test --announce_rc --check_up_to_date",
        CommandOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "INFO: Reading rc options for 'test' from /ws/.bazelrc:\n  Inherited 'build' options: --explicit_java_test_deps\nERROR: No targets specified\n".to_string(),
        },
    )]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();
    let cancel = CancellationToken::new();

    assert!(workspace.command_options(&cancel).unwrap().explicit_java_test_deps());
    workspace.command_options(&cancel).unwrap();
    assert_eq!(runner.calls().len(), 1);
}

#[test]
fn aspect_runs_in_batches_and_collects_files() {
    let dir = workspace_dir();
    let out = dir.path().join("bazel-out/k8-fastbuild/bin/a");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(
        out.join("lib.bzljavasdk-data.json"),
        r#"{"key":{"label":"//a:lib"},"kind_string":"java_library","build_file_artifact_location":{"relative_path":"a/BUILD"}}"#,
    )
    .unwrap();

    let labels: Vec<Label> = (0..30)
        .map(|i| Label::parse(&format!("//a:t{i}")).unwrap())
        .collect();

    #[derive(Clone, Default)]
    struct AspectRunner {
        calls: Arc<Mutex<Vec<usize>>>,
    }
    impl CommandRunner for AspectRunner {
        fn run(
            &self,
            _cwd: &Path,
            _program: &str,
            args: &[&str],
            _cancel: &CancellationToken,
        ) -> Result<CommandOutput, CommandError> {
            let targets = args.iter().filter(|arg| arg.starts_with("//a:")).count();
            self.calls.lock().unwrap().push(targets);
            Ok(CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Aspect //:bzljavasdk_aspect.bzl%bzljavasdk_aspect of //a:lib up-to-date:\n  bazel-out/k8-fastbuild/bin/a/lib.bzljavasdk-data.json\n>>>bazel-out/k8-fastbuild/bin/a/lib.bzljavasdk-data.json\n".to_string(),
            })
        }
    }

    let runner = AspectRunner::default();
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();
    let cancel = CancellationToken::new();

    let files = workspace.run_aspect(&labels, &cancel).unwrap();
    assert_eq!(*runner.calls.lock().unwrap(), vec![25, 5]);
    let lib = Label::parse("//a:lib").unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[&lib].len(), 1);

    let index = workspace.load_target_infos(&labels, &cancel).unwrap();
    assert_eq!(index.get(&lib).map(|info| info.kind.as_str()), Some("java_library"));
}

#[test]
fn version_detection_and_reconfiguration() {
    let dir = workspace_dir();
    let runner = TestRunner::new([("version", stdout("Build label: 6.4.0\nBuild target: bazel-out/k8-opt/bin/src/main/java/com/google/devtools/build/lib/bazel/BazelServer_deploy.jar\n"))]);
    let workspace = BazelWorkspace::new(dir.path().to_path_buf(), runner.clone()).unwrap();

    assert_eq!(workspace.tool().version, ToolVersion::Unknown);
    let version = workspace.detect_version(&CancellationToken::new());
    assert_eq!(version.to_string(), "6.4.0");
    assert_eq!(workspace.tool().version, version);
    workspace.tool().check_supported().unwrap();

    workspace.reconfigure_executable("bazelisk").join().unwrap();
    let snapshot = workspace.tool();
    assert_eq!(snapshot.executable, "bazelisk");
    assert_eq!(snapshot.version.to_string(), "6.4.0");
    assert_eq!(runner.calls().last().unwrap(), &vec!["bazelisk".to_string(), "version".to_string()]);
}
