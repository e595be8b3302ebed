use bcp_bazel::{BazelWorkspace, CancellationToken, CommandError, CommandOutput, CommandRunner, Label};
use bcp_classpath::{
    ClasspathEngine, ClasspathEntry, ClasspathError, LibraryEntry, MissingArtifacts,
    ProjectDefinition, ProjectIndex, SourceRoot,
};
use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

const BIN: &str = "bazel-out/k8-fastbuild/bin";
const RULE_FLAGS: &str = "--noproto:rule_inputs_and_outputs --noproto:locations --noproto:default_values";

/// Canned output per joined argument list; any aspect build gets `aspect_stderr`.
#[derive(Clone, Default)]
struct TestRunner {
    calls: Arc<Mutex<Vec<String>>>,
    outputs: Arc<HashMap<String, CommandOutput>>,
    aspect_stderr: String,
}

impl TestRunner {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for TestRunner {
    fn run(
        &self,
        _cwd: &Path,
        _program: &str,
        args: &[&str],
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let joined = args.join(" ");
        self.calls.lock().unwrap().push(joined.clone());
        if args.first() == Some(&"build") && args.iter().any(|arg| arg.starts_with("--aspects=")) {
            return Ok(CommandOutput {
                stderr: self.aspect_stderr.clone(),
                ..CommandOutput::default()
            });
        }
        Ok(self.outputs.get(&joined).cloned().unwrap_or_default())
    }
}

fn stdout(text: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: text.into(),
        ..CommandOutput::default()
    }
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "").unwrap();
}

fn label(text: &str) -> Label {
    Label::parse(text).unwrap()
}

struct Fixture {
    dir: tempfile::TempDir,
    exec_root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("WORKSPACE"), "").unwrap();
        let exec_root = dir.path().join("execroot/ws");
        std::fs::create_dir_all(&exec_root).unwrap();
        Self { dir, exec_root }
    }

    fn info_output(&self) -> (String, CommandOutput) {
        (
            "info execution_root output_base bazel-bin".to_string(),
            stdout(format!(
                "execution_root: {exec}\noutput_base: {base}\nbazel-bin: {exec}/{BIN}\n",
                exec = self.exec_root.display(),
                base = self.dir.path().join("output_base").display(),
            )),
        )
    }

    fn aspect_file(&self, relative: &str, json: &str) -> String {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, json).unwrap();
        format!(">>>{relative}\n")
    }

    fn engine(&self, runner: TestRunner, projects: Vec<ProjectDefinition>) -> ClasspathEngine<TestRunner> {
        let workspace = BazelWorkspace::new(self.dir.path().to_path_buf(), runner).unwrap();
        ClasspathEngine::new(Arc::new(workspace), ProjectIndex::new(projects).unwrap()).unwrap()
    }
}

fn test_project_runner(fixture: &Fixture) -> TestRunner {
    let mut stderr = fixture.aspect_file(
        &format!("{BIN}/app/AppTest.bzljavasdk-data.json"),
        r#"{"key":{"label":"//app:AppTest"},"kind_string":"java_test","deps":[{"target":{"label":"//lib:lib"}}],"java_ide_info":{"sources":[{"relative_path":"app/AppTest.java"}]}}"#,
    );
    stderr.push_str(&fixture.aspect_file(
        &format!("{BIN}/lib/lib.bzljavasdk-data.json"),
        r#"{"key":{"label":"//lib:lib"},"kind_string":"java_library","java_ide_info":{"jars":[{"jar":{"relative_path":"lib/liblib.jar","root_execution_path_fragment":"bazel-out/k8-fastbuild/bin"},"source_jar":{"relative_path":"lib/liblib-src.jar","root_execution_path_fragment":"bazel-out/k8-fastbuild/bin"}}]}}"#,
    ));
    TestRunner {
        outputs: Arc::new(HashMap::from([fixture.info_output()])),
        aspect_stderr: stderr,
        ..TestRunner::default()
    }
}

#[test]
fn test_project_gets_test_entries_and_the_runner() {
    let fixture = Fixture::new();
    let bin = fixture.exec_root.join(BIN);
    touch(&bin.join("lib/liblib.jar"));
    touch(&bin.join("lib/liblib-src.jar"));
    let runner_jar = bin.join("external/bazel_tools/tools/jdk/_ijar/TestRunner/java/Runner_deploy-ijar.jar");
    touch(&runner_jar);

    let runner = test_project_runner(&fixture);
    let engine = fixture.engine(
        runner.clone(),
        vec![ProjectDefinition::new("app", vec![label("//app:AppTest")])
            .with_source_root(SourceRoot::new("app"))],
    );

    let result = engine
        .project_classpath("app", &CancellationToken::new())
        .unwrap();
    assert_eq!(
        result.entries,
        vec![
            ClasspathEntry::Library(LibraryEntry {
                jar: bin.join("lib/liblib.jar"),
                source_jar: Some(bin.join("lib/liblib-src.jar")),
                test_only: true,
                origin: Some(label("//lib:lib")),
            }),
            ClasspathEntry::Library(LibraryEntry {
                jar: std::fs::canonicalize(&runner_jar).unwrap(),
                source_jar: None,
                test_only: true,
                origin: None,
            }),
        ]
    );
    assert!(result.complete);
    assert!(runner
        .calls()
        .contains(&"test --announce_rc --check_up_to_date".to_string()));
}

#[test]
fn explicit_test_deps_skip_the_runner_and_rc_lookup() {
    let fixture = Fixture::new();
    let bin = fixture.exec_root.join(BIN);
    touch(&bin.join("lib/liblib.jar"));
    touch(&bin.join("external/bazel_tools/tools/jdk/_ijar/TestRunner/Runner_deploy-ijar.jar"));

    let runner = test_project_runner(&fixture);
    let engine = fixture
        .engine(
            runner.clone(),
            vec![ProjectDefinition::new("app", vec![label("//app:AppTest")])],
        )
        .with_explicit_java_test_deps(Some(true));

    let result = engine
        .project_classpath("app", &CancellationToken::new())
        .unwrap();
    assert_eq!(result.library_entries().count(), 1);
    assert!(result.missing.found_missing_source_jars);
    assert!(!runner.calls().iter().any(|call| call.contains("--announce_rc")));
}

#[test]
fn unknown_project_and_cancellation() {
    let fixture = Fixture::new();
    let engine = fixture.engine(TestRunner::default(), Vec::new());

    let err = engine
        .project_classpath("nope", &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ClasspathError::UnknownProject(ref name) if name == "nope"));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.target_classpath(&[label("//app:app")], &cancel).unwrap_err();
    assert!(err.is_cancelled());
}

fn libraries_runner(fixture: &Fixture) -> TestRunner {
    let repositories = [
        r#"{"type":"RULE","rule":{"name":"//external:guava","ruleClass":"jvm_import_external","attribute":[{"name":"name","stringValue":"guava"}]}}"#,
        r#"{"type":"RULE","rule":{"name":"//external:hidden","ruleClass":"jvm_import_external","attribute":[{"name":"name","stringValue":"hidden"},{"name":"tags","stringListValue":["no-ide"]}]}}"#,
        r#"{"type":"RULE","rule":{"name":"//external:maven","ruleClass":"coursier_fetch","attribute":[{"name":"name","stringValue":"maven"}]}}"#,
        r#"{"type":"RULE","rule":{"name":"//external:unpinned_maven","ruleClass":"coursier_fetch","attribute":[{"name":"name","stringValue":"unpinned_maven"}]}}"#,
    ]
    .join("\n");
    let guava = r#"{"type":"RULE","rule":{"name":"@guava//jar:jar","ruleClass":"java_import","attribute":[{"name":"jars","stringListValue":["@guava//jar:guava-31.jar","@guava//jar:missing.jar"]},{"name":"srcjar","stringValue":"@guava//jar:guava-31-sources.jar"}]}}"#;
    let maven = r#"{"type":"RULE","rule":{"name":"@maven//:junit_junit","ruleClass":"jvm_import","attribute":[{"name":"jars","stringListValue":["@maven//:v1/https/repo1.maven.org/junit/junit-4.13.jar"]},{"name":"testonly","booleanValue":true}]}}"#;
    let generated = [
        r#"{"type":"GENERATED_FILE","generatedFile":{"name":"//gen:libproto.jar","generatingRule":"//gen:proto"}}"#,
        r#"{"type":"GENERATED_FILE","generatedFile":{"name":"//gen:libproto-src.jar","generatingRule":"//gen:proto"}}"#,
        r#"{"type":"GENERATED_FILE","generatedFile":{"name":"//app:app_deploy.jar","generatingRule":"//app:app"}}"#,
    ]
    .join("\n");
    let generating_rules = [
        r#"{"type":"RULE","rule":{"name":"//app:app","ruleClass":"java_binary"}}"#,
        r#"{"type":"RULE","rule":{"name":"//gen:proto","ruleClass":"java_proto_library"}}"#,
    ]
    .join("\n");

    let import_flags = format!("--output=streamed_jsonproto --proto:output_rule_attrs=srcjar,jars,testonly {RULE_FLAGS}");
    TestRunner {
        outputs: Arc::new(HashMap::from([
            fixture.info_output(),
            (
                format!("query //external:* --output=streamed_jsonproto {RULE_FLAGS}"),
                stdout(repositories),
            ),
            (
                format!("query kind('java_import rule', set( @guava//... )) {import_flags}"),
                stdout(guava),
            ),
            (
                format!("query kind('jvm_import rule', set( @maven//... )) {import_flags}"),
                stdout(maven),
            ),
            (
                r#"query filter(".*\.jar$", kind("generated file", //...:*)) --output=streamed_jsonproto"#.to_string(),
                stdout(generated),
            ),
            (
                format!("query set(//app:app //gen:proto) --output=streamed_jsonproto --proto:output_rule_attrs=testonly {RULE_FLAGS}"),
                stdout(generating_rules),
            ),
        ])),
        ..TestRunner::default()
    }
}

#[test]
fn workspace_libraries_from_external_and_generated_jars() {
    let fixture = Fixture::new();
    let exec = &fixture.exec_root;
    let bin = exec.join(BIN);
    touch(&exec.join("external/guava/jar/guava-31.jar"));
    touch(&bin.join("external/maven/v1/https/repo1.maven.org/junit/junit-4.13.jar"));
    touch(&bin.join("gen/libproto.jar"));
    touch(&bin.join("gen/libproto-src.jar"));
    touch(&bin.join("app/app_deploy.jar"));

    let runner = libraries_runner(&fixture);
    let engine = fixture.engine(runner.clone(), Vec::new());
    let result = engine.workspace_libraries(&CancellationToken::new()).unwrap();

    assert_eq!(
        result.entries,
        vec![
            ClasspathEntry::Library(LibraryEntry {
                jar: exec.join("external/guava/jar/guava-31.jar"),
                source_jar: Some(exec.join("external/guava/jar/guava-31-sources.jar")),
                test_only: false,
                origin: Some(label("@guava//jar:jar")),
            }),
            ClasspathEntry::Library(LibraryEntry {
                jar: bin.join("external/maven/v1/https/repo1.maven.org/junit/junit-4.13.jar"),
                source_jar: None,
                test_only: true,
                origin: Some(label("@maven//:junit_junit")),
            }),
            ClasspathEntry::Library(LibraryEntry {
                jar: bin.join("gen/libproto.jar"),
                source_jar: Some(bin.join("gen/libproto-src.jar")),
                test_only: false,
                origin: Some(label("//gen:proto")),
            }),
        ]
    );
    assert_eq!(
        result.missing,
        MissingArtifacts {
            found_missing_jars: true,
            found_missing_source_jars: true,
            missing_jar_count: 1,
        }
    );
    assert!(!runner.calls().iter().any(|call| call.contains("@hidden")));
}

#[test]
fn repository_filter_limits_external_discovery() {
    let fixture = Fixture::new();
    let bin = fixture.exec_root.join(BIN);
    touch(&bin.join("external/maven/v1/https/repo1.maven.org/junit/junit-4.13.jar"));

    let runner = libraries_runner(&fixture);
    let engine = fixture
        .engine(runner.clone(), Vec::new())
        .with_external_repository_filter("mav*")
        .unwrap();
    let result = engine.workspace_libraries(&CancellationToken::new()).unwrap();

    let origins: Vec<String> = result
        .library_entries()
        .filter_map(|entry| entry.origin.as_ref().map(Label::to_string))
        .collect();
    assert_eq!(origins, ["@maven//:junit_junit"]);
    assert!(!runner.calls().iter().any(|call| call.contains("java_import rule")));
}

#[test]
fn java_targets_of_packages_come_from_one_rule_query() {
    let fixture = Fixture::new();
    let runner = TestRunner {
        outputs: Arc::new(HashMap::from([(
            "query kind(rule, set(//app:* //lib:*)) --output=label_kind".to_string(),
            stdout("java_library rule //app:app\ngenrule rule //app:gen\njava_test rule //app:AppTest\nfilegroup rule //lib:srcs\n"),
        )])),
        ..TestRunner::default()
    };
    let engine = fixture.engine(runner.clone(), Vec::new());

    let targets = engine
        .java_targets_in_packages(&[label("//app"), label("//lib")], &CancellationToken::new())
        .unwrap();
    assert_eq!(targets, vec![label("//app:app"), label("//app:AppTest")]);
    assert_eq!(
        runner.calls(),
        vec!["query kind(rule, set(//app:* //lib:*)) --output=label_kind"]
    );

    assert!(engine
        .java_targets_in_packages(&[], &CancellationToken::new())
        .unwrap()
        .is_empty());
    assert_eq!(runner.calls().len(), 1);
}
