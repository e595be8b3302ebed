use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

fn bcp() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bcp"));
    cmd.env_remove("BCP_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// A Bazel workspace whose config never wraps commands in a login shell.
fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    temp.child("WORKSPACE").touch().unwrap();
    temp.child("bcp.toml")
        .write_str("[bazel]\nshell_wrapping = false\n\n[logging]\nlevel = \"warn\"\n")
        .unwrap();
    temp
}

const PARAMS: &str = "\
--output bazel-out/k8-fastbuild/bin/pkg/FooTest_deploy.jar
--main_class
com.google.testing.junit.runner.BazelTestRunner
--sources
bazel-out/k8-fastbuild/bin/pkg/libfoo.jar,//pkg:foo
bazel-out/k8-fastbuild/bin/pkg/FooTest.jar,//pkg:FooTest
";

#[test]
fn help_mentions_core_commands() {
    bcp().arg("--help").assert().success().stdout(
        predicate::str::contains("classpath")
            .and(predicate::str::contains("structure"))
            .and(predicate::str::contains("test-classpath"))
            .and(predicate::str::contains("params"))
            .and(predicate::str::contains("version")),
    );
}

#[test]
fn params_lists_jars_without_deploy_jars() {
    let temp = TempDir::new().unwrap();
    let first = temp.child("FooTest_deploy.jar-0.params");
    first.write_str(PARAMS).unwrap();
    let second = temp.child("BarTest_deploy.jar-0.params");
    second
        .write_str("--sources\nbazel-out/k8-fastbuild/bin/pkg/libfoo.jar,//pkg:foo\nbazel-out/k8-fastbuild/bin/pkg/BarTest.jar,//pkg:BarTest\n")
        .unwrap();

    bcp()
        .arg("params")
        .arg(first.path())
        .arg(second.path())
        .assert()
        .success()
        .stdout(
            "bazel-out/k8-fastbuild/bin/pkg/libfoo.jar\n\
             bazel-out/k8-fastbuild/bin/pkg/FooTest.jar\n\
             bazel-out/k8-fastbuild/bin/pkg/BarTest.jar\n",
        );
}

#[test]
fn params_json_keeps_deploy_jars_on_request() {
    let temp = TempDir::new().unwrap();
    let params = temp.child("FooTest_deploy.jar-0.params");
    params.write_str(PARAMS).unwrap();

    let output = bcp()
        .arg("params")
        .arg(params.path())
        .arg("--include-deploy-jars")
        .arg("--json")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let jars: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|jar| jar.as_str().unwrap())
        .collect();
    assert_eq!(
        jars,
        [
            "bazel-out/k8-fastbuild/bin/pkg/FooTest_deploy.jar",
            "bazel-out/k8-fastbuild/bin/pkg/libfoo.jar",
            "bazel-out/k8-fastbuild/bin/pkg/FooTest.jar",
        ]
    );
}

#[test]
fn params_requires_a_file() {
    bcp().arg("params").assert().failure();
}

#[test]
fn structure_resolves_maven_layout_without_bazel() {
    let temp = workspace();
    temp.child("svc/BUILD").touch().unwrap();
    temp.child("svc/src/main/java").create_dir_all().unwrap();
    temp.child("svc/src/main/resources").create_dir_all().unwrap();
    temp.child("svc/src/test/java").create_dir_all().unwrap();

    let output = bcp()
        .arg("--workspace")
        .arg(temp.path())
        .args(["structure", "//svc", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        v["main_source_dirs"],
        serde_json::json!(["svc/src/main/java", "svc/src/main/resources"])
    );
    assert_eq!(v["test_source_dirs"], serde_json::json!(["svc/src/test/java"]));
}

#[test]
fn classpath_outside_a_workspace_fails() {
    let temp = TempDir::new().unwrap();
    temp.child("bcp.toml")
        .write_str("[bazel]\nshell_wrapping = false\n")
        .unwrap();
    bcp()
        .arg("--workspace")
        .arg(temp.path())
        .args(["classpath", "//app:app"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("WORKSPACE"));
}

#[test]
fn classpath_rejects_unknown_project() {
    let temp = workspace();
    bcp()
        .arg("--workspace")
        .arg(temp.path())
        .args(["classpath", "--project", "missing"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown project `missing`"));
}

#[cfg(unix)]
#[test]
fn version_reads_build_label_from_configured_executable() {
    use std::os::unix::fs::PermissionsExt;

    let temp = workspace();
    let fake = temp.child("fake-bazel");
    fake.write_str("#!/bin/sh\necho 'Build label: 7.1.2'\necho 'Build target: bazel-out/k8-opt/bin/src/main/java/com/google/devtools/build/lib/bazel/BazelServer_deploy.jar'\n")
        .unwrap();
    std::fs::set_permissions(fake.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    temp.child("bcp.toml")
        .write_str(&format!(
            "[bazel]\nshell_wrapping = false\nexecutable = \"{}\"\n",
            fake.path().display()
        ))
        .unwrap();

    let output = bcp()
        .arg("--workspace")
        .arg(temp.path())
        .args(["version", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["version"]["state"], "known");
    assert_eq!(v["version"]["version"]["major"], 7);
    assert_eq!(v["version"]["version"]["patch"], 2);
}

#[test]
fn version_of_missing_executable_is_unknown() {
    let temp = workspace();
    temp.child("bcp.toml")
        .write_str("[bazel]\nshell_wrapping = false\nexecutable = \"/nonexistent/bazel\"\n")
        .unwrap();

    bcp()
        .arg("--workspace")
        .arg(temp.path())
        .arg("version")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("unknown"));
}

#[cfg(unix)]
#[test]
fn targets_lists_java_rules_of_packages() {
    use std::os::unix::fs::PermissionsExt;

    let temp = workspace();
    let fake = temp.child("fake-bazel");
    fake.write_str("#!/bin/sh\necho 'java_binary rule //app:app'\necho 'genrule rule //app:gen'\necho 'java_library rule //lib:lib'\n")
        .unwrap();
    std::fs::set_permissions(fake.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    temp.child("bcp.toml")
        .write_str(&format!(
            "[bazel]\nshell_wrapping = false\nexecutable = \"{}\"\n",
            fake.path().display()
        ))
        .unwrap();

    bcp()
        .arg("--workspace")
        .arg(temp.path())
        .args(["targets", "//app", "//lib"])
        .assert()
        .success()
        .stdout("//app:app\n//lib:lib\n");
}

#[test]
fn targets_requires_a_package() {
    bcp().arg("targets").assert().failure();
}
