use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn kiln(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(dir).arg("--no-color");
    cmd
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let temp = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = temp.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    temp
}

const TASKS: &str = r#"
[project]
group = "org.example"
version = "1.0"

[tasks.hello]
desc = "Say hello"
run = ["echo hello from kiln"]

[tasks.build]
depends = ["hello"]
"#;

#[test]
fn check_reports_valid_build() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (1 projects, 2 tasks)"));
}

#[test]
fn missing_project_file() {
    let temp = tempfile::tempdir().unwrap();
    kiln(temp.path())
        .args(["--config", "nowhere/kiln.toml", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project file not found"));
}

#[test]
fn tasks_listed_by_path() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .args(["tasks", "--format", "plain"])
        .assert()
        .success()
        .stdout(":build\n:hello\n");
}

#[cfg(unix)]
#[test]
fn run_executes_dependencies() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .args(["--quiet", "run", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from kiln"));
}

#[cfg(unix)]
#[test]
fn bare_task_names_run() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .args(["--quiet", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from kiln"));
}

#[test]
fn dry_run_does_not_execute() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .args(["run", "--dry-run", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Execution plan"))
        .stdout(predicate::str::contains("→ echo hello from kiln"));
}

#[test]
fn unknown_task_fails() {
    let temp = project(&[("kiln.toml", TASKS)]);
    kiln(temp.path())
        .args(["run", "deploy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task 'deploy' not found"));
}

#[test]
fn task_cycle_is_reported() {
    let temp = project(&[(
        "kiln.toml",
        r#"
        [tasks.a]
        depends = ["b"]

        [tasks.b]
        depends = ["a"]
        "#,
    )]);
    kiln(temp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains(":a -> :b -> :a"));
}

#[cfg(unix)]
#[test]
fn failing_command_fails_build() {
    let temp = project(&[(
        "kiln.toml",
        r#"
        [tasks.broken]
        run = ["false"]
        "#,
    )]);
    kiln(temp.path())
        .args(["--quiet", "run", "broken"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task ':broken' failed"));
}

const LIBRARY: &str = r#"
[project]
group = "org.example"
name = "lib"
version = "1.0"

[[artifacts]]
name = "lib"
type = "jar"
file = "lib.jar"

[[repositories]]
name = "local"
path = "../repo"

[publish]
repositories = ["local"]

[settings]
cache_dir = "../cache"
"#;

const APPLICATION: &str = r#"
[project]
group = "org.example"
name = "app"
version = "1.0"

[dependencies]
compile = ["org.example:lib:1.0", "org.example:missing:2.0"]

[[repositories]]
name = "local"
path = "../repo"

[settings]
cache_dir = "../cache"
"#;

#[test]
fn publish_then_resolve_through_repository() {
    let temp = project(&[
        ("lib/kiln.toml", LIBRARY),
        ("lib/lib.jar", "library classes"),
        ("app/kiln.toml", APPLICATION),
    ]);

    kiln(&temp.path().join("lib"))
        .args(["publish", "default"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Published"));
    assert!(temp.path().join("repo/org.example/lib/1.0/module.toml").is_file());
    assert!(temp.path().join("repo/org.example/lib/1.0/lib-1.0.jar").is_file());

    kiln(&temp.path().join("app"))
        .args(["resolve", "runtime", "--lenient"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lib-1.0.jar"));

    kiln(&temp.path().join("app"))
        .args(["resolve", "runtime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("org.example:missing:2.0"));

    kiln(&temp.path().join("app"))
        .arg("dependencies")
        .assert()
        .success()
        .stdout(predicate::str::contains("+--- org.example:lib:1.0"))
        .stdout(predicate::str::contains("\\--- org.example:missing:2.0 (unresolved)"));
}

#[test]
fn publish_twice_is_rejected() {
    let temp = project(&[("lib/kiln.toml", LIBRARY), ("lib/lib.jar", "library classes")]);
    let lib = temp.path().join("lib");

    kiln(&lib).args(["publish", "default"]).assert().success();
    kiln(&lib)
        .args(["publish", "default"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to publish org.example:lib:1.0"));
}

#[test]
fn dependencies_written_to_dot_file() {
    let temp = project(&[
        ("lib/kiln.toml", LIBRARY),
        ("lib/lib.jar", "library classes"),
        ("app/kiln.toml", APPLICATION),
    ]);
    kiln(&temp.path().join("lib")).args(["publish", "default"]).assert().success();

    let output = temp.path().join("out/deps.dot");
    kiln(&temp.path().join("app"))
        .args(["dependencies", "--format", "dot", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote runtime report"));

    let dot = fs::read_to_string(output).unwrap();
    assert!(dot.starts_with("digraph \"runtime\" {"));
    assert!(dot.contains("\"org.example:lib:1.0\""));
    assert!(dot.contains("\"org.example:missing:2.0\" [color=red];"));
}
