//! End-to-end tests for CLI flows: check, explain, exec, init, config.
//!
//! Every run uses a cleared environment and a temp CWD so results do not
//! depend on user or system configuration.
//!
//! # Running
//!
//! ```bash
//! cargo test --test cli_e2e
//! ```

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Isolated working directory with its own HOME and XDG config dir.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::create_dir_all(dir.path().join(".git")).expect("failed to create .git dir");
        std::fs::create_dir_all(dir.path().join("home")).expect("failed to create HOME dir");
        std::fs::create_dir_all(dir.path().join("xdg_config"))
            .expect("failed to create XDG_CONFIG_HOME dir");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_project_config(&self, content: &str) {
        std::fs::write(self.path().join(".ddd.toml"), content).expect("failed to write config");
    }

    #[allow(deprecated)]
    fn ddd(&self) -> Command {
        let mut cmd = Command::cargo_bin("ddd").expect("failed to find binary");
        cmd.env_clear()
            .env("HOME", self.path().join("home"))
            .env("XDG_CONFIG_HOME", self.path().join("xdg_config"))
            .current_dir(self.path());
        cmd
    }
}

// ============================================================================
// ddd check
// ============================================================================

mod check_tests {
    use super::*;

    #[test]
    fn check_default_list_protects_template0() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["check", "template0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Result: PROTECTED"))
            .stdout(predicate::str::contains("Entry: template0"));
    }

    #[test]
    fn check_unlisted_database_is_allowed() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["check", "analytics_db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Result: ALLOWED"));
    }

    #[test]
    fn check_explicit_list_ignores_whitespace_and_case() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["check", "POSTGRES", "--list", " post gres , template0 "])
            .assert()
            .success()
            .stdout(predicate::str::contains("Result: PROTECTED"));
    }

    #[test]
    fn check_all_sentinel() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["check", "anything", "--list", "all,staging"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Entry: ALL"));
    }

    #[test]
    fn check_uses_env_list() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .env("DDD_LIST", "prod")
            .args(["check", "template0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Result: ALLOWED"));
    }
}

// ============================================================================
// ddd explain
// ============================================================================

mod explain_tests {
    use super::*;

    #[test]
    fn explain_json_is_structured() {
        let sandbox = Sandbox::new();
        let long = "x".repeat(68);
        let list = format!("{long},template0");
        let output = sandbox
            .ddd()
            .args(["explain", "template0", "--list", &list, "--format", "json"])
            .output()
            .expect("failed to run ddd");
        assert!(output.status.success());

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).expect("explain output is JSON");
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["matched_entry"], "template0");
        let entries = json["entries"].as_array().expect("entries array");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["kind"], "oversized");
        assert_eq!(entries[0]["deciding"], false);
        assert_eq!(entries[1]["kind"], "name");
        assert_eq!(entries[1]["deciding"], true);
        assert_eq!(entries[1]["start"], 69);
    }

    #[test]
    fn explain_pretty_allow() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["explain", "analytics_db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Decision: ALLOW"));
    }
}

// ============================================================================
// ddd exec
// ============================================================================

mod exec_tests {
    use super::*;

    #[test]
    fn exec_blocks_protected_drop() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE template0"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("ERROR:  template0 cannot be dropped."))
            .stderr(predicate::str::contains("Error:").not());
    }

    #[test]
    fn exec_allows_unprotected_drop() {
        let sandbox = Sandbox::new();
        sandbox.write_project_config(
            r#"
[cluster]
databases = ["postgres", "template0", "template1", "analytics_db"]
"#,
        );
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE analytics_db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("DROP DATABASE"));
    }

    #[test]
    fn exec_reports_notices() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE IF EXISTS nope"])
            .assert()
            .success()
            .stderr(predicate::str::contains(
                "NOTICE:  database \"nope\" does not exist, skipping",
            ));
    }

    #[test]
    fn exec_respects_project_list() {
        let sandbox = Sandbox::new();
        sandbox.write_project_config(
            r#"
[settings]
"dont_drop_db.list" = "ALL"

[cluster]
databases = ["postgres", "scratch"]
"#,
        );
        sandbox
            .ddd()
            .args(["exec", "CREATE DATABASE other; DROP DATABASE scratch"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("scratch cannot be dropped."));
    }

    #[test]
    fn exec_without_preload_is_unguarded() {
        let sandbox = Sandbox::new();
        sandbox.write_project_config(
            r#"
[cluster]
shared_preload_libraries = []
"#,
        );
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE template1"])
            .assert()
            .success();
    }

    #[test]
    fn exec_unknown_library_fails_to_start() {
        let sandbox = Sandbox::new();
        sandbox.write_project_config(
            r#"
[cluster]
shared_preload_libraries = ["no_such_lib"]
"#,
        );
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE template1"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("no_such_lib"));
    }

    #[test]
    fn exec_syntax_error() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("ERROR:  syntax error"));
    }

    #[test]
    fn exec_writes_decision_log() {
        let sandbox = Sandbox::new();
        let log = sandbox.path().join("decisions.log");
        sandbox.write_project_config(&format!(
            r#"
[logging]
enabled = true
file = {log:?}
format = "json"
"#,
            log = log.to_string_lossy()
        ));
        sandbox
            .ddd()
            .args(["exec", "DROP DATABASE template0"])
            .assert()
            .code(1);
        let content = std::fs::read_to_string(&log).expect("decision log written");
        let entry: serde_json::Value =
            serde_json::from_str(content.lines().next().expect("one line")).expect("json line");
        assert_eq!(entry["decision"], "deny");
        assert_eq!(entry["database"], "template0");
        assert_eq!(entry["statement"], "T_DropdbStmt");
    }
}

// ============================================================================
// ddd init / config
// ============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn init_writes_sample_and_refuses_overwrite() {
        let sandbox = Sandbox::new();
        let target = sandbox.path().join("out").join("config.toml");
        let target_str = target.to_string_lossy().into_owned();

        sandbox
            .ddd()
            .args(["init", "-o", &target_str])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration written to"));
        let written = std::fs::read_to_string(&target).expect("sample written");
        assert!(written.contains("\"dont_drop_db.list\""));

        sandbox
            .ddd()
            .args(["init", "-o", &target_str])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--force"));

        sandbox
            .ddd()
            .args(["init", "-o", &target_str, "--force"])
            .assert()
            .success();
    }

    #[test]
    fn config_shows_sources() {
        let sandbox = Sandbox::new();
        sandbox.write_project_config(
            r#"
[settings]
"dont_drop_db.list" = "prod"
"#,
        );
        sandbox
            .ddd()
            .env("DDD_VERBOSE", "1")
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("- project:"))
            .stdout(predicate::str::contains("- environment: DDD_VERBOSE"))
            .stdout(predicate::str::contains("dont_drop_db.list = \"prod\""))
            .stdout(predicate::str::contains("Verbose: true"));
    }

    #[test]
    fn config_ignores_unparsable_file() {
        let sandbox = Sandbox::new();
        let config_path = sandbox.path().join("broken.toml");
        std::fs::write(
            &config_path,
            "[general]\nverbose = true\ninvalid_syntax_here = \n",
        )
        .expect("failed to write config file");
        sandbox
            .ddd()
            .env("DDD_CONFIG", &config_path)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("Verbose: false"))
            .stdout(predicate::str::contains("(defaults only)"));
    }

    #[test]
    fn version_flag() {
        let sandbox = Sandbox::new();
        sandbox
            .ddd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("ddd "));
    }
}
