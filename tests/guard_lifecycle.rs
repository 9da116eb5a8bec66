//! Library-level end-to-end tests: server start, guarded execution, reload,
//! session `SET`, hook chaining, and unload.

use std::sync::{Arc, Mutex};

use dont_drop_db::guc::{GucError, GucSource};
use dont_drop_db::host::{Backend, NullDest, ProcessUtility, UtilityCall, UtilityError};
use dont_drop_db::{Config, ExecError, Extension, LIST_GUC, Server};

fn cluster_config(extra: &str) -> Config {
    let text = format!(
        r#"
[cluster]
databases = ["postgres", "template0", "template1", "analytics_db", "scratch"]
current_database = "postgres"
{extra}
"#
    );
    toml::from_str(&text).expect("test config parses")
}

fn blocked(dbname: &str) -> ExecError {
    ExecError::Utility(UtilityError::BlockedDrop {
        dbname: dbname.to_string(),
    })
}

#[test]
fn default_list_blocks_template0_and_allows_others() {
    let server = Server::start(&cluster_config("")).expect("server starts");
    let backend = server.backend();

    let err = backend
        .execute("DROP DATABASE template0", &mut NullDest)
        .unwrap_err();
    assert_eq!(err, blocked("template0"));
    assert_eq!(err.sqlstate(), "42501");
    assert!(backend.catalog().contains("template0"));

    let done = backend
        .execute("DROP DATABASE analytics_db", &mut NullDest)
        .expect("unprotected drop succeeds");
    assert_eq!(done[0].tag.as_deref(), Some("DROP DATABASE"));
    assert!(!backend.catalog().contains("analytics_db"));
}

#[test]
fn quoted_and_folded_names_are_checked_as_received() {
    let server = Server::start(&cluster_config("")).expect("server starts");
    let backend = server.backend();

    // Unquoted names fold to lower case, so this is template1.
    assert_eq!(
        backend.execute("drop database TEMPLATE1", &mut NullDest),
        Err(blocked("template1"))
    );
    // Matching is case-insensitive, so the quoted spelling is caught too.
    assert_eq!(
        backend.execute("DROP DATABASE \"Template1\"", &mut NullDest),
        Err(blocked("Template1"))
    );
    // IF EXISTS and FORCE do not bypass the guard.
    assert_eq!(
        backend.execute("DROP DATABASE IF EXISTS postgres WITH (FORCE)", &mut NullDest),
        Err(blocked("postgres"))
    );
}

#[test]
fn other_statements_pass_through() {
    let server = Server::start(&cluster_config(
        r#"
[settings]
"dont_drop_db.list" = "ALL"
"#,
    ))
    .expect("server starts");
    let backend = server.backend();

    let done = backend
        .execute(
            "CREATE DATABASE reporting; \
             ALTER DATABASE scratch RENAME TO scratch_old; \
             DROP SCHEMA IF EXISTS postgres CASCADE; \
             VACUUM",
            &mut NullDest,
        )
        .expect("non-drop statements run");
    let tags: Vec<_> = done.iter().filter_map(|c| c.tag.as_deref()).collect();
    assert_eq!(
        tags,
        vec!["CREATE DATABASE", "ALTER DATABASE", "DROP SCHEMA", "VACUUM"]
    );
    assert!(backend.catalog().contains("scratch_old"));
    assert!(
        backend
            .execute("DROP DATABASE reporting", &mut NullDest)
            .is_err()
    );
}

#[test]
fn reload_takes_effect_without_reinstalling() {
    let mut config = cluster_config("");
    let server = Server::start(&config).expect("server starts");
    let backend = server.backend();
    let hook_before = backend.process_utility_hook().current().expect("installed");

    config
        .settings
        .insert(LIST_GUC.to_string(), "analytics_db".to_string());
    server.reload(&config);

    let hook_after = backend.process_utility_hook().current().expect("installed");
    assert!(Arc::ptr_eq(&hook_before, &hook_after));
    assert_eq!(
        backend.execute("DROP DATABASE analytics_db", &mut NullDest),
        Err(blocked("analytics_db"))
    );
    backend
        .execute("DROP DATABASE template1", &mut NullDest)
        .expect("template1 no longer listed");
}

#[test]
fn session_set_of_list_is_refused() {
    let server = Server::start(&cluster_config("")).expect("server starts");
    let gucs = server.backend().gucs();
    for superuser in [false, true] {
        assert_eq!(
            gucs.set_option(LIST_GUC, "", GucSource::Session { superuser }),
            Err(GucError::CantChangeNow(LIST_GUC.to_string()))
        );
    }
    assert_eq!(
        gucs.show(LIST_GUC).as_deref(),
        Some("postgres,template0,template1")
    );
}

#[test]
fn shutdown_restores_unguarded_execution() {
    let server = Server::start(&cluster_config("")).expect("server starts");
    let backend = server.shutdown();
    assert!(!backend.process_utility_hook().is_installed());
    backend
        .execute("DROP DATABASE template1", &mut NullDest)
        .expect("no guard after shutdown");
}

/// Hook installed before the guard; counts what reaches it.
struct Audit {
    next: Arc<dyn ProcessUtility>,
    seen: Mutex<Vec<String>>,
}

impl ProcessUtility for Audit {
    fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError> {
        self.seen
            .lock()
            .expect("audit lock")
            .push(call.query_string.to_string());
        self.next.process_utility(call)
    }
}

#[test]
fn previous_hook_runs_for_allowed_statements_only() {
    let backend = Backend::new(["postgres", "template0", "scratch"], "postgres");
    let audit = Arc::new(Audit {
        next: backend.standard_process_utility(),
        seen: Mutex::new(Vec::new()),
    });
    let _ = backend.process_utility_hook().install(audit.clone());

    let mut extension = Extension::new();
    backend
        .with_preload(|b| extension.init(b))
        .expect("extension loads");

    assert!(
        backend
            .execute("DROP DATABASE template0", &mut NullDest)
            .is_err()
    );
    backend
        .execute("CREATE DATABASE other; DROP DATABASE scratch", &mut NullDest)
        .expect("allowed statements run");
    assert_eq!(
        *audit.seen.lock().expect("audit lock"),
        vec!["CREATE DATABASE other", "DROP DATABASE scratch"]
    );
    assert!(!backend.catalog().contains("scratch"));

    extension.fini(&backend);
    let restored = backend.process_utility_hook().current().expect("audit restored");
    let audit_dyn: Arc<dyn ProcessUtility> = audit.clone();
    assert!(Arc::ptr_eq(&restored, &audit_dyn));
}

#[test]
fn loading_outside_preload_does_nothing() {
    let backend = Backend::new(["postgres", "template0"], "postgres");
    let mut extension = Extension::new();
    extension.init(&backend).expect("init succeeds");
    assert!(!extension.is_installed());
    backend
        .execute("DROP DATABASE template0", &mut NullDest)
        .expect("unguarded");
}
