//! Host server model.
//!
//! These are the narrow interfaces the guard needs from the server, plus an
//! in-process implementation of them:
//!
//! - [`ProcessUtility`] and [`UtilityCall`]: the hook signature. A hook sees
//!   every utility statement together with the arguments the server passes
//!   along (query text, context, parameters, query environment, destination,
//!   completion record) and either fails or hands the same call on.
//! - [`HookSlot`]: the process-wide extension point holding the current hook.
//! - [`StandardProcessUtility`]: the default execution path, running database
//!   DDL against an in-memory [`Catalog`].
//! - [`Backend`]: one server process tying the above to a [`GucRegistry`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::guc::GucRegistry;
use crate::sql::{self, ParseError};
use crate::statement::UtilityStatement;

// ============================================================================
// Hook interface
// ============================================================================

/// Where a utility statement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessUtilityContext {
    /// Top-level interactive statement.
    #[default]
    TopLevel,
    /// Run from a procedure that allows transaction control.
    QueryNonatomic,
    /// Run from a function or other query.
    Query,
    /// Part of a larger utility statement.
    Subcommand,
}

/// Bound parameter values (`$1`, `$2`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamList {
    pub values: Vec<Option<String>>,
}

/// Query-lifetime environment, such as transition tables visible to triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryEnvironment {
    pub ephemeral_relations: Vec<String>,
}

/// Receiver for messages produced while executing a statement.
pub trait DestReceiver: Send {
    /// A notice for the client.
    fn notice(&mut self, message: &str);
}

impl DestReceiver for Vec<String> {
    fn notice(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDest;

impl DestReceiver for NullDest {
    fn notice(&mut self, _message: &str) {}
}

/// Completion record filled in by whoever executes the statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCompletion {
    /// Command tag, e.g. `DROP DATABASE`.
    pub tag: Option<String>,
    /// Rows processed.
    pub rows: u64,
}

/// Everything a process-utility hook receives.
///
/// A hook that passes a statement on forwards this value as-is, so nothing the
/// hook did not look at can be lost or reordered on the way.
pub struct UtilityCall<'a> {
    pub statement: &'a UtilityStatement,
    pub query_string: &'a str,
    pub context: ProcessUtilityContext,
    pub params: Option<&'a ParamList>,
    pub query_env: Option<&'a QueryEnvironment>,
    pub dest: &'a mut dyn DestReceiver,
    pub completion: &'a mut QueryCompletion,
}

impl fmt::Debug for UtilityCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UtilityCall")
            .field("statement", self.statement)
            .field("query_string", &self.query_string)
            .field("context", &self.context)
            .field("params", &self.params)
            .field("query_env", &self.query_env)
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

/// Error raised while executing a utility statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilityError {
    /// The guard refused to drop a protected database.
    BlockedDrop { dbname: String },
    /// Database does not exist.
    UndefinedDatabase { name: String },
    /// Database already exists.
    DuplicateDatabase { name: String },
    /// Database cannot be dropped or renamed while in use.
    ObjectInUse { message: String },
}

impl UtilityError {
    /// SQLSTATE reported with the error.
    #[must_use]
    pub const fn sqlstate(&self) -> &'static str {
        match self {
            Self::BlockedDrop { .. } => "42501",
            Self::UndefinedDatabase { .. } => "3D000",
            Self::DuplicateDatabase { .. } => "42P04",
            Self::ObjectInUse { .. } => "55006",
        }
    }
}

impl fmt::Display for UtilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockedDrop { dbname } => write!(f, "{dbname} cannot be dropped."),
            Self::UndefinedDatabase { name } => write!(f, "database \"{name}\" does not exist"),
            Self::DuplicateDatabase { name } => write!(f, "database \"{name}\" already exists"),
            Self::ObjectInUse { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for UtilityError {}

/// A process-utility hook, or the standard execution path.
pub trait ProcessUtility: Send + Sync {
    /// Execute (or refuse) the utility statement in `call`.
    ///
    /// # Errors
    ///
    /// Any [`UtilityError`] aborts the statement.
    fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError>;
}

/// The process-utility extension point.
///
/// Holds at most one hook. Installing returns the hook that was there before
/// so the new hook can chain to it and put it back when it is unloaded.
#[derive(Default)]
pub struct HookSlot {
    current: RwLock<Option<Arc<dyn ProcessUtility>>>,
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl HookSlot {
    /// The hook currently installed, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn ProcessUtility>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Install `hook`, returning the previous occupant.
    pub fn install(&self, hook: Arc<dyn ProcessUtility>) -> Option<Arc<dyn ProcessUtility>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(hook)
    }

    /// Put a saved hook (or nothing) back into the slot.
    pub fn restore(&self, previous: Option<Arc<dyn ProcessUtility>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = previous;
    }
}

// ============================================================================
// Standard execution path
// ============================================================================

/// The set of databases in the cluster.
#[derive(Debug, Default)]
pub struct Catalog {
    databases: RwLock<BTreeSet<String>>,
}

impl Catalog {
    #[must_use]
    pub fn new<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            databases: RwLock::new(databases.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Database names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn insert(&self, name: &str) -> bool {
        self.databases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    fn remove(&self, name: &str) -> bool {
        self.databases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

/// Default utility execution: database DDL against the catalog.
#[derive(Debug)]
pub struct StandardProcessUtility {
    catalog: Arc<Catalog>,
    current_database: String,
}

impl StandardProcessUtility {
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, current_database: impl Into<String>) -> Self {
        Self {
            catalog,
            current_database: current_database.into(),
        }
    }

    fn drop_database(
        &self,
        name: &str,
        missing_ok: bool,
        dest: &mut dyn DestReceiver,
    ) -> Result<(), UtilityError> {
        if !self.catalog.contains(name) {
            if missing_ok {
                dest.notice(&format!("database \"{name}\" does not exist, skipping"));
                return Ok(());
            }
            return Err(UtilityError::UndefinedDatabase {
                name: name.to_string(),
            });
        }
        if name == self.current_database {
            return Err(UtilityError::ObjectInUse {
                message: "cannot drop the currently open database".to_string(),
            });
        }
        self.catalog.remove(name);
        Ok(())
    }

    fn rename_database(&self, name: &str, new_name: &str) -> Result<(), UtilityError> {
        if !self.catalog.contains(name) {
            return Err(UtilityError::UndefinedDatabase {
                name: name.to_string(),
            });
        }
        if self.catalog.contains(new_name) {
            return Err(UtilityError::DuplicateDatabase {
                name: new_name.to_string(),
            });
        }
        if name == self.current_database {
            return Err(UtilityError::ObjectInUse {
                message: "current database cannot be renamed".to_string(),
            });
        }
        self.catalog.remove(name);
        self.catalog.insert(new_name);
        Ok(())
    }
}

impl ProcessUtility for StandardProcessUtility {
    fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError> {
        match call.statement {
            UtilityStatement::CreateDatabase { name } => {
                if !self.catalog.insert(name) {
                    return Err(UtilityError::DuplicateDatabase { name: name.clone() });
                }
            }
            UtilityStatement::DropDatabase(drop) => {
                self.drop_database(&drop.name, drop.missing_ok, call.dest)?;
            }
            UtilityStatement::AlterDatabaseRename { name, new_name } => {
                self.rename_database(name, new_name)?;
            }
            // Objects inside databases are not modelled.
            UtilityStatement::DropObjects { .. } | UtilityStatement::Other { .. } => {}
        }
        call.completion.tag = Some(call.statement.command_tag());
        Ok(())
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Failure of one statement submitted through [`Backend::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    Parse(ParseError),
    Utility(UtilityError),
}

impl ExecError {
    #[must_use]
    pub const fn sqlstate(&self) -> &'static str {
        match self {
            Self::Parse(_) => "42601",
            Self::Utility(e) => e.sqlstate(),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Utility(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Utility(e) => Some(e),
        }
    }
}

impl From<ParseError> for ExecError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<UtilityError> for ExecError {
    fn from(e: UtilityError) -> Self {
        Self::Utility(e)
    }
}

/// One server process: configuration, hook slot, and execution path.
#[derive(Debug)]
pub struct Backend {
    gucs: GucRegistry,
    process_utility_hook: HookSlot,
    catalog: Arc<Catalog>,
    standard: Arc<StandardProcessUtility>,
    preload_in_progress: AtomicBool,
}

impl Backend {
    /// Backend over `databases`, connected to `current_database`.
    #[must_use]
    pub fn new<I, S>(databases: I, current_database: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = Arc::new(Catalog::new(databases));
        let standard = Arc::new(StandardProcessUtility::new(
            Arc::clone(&catalog),
            current_database,
        ));
        Self {
            gucs: GucRegistry::new(),
            process_utility_hook: HookSlot::default(),
            catalog,
            standard,
            preload_in_progress: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn gucs(&self) -> &GucRegistry {
        &self.gucs
    }

    #[must_use]
    pub fn process_utility_hook(&self) -> &HookSlot {
        &self.process_utility_hook
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The default execution path, for hooks to fall back on.
    #[must_use]
    pub fn standard_process_utility(&self) -> Arc<dyn ProcessUtility> {
        Arc::clone(&self.standard) as Arc<dyn ProcessUtility>
    }

    /// True while `shared_preload_libraries` are being loaded.
    #[must_use]
    pub fn process_shared_preload_libraries_in_progress(&self) -> bool {
        self.preload_in_progress.load(Ordering::Acquire)
    }

    /// Run `f` with the preload flag raised.
    pub fn with_preload<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.preload_in_progress.store(true, Ordering::Release);
        let result = f(self);
        self.preload_in_progress.store(false, Ordering::Release);
        result
    }

    /// Dispatch one utility call to the installed hook, or the standard path.
    ///
    /// # Errors
    ///
    /// Whatever the hook or the standard path raises.
    pub fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError> {
        match self.process_utility_hook.current() {
            Some(hook) => hook.process_utility(call),
            None => self.standard.process_utility(call),
        }
    }

    /// Parse and run `sql` as top-level statements, in order.
    ///
    /// Stops at the first failing statement; statements before it keep their
    /// effects. Parser notices and execution notices go to `dest`.
    ///
    /// # Errors
    ///
    /// The parse or execution error of the failing statement.
    pub fn execute(
        &self,
        sql: &str,
        dest: &mut dyn DestReceiver,
    ) -> Result<Vec<QueryCompletion>, ExecError> {
        let mut completions = Vec::new();
        for text in sql::split_statements(sql) {
            let parsed = sql::parse_statement(text)?;
            for notice in &parsed.notices {
                dest.notice(notice);
            }
            let mut completion = QueryCompletion::default();
            debug!(statement = %parsed.statement.kind(), "executing utility statement");
            self.process_utility(UtilityCall {
                statement: &parsed.statement,
                query_string: text,
                context: ProcessUtilityContext::TopLevel,
                params: None,
                query_env: None,
                dest: &mut *dest,
                completion: &mut completion,
            })?;
            completions.push(completion);
        }
        Ok(completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn backend() -> Backend {
        Backend::new(["postgres", "template0", "template1", "analytics"], "postgres")
    }

    #[test]
    fn test_standard_create_and_drop() {
        let backend = backend();
        let mut notices = Vec::new();
        let done = backend
            .execute("CREATE DATABASE scratch; DROP DATABASE scratch", &mut notices)
            .expect("execute");
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].tag.as_deref(), Some("CREATE DATABASE"));
        assert_eq!(done[1].tag.as_deref(), Some("DROP DATABASE"));
        assert!(!backend.catalog().contains("scratch"));
    }

    #[test]
    fn test_drop_missing_database() {
        let backend = backend();
        let mut notices = Vec::new();
        let err = backend
            .execute("DROP DATABASE nope", &mut notices)
            .unwrap_err();
        assert_eq!(
            err,
            ExecError::Utility(UtilityError::UndefinedDatabase {
                name: "nope".to_string()
            })
        );
        assert_eq!(err.sqlstate(), "3D000");

        backend
            .execute("DROP DATABASE IF EXISTS nope", &mut notices)
            .expect("if exists");
        assert_eq!(notices, vec!["database \"nope\" does not exist, skipping"]);
    }

    #[test]
    fn test_cannot_drop_current_database() {
        let backend = backend();
        let err = backend
            .execute("DROP DATABASE postgres", &mut NullDest)
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot drop the currently open database");
        assert!(backend.catalog().contains("postgres"));
    }

    #[test]
    fn test_rename_database() {
        let backend = backend();
        backend
            .execute("ALTER DATABASE analytics RENAME TO reporting", &mut NullDest)
            .expect("rename");
        assert!(backend.catalog().contains("reporting"));
        assert!(!backend.catalog().contains("analytics"));
        let err = backend
            .execute("ALTER DATABASE reporting RENAME TO template1", &mut NullDest)
            .unwrap_err();
        assert_eq!(err.sqlstate(), "42P04");
    }

    #[test]
    fn test_execution_stops_at_first_error() {
        let backend = backend();
        let result = backend.execute(
            "CREATE DATABASE a1; DROP DATABASE missing; CREATE DATABASE a2",
            &mut NullDest,
        );
        assert!(result.is_err());
        assert!(backend.catalog().contains("a1"));
        assert!(!backend.catalog().contains("a2"));
    }

    struct Counting {
        seen: Mutex<Vec<String>>,
    }

    impl ProcessUtility for Counting {
        fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError> {
            self.seen
                .lock()
                .unwrap()
                .push(call.query_string.to_string());
            call.completion.tag = Some("COUNTED".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_hook_slot_install_and_restore() {
        let backend = backend();
        assert!(!backend.process_utility_hook().is_installed());

        let hook = Arc::new(Counting {
            seen: Mutex::new(Vec::new()),
        });
        let previous = backend.process_utility_hook().install(hook.clone());
        assert!(previous.is_none());

        let done = backend
            .execute("DROP DATABASE analytics", &mut NullDest)
            .expect("hooked");
        assert_eq!(done[0].tag.as_deref(), Some("COUNTED"));
        assert!(backend.catalog().contains("analytics"));
        assert_eq!(hook.seen.lock().unwrap().len(), 1);

        backend.process_utility_hook().restore(previous);
        assert!(!backend.process_utility_hook().is_installed());
    }

    #[test]
    fn test_with_preload_flag() {
        let backend = backend();
        assert!(!backend.process_shared_preload_libraries_in_progress());
        let during = backend.with_preload(Backend::process_shared_preload_libraries_in_progress);
        assert!(during);
        assert!(!backend.process_shared_preload_libraries_in_progress());
    }

    #[test]
    fn test_error_messages() {
        let blocked = UtilityError::BlockedDrop {
            dbname: "template0".to_string(),
        };
        assert_eq!(blocked.to_string(), "template0 cannot be dropped.");
        assert_eq!(blocked.sqlstate(), "42501");
    }
}
