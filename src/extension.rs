//! Library load and unload.
//!
//! [`Extension::init`] runs when the server loads the library. It only does
//! anything while shared preload libraries are being processed: the guard has
//! to be in place before any session runs a statement, so loading it later
//! (for example on demand in one session) is ignored.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::guc::{GucContext, GucError, GucFlags, StringVariable};
use crate::hook::DropGuard;
use crate::host::{Backend, ProcessUtility};
use crate::logging::DecisionLogger;

/// Library name, also the reserved configuration prefix.
pub const EXTENSION_NAME: &str = "dont_drop_db";

/// The protect list parameter.
pub const LIST_GUC: &str = "dont_drop_db.list";

pub const LIST_GUC_DESCRIPTION: &str = "List of databases that you don't want to drop.";

pub const DEFAULT_PROTECT_LIST: &str = "postgres,template0,template1";

enum State {
    Uninstalled,
    Installed {
        previous: Option<Arc<dyn ProcessUtility>>,
    },
}

/// Load state of the library in one server process.
pub struct Extension {
    state: State,
    logger: Option<Arc<DecisionLogger>>,
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("installed", &self.is_installed())
            .field("logger", &self.logger)
            .finish()
    }
}

impl Default for Extension {
    fn default() -> Self {
        Self::new()
    }
}

impl Extension {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Uninstalled,
            logger: None,
        }
    }

    /// Record guard decisions with `logger` once installed.
    #[must_use]
    pub fn with_logger(mut self, logger: Option<Arc<DecisionLogger>>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub const fn is_installed(&self) -> bool {
        matches!(self.state, State::Installed { .. })
    }

    /// Library entry point.
    ///
    /// Defines the protect list parameter, reserves the `dont_drop_db` prefix
    /// and installs the guard, chaining to whatever hook was installed before.
    /// Outside preload processing, and once installed, this does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GucError`] if the parameter cannot be defined.
    pub fn init(&mut self, backend: &Backend) -> Result<(), GucError> {
        if !backend.process_shared_preload_libraries_in_progress() {
            debug!("not loaded via shared_preload_libraries, guard not installed");
            return Ok(());
        }
        if self.is_installed() {
            return Ok(());
        }

        let list = protect_list_variable(backend)?;
        backend.gucs().mark_prefix_reserved(EXTENSION_NAME);

        let slot = backend.process_utility_hook();
        let previous = slot.current();
        let guard = DropGuard::new(
            previous.clone(),
            backend.standard_process_utility(),
            list,
        )
        .with_logger(self.logger.clone());
        // The slot's old occupant is already saved in `previous`.
        let _ = slot.install(Arc::new(guard));

        info!(
            chained = previous.is_some(),
            "installed DROP DATABASE guard"
        );
        self.state = State::Installed { previous };
        Ok(())
    }

    /// Library unload: put the saved hook back.
    pub fn fini(&mut self, backend: &Backend) {
        match std::mem::replace(&mut self.state, State::Uninstalled) {
            State::Installed { previous } => {
                backend.process_utility_hook().restore(previous);
                info!("removed DROP DATABASE guard");
            }
            State::Uninstalled => {}
        }
    }
}

/// Define the protect list, or reuse it if an earlier load already did.
fn protect_list_variable(backend: &Backend) -> Result<StringVariable, GucError> {
    if let Some(existing) = backend.gucs().string_variable(LIST_GUC) {
        return Ok(existing);
    }
    backend.gucs().define_string_variable(
        LIST_GUC,
        LIST_GUC_DESCRIPTION,
        DEFAULT_PROTECT_LIST,
        GucContext::Sighup,
        GucFlags::default(),
    )
}
