//! The `DROP DATABASE` guard installed on the process-utility hook.
//!
//! [`DropGuard`] sees every utility statement. A `DROP DATABASE` whose target
//! is on the protect list fails with [`UtilityError::BlockedDrop`]; anything
//! else goes on, unchanged, to the hook that was installed before the guard
//! or to the standard execution path when there was none.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::evaluator::evaluate_statement;
use crate::guc::StringVariable;
use crate::host::{ProcessUtility, UtilityCall, UtilityError};
use crate::logging::DecisionLogger;

/// Process-utility hook that refuses to drop protected databases.
pub struct DropGuard {
    previous: Option<Arc<dyn ProcessUtility>>,
    standard: Arc<dyn ProcessUtility>,
    protect_list: StringVariable,
    logger: Option<Arc<DecisionLogger>>,
}

impl fmt::Debug for DropGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropGuard")
            .field("chains_previous", &self.previous.is_some())
            .field("protect_list", &self.protect_list.get())
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl DropGuard {
    /// Guard reading `protect_list` on every call.
    ///
    /// `previous` is the hook that was installed before this one; `standard`
    /// runs statements when there was none.
    #[must_use]
    pub fn new(
        previous: Option<Arc<dyn ProcessUtility>>,
        standard: Arc<dyn ProcessUtility>,
        protect_list: StringVariable,
    ) -> Self {
        Self {
            previous,
            standard,
            protect_list,
            logger: None,
        }
    }

    /// Also record decisions with `logger`.
    #[must_use]
    pub fn with_logger(mut self, logger: Option<Arc<DecisionLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// The hook this guard chains to, if any.
    #[must_use]
    pub fn previous(&self) -> Option<&Arc<dyn ProcessUtility>> {
        self.previous.as_ref()
    }

    fn next(&self) -> &Arc<dyn ProcessUtility> {
        self.previous.as_ref().unwrap_or(&self.standard)
    }
}

impl ProcessUtility for DropGuard {
    fn process_utility(&self, call: UtilityCall<'_>) -> Result<(), UtilityError> {
        // One snapshot per statement; a reload mid-call cannot split the check.
        let list = self.protect_list.get();
        let result = evaluate_statement(call.statement, &list);

        if let Some(database) = result.database() {
            if let Some(ref logger) = self.logger {
                logger.log(&result, call.statement.kind().as_str(), call.query_string);
            }
            if result.is_denied() {
                let entry = result.matched.as_ref().map_or("", |m| m.label());
                warn!(database, entry, "blocked DROP DATABASE of protected database");
                return Err(UtilityError::BlockedDrop {
                    dbname: database.to_string(),
                });
            }
            debug!(database, "DROP DATABASE target is not protected");
        }

        self.next().process_utility(call)
    }
}
