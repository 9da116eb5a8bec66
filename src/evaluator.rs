//! Guard evaluation for utility statements.
//!
//! The evaluator is the single place that decides whether a statement may run:
//!
//! 1. **Classification** - only `DROP DATABASE` is of interest; every other
//!    statement is not applicable and is allowed untouched.
//! 2. **Matching** - the target name is checked against the protect list as it
//!    reads right now (see [`crate::matcher`]).
//!
//! # Example
//!
//! ```
//! use dont_drop_db::evaluator::{EvaluationDecision, evaluate_statement};
//! use dont_drop_db::statement::UtilityStatement;
//!
//! let stmt = UtilityStatement::drop_database("template0");
//! let result = evaluate_statement(&stmt, "postgres,template0,template1");
//! assert_eq!(result.decision, EvaluationDecision::Deny);
//! assert_eq!(result.database(), Some("template0"));
//! ```

use crate::matcher::{ProtectMatch, find_match};
use crate::statement::UtilityStatement;

/// The decision made by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationDecision {
    /// Statement may run.
    Allow,
    /// Statement must be rejected.
    Deny,
}

/// Result of evaluating a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    /// The decision (Allow or Deny).
    pub decision: EvaluationDecision,
    /// Target of a `DROP DATABASE`; `None` when the statement is not one.
    pub database: Option<String>,
    /// Entry that protected the database (present when denied).
    pub matched: Option<ProtectMatch>,
}

impl EvaluationResult {
    /// Statement is not a `DROP DATABASE`.
    #[inline]
    #[must_use]
    pub const fn not_applicable() -> Self {
        Self {
            decision: EvaluationDecision::Allow,
            database: None,
            matched: None,
        }
    }

    /// `DROP DATABASE` of an unprotected database.
    #[inline]
    #[must_use]
    pub fn allowed(database: &str) -> Self {
        Self {
            decision: EvaluationDecision::Allow,
            database: Some(database.to_string()),
            matched: None,
        }
    }

    /// `DROP DATABASE` of a protected database.
    #[inline]
    #[must_use]
    pub fn denied(database: &str, matched: ProtectMatch) -> Self {
        Self {
            decision: EvaluationDecision::Deny,
            database: Some(database.to_string()),
            matched: Some(matched),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == EvaluationDecision::Allow
    }

    #[inline]
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.decision == EvaluationDecision::Deny
    }

    /// Whether the statement was a `DROP DATABASE` at all.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        self.database.is_some()
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

/// Target name of a `DROP DATABASE`, or `None` for any other statement.
#[must_use]
pub fn classify_and_extract(stmt: &UtilityStatement) -> Option<&str> {
    match stmt {
        UtilityStatement::DropDatabase(drop) => Some(&drop.name),
        UtilityStatement::CreateDatabase { .. }
        | UtilityStatement::AlterDatabaseRename { .. }
        | UtilityStatement::DropObjects { .. }
        | UtilityStatement::Other { .. } => None,
    }
}

/// Decide whether `stmt` may run under the protect list `list`.
#[must_use]
pub fn evaluate_statement(stmt: &UtilityStatement, list: &str) -> EvaluationResult {
    let Some(database) = classify_and_extract(stmt) else {
        return EvaluationResult::not_applicable();
    };
    match find_match(list, database) {
        Some(matched) => EvaluationResult::denied(database, matched),
        None => EvaluationResult::allowed(database),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{DropDatabaseStmt, ObjectType};

    const DEFAULT_LIST: &str = "postgres,template0,template1";

    #[test]
    fn test_classify_drop_database() {
        let stmt = UtilityStatement::DropDatabase(DropDatabaseStmt {
            name: "analytics_db".to_string(),
            missing_ok: true,
            force: true,
        });
        assert_eq!(classify_and_extract(&stmt), Some("analytics_db"));
    }

    #[test]
    fn test_classify_other_statements() {
        let stmts = [
            UtilityStatement::CreateDatabase {
                name: "postgres".to_string(),
            },
            UtilityStatement::AlterDatabaseRename {
                name: "postgres".to_string(),
                new_name: "old".to_string(),
            },
            UtilityStatement::DropObjects {
                object_type: ObjectType::Schema,
                names: vec!["postgres".to_string()],
                missing_ok: false,
                cascade: true,
            },
            UtilityStatement::Other {
                tag: "VACUUM".to_string(),
            },
        ];
        for stmt in &stmts {
            assert_eq!(classify_and_extract(stmt), None, "{stmt:?}");
            let result = evaluate_statement(stmt, "ALL");
            assert!(result.is_allowed());
            assert!(!result.is_applicable());
        }
    }

    #[test]
    fn test_protected_database_is_denied() {
        let result = evaluate_statement(&UtilityStatement::drop_database("template0"), DEFAULT_LIST);
        assert!(result.is_denied());
        assert_eq!(result.database(), Some("template0"));
        assert_eq!(
            result.matched,
            Some(ProtectMatch::Name("template0".to_string()))
        );
    }

    #[test]
    fn test_unprotected_database_is_allowed() {
        let result =
            evaluate_statement(&UtilityStatement::drop_database("analytics_db"), DEFAULT_LIST);
        assert!(result.is_allowed());
        assert!(result.is_applicable());
        assert_eq!(result.matched, None);
    }

    #[test]
    fn test_all_sentinel_denies_everything() {
        let result = evaluate_statement(&UtilityStatement::drop_database("scratch"), " all ");
        assert!(result.is_denied());
        assert_eq!(result.matched, Some(ProtectMatch::All));
    }

    #[test]
    fn test_empty_list_allows() {
        let result = evaluate_statement(&UtilityStatement::drop_database("postgres"), "");
        assert!(result.is_allowed());
    }
}
