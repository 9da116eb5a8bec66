//! Utility statements as the server hands them to process-utility hooks.

use std::fmt;

/// Node tag of a utility statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    CreatedbStmt,
    DropdbStmt,
    RenameStmt,
    DropStmt,
    Other,
}

impl StatementKind {
    /// Name as the server prints node tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatedbStmt => "T_CreatedbStmt",
            Self::DropdbStmt => "T_DropdbStmt",
            Self::RenameStmt => "T_RenameStmt",
            Self::DropStmt => "T_DropStmt",
            Self::Other => "T_Other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `DROP DATABASE [IF EXISTS] name [WITH (FORCE)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropDatabaseStmt {
    /// Target database, already folded/truncated like any identifier.
    pub name: String,
    /// `IF EXISTS` was given.
    pub missing_ok: bool,
    /// `WITH (FORCE)` was given.
    pub force: bool,
}

/// Object types reachable through the generic `DROP` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Table,
    Schema,
    View,
    Index,
    Sequence,
}

impl ObjectType {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::Schema => "SCHEMA",
            Self::View => "VIEW",
            Self::Index => "INDEX",
            Self::Sequence => "SEQUENCE",
        }
    }

    /// Parse an object-type keyword (case-insensitive).
    #[must_use]
    pub fn from_keyword(word: &str) -> Option<Self> {
        [
            Self::Table,
            Self::Schema,
            Self::View,
            Self::Index,
            Self::Sequence,
        ]
        .into_iter()
        .find(|t| t.keyword().eq_ignore_ascii_case(word))
    }
}

/// A utility statement about to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtilityStatement {
    /// `CREATE DATABASE name`.
    CreateDatabase { name: String },
    /// `DROP DATABASE ...`.
    DropDatabase(DropDatabaseStmt),
    /// `ALTER DATABASE name RENAME TO new_name`.
    AlterDatabaseRename { name: String, new_name: String },
    /// `DROP TABLE/SCHEMA/VIEW/INDEX/SEQUENCE ...`.
    DropObjects {
        object_type: ObjectType,
        names: Vec<String>,
        missing_ok: bool,
        cascade: bool,
    },
    /// Any other utility statement, identified only by its command tag.
    Other { tag: String },
}

impl UtilityStatement {
    /// Convenience constructor for a plain `DROP DATABASE name`.
    #[must_use]
    pub fn drop_database(name: impl Into<String>) -> Self {
        Self::DropDatabase(DropDatabaseStmt {
            name: name.into(),
            missing_ok: false,
            force: false,
        })
    }

    /// The node tag of this statement.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        match self {
            Self::CreateDatabase { .. } => StatementKind::CreatedbStmt,
            Self::DropDatabase(_) => StatementKind::DropdbStmt,
            Self::AlterDatabaseRename { .. } => StatementKind::RenameStmt,
            Self::DropObjects { .. } => StatementKind::DropStmt,
            Self::Other { .. } => StatementKind::Other,
        }
    }

    /// Completion tag reported to the client after success.
    #[must_use]
    pub fn command_tag(&self) -> String {
        match self {
            Self::CreateDatabase { .. } => "CREATE DATABASE".to_string(),
            Self::DropDatabase(_) => "DROP DATABASE".to_string(),
            Self::AlterDatabaseRename { .. } => "ALTER DATABASE".to_string(),
            Self::DropObjects { object_type, .. } => format!("DROP {}", object_type.keyword()),
            Self::Other { tag } => tag.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_tag() {
        let stmt = UtilityStatement::drop_database("analytics");
        assert_eq!(stmt.kind(), StatementKind::DropdbStmt);
        assert_eq!(stmt.command_tag(), "DROP DATABASE");

        let stmt = UtilityStatement::DropObjects {
            object_type: ObjectType::Schema,
            names: vec!["public".to_string()],
            missing_ok: false,
            cascade: true,
        };
        assert_eq!(stmt.kind(), StatementKind::DropStmt);
        assert_eq!(stmt.command_tag(), "DROP SCHEMA");
        assert_eq!(stmt.kind().to_string(), "T_DropStmt");
    }

    #[test]
    fn test_object_type_keyword() {
        assert_eq!(ObjectType::from_keyword("table"), Some(ObjectType::Table));
        assert_eq!(ObjectType::from_keyword("Sequence"), Some(ObjectType::Sequence));
        assert_eq!(ObjectType::from_keyword("database"), None);
    }
}
