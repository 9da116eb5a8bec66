#![forbid(unsafe_code)]
//! dont_drop_db library.
//!
//! A server-side guard that refuses `DROP DATABASE` for databases named in
//! the `dont_drop_db.list` configuration parameter. Every other statement,
//! and every drop of an unlisted database, passes through untouched.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Configuration                             │
//! │  (env vars → DDD_CONFIG → project → user → system → defaults)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Server (host model + registry)                   │
//! │  shared_preload_libraries → Extension::init → HookSlot           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DropGuard (process-utility hook)              │
//! │  Evaluator: classify statement → Matcher: scan protect list     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ allowed
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        previous hook, or the standard execution path             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use dont_drop_db::config::Config;
//! use dont_drop_db::host::NullDest;
//! use dont_drop_db::server::Server;
//!
//! let server = Server::start(&Config::default()).unwrap();
//! let err = server
//!     .backend()
//!     .execute("DROP DATABASE template0", &mut NullDest)
//!     .unwrap_err();
//! assert_eq!(err.to_string(), "template0 cannot be dropped.");
//! ```

pub mod cli;
pub mod config;
pub mod evaluator;
pub mod extension;
pub mod guc;
pub mod hook;
pub mod host;
pub mod logging;
pub mod matcher;
pub mod server;
pub mod sql;
pub mod statement;

pub use config::Config;
pub use evaluator::{EvaluationDecision, EvaluationResult, evaluate_statement};
pub use extension::{DEFAULT_PROTECT_LIST, EXTENSION_NAME, Extension, LIST_GUC};
pub use hook::DropGuard;
pub use host::{Backend, ExecError, ProcessUtility, UtilityCall, UtilityError};
pub use matcher::{MAX_NAME_LEN, ProtectMatch, find_match, is_protected};
pub use server::{Server, ServerError};
pub use statement::UtilityStatement;
