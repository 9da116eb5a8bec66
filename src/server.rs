//! Server lifecycle: start, reload, shutdown.
//!
//! [`Server::start`] builds a [`Backend`] from the `[cluster]` table, hands
//! the `[settings]` table to the parameter registry as configuration-file
//! values, and loads `shared_preload_libraries` in order.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::extension::{EXTENSION_NAME, Extension};
use crate::guc::{GucError, GucSource};
use crate::host::Backend;
use crate::logging::DecisionLogger;

/// Errors from starting or reloading the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// A configuration value was rejected.
    Guc(GucError),
    /// `shared_preload_libraries` names a library that does not exist.
    UnknownLibrary(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guc(e) => write!(f, "{e}"),
            Self::UnknownLibrary(name) => {
                write!(f, "could not access file \"{name}\": No such file or directory")
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Guc(e) => Some(e),
            Self::UnknownLibrary(_) => None,
        }
    }
}

impl From<GucError> for ServerError {
    fn from(e: GucError) -> Self {
        Self::Guc(e)
    }
}

/// A running server: one backend plus its loaded libraries.
#[derive(Debug)]
pub struct Server {
    backend: Backend,
    libraries: Vec<Extension>,
}

impl Server {
    /// Start a server from `config`.
    ///
    /// # Errors
    ///
    /// Fails when a setting is rejected or a preload library is unknown.
    pub fn start(config: &Config) -> Result<Self, ServerError> {
        let backend = Backend::new(
            config.cluster.databases.iter().cloned(),
            &config.cluster.current_database,
        );
        for (name, value) in &config.settings {
            backend.gucs().set_option(name, value, GucSource::Startup)?;
        }

        let logger = DecisionLogger::new(&config.logging).map(Arc::new);
        let mut libraries = Vec::new();
        backend.with_preload(|b| -> Result<(), ServerError> {
            for name in &config.cluster.shared_preload_libraries {
                if name.trim() != EXTENSION_NAME {
                    return Err(ServerError::UnknownLibrary(name.clone()));
                }
                let mut extension = Extension::new().with_logger(logger.clone());
                extension.init(b)?;
                debug!(library = %name, "loaded preload library");
                libraries.push(extension);
            }
            Ok(())
        })?;

        info!(
            databases = config.cluster.databases.len(),
            libraries = libraries.len(),
            "server started"
        );
        Ok(Self { backend, libraries })
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Re-read `[settings]` from `config`, as on SIGHUP.
    pub fn reload(&self, config: &Config) {
        self.backend.gucs().reload(&config.settings_map());
        info!("configuration reloaded");
    }

    /// Unload libraries in reverse load order.
    pub fn shutdown(mut self) -> Backend {
        while let Some(mut extension) = self.libraries.pop() {
            extension.fini(&self.backend);
        }
        info!("server shut down");
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::LIST_GUC;
    use crate::host::NullDest;

    fn config(toml_text: &str) -> Config {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_start_with_defaults_installs_guard() {
        let server = Server::start(&Config::default()).unwrap();
        assert!(server.backend().process_utility_hook().is_installed());
        let err = server
            .backend()
            .execute("DROP DATABASE template1", &mut NullDest)
            .unwrap_err();
        assert_eq!(err.to_string(), "template1 cannot be dropped.");
    }

    #[test]
    fn test_start_without_preload_leaves_drops_unguarded() {
        let server = Server::start(&config(
            r#"
[cluster]
shared_preload_libraries = []
"#,
        ))
        .unwrap();
        assert!(!server.backend().process_utility_hook().is_installed());
        server
            .backend()
            .execute("DROP DATABASE template1", &mut NullDest)
            .unwrap();
    }

    #[test]
    fn test_unknown_library() {
        let err = Server::start(&config(
            r#"
[cluster]
shared_preload_libraries = ["dont_drop_db", "pg_missing"]
"#,
        ))
        .unwrap_err();
        assert_eq!(err, ServerError::UnknownLibrary("pg_missing".to_string()));
    }

    #[test]
    fn test_settings_reach_the_guard_and_reload() {
        let mut cfg = config(
            r#"
[settings]
"dont_drop_db.list" = "analytics"

[cluster]
databases = ["postgres", "analytics", "scratch"]
"#,
        );
        let server = Server::start(&cfg).unwrap();
        let backend = server.backend();
        assert_eq!(backend.gucs().show(LIST_GUC).as_deref(), Some("analytics"));
        assert!(backend.execute("DROP DATABASE analytics", &mut NullDest).is_err());

        cfg.settings.insert(LIST_GUC.to_string(), "scratch".to_string());
        server.reload(&cfg);
        assert!(backend.execute("DROP DATABASE scratch", &mut NullDest).is_err());
        backend
            .execute("DROP DATABASE analytics", &mut NullDest)
            .unwrap();

        cfg.settings.clear();
        server.reload(&cfg);
        assert_eq!(
            backend.gucs().show(LIST_GUC).as_deref(),
            Some("postgres,template0,template1")
        );
        backend.execute("DROP DATABASE scratch", &mut NullDest).unwrap();
    }

    #[test]
    fn test_shutdown_removes_guard() {
        let server = Server::start(&Config::default()).unwrap();
        let backend = server.shutdown();
        assert!(!backend.process_utility_hook().is_installed());
        backend
            .execute("DROP DATABASE template1", &mut NullDest)
            .unwrap();
    }
}
