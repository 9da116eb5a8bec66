//! Server configuration variables.
//!
//! A small model of the server's custom-variable machinery: libraries define
//! qualified string variables (`prefix.name`), values arrive from the
//! configuration file or from session `SET`, and a value set before the
//! defining library loaded is kept as a *placeholder* until the definition
//! adopts it.
//!
//! Variables are shared with their consumers through [`StringVariable`]
//! handles. The registry owns the synchronization; a consumer takes one
//! snapshot per use and never writes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use tracing::{debug, warn};

/// Qualified custom variable name: `prefix.name`, identifier characters only.
static CUSTOM_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)+$")
        .expect("custom variable name regex is valid")
});

/// When a variable may be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GucContext {
    /// Only at server start.
    Postmaster,
    /// Configuration file, applied at start and on reload.
    Sighup,
    /// Also by superusers with `SET`.
    Suset,
    /// Also by any session with `SET`.
    Userset,
}

impl GucContext {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postmaster => "postmaster",
            Self::Sighup => "sighup",
            Self::Suset => "superuser",
            Self::Userset => "user",
        }
    }
}

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GucSource {
    /// Compiled-in default.
    Default,
    /// Configuration file read at server start.
    Startup,
    /// Configuration file re-read on reload.
    Reload,
    /// `SET` in a session.
    Session { superuser: bool },
}

/// Variable flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GucFlags {
    /// Hide from `SHOW ALL`-style listings.
    pub no_show_all: bool,
    /// Value is a secret; `show` masks it.
    pub superuser_only: bool,
}

/// Errors from defining or setting variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GucError {
    /// No such variable, and the name cannot become a placeholder.
    UnrecognizedParameter(String),
    /// Name is not a valid qualified custom variable name.
    InvalidName(String),
    /// A variable with this name is already defined.
    AlreadyDefined(String),
    /// Context forbids changing the variable from this source.
    CantChangeNow(String),
    /// Only superusers may set this variable.
    PermissionDenied(String),
    /// The prefix belongs to a loaded library that defines no such variable.
    ReservedPrefix { name: String, prefix: String },
}

impl fmt::Display for GucError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedParameter(name) => {
                write!(f, "unrecognized configuration parameter \"{name}\"")
            }
            Self::InvalidName(name) => {
                write!(f, "invalid configuration parameter name \"{name}\"")
            }
            Self::AlreadyDefined(name) => {
                write!(f, "attempt to redefine parameter \"{name}\"")
            }
            Self::CantChangeNow(name) => {
                write!(f, "parameter \"{name}\" cannot be changed now")
            }
            Self::PermissionDenied(name) => {
                write!(f, "permission denied to set parameter \"{name}\"")
            }
            Self::ReservedPrefix { name, prefix } => write!(
                f,
                "invalid configuration parameter name \"{name}\": \"{prefix}\" is a reserved prefix"
            ),
        }
    }
}

impl std::error::Error for GucError {}

/// Shared handle to a string variable's current value.
#[derive(Debug, Clone)]
pub struct StringVariable {
    value: Arc<RwLock<String>>,
}

impl StringVariable {
    fn new(value: &str) -> Self {
        Self {
            value: Arc::new(RwLock::new(value.to_string())),
        }
    }

    /// Snapshot of the current value.
    #[must_use]
    pub fn get(&self) -> String {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, value: &str) {
        let mut guard = self.value.write().unwrap_or_else(PoisonError::into_inner);
        *guard = value.to_string();
    }
}

#[derive(Debug)]
struct Definition {
    short_desc: String,
    default: String,
    context: GucContext,
    flags: GucFlags,
    source: GucSource,
    handle: StringVariable,
}

/// Read-only description of a defined variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub short_desc: String,
    pub value: String,
    pub default: String,
    pub context: GucContext,
    pub source: GucSource,
}

#[derive(Debug, Default)]
struct Inner {
    defined: BTreeMap<String, Definition>,
    placeholders: BTreeMap<String, (String, GucSource)>,
    reserved_prefixes: Vec<String>,
}

/// Registry of configuration variables for one server process.
#[derive(Debug, Default)]
pub struct GucRegistry {
    inner: RwLock<Inner>,
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl GucRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a string variable and return its handle.
    ///
    /// A placeholder set earlier for the same name becomes the initial value,
    /// provided the variable's context would have accepted it.
    ///
    /// # Errors
    ///
    /// [`GucError::InvalidName`] for unqualified names, and
    /// [`GucError::AlreadyDefined`] if the name is taken.
    pub fn define_string_variable(
        &self,
        name: &str,
        short_desc: &str,
        default: &str,
        context: GucContext,
        flags: GucFlags,
    ) -> Result<StringVariable, GucError> {
        if !CUSTOM_NAME.is_match(name) {
            return Err(GucError::InvalidName(name.to_string()));
        }
        let key = normalize_name(name);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.defined.contains_key(&key) {
            return Err(GucError::AlreadyDefined(name.to_string()));
        }

        let handle = StringVariable::new(default);
        let mut source = GucSource::Default;
        if let Some((value, placeholder_source)) = inner.placeholders.remove(&key) {
            if check_context(&key, context, placeholder_source).is_ok() {
                handle.set(&value);
                source = placeholder_source;
            } else {
                warn!(parameter = %key, "ignoring placeholder value set from a source this parameter does not accept");
            }
        }

        debug!(parameter = %key, context = context.as_str(), "defined configuration parameter");
        inner.defined.insert(
            key,
            Definition {
                short_desc: short_desc.to_string(),
                default: default.to_string(),
                context,
                flags,
                source,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Handle of an already defined string variable.
    #[must_use]
    pub fn string_variable(&self, name: &str) -> Option<StringVariable> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .defined
            .get(&normalize_name(name))
            .map(|d| d.handle.clone())
    }

    /// Set a variable from `source`.
    ///
    /// # Errors
    ///
    /// Fails when the name is unknown and cannot be a placeholder, the prefix
    /// is reserved, or the variable's context rejects `source`.
    pub fn set_option(&self, name: &str, value: &str, source: GucSource) -> Result<(), GucError> {
        let key = normalize_name(name);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(def) = inner.defined.get_mut(&key) {
            check_context(&key, def.context, source)?;
            def.handle.set(value);
            def.source = source;
            return Ok(());
        }

        if !CUSTOM_NAME.is_match(&key) {
            return Err(GucError::UnrecognizedParameter(name.to_string()));
        }
        if let Some(prefix) = inner
            .reserved_prefixes
            .iter()
            .find(|p| key.starts_with(&format!("{p}.")))
        {
            return Err(GucError::ReservedPrefix {
                name: name.to_string(),
                prefix: prefix.clone(),
            });
        }
        inner.placeholders.insert(key, (value.to_string(), source));
        Ok(())
    }

    /// Reserve `prefix` for a library and drop its stray placeholders.
    ///
    /// Returns the names of the placeholders that were removed; each one is
    /// reported with a warning since it is most likely a misspelling.
    pub fn mark_prefix_reserved(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize_name(prefix);
        let dotted = format!("{prefix}.");
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let stray: Vec<String> = inner
            .placeholders
            .keys()
            .filter(|k| k.starts_with(&dotted))
            .cloned()
            .collect();
        for name in &stray {
            warn!(
                parameter = %name,
                "invalid configuration parameter name \"{name}\", removing it: \"{prefix}\" is now a reserved prefix"
            );
            inner.placeholders.remove(name);
        }
        if !inner.reserved_prefixes.contains(&prefix) {
            inner.reserved_prefixes.push(prefix);
        }
        stray
    }

    /// Re-apply the configuration file.
    ///
    /// `file` maps parameter names to values. Defined variables whose value
    /// came from the file (or the default) take the new file value, or revert
    /// to their default when the file no longer mentions them. Session values
    /// are left alone. Postmaster variables cannot change without a restart.
    pub fn reload(&self, file: &HashMap<String, String>) {
        let file: HashMap<String, &String> =
            file.iter().map(|(k, v)| (normalize_name(k), v)).collect();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (name, def) in &mut inner.defined {
            if matches!(def.source, GucSource::Session { .. }) {
                continue;
            }
            let (target, source) = match file.get(name) {
                Some(value) => (value.as_str(), GucSource::Reload),
                None => (def.default.as_str(), GucSource::Default),
            };
            if def.handle.get() == target {
                continue;
            }
            if def.context == GucContext::Postmaster {
                warn!(parameter = %name, "parameter cannot be changed without restarting the server");
                continue;
            }
            def.handle.set(target);
            def.source = source;
            debug!(parameter = %name, value = %target, "parameter changed on reload");
        }

        let reserved = inner.reserved_prefixes.clone();
        for (name, value) in file {
            if inner.defined.contains_key(&name) || !CUSTOM_NAME.is_match(&name) {
                continue;
            }
            if reserved.iter().any(|p| name.starts_with(&format!("{p}."))) {
                warn!(parameter = %name, "ignoring unrecognized parameter under a reserved prefix");
                continue;
            }
            inner
                .placeholders
                .insert(name, (value.clone(), GucSource::Reload));
        }
    }

    /// Current value as `SHOW` would print it.
    #[must_use]
    pub fn show(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let key = normalize_name(name);
        if let Some(def) = inner.defined.get(&key) {
            if def.flags.superuser_only {
                return Some("********".to_string());
            }
            return Some(def.handle.get());
        }
        inner.placeholders.get(&key).map(|(v, _)| v.clone())
    }

    /// Defined variables, sorted by name, excluding `no_show_all` ones.
    #[must_use]
    pub fn variables(&self) -> Vec<VariableInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .defined
            .iter()
            .filter(|(_, d)| !d.flags.no_show_all)
            .map(|(name, d)| VariableInfo {
                name: name.clone(),
                short_desc: d.short_desc.clone(),
                value: d.handle.get(),
                default: d.default.clone(),
                context: d.context,
                source: d.source,
            })
            .collect()
    }

    /// Names of current placeholders.
    #[must_use]
    pub fn placeholders(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.placeholders.keys().cloned().collect()
    }
}

fn check_context(name: &str, context: GucContext, source: GucSource) -> Result<(), GucError> {
    match (context, source) {
        (_, GucSource::Default | GucSource::Startup)
        | (GucContext::Sighup | GucContext::Suset | GucContext::Userset, GucSource::Reload)
        | (GucContext::Userset, GucSource::Session { .. })
        | (GucContext::Suset, GucSource::Session { superuser: true }) => Ok(()),
        (GucContext::Suset, GucSource::Session { superuser: false }) => {
            Err(GucError::PermissionDenied(name.to_string()))
        }
        (GucContext::Postmaster, GucSource::Reload)
        | (GucContext::Postmaster | GucContext::Sighup, GucSource::Session { .. }) => {
            Err(GucError::CantChangeNow(name.to_string()))
        }
    }
}
