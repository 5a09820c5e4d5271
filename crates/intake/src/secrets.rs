//! Bearer token lookup for the ingestion API and the event relay.
//!
//! The config may name the token three ways, and the first non-empty one wins:
//!
//! 1. **Direct value** - for quick local testing (`"token": "abc"`)
//! 2. **File reference** - for the Docker secrets pattern (`"tokenFile": "/run/secrets/intake"`)
//! 3. **Env var reference** - for production (`"tokenEnvVar": "INTAKE_API_TOKEN"`)
//!
//! When none is named, [`DEFAULT_TOKEN_ENV_VAR`] is read and may be absent, so an
//! unauthenticated local relay needs no config at all.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;

/// Environment variable consulted when the config names no token source.
pub const DEFAULT_TOKEN_ENV_VAR: &str = "INTAKE_API_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// The token sources named by one config block. Empty strings count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSource<'a> {
    pub value: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> TokenSource<'a> {
    fn non_empty(field: Option<&'a str>) -> Option<&'a str> {
        field.filter(|s| !s.is_empty())
    }

    pub fn is_unset(&self) -> bool {
        Self::non_empty(self.value).is_none()
            && Self::non_empty(self.file).is_none()
            && Self::non_empty(self.env_var).is_none()
    }

    /// Resolves the token, falling back to [`DEFAULT_TOKEN_ENV_VAR`] when no
    /// source is named. A named source that cannot be read is an error.
    ///
    /// ```ignore
    /// use intake::secrets::TokenSource;
    ///
    /// let source = TokenSource { file: Some("~/.config/intake/token"), ..Default::default() };
    /// let token = source.resolve()?;
    /// ```
    pub fn resolve(&self) -> Result<Option<SecretString>> {
        if !self.is_unset() {
            return self.resolve_named().map(Some);
        }
        match read_env(DEFAULT_TOKEN_ENV_VAR) {
            Ok(token) => Ok(Some(token)),
            Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolves from the named sources only. File and env values are trimmed.
    pub fn resolve_named(&self) -> Result<SecretString> {
        if let Some(value) = Self::non_empty(self.value) {
            Ok(SecretString::from(value))
        } else if let Some(path) = Self::non_empty(self.file) {
            read_file(path)
        } else if let Some(name) = Self::non_empty(self.env_var) {
            read_env(name)
        } else {
            Err(SecretError::NoSourceProvided)
        }
    }
}

fn read_file(path: &str) -> Result<SecretString> {
    let path = expand_home(path);
    let content = fs::read_to_string(&path).map_err(|source| SecretError::FileReadError {
        path: path.display().to_string(),
        source,
    })?;
    Ok(SecretString::from(content.trim()))
}

fn read_env(name: &str) -> Result<SecretString> {
    match std::env::var(name) {
        Ok(value) => Ok(SecretString::from(value.trim())),
        Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
            name: name.to_string(),
        }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
            name: name.to_string(),
        }),
    }
}

/// `~` and `~/rest` only; `~user/rest` is left alone.
fn expand_home(path: &str) -> PathBuf {
    let home_relative = match path.strip_prefix('~') {
        Some("") => Some(""),
        Some(rest) => rest.strip_prefix('/'),
        None => None,
    };
    match (home_relative, dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
