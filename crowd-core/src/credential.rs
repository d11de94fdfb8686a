//! API credential sources.
//!
//! The completion client only ever asks a [`CredentialProvider`] for the key;
//! where the key lives is the provider's concern. Providers are read-only
//! once constructed.

use once_cell::sync::OnceCell;
use std::path::PathBuf;

/// Every well-formed key starts with this.
pub const KEY_PREFIX: &str = "sk-";

/// Shortest key length accepted as well-formed.
pub const MIN_KEY_LEN: usize = 50;

/// Default environment variable holding the key.
pub const DEFAULT_KEY_VAR: &str = "OPENAI_API_KEY";

/// Whether a key has the expected shape (prefix plus minimum length).
pub fn is_valid_key_format(key: &str) -> bool {
    key.starts_with(KEY_PREFIX) && key.len() >= MIN_KEY_LEN
}

/// Source of the bearer credential attached to every completion request.
pub trait CredentialProvider: Send + Sync {
    /// The credential, if one is available.
    fn credential(&self) -> Option<String>;

    /// Whether the available credential has the expected shape.
    fn is_valid_format(&self) -> bool {
        self.credential()
            .map(|key| is_valid_key_format(&key))
            .unwrap_or(false)
    }
}

/// A fixed credential (or none), for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    key: Option<String>,
}

impl StaticCredentialProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
        }
    }

    /// A provider that never yields a credential.
    pub fn empty() -> Self {
        Self { key: None }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self) -> Option<String> {
        self.key.clone()
    }
}

/// Reads the key from an environment variable, falling back to a config
/// file containing an `API_KEY=<key>` line. The first lookup is cached.
#[derive(Debug)]
pub struct EnvCredentialProvider {
    var: String,
    config_path: Option<PathBuf>,
    cached: OnceCell<Option<String>>,
}

impl EnvCredentialProvider {
    /// Look up [`DEFAULT_KEY_VAR`] only.
    pub fn new() -> Self {
        Self::with_var(DEFAULT_KEY_VAR)
    }

    /// Look up a custom environment variable.
    pub fn with_var(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            config_path: None,
            cached: OnceCell::new(),
        }
    }

    /// Also consult this file when the variable is unset.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    fn lookup(&self) -> Option<String> {
        if let Ok(key) = std::env::var(&self.var) {
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Some(key);
            }
        }

        let path = self.config_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(contents) => parse_config_key(&contents),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no credential config file");
                None
            }
        }
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credential(&self) -> Option<String> {
        self.cached.get_or_init(|| self.lookup()).clone()
    }
}

/// Extract the value of the first `API_KEY=` line.
fn parse_config_key(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("API_KEY="))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
