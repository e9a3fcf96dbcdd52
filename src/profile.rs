use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::{KaleidoError, Result};

/// Process-wide configuration environment: a parsed dotenv file layered over
/// the process environment. Vendor credentials are resolved through this, so
/// tests can inject keys without touching `std::env`.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn from_dotenv_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse_dotenv(&contents))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    /// First non-empty value among `keys`, or a configuration error naming
    /// every key that was tried.
    pub fn require_any(&self, keys: &[&str]) -> Result<String> {
        for key in keys {
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
        }
        Err(KaleidoError::Configuration(format!(
            "missing credential (tried: {})",
            keys.join(", ")
        )))
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value);
    }

    out
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client build should not fail")
}
