use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::ProviderId;
use crate::utils::poll::PollPolicy;
use crate::{KaleidoError, Result};

/// Server configuration file (TOML). Vendor endpoints and model identifiers
/// are external configuration; every field falls back to the built-in
/// defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub default_provider: Option<ProviderId>,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl ServerConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|err| KaleidoError::Configuration(format!("invalid config file: {err}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub fal: FalConfig,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FalConfig {
    #[serde(default)]
    pub queue_base: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub text_video_model: Option<String>,
    #[serde(default)]
    pub image_video_model: Option<String>,
    #[serde(default)]
    pub upscale_model: Option<String>,
    #[serde(flatten)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicateConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub text_video_version: Option<String>,
    #[serde(default)]
    pub image_video_version: Option<String>,
    #[serde(flatten)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub poll_max_wait_ms: Option<u64>,
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        let defaults = PollPolicy::default();
        PollPolicy {
            interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            max_wait: self
                .poll_max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_wait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses_to_defaults() -> Result<()> {
        let config = ServerConfig::from_toml("")?;
        assert!(config.listen.is_none());
        assert!(config.default_provider.is_none());
        assert!(!config.json_logs);
        Ok(())
    }

    #[test]
    fn parses_provider_overrides() -> Result<()> {
        let config = ServerConfig::from_toml(
            r#"
listen = "0.0.0.0:9090"
default_provider = "fal"
json_logs = true

[providers.fal]
queue_base = "https://queue.example.test"
image_model = "fal-ai/flux/schnell"
poll_interval_ms = 250

[providers.google]
image_model = "imagen-4.0-generate-001"
"#,
        )?;
        assert_eq!(config.listen.as_deref(), Some("0.0.0.0:9090"));
        assert_eq!(config.default_provider, Some(ProviderId::Fal));
        assert!(config.json_logs);
        assert_eq!(
            config.providers.fal.queue_base.as_deref(),
            Some("https://queue.example.test")
        );
        let policy = config.providers.fal.poll.policy();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_wait, PollPolicy::default().max_wait);
        Ok(())
    }

    #[test]
    fn rejects_unknown_provider_id() {
        let err = ServerConfig::from_toml("default_provider = \"midjourney\"")
            .expect_err("should reject");
        match err {
            KaleidoError::Configuration(message) => {
                assert!(message.contains("invalid config file"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn loads_config_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("kaleido.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:7777\"\n")?;
        let config = ServerConfig::load(&path)?;
        assert_eq!(config.listen.as_deref(), Some("127.0.0.1:7777"));
        Ok(())
    }
}
