use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Fal,
    #[default]
    Replicate,
    Google,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Fal, ProviderId::Replicate, ProviderId::Google];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Fal => "fal",
            ProviderId::Replicate => "replicate",
            ProviderId::Google => "google",
        }
    }

    /// Environment keys holding the vendor credential, in lookup order.
    pub fn credential_keys(self) -> &'static [&'static str] {
        match self {
            ProviderId::Fal => &["FAL_KEY"],
            ProviderId::Replicate => &["REPLICATE_API_TOKEN"],
            ProviderId::Google => &["GOOGLE_API_KEY"],
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "fal" => Ok(ProviderId::Fal),
            "replicate" => Ok(ProviderId::Replicate),
            "google" => Ok(ProviderId::Google),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    RequiresCredits,
    Error,
}

/// Static metadata for one vendor, loaded at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: String,
    pub description: String,
    pub status: AvailabilityStatus,
    pub image_models: Vec<String>,
    pub video_models: Vec<String>,
    pub upscale_models: Vec<String>,
}

impl ProviderDescriptor {
    pub fn supports_video(&self) -> bool {
        !self.video_models.is_empty()
    }

    pub fn supports_upscaling(&self) -> bool {
        !self.upscale_models.is_empty()
    }
}

/// Holds the static descriptor table and the process-wide current selection.
/// Call sites may always pass an explicit provider instead; the selection is
/// only the default when one is omitted, and it is lock-guarded so a switch
/// mid-session is observed atomically by subsequent calls.
pub struct ProviderRegistry {
    current: RwLock<ProviderId>,
    descriptors: BTreeMap<ProviderId, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// The built-in vendor table. Replicate is the default selection since it
    /// has a free tier.
    pub fn builtin() -> Self {
        let descriptors = [
            ProviderDescriptor {
                id: ProviderId::Fal,
                display_name: "fal.ai".to_string(),
                description: "High-quality FLUX & MiniMax models".to_string(),
                status: AvailabilityStatus::RequiresCredits,
                image_models: vec!["FLUX.1 [dev]".to_string(), "FLUX.1 [schnell]".to_string()],
                video_models: vec![
                    "MiniMax Video".to_string(),
                    "Kling Video".to_string(),
                    "Stable Video".to_string(),
                ],
                upscale_models: vec!["ESRGAN".to_string()],
            },
            ProviderDescriptor {
                id: ProviderId::Replicate,
                display_name: "Replicate".to_string(),
                description: "Free tier with FLUX Schnell".to_string(),
                status: AvailabilityStatus::Available,
                image_models: vec!["FLUX.1 [schnell]".to_string()],
                video_models: vec![
                    "Zeroscope V2 XL".to_string(),
                    "Stable Video Diffusion".to_string(),
                ],
                upscale_models: Vec::new(),
            },
            ProviderDescriptor {
                id: ProviderId::Google,
                display_name: "Google AI".to_string(),
                description: "Requires billing enabled".to_string(),
                status: AvailabilityStatus::RequiresCredits,
                image_models: vec!["Imagen 4.0".to_string()],
                video_models: Vec::new(),
                upscale_models: Vec::new(),
            },
        ];

        Self {
            current: RwLock::new(ProviderId::default()),
            descriptors: descriptors
                .into_iter()
                .map(|descriptor| (descriptor.id, descriptor))
                .collect(),
        }
    }

    pub fn with_current(self, id: ProviderId) -> Self {
        self.set_current(id);
        self
    }

    pub fn current(&self) -> ProviderId {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Switches the process-wide default, effective for subsequent calls.
    pub fn set_current(&self, id: ProviderId) {
        match self.current.write() {
            Ok(mut guard) => *guard = id,
            Err(poisoned) => *poisoned.into_inner() = id,
        }
    }

    /// Resolves the provider for one call: the explicit id when given,
    /// otherwise the current selection read at call time.
    pub fn select(&self, explicit: Option<ProviderId>) -> ProviderId {
        explicit.unwrap_or_else(|| self.current())
    }

    pub fn descriptor(&self, id: ProviderId) -> &ProviderDescriptor {
        self.descriptors
            .get(&id)
            .expect("descriptor table covers every provider id")
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.values()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
