mod error;
mod image;
mod profile;
mod video;

pub mod config;
pub mod providers;
pub mod registry;
#[cfg(feature = "server")]
pub mod server;
pub mod types;
pub mod utils;

pub use error::{KaleidoError, Result};
pub use image::{ImageGenerationModel, ImageUpscaleModel};
pub use profile::{Env, parse_dotenv};
pub use video::VideoGenerationModel;

pub use config::{
    FalConfig, GoogleConfig, PollConfig, ProvidersConfig, ReplicateConfig, ServerConfig,
};
pub use registry::{AvailabilityStatus, ProviderDescriptor, ProviderId, ProviderRegistry};
pub use types::{
    GeneratedAsset, ImageGenerationRequest, ImageGenerationResult, ImageSize, ImageUpscaleRequest,
    ImageUpscaleResult, Timings, VideoGenerationRequest, VideoGenerationResult, Warning,
};
pub use utils::poll::PollPolicy;

#[cfg(feature = "provider-fal")]
pub use providers::Fal;
#[cfg(feature = "provider-google")]
pub use providers::GoogleImagen;
#[cfg(feature = "provider-replicate")]
pub use providers::Replicate;
