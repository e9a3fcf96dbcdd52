use async_trait::async_trait;

use crate::Result;
use crate::types::{
    ImageGenerationRequest, ImageGenerationResult, ImageUpscaleRequest, ImageUpscaleResult,
};

#[async_trait]
pub trait ImageGenerationModel: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate_image(&self, request: ImageGenerationRequest)
    -> Result<ImageGenerationResult>;
}

#[async_trait]
pub trait ImageUpscaleModel: Send + Sync {
    fn provider(&self) -> &str;

    async fn upscale_image(&self, request: ImageUpscaleRequest) -> Result<ImageUpscaleResult>;
}
