use async_trait::async_trait;

use crate::Result;
use crate::types::{VideoGenerationRequest, VideoGenerationResult};

#[async_trait]
pub trait VideoGenerationModel: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate_video(&self, request: VideoGenerationRequest)
    -> Result<VideoGenerationResult>;
}
