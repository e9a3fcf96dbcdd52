use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::FalConfig;
use crate::image::{ImageGenerationModel, ImageUpscaleModel};
use crate::profile::{Env, build_http_client};
use crate::types::{
    GeneratedAsset, ImageGenerationRequest, ImageGenerationResult, ImageUpscaleRequest,
    ImageUpscaleResult, Timings, VideoGenerationRequest, VideoGenerationResult, Warning,
};
use crate::utils::params::{clamped_number_from_f32, clamped_u32};
use crate::utils::poll::PollPolicy;
use crate::utils::random_seed;
use crate::video::VideoGenerationModel;
use crate::{KaleidoError, Result};

const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";
const DEFAULT_IMAGE_MODEL: &str = "fal-ai/flux/dev";
const DEFAULT_TEXT_VIDEO_MODEL: &str = "fal-ai/minimax/video-01";
const DEFAULT_IMAGE_VIDEO_MODEL: &str = "fal-ai/kling-video/v2.1/standard/image-to-video";
const DEFAULT_UPSCALE_MODEL: &str = "fal-ai/esrgan";

/// fal.ai queue adapter. Submission returns a job handle whose status URL is
/// polled until the job leaves the queued/running set; the response URL then
/// yields the vendor payload.
#[derive(Clone)]
pub struct Fal {
    http: reqwest::Client,
    queue_base: String,
    api_key: String,
    image_model: String,
    text_video_model: String,
    image_video_model: String,
    upscale_model: String,
    poll: PollPolicy,
}

impl Fal {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: build_http_client(std::time::Duration::from_secs(300)),
            queue_base: DEFAULT_QUEUE_BASE.to_string(),
            api_key: api_key.into(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_video_model: DEFAULT_TEXT_VIDEO_MODEL.to_string(),
            image_video_model: DEFAULT_IMAGE_VIDEO_MODEL.to_string(),
            upscale_model: DEFAULT_UPSCALE_MODEL.to_string(),
            poll: PollPolicy::default(),
        }
    }

    pub fn from_env(env: &Env) -> Result<Self> {
        let api_key = env.require_any(crate::registry::ProviderId::Fal.credential_keys())?;
        Ok(Self::new(api_key))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_queue_base(mut self, queue_base: impl Into<String>) -> Self {
        self.queue_base = queue_base.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_text_video_model(mut self, model: impl Into<String>) -> Self {
        self.text_video_model = model.into();
        self
    }

    pub fn with_image_video_model(mut self, model: impl Into<String>) -> Self {
        self.image_video_model = model.into();
        self
    }

    pub fn with_upscale_model(mut self, model: impl Into<String>) -> Self {
        self.upscale_model = model.into();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_config(mut self, config: &FalConfig) -> Self {
        if let Some(queue_base) = config.queue_base.as_deref() {
            self = self.with_queue_base(queue_base);
        }
        if let Some(model) = config.image_model.as_deref() {
            self = self.with_image_model(model);
        }
        if let Some(model) = config.text_video_model.as_deref() {
            self = self.with_text_video_model(model);
        }
        if let Some(model) = config.image_video_model.as_deref() {
            self = self.with_image_video_model(model);
        }
        if let Some(model) = config.upscale_model.as_deref() {
            self = self.with_upscale_model(model);
        }
        self.with_poll_policy(config.poll.policy())
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("authorization", format!("Key {}", self.api_key))
    }

    async fn submit(&self, model: &str, input: Map<String, Value>) -> Result<QueuedRequest> {
        let url = format!("{}/{model}", self.queue_base.trim_end_matches('/'));
        let response = self
            .apply_auth(self.http.post(url))
            .json(&Value::Object(input))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KaleidoError::from_vendor_status(status, body));
        }

        Ok(response.json::<QueuedRequest>().await?)
    }

    /// Polls the queued job to completion and fetches the response payload.
    async fn wait(&self, queued: QueuedRequest, what: &str) -> Result<Value> {
        self.poll
            .wait_for(what, || {
                let status_url = queued.status_url.clone();
                async move {
                    let response = self.apply_auth(self.http.get(status_url)).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(KaleidoError::from_vendor_status(status, body));
                    }
                    let parsed = response.json::<QueueStatus>().await?;
                    match parsed.status.as_str() {
                        "IN_QUEUE" | "IN_PROGRESS" => Ok(None),
                        "COMPLETED" => Ok(Some(())),
                        other => Err(KaleidoError::Upstream(format!(
                            "{what} reported terminal status {other}: {}",
                            parsed
                                .error
                                .map(|detail| detail.to_string())
                                .unwrap_or_default()
                        ))),
                    }
                }
            })
            .await?;

        let response = self
            .apply_auth(self.http.get(&queued.response_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KaleidoError::from_vendor_status(status, body));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct QueuedRequest {
    #[allow(dead_code)]
    request_id: String,
    status_url: String,
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FalImagePayload {
    #[serde(default)]
    images: Vec<FalImage>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    timings: Option<Timings>,
    #[serde(default)]
    has_nsfw_concepts: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalUpscalePayload {
    #[serde(default)]
    image: Option<FalImage>,
}

#[derive(Debug, Deserialize)]
struct FalVideoPayload {
    #[serde(default)]
    video: Option<FalVideo>,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FalVideo {
    url: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    fps: Option<u32>,
}

#[async_trait]
impl ImageGenerationModel for Fal {
    fn provider(&self) -> &str {
        "fal"
    }

    async fn generate_image(
        &self,
        request: ImageGenerationRequest,
    ) -> Result<ImageGenerationResult> {
        if request.prompt.trim().is_empty() {
            return Err(KaleidoError::Validation("prompt is required".to_string()));
        }

        let started = Instant::now();
        let mut warnings = Vec::<Warning>::new();
        let size = request.size();

        let mut input = Map::<String, Value>::new();
        input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        input.insert(
            "image_size".to_string(),
            Value::String(size.as_str().to_string()),
        );
        input.insert(
            "num_inference_steps".to_string(),
            Value::Number(
                clamped_u32(
                    "num_inference_steps",
                    request.num_inference_steps.unwrap_or(28),
                    1,
                    50,
                    &mut warnings,
                )
                .into(),
            ),
        );
        if let Some(guidance) = clamped_number_from_f32(
            "guidance_scale",
            request.guidance_scale.unwrap_or(3.5),
            1.0,
            20.0,
            &mut warnings,
        ) {
            input.insert("guidance_scale".to_string(), Value::Number(guidance));
        }
        input.insert(
            "num_images".to_string(),
            Value::Number(
                clamped_u32(
                    "num_images",
                    request.num_images.unwrap_or(1),
                    1,
                    4,
                    &mut warnings,
                )
                .into(),
            ),
        );
        input.insert(
            "enable_safety_checker".to_string(),
            Value::Bool(request.enable_safety_checker.unwrap_or(true)),
        );
        if let Some(seed) = request.seed {
            input.insert("seed".to_string(), Value::Number(seed.into()));
        }

        let queued = self.submit(&self.image_model, input).await?;
        let payload = self.wait(queued, "fal image generation").await?;
        let parsed = serde_json::from_value::<FalImagePayload>(payload)?;

        let (default_width, default_height) = size.flux_dimensions();
        let images = parsed
            .images
            .into_iter()
            .filter(|image| !image.url.trim().is_empty())
            .enumerate()
            .map(|(index, image)| GeneratedAsset {
                url: image.url,
                width: image.width.unwrap_or(default_width),
                height: image.height.unwrap_or(default_height),
                content_type: image.content_type.or(Some("image/jpeg".to_string())),
                file_name: image
                    .file_name
                    .or(Some(format!("generated-image-{index}.jpg"))),
            })
            .collect::<Vec<_>>();

        if images.is_empty() {
            return Err(KaleidoError::Upstream("no assets produced".to_string()));
        }

        let nsfw = if parsed.has_nsfw_concepts.is_empty() {
            vec![false; images.len()]
        } else {
            parsed.has_nsfw_concepts
        };

        Ok(ImageGenerationResult {
            images,
            prompt: request.prompt,
            seed: parsed.seed.or(request.seed).unwrap_or_else(random_seed),
            timings: parsed.timings.unwrap_or(Timings {
                inference: started.elapsed().as_secs_f64(),
            }),
            has_nsfw_concepts: nsfw,
            warnings,
        })
    }
}

#[async_trait]
impl VideoGenerationModel for Fal {
    fn provider(&self) -> &str {
        "fal"
    }

    async fn generate_video(
        &self,
        request: VideoGenerationRequest,
    ) -> Result<VideoGenerationResult> {
        if request.prompt.trim().is_empty() {
            return Err(KaleidoError::Validation("prompt is required".to_string()));
        }

        // Neither MiniMax nor Kling accepts these knobs; flag them instead of
        // silently dropping what the caller asked for.
        let mut warnings = Vec::<Warning>::new();
        for (feature, supplied) in [
            ("video_length", request.video_length.is_some()),
            ("fps", request.fps.is_some()),
            ("guidance_scale", request.guidance_scale.is_some()),
            ("num_inference_steps", request.num_inference_steps.is_some()),
            ("seed", request.seed.is_some()),
        ] {
            if supplied {
                warnings.push(Warning::Unsupported {
                    feature: feature.to_string(),
                    details: None,
                });
            }
        }

        let mut input = Map::<String, Value>::new();
        input.insert("prompt".to_string(), Value::String(request.prompt.clone()));

        // Text-to-video goes through MiniMax; image-to-video through Kling.
        let model = match request.image_url.as_deref().filter(|v| !v.trim().is_empty()) {
            Some(image_url) => {
                input.insert("image_url".to_string(), Value::String(image_url.to_string()));
                input.insert("duration".to_string(), Value::String("5".to_string()));
                input.insert(
                    "cfg_scale".to_string(),
                    Value::Number(
                        serde_json::Number::from_f64(0.5).expect("finite literal"),
                    ),
                );
                input.insert(
                    "negative_prompt".to_string(),
                    Value::String("blur, distort, and low quality".to_string()),
                );
                self.image_video_model.as_str()
            }
            None => {
                input.insert("prompt_optimizer".to_string(), Value::Bool(true));
                self.text_video_model.as_str()
            }
        };

        let queued = self.submit(model, input).await?;
        let payload = self.wait(queued, "fal video generation").await?;
        let parsed = serde_json::from_value::<FalVideoPayload>(payload)?;

        let Some(video) = parsed.video.filter(|video| !video.url.trim().is_empty()) else {
            return Err(KaleidoError::Upstream("no assets produced".to_string()));
        };

        Ok(VideoGenerationResult {
            url: video.url,
            width: video.width.unwrap_or(1024),
            height: video.height.unwrap_or(576),
            duration: video
                .duration
                .unwrap_or(f64::from(request.video_length.unwrap_or(5))),
            fps: video.fps.or(request.fps).unwrap_or(25),
            prompt: request.prompt,
            seed: parsed.seed.or(request.seed).unwrap_or_else(random_seed),
            warnings,
        })
    }
}

#[async_trait]
impl ImageUpscaleModel for Fal {
    fn provider(&self) -> &str {
        "fal"
    }

    async fn upscale_image(&self, request: ImageUpscaleRequest) -> Result<ImageUpscaleResult> {
        if request.image_url.trim().is_empty() {
            return Err(KaleidoError::Validation("image_url is required".to_string()));
        }

        let mut warnings = Vec::<Warning>::new();
        let scale = clamped_u32("scale", request.scale.unwrap_or(4), 1, 4, &mut warnings);

        let mut input = Map::<String, Value>::new();
        input.insert(
            "image_url".to_string(),
            Value::String(request.image_url.clone()),
        );
        input.insert("scale".to_string(), Value::Number(scale.into()));

        let queued = self.submit(&self.upscale_model, input).await?;
        let payload = self.wait(queued, "fal image upscale").await?;
        let parsed = serde_json::from_value::<FalUpscalePayload>(payload)?;

        let Some(image) = parsed.image.filter(|image| !image.url.trim().is_empty()) else {
            return Err(KaleidoError::Upstream("no assets produced".to_string()));
        };

        Ok(ImageUpscaleResult {
            image: GeneratedAsset {
                url: image.url,
                width: image.width.unwrap_or(0),
                height: image.height.unwrap_or(0),
                content_type: image.content_type.or(Some("image/png".to_string())),
                file_name: image.file_name.or(Some("upscaled-image.png".to_string())),
            },
            warnings,
        })
    }
}
