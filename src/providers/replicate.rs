use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ReplicateConfig;
use crate::image::ImageGenerationModel;
use crate::profile::{Env, build_http_client};
use crate::types::{
    GeneratedAsset, ImageGenerationRequest, ImageGenerationResult, Timings,
    VideoGenerationRequest, VideoGenerationResult, Warning,
};
use crate::utils::params::{clamped_number_from_f32, clamped_u32};
use crate::utils::poll::PollPolicy;
use crate::utils::random_seed;
use crate::video::VideoGenerationModel;
use crate::{KaleidoError, Result};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const DEFAULT_IMAGE_MODEL: &str = "black-forest-labs/flux-schnell";
// Pinned community model versions, overridable through the config file.
const DEFAULT_TEXT_VIDEO_VERSION: &str =
    "9f747673945c62801b13b84701c783929c0ee784e4748ec062204894dda1a351";
const DEFAULT_IMAGE_VIDEO_VERSION: &str =
    "3f0457e4619daac51203dedb1a4918c6ac10a58e9a4493dc92ec1b6e250e9e5f";

/// Replicate predictions adapter. Creating a prediction returns a job that is
/// re-fetched at a fixed interval until its status leaves starting/processing.
#[derive(Clone)]
pub struct Replicate {
    http: reqwest::Client,
    base_url: String,
    token: String,
    image_model: String,
    text_video_version: String,
    image_video_version: String,
    poll: PollPolicy,
}

impl Replicate {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: build_http_client(std::time::Duration::from_secs(300)),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            text_video_version: DEFAULT_TEXT_VIDEO_VERSION.to_string(),
            image_video_version: DEFAULT_IMAGE_VIDEO_VERSION.to_string(),
            poll: PollPolicy::default(),
        }
    }

    pub fn from_env(env: &Env) -> Result<Self> {
        let token = env.require_any(crate::registry::ProviderId::Replicate.credential_keys())?;
        Ok(Self::new(token))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_config(mut self, config: &ReplicateConfig) -> Self {
        if let Some(base_url) = config.base_url.as_deref() {
            self = self.with_base_url(base_url);
        }
        if let Some(model) = config.image_model.as_deref() {
            self = self.with_image_model(model);
        }
        if let Some(version) = config.text_video_version.as_deref() {
            self.text_video_version = version.to_string();
        }
        if let Some(version) = config.image_video_version.as_deref() {
            self.image_video_version = version.to_string();
        }
        self.with_poll_policy(config.poll.policy())
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
    }

    async fn create(&self, url: String, body: Value) -> Result<Prediction> {
        let response = self.apply_auth(self.http.post(url)).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KaleidoError::from_vendor_status(status, body));
        }
        Ok(response.json::<Prediction>().await?)
    }

    async fn create_for_model(&self, input: Map<String, Value>) -> Result<Prediction> {
        let url = format!(
            "{}/v1/models/{}/predictions",
            self.base_url.trim_end_matches('/'),
            self.image_model
        );
        self.create(url, serde_json::json!({ "input": input })).await
    }

    async fn create_for_version(
        &self,
        version: &str,
        input: Map<String, Value>,
    ) -> Result<Prediction> {
        let url = format!("{}/v1/predictions", self.base_url.trim_end_matches('/'));
        self.create(url, serde_json::json!({ "version": version, "input": input }))
            .await
    }

    /// Re-fetches the prediction until it reaches a terminal status and
    /// returns its output. A terminal failure carries the vendor's error
    /// payload, never a partial result.
    async fn wait(&self, prediction: Prediction, what: &str) -> Result<Value> {
        let get_url = prediction.get_url(&self.base_url);

        if let Some(value) = Self::terminal_output(&prediction, what)? {
            return Ok(value);
        }

        self.poll
            .wait_for(what, || {
                let get_url = get_url.clone();
                async move {
                    let response = self.apply_auth(self.http.get(get_url)).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(KaleidoError::from_vendor_status(status, body));
                    }
                    let fetched = response.json::<Prediction>().await?;
                    Self::terminal_output(&fetched, what)
                }
            })
            .await
    }

    fn terminal_output(prediction: &Prediction, what: &str) -> Result<Option<Value>> {
        match prediction.status.as_str() {
            "starting" | "processing" => Ok(None),
            "succeeded" => prediction
                .output
                .clone()
                .map(Some)
                .ok_or_else(|| KaleidoError::Upstream(format!("{what} succeeded without output"))),
            "failed" | "canceled" => Err(KaleidoError::Upstream(format!(
                "{what} failed: {}",
                prediction
                    .error
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| prediction.status.clone())
            ))),
            other => Err(KaleidoError::Upstream(format!(
                "{what} reported unexpected status {other}"
            ))),
        }
    }

    /// Replicate output is a single URL string or an array of them.
    fn coerce_urls(output: Value) -> Result<Vec<String>> {
        let urls = match output {
            Value::String(url) => vec![url],
            Value::Array(values) => values
                .into_iter()
                .filter_map(|value| match value {
                    Value::String(url) => Some(url),
                    _ => None,
                })
                .collect(),
            other => {
                return Err(KaleidoError::Upstream(format!(
                    "unexpected prediction output shape: {other}"
                )));
            }
        };
        Ok(urls
            .into_iter()
            .filter(|url| !url.trim().is_empty())
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

impl Prediction {
    fn get_url(&self, base_url: &str) -> String {
        self.urls
            .as_ref()
            .and_then(|urls| urls.get.clone())
            .unwrap_or_else(|| {
                format!("{}/v1/predictions/{}", base_url.trim_end_matches('/'), self.id)
            })
    }
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

#[async_trait]
impl ImageGenerationModel for Replicate {
    fn provider(&self) -> &str {
        "replicate"
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
            "aspect_ratio".to_string(),
            Value::String(size.aspect_ratio().to_string()),
        );
        input.insert(
            "num_outputs".to_string(),
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
        if let Some(guidance) = clamped_number_from_f32(
            "guidance_scale",
            request.guidance_scale.unwrap_or(3.5),
            1.0,
            20.0,
            &mut warnings,
        ) {
            input.insert("guidance_scale".to_string(), Value::Number(guidance));
        }
        // FLUX Schnell is tuned for 4 steps.
        input.insert(
            "num_inference_steps".to_string(),
            Value::Number(
                clamped_u32(
                    "num_inference_steps",
                    request.num_inference_steps.unwrap_or(4),
                    1,
                    50,
                    &mut warnings,
                )
                .into(),
            ),
        );
        input.insert(
            "disable_safety_checker".to_string(),
            Value::Bool(!request.enable_safety_checker.unwrap_or(true)),
        );
        if let Some(seed) = request.seed {
            input.insert("seed".to_string(), Value::Number(seed.into()));
        }

        let prediction = self.create_for_model(input).await?;
        let output = self.wait(prediction, "replicate image generation").await?;
        let urls = Self::coerce_urls(output)?;

        let (width, height) = size.flux_dimensions();
        let images = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| GeneratedAsset {
                url,
                width,
                height,
                content_type: Some("image/jpeg".to_string()),
                file_name: Some(format!("generated-image-{index}.jpg")),
            })
            .collect::<Vec<_>>();

        if images.is_empty() {
            return Err(KaleidoError::Upstream("no assets produced".to_string()));
        }

        let count = images.len();
        Ok(ImageGenerationResult {
            images,
            prompt: request.prompt,
            seed: request.seed.unwrap_or_else(random_seed),
            timings: Timings {
                inference: started.elapsed().as_secs_f64(),
            },
            has_nsfw_concepts: vec![false; count],
            warnings,
        })
    }
}

#[async_trait]
impl VideoGenerationModel for Replicate {
    fn provider(&self) -> &str {
        "replicate"
    }

    async fn generate_video(
        &self,
        request: VideoGenerationRequest,
    ) -> Result<VideoGenerationResult> {
        if request.prompt.trim().is_empty() {
            return Err(KaleidoError::Validation("prompt is required".to_string()));
        }

        let mut warnings = Vec::<Warning>::new();
        let mut input = Map::<String, Value>::new();

        let fps;
        let version = match request.image_url.as_deref().filter(|v| !v.trim().is_empty()) {
            // Image-to-video through Stable Video Diffusion.
            Some(image_url) => {
                fps = request.fps.unwrap_or(6);
                input.insert("input_image".to_string(), Value::String(image_url.to_string()));
                input.insert(
                    "video_length".to_string(),
                    Value::String("14_frames_with_svd".to_string()),
                );
                input.insert(
                    "sizing_strategy".to_string(),
                    Value::String("maintain_aspect_ratio".to_string()),
                );
                input.insert("frames_per_second".to_string(), Value::Number(fps.into()));
                input.insert("motion_bucket_id".to_string(), Value::Number(127.into()));
                input.insert(
                    "cond_aug".to_string(),
                    Value::Number(serde_json::Number::from_f64(0.02).expect("finite literal")),
                );
                self.image_video_version.as_str()
            }
            // Text-to-video through Zeroscope.
            None => {
                fps = request.fps.unwrap_or(8);
                input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
                input.insert("width".to_string(), Value::Number(1024.into()));
                input.insert("height".to_string(), Value::Number(576.into()));
                input.insert(
                    "num_frames".to_string(),
                    Value::Number(request.video_length.unwrap_or(14).min(24).into()),
                );
                input.insert(
                    "num_inference_steps".to_string(),
                    Value::Number(
                        clamped_u32(
                            "num_inference_steps",
                            request.num_inference_steps.unwrap_or(50),
                            1,
                            50,
                            &mut warnings,
                        )
                        .into(),
                    ),
                );
                if let Some(guidance) = clamped_number_from_f32(
                    "guidance_scale",
                    request.guidance_scale.unwrap_or(17.5),
                    1.0,
                    20.0,
                    &mut warnings,
                ) {
                    input.insert("guidance_scale".to_string(), Value::Number(guidance));
                }
                input.insert("fps".to_string(), Value::Number(fps.into()));
                self.text_video_version.as_str()
            }
        };
        if let Some(seed) = request.seed {
            input.insert("seed".to_string(), Value::Number(seed.into()));
        }

        let prediction = self.create_for_version(version, input).await?;
        let output = self.wait(prediction, "replicate video generation").await?;
        let urls = Self::coerce_urls(output)?;
        let Some(url) = urls.into_iter().next() else {
            return Err(KaleidoError::Upstream("no assets produced".to_string()));
        };

        Ok(VideoGenerationResult {
            url,
            width: 1024,
            height: 576,
            duration: f64::from(request.video_length.unwrap_or(14)),
            fps,
            prompt: request.prompt,
            seed: request.seed.unwrap_or_else(random_seed),
            warnings,
        })
    }
}
