use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::GoogleConfig;
use crate::image::ImageGenerationModel;
use crate::profile::{Env, build_http_client};
use crate::types::{GeneratedAsset, ImageGenerationRequest, ImageGenerationResult, Timings, Warning};
use crate::utils::params::clamped_u32;
use crate::utils::random_seed;
use crate::{KaleidoError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-preview-06-06";

/// Google Imagen adapter. The predict call is synchronous and returns images
/// as base64 blobs, which are normalized into data URIs so callers see the
/// same asset shape as with the URL-returning vendors.
///
/// Imagen has no video model; this adapter intentionally does not implement
/// `VideoGenerationModel`.
#[derive(Clone)]
pub struct GoogleImagen {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GoogleImagen {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: build_http_client(std::time::Duration::from_secs(300)),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn from_env(env: &Env) -> Result<Self> {
        let api_key = env.require_any(crate::registry::ProviderId::Google.credential_keys())?;
        Ok(Self::new(api_key))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_config(mut self, config: &GoogleConfig) -> Self {
        if let Some(base_url) = config.base_url.as_deref() {
            self = self.with_base_url(base_url);
        }
        if let Some(model) = config.image_model.as_deref() {
            self = self.with_model(model);
        }
        self
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/models/{}:predict",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Debug, Deserialize)]
struct ImagenPrediction {
    #[serde(default, rename = "bytesBase64Encoded")]
    bytes_base64_encoded: Option<String>,
    #[serde(default, rename = "mimeType")]
    mime_type: Option<String>,
}

#[async_trait]
impl ImageGenerationModel for GoogleImagen {
    fn provider(&self) -> &str {
        "google"
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
        let safety_enabled = request.enable_safety_checker.unwrap_or(true);

        let mut parameters = Map::<String, Value>::new();
        parameters.insert(
            "sampleCount".to_string(),
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
        parameters.insert(
            "aspectRatio".to_string(),
            Value::String(size.aspect_ratio().to_string()),
        );
        // Imagen only honors a seed when its safety checker is off.
        match request.seed {
            Some(seed) if !safety_enabled => {
                parameters.insert("seed".to_string(), Value::Number(seed.into()));
            }
            Some(_) => warnings.push(Warning::Compatibility {
                feature: "seed".to_string(),
                details: "imagen ignores the seed while the safety checker is enabled".to_string(),
            }),
            None => {}
        }

        let payload = serde_json::json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": parameters,
        });

        let response = self
            .http
            .post(self.predict_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KaleidoError::from_vendor_status(status, body));
        }

        let parsed = response.json::<PredictResponse>().await?;

        let (width, height) = size.imagen_dimensions();
        let mut images = Vec::<GeneratedAsset>::new();
        for (index, prediction) in parsed.predictions.into_iter().enumerate() {
            let Some(data) = prediction
                .bytes_base64_encoded
                .as_deref()
                .filter(|v| !v.trim().is_empty())
            else {
                warnings.push(Warning::Compatibility {
                    feature: "image.data".to_string(),
                    details: format!("prediction {index} is missing image bytes"),
                });
                continue;
            };
            let mime_type = prediction
                .mime_type
                .unwrap_or_else(|| "image/png".to_string());
            images.push(GeneratedAsset {
                url: format!("data:{mime_type};base64,{data}"),
                width,
                height,
                content_type: Some(mime_type),
                file_name: Some(format!("generated-image-google-{index}.png")),
            });
        }

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
            // Imagen applies safety filtering server-side.
            has_nsfw_concepts: vec![false; count],
            warnings,
        })
    }
}
