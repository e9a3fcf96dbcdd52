use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::KaleidoError;
use crate::config::ServerConfig;
use crate::image::{ImageGenerationModel, ImageUpscaleModel};
use crate::profile::Env;
use crate::registry::{ProviderDescriptor, ProviderId, ProviderRegistry};
use crate::types::{
    ImageGenerationRequest, ImageGenerationResult, ImageSize, ImageUpscaleRequest,
    ImageUpscaleResult, VideoGenerationRequest, VideoGenerationResult,
};
use crate::video::VideoGenerationModel;

/// Shared handler state: the provider registry plus one adapter instance per
/// vendor whose credential resolved at startup. Adapters are constructed once
/// per process, never per request.
#[derive(Clone)]
pub struct ServerState {
    registry: Arc<ProviderRegistry>,
    image_models: Arc<HashMap<ProviderId, Arc<dyn ImageGenerationModel>>>,
    video_models: Arc<HashMap<ProviderId, Arc<dyn VideoGenerationModel>>>,
    upscale_models: Arc<HashMap<ProviderId, Arc<dyn ImageUpscaleModel>>>,
    json_logs: bool,
}

impl ServerState {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            image_models: Arc::new(HashMap::new()),
            video_models: Arc::new(HashMap::new()),
            upscale_models: Arc::new(HashMap::new()),
            json_logs: false,
        }
    }

    /// Registers every adapter whose credential is present in `env`. A vendor
    /// with no credential simply stays unregistered; requests routed to it
    /// get a configuration error instead of a crash.
    pub fn from_env(registry: ProviderRegistry, env: &Env) -> Self {
        Self::from_env_with_config(registry, env, &ServerConfig::default())
    }

    pub fn from_env_with_config(
        registry: ProviderRegistry,
        env: &Env,
        config: &ServerConfig,
    ) -> Self {
        if let Some(default_provider) = config.default_provider {
            registry.set_current(default_provider);
        }
        let mut state = Self::new(registry);

        #[cfg(feature = "provider-fal")]
        if let Ok(fal) = crate::providers::Fal::from_env(env) {
            let fal = fal.with_config(&config.providers.fal);
            state = state
                .with_image_model(ProviderId::Fal, fal.clone())
                .with_video_model(ProviderId::Fal, fal.clone())
                .with_upscale_model(ProviderId::Fal, fal);
        }

        #[cfg(feature = "provider-replicate")]
        if let Ok(replicate) = crate::providers::Replicate::from_env(env) {
            let replicate = replicate.with_config(&config.providers.replicate);
            state = state
                .with_image_model(ProviderId::Replicate, replicate.clone())
                .with_video_model(ProviderId::Replicate, replicate);
        }

        #[cfg(feature = "provider-google")]
        if let Ok(google) = crate::providers::GoogleImagen::from_env(env) {
            let google = google.with_config(&config.providers.google);
            state = state.with_image_model(ProviderId::Google, google);
        }

        if config.json_logs {
            state = state.with_json_logs();
        }
        state
    }

    pub fn with_image_model(
        mut self,
        id: ProviderId,
        model: impl ImageGenerationModel + 'static,
    ) -> Self {
        let mut models = (*self.image_models).clone();
        models.insert(id, Arc::new(model));
        self.image_models = Arc::new(models);
        self
    }

    pub fn with_video_model(
        mut self,
        id: ProviderId,
        model: impl VideoGenerationModel + 'static,
    ) -> Self {
        let mut models = (*self.video_models).clone();
        models.insert(id, Arc::new(model));
        self.video_models = Arc::new(models);
        self
    }

    pub fn with_upscale_model(
        mut self,
        id: ProviderId,
        model: impl ImageUpscaleModel + 'static,
    ) -> Self {
        let mut models = (*self.upscale_models).clone();
        models.insert(id, Arc::new(model));
        self.upscale_models = Arc::new(models);
        self
    }

    pub fn with_json_logs(mut self) -> Self {
        self.json_logs = true;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate-image", post(generate_image))
        .route("/generate-video", post(generate_video))
        .route("/upscale-image", post(upscale_image))
        .route("/providers", get(list_providers))
        .route("/providers/current", put(set_current_provider))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
    code: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateImageBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    image_size: Option<ImageSize>,
    #[serde(default)]
    num_images: Option<u32>,
    #[serde(default)]
    guidance_scale: Option<f32>,
    #[serde(default)]
    num_inference_steps: Option<u32>,
    #[serde(default)]
    enable_safety_checker: Option<bool>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    provider: Option<ProviderId>,
}

#[derive(Debug, Deserialize)]
struct GenerateVideoBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    video_length: Option<u32>,
    #[serde(default)]
    fps: Option<u32>,
    #[serde(default)]
    guidance_scale: Option<f32>,
    #[serde(default)]
    num_inference_steps: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    provider: Option<ProviderId>,
}

#[derive(Debug, Deserialize)]
struct UpscaleImageBody {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    scale: Option<u32>,
    #[serde(default)]
    provider: Option<ProviderId>,
}

#[derive(Debug, Serialize)]
struct ProvidersResponse {
    providers: Vec<ProviderDescriptor>,
    current: ProviderId,
}

#[derive(Debug, Deserialize)]
struct SetProviderBody {
    provider: ProviderId,
}

#[derive(Debug, Serialize)]
struct SetProviderResponse {
    current: ProviderId,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_providers(State(state): State<ServerState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.registry.descriptors().cloned().collect(),
        current: state.registry.current(),
    })
}

async fn set_current_provider(
    State(state): State<ServerState>,
    Json(body): Json<SetProviderBody>,
) -> Json<SetProviderResponse> {
    state.registry.set_current(body.provider);
    emit_json_log(
        &state,
        "providers.switched",
        serde_json::json!({ "current": body.provider }),
    );
    Json(SetProviderResponse {
        current: body.provider,
    })
}

async fn generate_image(
    State(state): State<ServerState>,
    Json(body): Json<GenerateImageBody>,
) -> Result<Json<ImageGenerationResult>, (StatusCode, Json<ErrorResponse>)> {
    let provider = state.registry.select(body.provider);

    let prompt = body
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "prompt is required",
            )
        })?
        .to_string();

    let Some(model) = state.image_models.get(&provider) else {
        return Err(missing_credential(provider));
    };

    emit_json_log(
        &state,
        "image.request",
        serde_json::json!({ "provider": provider, "prompt_chars": prompt.len() }),
    );

    let request = ImageGenerationRequest {
        prompt,
        image_size: body.image_size,
        num_images: body.num_images,
        guidance_scale: body.guidance_scale,
        num_inference_steps: body.num_inference_steps,
        enable_safety_checker: body.enable_safety_checker,
        seed: body.seed,
    };

    match model.generate_image(request).await {
        Ok(result) => {
            emit_json_log(
                &state,
                "image.response",
                serde_json::json!({ "provider": provider, "assets": result.images.len() }),
            );
            Ok(Json(result))
        }
        Err(err) => {
            emit_json_log(
                &state,
                "image.error",
                serde_json::json!({ "provider": provider, "error": err.to_string() }),
            );
            Err(map_error(err))
        }
    }
}

async fn generate_video(
    State(state): State<ServerState>,
    Json(body): Json<GenerateVideoBody>,
) -> Result<Json<VideoGenerationResult>, (StatusCode, Json<ErrorResponse>)> {
    let provider = state.registry.select(body.provider);

    let prompt = body
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "prompt is required",
            )
        })?
        .to_string();

    let Some(model) = state.video_models.get(&provider) else {
        // Distinguish a vendor that cannot do video from one that merely has
        // no credential configured.
        if !state.registry.descriptor(provider).supports_video() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("video generation is not supported by provider {provider}"),
            ));
        }
        return Err(missing_credential(provider));
    };

    emit_json_log(
        &state,
        "video.request",
        serde_json::json!({ "provider": provider, "prompt_chars": prompt.len() }),
    );

    let request = VideoGenerationRequest {
        prompt,
        image_url: body.image_url,
        video_length: body.video_length,
        fps: body.fps,
        guidance_scale: body.guidance_scale,
        num_inference_steps: body.num_inference_steps,
        seed: body.seed,
    };

    match model.generate_video(request).await {
        Ok(result) => {
            emit_json_log(
                &state,
                "video.response",
                serde_json::json!({ "provider": provider, "url": result.url }),
            );
            Ok(Json(result))
        }
        Err(err) => {
            emit_json_log(
                &state,
                "video.error",
                serde_json::json!({ "provider": provider, "error": err.to_string() }),
            );
            Err(map_error(err))
        }
    }
}

async fn upscale_image(
    State(state): State<ServerState>,
    Json(body): Json<UpscaleImageBody>,
) -> Result<Json<ImageUpscaleResult>, (StatusCode, Json<ErrorResponse>)> {
    let provider = state.registry.select(body.provider);

    let image_url = body
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "image_url is required",
            )
        })?
        .to_string();

    let Some(model) = state.upscale_models.get(&provider) else {
        if !state.registry.descriptor(provider).supports_upscaling() {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("upscaling is not supported by provider {provider}"),
            ));
        }
        return Err(missing_credential(provider));
    };

    emit_json_log(
        &state,
        "upscale.request",
        serde_json::json!({ "provider": provider }),
    );

    let request = ImageUpscaleRequest {
        image_url,
        scale: body.scale,
    };

    match model.upscale_image(request).await {
        Ok(result) => {
            emit_json_log(
                &state,
                "upscale.response",
                serde_json::json!({ "provider": provider, "url": result.image.url }),
            );
            Ok(Json(result))
        }
        Err(err) => {
            emit_json_log(
                &state,
                "upscale.error",
                serde_json::json!({ "provider": provider, "error": err.to_string() }),
            );
            Err(map_error(err))
        }
    }
}

fn missing_credential(provider: ProviderId) -> (StatusCode, Json<ErrorResponse>) {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "configuration_error",
        format!(
            "{provider} credential is not configured (set {})",
            provider.credential_keys().join(" or ")
        ),
    )
}

fn map_error(err: KaleidoError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        KaleidoError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        KaleidoError::Configuration(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
        }
        KaleidoError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
        KaleidoError::Authorization(_) => (StatusCode::FORBIDDEN, "authorization_error"),
        KaleidoError::Throttled(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
    };
    error_response(status, code, err.to_string())
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code,
        }),
    )
}

fn emit_json_log(state: &ServerState, event: &str, payload: serde_json::Value) {
    if !state.json_logs {
        return;
    }

    let record = serde_json::json!({
        "ts_ms": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0),
        "event": event,
        "payload": payload,
    });
    eprintln!("{record}");
}
