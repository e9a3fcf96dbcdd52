#![cfg(feature = "server")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use kaleido::server::{ServerState, router};
use kaleido::{
    GeneratedAsset, ImageGenerationModel, ImageGenerationRequest, ImageGenerationResult,
    ImageUpscaleModel, ImageUpscaleRequest, ImageUpscaleResult, KaleidoError, ProviderId,
    ProviderRegistry, Timings, VideoGenerationModel, VideoGenerationRequest,
    VideoGenerationResult,
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

/// Records every call and answers with an asset URL naming the vendor, so
/// tests can tell which adapter actually served a request.
struct StubImageModel {
    name: &'static str,
    calls: Arc<AtomicUsize>,
}

impl StubImageModel {
    fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl ImageGenerationModel for StubImageModel {
    fn provider(&self) -> &str {
        self.name
    }

    async fn generate_image(
        &self,
        request: ImageGenerationRequest,
    ) -> kaleido::Result<ImageGenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageGenerationResult {
            images: vec![GeneratedAsset {
                url: format!("https://{}.test/image-0.png", self.name),
                width: 1024,
                height: 1024,
                content_type: Some("image/png".to_string()),
                file_name: None,
            }],
            prompt: request.prompt,
            seed: request.seed.unwrap_or(7),
            timings: Timings { inference: 0.1 },
            has_nsfw_concepts: vec![false],
            warnings: Vec::new(),
        })
    }
}

struct FailingImageModel {
    error: fn() -> KaleidoError,
}

#[async_trait]
impl ImageGenerationModel for FailingImageModel {
    fn provider(&self) -> &str {
        "failing"
    }

    async fn generate_image(
        &self,
        _request: ImageGenerationRequest,
    ) -> kaleido::Result<ImageGenerationResult> {
        Err((self.error)())
    }
}

struct StubVideoModel {
    name: &'static str,
}

#[async_trait]
impl VideoGenerationModel for StubVideoModel {
    fn provider(&self) -> &str {
        self.name
    }

    async fn generate_video(
        &self,
        request: VideoGenerationRequest,
    ) -> kaleido::Result<VideoGenerationResult> {
        Ok(VideoGenerationResult {
            url: format!("https://{}.test/video-0.mp4", self.name),
            width: 1024,
            height: 576,
            duration: 3.0,
            fps: request.fps.unwrap_or(24),
            prompt: request.prompt,
            seed: request.seed.unwrap_or(7),
            warnings: Vec::new(),
        })
    }
}

struct StubUpscaleModel {
    name: &'static str,
}

#[async_trait]
impl ImageUpscaleModel for StubUpscaleModel {
    fn provider(&self) -> &str {
        self.name
    }

    async fn upscale_image(
        &self,
        _request: ImageUpscaleRequest,
    ) -> kaleido::Result<ImageUpscaleResult> {
        Ok(ImageUpscaleResult {
            image: GeneratedAsset {
                url: format!("https://{}.test/upscaled.png", self.name),
                width: 4096,
                height: 4096,
                content_type: Some("image/png".to_string()),
                file_name: None,
            },
            warnings: Vec::new(),
        })
    }
}

async fn post_json(app: axum::Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn put_json(app: axum::Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let app = router(ServerState::new(ProviderRegistry::builtin()));
    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn empty_prompt_is_rejected_before_any_vendor_call() {
    let (model, calls) = StubImageModel::new("replicate");
    let state =
        ServerState::new(ProviderRegistry::builtin()).with_image_model(ProviderId::Replicate, model);
    let app = router(state);

    for payload in [json!({}), json!({ "prompt": "   " })] {
        let (status, body) = post_json(app.clone(), "/generate-image", payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert!(body["error"].as_str().unwrap().contains("prompt"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_credential_maps_to_configuration_error() {
    // No adapters registered at all: fal has no credential.
    let app = router(ServerState::new(ProviderRegistry::builtin()));

    let (status, body) = post_json(
        app,
        "/generate-image",
        json!({ "prompt": "a red fox in snow", "provider": "fal" }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "configuration_error");
    assert!(body["error"].as_str().unwrap().contains("FAL_KEY"));
}

#[tokio::test]
async fn generates_image_through_the_current_provider() {
    let (model, calls) = StubImageModel::new("replicate");
    let state =
        ServerState::new(ProviderRegistry::builtin()).with_image_model(ProviderId::Replicate, model);
    let app = router(state);

    let (status, body) = post_json(
        app,
        "/generate-image",
        json!({ "prompt": "a red fox in snow", "num_images": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["images"][0]["url"],
        "https://replicate.test/image-0.png"
    );
    assert_eq!(body["prompt"], "a red fox in snow");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn switching_the_current_provider_redirects_subsequent_requests() {
    let (replicate, replicate_calls) = StubImageModel::new("replicate");
    let (fal, fal_calls) = StubImageModel::new("fal");
    let state = ServerState::new(ProviderRegistry::builtin())
        .with_image_model(ProviderId::Replicate, replicate)
        .with_image_model(ProviderId::Fal, fal);
    let app = router(state);

    let payload = json!({ "prompt": "a red fox in snow" });
    let (status, body) = post_json(app.clone(), "/generate-image", payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["images"][0]["url"],
        "https://replicate.test/image-0.png"
    );

    let (status, body) = put_json(
        app.clone(),
        "/providers/current",
        json!({ "provider": "fal" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], "fal");

    let (status, body) = post_json(app, "/generate-image", payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["images"][0]["url"], "https://fal.test/image-0.png");
    assert_eq!(replicate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fal_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn explicit_provider_field_overrides_the_current_selection() {
    let (replicate, replicate_calls) = StubImageModel::new("replicate");
    let (fal, fal_calls) = StubImageModel::new("fal");
    let state = ServerState::new(ProviderRegistry::builtin())
        .with_image_model(ProviderId::Replicate, replicate)
        .with_image_model(ProviderId::Fal, fal);
    let app = router(state.clone());

    let (status, body) = post_json(
        app,
        "/generate-image",
        json!({ "prompt": "a red fox in snow", "provider": "fal" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["images"][0]["url"], "https://fal.test/image-0.png");
    assert_eq!(fal_calls.load(Ordering::SeqCst), 1);
    assert_eq!(replicate_calls.load(Ordering::SeqCst), 0);
    // The per-request override must not move the process-wide selection.
    assert_eq!(state.registry().current(), ProviderId::Replicate);
}

#[tokio::test]
async fn video_on_a_provider_without_video_models_is_a_client_error() {
    let state = ServerState::new(ProviderRegistry::builtin()).with_video_model(
        ProviderId::Replicate,
        StubVideoModel { name: "replicate" },
    );
    let app = router(state);

    let (status, body) = post_json(
        app,
        "/generate-video",
        json!({ "prompt": "waves at dusk", "provider": "google" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("google"));
}

#[tokio::test]
async fn generates_video_and_echoes_request_parameters() {
    let state = ServerState::new(ProviderRegistry::builtin()).with_video_model(
        ProviderId::Replicate,
        StubVideoModel { name: "replicate" },
    );
    let app = router(state);

    let (status, body) = post_json(
        app,
        "/generate-video",
        json!({ "prompt": "waves at dusk", "fps": 12, "seed": 41 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://replicate.test/video-0.mp4");
    assert_eq!(body["fps"], 12);
    assert_eq!(body["seed"], 41);
}

#[tokio::test]
async fn upscales_through_the_registered_adapter() {
    let state = ServerState::new(ProviderRegistry::builtin())
        .with_upscale_model(ProviderId::Fal, StubUpscaleModel { name: "fal" });
    let app = router(state);

    let (status, body) = post_json(
        app,
        "/upscale-image",
        json!({ "image_url": "https://example.test/small.png", "provider": "fal" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image"]["url"], "https://fal.test/upscaled.png");
    assert_eq!(body["image"]["width"], 4096);
}

#[tokio::test]
async fn upscale_on_a_provider_without_upscale_models_is_a_client_error() {
    let state = ServerState::new(ProviderRegistry::builtin())
        .with_upscale_model(ProviderId::Fal, StubUpscaleModel { name: "fal" });
    let app = router(state);

    // Current selection defaults to replicate, which has no upscale models.
    let (status, body) = post_json(
        app,
        "/upscale-image",
        json!({ "image_url": "https://example.test/small.png" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("replicate"));
}

#[tokio::test]
async fn upscale_without_image_url_is_rejected() {
    let app = router(ServerState::new(ProviderRegistry::builtin()));
    let (status, body) = post_json(app, "/upscale-image", json!({ "provider": "fal" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("image_url"));
}

#[tokio::test]
async fn upscale_without_fal_credential_is_a_configuration_error() {
    let app = router(ServerState::new(ProviderRegistry::builtin()));
    let (status, body) = post_json(
        app,
        "/upscale-image",
        json!({ "image_url": "https://example.test/small.png", "provider": "fal" }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "configuration_error");
    assert!(body["error"].as_str().unwrap().contains("FAL_KEY"));
}

#[tokio::test]
async fn vendor_errors_map_onto_the_status_taxonomy() {
    let cases: [(fn() -> KaleidoError, StatusCode, &str); 4] = [
        (
            || KaleidoError::Authentication("invalid token".to_string()),
            StatusCode::UNAUTHORIZED,
            "authentication_error",
        ),
        (
            || KaleidoError::Authorization("billing required".to_string()),
            StatusCode::FORBIDDEN,
            "authorization_error",
        ),
        (
            || KaleidoError::Throttled("slow down".to_string()),
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
        ),
        (
            || KaleidoError::Upstream("boom".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream_error",
        ),
    ];

    for (error, expected_status, expected_code) in cases {
        let state = ServerState::new(ProviderRegistry::builtin())
            .with_image_model(ProviderId::Replicate, FailingImageModel { error });
        let app = router(state);

        let (status, body) =
            post_json(app, "/generate-image", json!({ "prompt": "a red fox" })).await;
        assert_eq!(status, expected_status);
        assert_eq!(body["code"], expected_code);
    }
}

#[tokio::test]
async fn lists_providers_with_the_current_selection() {
    let app = router(ServerState::new(ProviderRegistry::builtin()));
    let (status, body) = get_json(app, "/providers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], "replicate");

    let providers = body["providers"].as_array().unwrap();
    assert_eq!(providers.len(), 3);
    let google = providers
        .iter()
        .find(|p| p["id"] == "google")
        .expect("google listed");
    assert!(google["video_models"].as_array().unwrap().is_empty());
}
