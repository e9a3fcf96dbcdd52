use serde::{Deserialize, Serialize};

/// Abstract size token shared by every provider. Each adapter maps it onto
/// the vendor's own ratio/dimension vocabulary; tokens the vendor does not
/// recognize fall back to square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "square_hd", alias = "square")]
    SquareHd,
    #[serde(rename = "portrait_4_3")]
    Portrait43,
    #[serde(rename = "portrait_16_9")]
    Portrait169,
    #[serde(rename = "landscape_4_3")]
    Landscape43,
    #[serde(rename = "landscape_16_9")]
    Landscape169,
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl ImageSize {
    pub const ALL: [ImageSize; 5] = [
        ImageSize::SquareHd,
        ImageSize::Portrait43,
        ImageSize::Portrait169,
        ImageSize::Landscape43,
        ImageSize::Landscape169,
    ];

    /// Collapses unrecognized tokens to square.
    pub fn normalized(self) -> Self {
        match self {
            ImageSize::Unknown => ImageSize::SquareHd,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self.normalized() {
            ImageSize::SquareHd => "square_hd",
            ImageSize::Portrait43 => "portrait_4_3",
            ImageSize::Portrait169 => "portrait_16_9",
            ImageSize::Landscape43 => "landscape_4_3",
            ImageSize::Landscape169 => "landscape_16_9",
            ImageSize::Unknown => unreachable!("normalized"),
        }
    }

    pub fn aspect_ratio(self) -> &'static str {
        match self.normalized() {
            ImageSize::SquareHd => "1:1",
            ImageSize::Portrait43 => "3:4",
            ImageSize::Portrait169 => "9:16",
            ImageSize::Landscape43 => "4:3",
            ImageSize::Landscape169 => "16:9",
            ImageSize::Unknown => unreachable!("normalized"),
        }
    }

    /// Pixel dimensions used by the FLUX-style providers.
    pub fn flux_dimensions(self) -> (u32, u32) {
        match self.normalized() {
            ImageSize::SquareHd => (1024, 1024),
            ImageSize::Portrait43 => (768, 1024),
            ImageSize::Portrait169 => (576, 1024),
            ImageSize::Landscape43 => (1024, 768),
            ImageSize::Landscape169 => (1024, 576),
            ImageSize::Unknown => unreachable!("normalized"),
        }
    }

    /// Pixel dimensions produced by Google Imagen per aspect ratio.
    pub fn imagen_dimensions(self) -> (u32, u32) {
        match self.normalized() {
            ImageSize::SquareHd => (1024, 1024),
            ImageSize::Portrait43 => (896, 1280),
            ImageSize::Portrait169 => (768, 1408),
            ImageSize::Landscape43 => (1280, 896),
            ImageSize::Landscape169 => (1408, 768),
            ImageSize::Unknown => unreachable!("normalized"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_images: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_safety_checker: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ImageGenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_size: None,
            num_images: None,
            guidance_scale: None,
            num_inference_steps: None,
            enable_safety_checker: None,
            seed: None,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.image_size.unwrap_or_default().normalized()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_inference_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl VideoGenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_url: None,
            video_length: None,
            fps: None,
            guidance_scale: None,
            num_inference_steps: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpscaleRequest {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl ImageUpscaleRequest {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            scale: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUpscaleResult {
    pub image: GeneratedAsset,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// One normalized output. `url` is either a remote URL or a data URI;
/// ownership passes entirely to the caller, nothing is retained server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Timings {
    #[serde(default)]
    pub inference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    pub images: Vec<GeneratedAsset>,
    pub prompt: String,
    pub seed: u64,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub has_nsfw_concepts: Vec<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenerationResult {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    pub fps: u32,
    pub prompt: String,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Warning {
    Unsupported {
        feature: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Clamped {
        parameter: String,
        original: f32,
        clamped_to: f32,
    },
    Compatibility {
        feature: String,
        details: String,
    },
    Other {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mapping_is_total() {
        for size in ImageSize::ALL {
            assert!(!size.aspect_ratio().is_empty());
            let (w, h) = size.flux_dimensions();
            assert!(w > 0 && h > 0);
            let (w, h) = size.imagen_dimensions();
            assert!(w > 0 && h > 0);
        }
    }

    #[test]
    fn unknown_size_token_falls_back_to_square() {
        let parsed: ImageSize = serde_json::from_str("\"hexagonal_9_1\"").expect("parse");
        assert_eq!(parsed.normalized(), ImageSize::SquareHd);
        assert_eq!(parsed.aspect_ratio(), "1:1");
    }

    #[test]
    fn absent_size_defaults_to_square_hd() {
        let request: ImageGenerationRequest =
            serde_json::from_str(r#"{"prompt":"a red fox in snow"}"#).expect("parse");
        assert_eq!(request.size(), ImageSize::SquareHd);
        assert_eq!(request.size().flux_dimensions(), (1024, 1024));
    }

    #[test]
    fn size_tokens_round_trip() {
        for size in ImageSize::ALL {
            let json = serde_json::to_string(&size).expect("serialize");
            assert_eq!(json, format!("\"{}\"", size.as_str()));
            let back: ImageSize = serde_json::from_str(&json).expect("parse");
            assert_eq!(back, size);
        }
    }
}
