//! Conditioning descriptors carried by catalog items and jobs.
//!
//! These are stored as JSONB in the database and consumed by the graph
//! injectors in [`crate::graph`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default IP-adapter model file.
pub const DEFAULT_IPADAPTER_MODEL: &str = "ip-adapter_sd15.bin";

/// Default CLIP vision model used by IP-adapter application.
pub const DEFAULT_CLIP_VISION_MODEL: &str = "CLIP-ViT-H-14-laion2B-s32B-b79K.safetensors";

/// Default IP-adapter weight curve.
pub const DEFAULT_WEIGHT_TYPE: &str = "linear";

fn unit_strength() -> f64 {
    1.0
}

fn default_end_at() -> f64 {
    1.0
}

fn default_weight_type() -> String {
    DEFAULT_WEIGHT_TYPE.to_string()
}

fn default_ipadapter_model() -> String {
    DEFAULT_IPADAPTER_MODEL.to_string()
}

fn default_clip_vision_model() -> String {
    DEFAULT_CLIP_VISION_MODEL.to_string()
}

// ---------------------------------------------------------------------------
// LoRA
// ---------------------------------------------------------------------------

/// A LoRA weight file applied on top of the base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSpec {
    /// File name as known to the backend's `loras` folder.
    pub name: String,
    #[serde(default = "unit_strength")]
    pub strength_model: f64,
    /// Ignored by split (model-only) loaders.
    #[serde(default = "unit_strength")]
    pub strength_clip: f64,
}

impl LoraSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strength_model: 1.0,
            strength_clip: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// IP-adapter
// ---------------------------------------------------------------------------

/// An image-adapter reference: a style/identity image applied to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAdapterSpec {
    pub image_file: String,
    #[serde(default = "unit_strength")]
    pub weight: f64,
    #[serde(default = "default_weight_type")]
    pub weight_type: String,
    #[serde(default)]
    pub start_at: f64,
    #[serde(default = "default_end_at")]
    pub end_at: f64,
    #[serde(default = "default_ipadapter_model")]
    pub model_name: String,
    #[serde(default = "default_clip_vision_model")]
    pub clip_vision_model: String,
}

impl IpAdapterSpec {
    pub fn new(image_file: impl Into<String>) -> Self {
        Self {
            image_file: image_file.into(),
            weight: 1.0,
            weight_type: default_weight_type(),
            start_at: 0.0,
            end_at: 1.0,
            model_name: default_ipadapter_model(),
            clip_vision_model: default_clip_vision_model(),
        }
    }
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

/// A pixel rectangle within the generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A named sub-region defined on a layout item.
///
/// Exactly one of `mask_file` and `coordinates` should be set; the region
/// injector rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionArea {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<RegionRect>,
}

/// A keyword-scoped prompt confined to a mask or a rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPrompt {
    pub keyword: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<RegionRect>,
}

impl RegionPrompt {
    /// Attach prompt text to a layout area.
    pub fn from_area(area: &RegionArea, prompt: impl Into<String>) -> Self {
        Self {
            keyword: area.keyword.clone(),
            prompt: prompt.into(),
            mask_file: area.mask_file.clone(),
            coordinates: area.coordinates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lora_strengths_default_to_one() {
        let lora: LoraSpec = serde_json::from_str(r#"{"name":"detail.safetensors"}"#).unwrap();
        assert_eq!(lora, LoraSpec::new("detail.safetensors"));
    }

    #[test]
    fn ipadapter_defaults_fill_missing_fields() {
        let spec: IpAdapterSpec =
            serde_json::from_str(r#"{"image_file":"ref.png","weight":0.6}"#).unwrap();
        assert_eq!(spec.weight, 0.6);
        assert_eq!(spec.weight_type, "linear");
        assert_eq!(spec.end_at, 1.0);
        assert_eq!(spec.model_name, DEFAULT_IPADAPTER_MODEL);
        assert_eq!(spec.clip_vision_model, DEFAULT_CLIP_VISION_MODEL);
    }

    #[test]
    fn region_prompt_copies_area_geometry() {
        let area = RegionArea {
            keyword: "left".into(),
            mask_file: Some("masks/left.png".into()),
            coordinates: None,
        };
        let prompt = RegionPrompt::from_area(&area, "a knight");
        assert_eq!(prompt.keyword, "left");
        assert_eq!(prompt.mask_file.as_deref(), Some("masks/left.png"));
        assert!(prompt.coordinates.is_none());
    }
}
