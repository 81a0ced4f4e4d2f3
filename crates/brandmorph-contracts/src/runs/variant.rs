use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE_NAME: &str = "captions.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionSource {
    Generated,
    Fallback,
}

impl CaptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::Fallback => "fallback",
        }
    }
}

/// Raster-free view of one packaged variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    pub name: String,
    pub template_id: u8,
    pub caption: String,
    pub caption_source: CaptionSource,
}

pub fn variant_name(template_id: u8) -> String {
    format!("variant-{template_id:02}")
}

pub fn variant_file_name(template_id: u8) -> String {
    format!("{}.jpg", variant_name(template_id))
}

pub fn manifest_line(template_id: u8, caption: &str) -> String {
    format!("{}: {}", variant_name(template_id), caption)
}
