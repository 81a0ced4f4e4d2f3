use std::fmt;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits, RgbaImage};

use crate::error::{PipelineError, PipelineResult};

pub const MAX_INPUT_BYTES: usize = 25 * 1024 * 1024;
pub const MAX_DECODE_SIDE: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole {
    Logo,
    Product,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logo => "logo",
            Self::Product => "product",
        }
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw upload as handed to the pipeline.
#[derive(Debug, Clone)]
pub struct AssetInput {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

impl AssetInput {
    pub fn new(
        bytes: Vec<u8>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            filename: filename.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAsset {
    pub role: AssetRole,
    pub raster: RgbaImage,
    pub source_name: String,
    pub original_width: u32,
    pub original_height: u32,
    pub format: ImageFormat,
    pub warnings: Vec<String>,
}

impl NormalizedAsset {
    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }
}

/// Decodes and bounds one input image. Any problem with the payload is an
/// `InvalidAsset` error; the caller's bytes are only borrowed.
pub fn normalize_asset(
    role: AssetRole,
    input: &AssetInput,
    max_dimension: u32,
) -> PipelineResult<NormalizedAsset> {
    let invalid = |reason: String| PipelineError::invalid_asset(role.as_str(), reason);

    let declared = declared_format(&input.content_type).ok_or_else(|| {
        invalid(format!(
            "unsupported content type '{}' (expected image/png or image/jpeg)",
            input.content_type
        ))
    })?;
    if input.bytes.is_empty() {
        return Err(invalid("empty payload".to_string()));
    }
    if input.bytes.len() > MAX_INPUT_BYTES {
        return Err(invalid(format!(
            "payload is {} bytes, limit is {MAX_INPUT_BYTES}",
            input.bytes.len()
        )));
    }

    let sniffed = image::guess_format(&input.bytes)
        .map_err(|err| invalid(format!("unrecognized image data: {err}")))?;
    if !matches!(sniffed, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(invalid(format!(
            "payload is {sniffed:?}, only PNG and JPEG are accepted"
        )));
    }
    let mut warnings = Vec::new();
    if sniffed != declared {
        warnings.push(format!(
            "declared {} but payload is {sniffed:?}; decoded as {sniffed:?}",
            input.content_type
        ));
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_SIDE);
    limits.max_image_height = Some(MAX_DECODE_SIDE);
    let mut reader = ImageReader::new(Cursor::new(input.bytes.as_slice()));
    reader.set_format(sniffed);
    reader.limits(limits);
    let decoded = reader
        .decode()
        .map_err(|err| invalid(format!("corrupt or truncated {sniffed:?}: {err}")))?;

    let (original_width, original_height) = (decoded.width(), decoded.height());
    if original_width == 0 || original_height == 0 {
        return Err(invalid("image has zero width or height".to_string()));
    }

    Ok(NormalizedAsset {
        role,
        raster: bound_dimensions(decoded, max_dimension),
        source_name: input.filename.clone(),
        original_width,
        original_height,
        format: sniffed,
        warnings,
    })
}

fn declared_format(content_type: &str) -> Option<ImageFormat> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        _ => None,
    }
}

fn bound_dimensions(image: DynamicImage, max_dimension: u32) -> RgbaImage {
    let max_dimension = max_dimension.max(1);
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return image.to_rgba8();
    }
    image
        .resize(max_dimension, max_dimension, FilterType::Lanczos3)
        .to_rgba8()
}
