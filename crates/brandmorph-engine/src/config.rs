use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_CAPTION_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_LEGACY_TEXT_MODEL: &str = "text-bison-001";
pub const DEFAULT_MAX_WORKING_DIMENSION: u32 = 2048;
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Capability switches read once when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags {
    pub captions_enabled: bool,
    pub images_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub caption_model: String,
    pub image_model: String,
    pub imagen_model: String,
    pub legacy_text_model: String,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            api_key: None,
            caption_model: DEFAULT_CAPTION_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            imagen_model: DEFAULT_IMAGEN_MODEL.to_string(),
            legacy_text_model: DEFAULT_LEGACY_TEXT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub capabilities: CapabilityFlags,
    pub gemini: GeminiSettings,
    /// Strategy names to try first, in order. Empty keeps the built-in order.
    pub strategy_order: Vec<String>,
    pub attempt_timeout: Duration,
    pub adapter_budget: Duration,
    pub max_working_dimension: u32,
    pub jpeg_quality: u8,
    /// Font used to letter captions; the bundled face when unset.
    pub caption_font: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilityFlags::default(),
            gemini: GeminiSettings::default(),
            strategy_order: Vec::new(),
            attempt_timeout: Duration::from_secs(20),
            adapter_budget: Duration::from_secs(45),
            max_working_dimension: DEFAULT_MAX_WORKING_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            caption_font: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let defaults = Self::default();

        let gemini = GeminiSettings {
            api_base: value("GEMINI_API_BASE")
                .map(|raw| raw.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini.api_base),
            api_key: value("GEMINI_API_KEY").or_else(|| value("GOOGLE_API_KEY")),
            caption_model: value("BRANDMORPH_CAPTION_MODEL")
                .unwrap_or(defaults.gemini.caption_model),
            image_model: value("BRANDMORPH_IMAGE_MODEL").unwrap_or(defaults.gemini.image_model),
            imagen_model: value("BRANDMORPH_IMAGEN_MODEL")
                .unwrap_or(defaults.gemini.imagen_model),
            legacy_text_model: defaults.gemini.legacy_text_model,
        };

        Self {
            capabilities: CapabilityFlags {
                captions_enabled: value("USE_LLM").is_some_and(|raw| parse_flag(&raw)),
                images_enabled: value("USE_IMAGE_API").is_some_and(|raw| parse_flag(&raw)),
            },
            gemini,
            strategy_order: value("BRANDMORPH_STRATEGY_ORDER")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            attempt_timeout: seconds_or(
                value("BRANDMORPH_ATTEMPT_TIMEOUT"),
                defaults.attempt_timeout,
                1.0,
                120.0,
            ),
            adapter_budget: seconds_or(
                value("BRANDMORPH_ADAPTER_BUDGET"),
                defaults.adapter_budget,
                1.0,
                300.0,
            ),
            max_working_dimension: value("BRANDMORPH_MAX_DIMENSION")
                .and_then(|raw| raw.parse::<u32>().ok())
                .map(|dim| dim.clamp(256, 4096))
                .unwrap_or(defaults.max_working_dimension),
            jpeg_quality: defaults.jpeg_quality,
            caption_font: value("BRANDMORPH_FONT").map(PathBuf::from),
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn seconds_or(raw: Option<String>, default: Duration, min: f64, max: f64) -> Duration {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| Duration::from_secs_f64(value.clamp(min, max)))
        .unwrap_or(default)
}
