use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use brandmorph_contracts::strategies::NamedStrategy;
use image::RgbaImage;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use super::{
    CaptionRequest, CaptionStrategy, GenerationStrategy, ImageRequest, ImageStrategy,
    StrategyError,
};
use crate::config::GeminiSettings;

const MISSING_KEY: &str = "GEMINI_API_KEY or GOOGLE_API_KEY not set";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Settings plus one HTTP client shared by every Gemini strategy. The client
/// is built on the first request, so runs with generation disabled never
/// create one.
#[derive(Debug, Default)]
pub struct GeminiBackend {
    settings: GeminiSettings,
    http: OnceLock<HttpClient>,
}

impl GeminiBackend {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            http: OnceLock::new(),
        }
    }

    fn http(&self) -> &HttpClient {
        self.http.get_or_init(HttpClient::new)
    }

    fn post_json(
        &self,
        provider: &str,
        endpoint: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, StrategyError> {
        let api_key = api_key(&self.settings)?;
        post_json(self.http(), provider, endpoint, api_key, payload, timeout).map_err(transport)
    }
}

/// `generateContent` on the v1beta surface. Serves both captions (text parts)
/// and images (`inlineData` parts).
pub struct GeminiContent {
    backend: Arc<GeminiBackend>,
}

impl GeminiContent {
    pub fn new(backend: Arc<GeminiBackend>) -> Self {
        Self { backend }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/{}:generateContent",
            self.backend.settings.api_base,
            model_path(model)
        )
    }
}

impl NamedStrategy for GeminiContent {
    fn name(&self) -> &str {
        "gemini-content"
    }
}

impl GenerationStrategy for GeminiContent {
    fn unavailable_reason(&self) -> Option<String> {
        missing_key(&self.backend.settings)
    }
}

impl CaptionStrategy for GeminiContent {
    fn captions(
        &self,
        request: &CaptionRequest,
        timeout: Duration,
    ) -> Result<Vec<String>, StrategyError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": caption_prompt(request) }],
            }],
            "generationConfig": {
                "temperature": 0.8,
                "maxOutputTokens": 512,
            },
        });
        let endpoint = self.endpoint(&self.backend.settings.caption_model);
        let response = self
            .backend
            .post_json("Gemini", &endpoint, &payload, timeout)?;
        let text = extract_candidate_text(&response)
            .ok_or_else(|| StrategyError::Malformed("no text parts in candidates".to_string()))?;
        Ok(split_caption_lines(&text))
    }
}

impl ImageStrategy for GeminiContent {
    fn image(&self, request: &ImageRequest, timeout: Duration) -> Result<RgbaImage, StrategyError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "1:1" },
            },
        });
        let endpoint = self.endpoint(&self.backend.settings.image_model);
        let response = self
            .backend
            .post_json("Gemini", &endpoint, &payload, timeout)?;
        let images = extract_inline_images(&response).map_err(malformed)?;
        let Some(bytes) = images.into_iter().next() else {
            return Err(StrategyError::Malformed(
                "no inlineData parts in candidates".to_string(),
            ));
        };
        decode_image(&bytes).map_err(malformed)
    }
}

/// Legacy `text-bison` generate endpoint. Captions only; responses come in
/// several shapes so extraction is deliberately loose.
pub struct LegacyText {
    backend: Arc<GeminiBackend>,
}

impl LegacyText {
    pub fn new(backend: Arc<GeminiBackend>) -> Self {
        Self { backend }
    }

    fn endpoint(&self) -> String {
        let settings = &self.backend.settings;
        format!(
            "{}/v1/{}:generate",
            settings.api_base,
            model_path(&settings.legacy_text_model)
        )
    }
}

impl NamedStrategy for LegacyText {
    fn name(&self) -> &str {
        "gemini-legacy-text"
    }
}

impl GenerationStrategy for LegacyText {
    fn unavailable_reason(&self) -> Option<String> {
        missing_key(&self.backend.settings)
    }
}

impl CaptionStrategy for LegacyText {
    fn captions(
        &self,
        request: &CaptionRequest,
        timeout: Duration,
    ) -> Result<Vec<String>, StrategyError> {
        let payload = json!({
            "prompt": { "text": caption_prompt(request) },
            "maxOutputTokens": 512,
            "temperature": 0.8,
        });
        let response =
            self.backend
                .post_json("Gemini legacy", &self.endpoint(), &payload, timeout)?;
        let text = extract_legacy_text(&response)
            .ok_or_else(|| StrategyError::Malformed("no text in legacy response".to_string()))?;
        Ok(split_caption_lines(&text))
    }
}

/// Imagen `:predict`. Images only.
pub struct ImagenPredict {
    backend: Arc<GeminiBackend>,
}

impl ImagenPredict {
    pub fn new(backend: Arc<GeminiBackend>) -> Self {
        Self { backend }
    }

    fn endpoint(&self) -> String {
        let settings = &self.backend.settings;
        format!(
            "{}/v1beta/{}:predict",
            settings.api_base,
            model_path(&settings.imagen_model)
        )
    }
}

impl NamedStrategy for ImagenPredict {
    fn name(&self) -> &str {
        "imagen-predict"
    }
}

impl GenerationStrategy for ImagenPredict {
    fn unavailable_reason(&self) -> Option<String> {
        missing_key(&self.backend.settings)
    }
}

impl ImageStrategy for ImagenPredict {
    fn image(&self, request: &ImageRequest, timeout: Duration) -> Result<RgbaImage, StrategyError> {
        let payload = json!({
            "instances": [{ "prompt": request.prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": "1:1",
            },
        });
        let response = self
            .backend
            .post_json("Imagen", &self.endpoint(), &payload, timeout)?;
        let images = extract_predictions(&response).map_err(malformed)?;
        let Some(bytes) = images.into_iter().next() else {
            return Err(StrategyError::Malformed("no predictions returned".to_string()));
        };
        decode_image(&bytes).map_err(malformed)
    }
}

pub fn caption_prompt(request: &CaptionRequest) -> String {
    format!(
        "You are a senior performance marketer and copywriter. Generate {count} short, punchy \
         marketing captions (4-12 words each) for the product \"{product}\" by the brand \
         \"{brand}\". Vary the angle: benefit, urgency, lifestyle, quality, offer. Return each \
         caption on its own line with no numbering, quotes or commentary.",
        count = request.count,
        product = request.product,
        brand = request.brand,
    )
}

/// Splits model output into candidate lines, stripping list bullets.
pub fn split_caption_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .map(|line| {
            match line.strip_prefix(|ch: char| matches!(ch, '-' | '•' | '*')) {
                Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                    rest.trim_start()
                }
                _ => line,
            }
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Concatenated text parts of the first candidate that has any.
pub fn extract_candidate_text(response: &Value) -> Option<String> {
    let candidates = response.get("candidates").and_then(Value::as_array)?;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array);
        let Some(parts) = parts else {
            continue;
        };
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    None
}

pub fn extract_legacy_text(response: &Value) -> Option<String> {
    let non_empty = |value: Option<&Value>| {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };
    if let Some(first) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    {
        for key in ["output", "content", "text"] {
            if let Some(text) = non_empty(first.get(key)) {
                return Some(text);
            }
        }
        if let Some(text) = extract_candidate_text(response) {
            return Some(text);
        }
    }
    ["output", "text", "content"]
        .into_iter()
        .find_map(|key| non_empty(response.get(key)))
}

pub fn extract_inline_images(response: &Value) -> Result<Vec<Vec<u8>>> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            out.push(
                BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?,
            );
        }
    }
    Ok(out)
}

pub fn extract_predictions(response: &Value) -> Result<Vec<Vec<u8>>> {
    let predictions = response
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for row in predictions {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let encoded = obj
            .get("bytesBase64Encoded")
            .or_else(|| obj.get("bytes_base64_encoded"))
            .or_else(|| {
                obj.get("image")
                    .or_else(|| obj.get("generatedImage"))
                    .and_then(|generated| {
                        generated
                            .get("imageBytes")
                            .or_else(|| generated.get("bytesBase64Encoded"))
                    })
            })
            .and_then(Value::as_str);
        if let Some(encoded) = encoded {
            out.push(
                BASE64
                    .decode(encoded.as_bytes())
                    .context("Imagen image base64 decode failed")?,
            );
        }
    }
    Ok(out)
}

fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes)
        .context("generated image could not be decoded")?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        bail!("generated image has zero dimensions");
    }
    Ok(image)
}

fn post_json(
    http: &HttpClient,
    provider: &str,
    endpoint: &str,
    api_key: &str,
    payload: &Value,
    timeout: Duration,
) -> Result<Value> {
    let response = http
        .post(endpoint)
        .header(API_KEY_HEADER, api_key)
        .timeout(timeout)
        .json(payload)
        .send()
        .with_context(|| format!("{provider} request failed ({endpoint})"))?;
    response_json_or_error(provider, response)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    }
}

fn missing_key(settings: &GeminiSettings) -> Option<String> {
    settings
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .is_none()
        .then(|| MISSING_KEY.to_string())
}

fn api_key(settings: &GeminiSettings) -> Result<&str, StrategyError> {
    settings
        .api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| StrategyError::Unavailable(MISSING_KEY.to_string()))
}

fn transport(err: anyhow::Error) -> StrategyError {
    StrategyError::Transport(error_chain_text(&err, 512))
}

fn malformed(err: anyhow::Error) -> StrategyError {
    StrategyError::Malformed(error_chain_text(&err, 512))
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() || parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
