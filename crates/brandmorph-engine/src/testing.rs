use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use brandmorph_contracts::strategies::NamedStrategy;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::generation::{
    CaptionRequest, CaptionStrategy, GenerationStrategy, ImageRequest, ImageStrategy,
    StrategyError,
};

pub fn png_bytes(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn jpeg_bytes(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90).encode_image(&DynamicImage::ImageRgb8(rgb))?;
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub enum Script {
    Captions(Vec<&'static str>),
    Image(RgbaImage),
    Fail(&'static str),
    Unavailable(&'static str),
    Sleep(Duration),
    Panic,
}

/// Strategy double that plays back a fixed outcome and counts calls.
#[derive(Debug)]
pub struct ScriptedStrategy {
    name: String,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn shared(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn play(&self) -> Result<Script, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Fail(reason) => Err(StrategyError::Transport(reason.to_string())),
            Script::Sleep(duration) => {
                thread::sleep(*duration);
                Err(StrategyError::Transport("woke up too late".to_string()))
            }
            Script::Panic => panic!("scripted strategy panic"),
            other => Ok(other.clone()),
        }
    }
}

impl NamedStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }
}

impl GenerationStrategy for ScriptedStrategy {
    fn unavailable_reason(&self) -> Option<String> {
        match self.script {
            Script::Unavailable(reason) => Some(reason.to_string()),
            _ => None,
        }
    }
}

impl CaptionStrategy for ScriptedStrategy {
    fn captions(
        &self,
        _request: &CaptionRequest,
        _timeout: Duration,
    ) -> Result<Vec<String>, StrategyError> {
        match self.play()? {
            Script::Captions(lines) => Ok(lines.into_iter().map(str::to_string).collect()),
            _ => Err(StrategyError::Malformed("scripted for images".to_string())),
        }
    }
}

impl ImageStrategy for ScriptedStrategy {
    fn image(&self, _request: &ImageRequest, _timeout: Duration) -> Result<RgbaImage, StrategyError> {
        match self.play()? {
            Script::Image(image) => Ok(image),
            _ => Err(StrategyError::Malformed("scripted for captions".to_string())),
        }
    }
}
