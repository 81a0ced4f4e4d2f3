use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brandmorph_contracts::runs::variant::{
    manifest_line, variant_file_name, variant_name, CaptionSource, VariantDescriptor,
    MANIFEST_FILE_NAME,
};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::captions::CAPTION_COUNT;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct CreativeVariant {
    pub template_id: u8,
    pub raster: RgbaImage,
    pub caption: String,
    pub caption_source: CaptionSource,
}

impl CreativeVariant {
    pub fn name(&self) -> String {
        variant_name(self.template_id)
    }

    pub fn descriptor(&self) -> VariantDescriptor {
        VariantDescriptor {
            name: self.name(),
            template_id: self.template_id,
            caption: self.caption.clone(),
            caption_source: self.caption_source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReceipt {
    pub path: PathBuf,
    /// Entry names in archive order.
    pub entries: Vec<String>,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PackageBuilder {
    jpeg_quality: u8,
}

impl PackageBuilder {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Writes `variant-01.jpg` .. `variant-12.jpg` plus `captions.txt` to
    /// `destination`. The archive only appears once complete; on error
    /// nothing is left at `destination`.
    pub fn build(
        &self,
        variants: &[CreativeVariant],
        destination: &Path,
    ) -> PipelineResult<PackageReceipt> {
        let ordered = check_variants(variants)?;
        self.write_archive(&ordered, destination)
            .map_err(|err| PipelineError::packaging(format!("{err:#}")))
    }

    fn write_archive(
        &self,
        variants: &[&CreativeVariant],
        destination: &Path,
    ) -> Result<PackageReceipt> {
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut staging = NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to stage archive in {}", parent.display()))?;

        let mut entries = Vec::with_capacity(variants.len() + 1);
        {
            let mut zip = ZipWriter::new(staging.as_file_mut());
            for variant in variants {
                let stored =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
                let name = variant_file_name(variant.template_id);
                let jpeg = encode_jpeg(&variant.raster, self.jpeg_quality)
                    .with_context(|| format!("failed to encode {name}"))?;
                zip.start_file(name.as_str(), stored)
                    .with_context(|| format!("failed to add {name}"))?;
                zip.write_all(&jpeg)?;
                entries.push(name);
            }

            let deflated =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file(MANIFEST_FILE_NAME, deflated)
                .context("failed to add caption manifest")?;
            zip.write_all(caption_manifest(variants).as_bytes())?;
            entries.push(MANIFEST_FILE_NAME.to_string());
            zip.finish().context("failed to finalize archive")?;
        }
        staging.as_file().sync_all()?;
        staging
            .persist(destination)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to move archive to {}", destination.display()))?;

        let bytes = fs::read(destination)
            .with_context(|| format!("failed to read back {}", destination.display()))?;
        Ok(PackageReceipt {
            path: destination.to_path_buf(),
            entries,
            size_bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
        })
    }
}

/// Ids exactly 1..=12 once each, one shared non-empty raster size and
/// single-line captions; returns the variants sorted by id.
fn check_variants(variants: &[CreativeVariant]) -> PipelineResult<Vec<&CreativeVariant>> {
    let mut ordered: Vec<&CreativeVariant> = variants.iter().collect();
    ordered.sort_by_key(|variant| variant.template_id);
    for expected in 1..=CAPTION_COUNT as u8 {
        let found = ordered
            .iter()
            .filter(|variant| variant.template_id == expected)
            .count();
        match found {
            1 => {}
            0 => {
                return Err(PipelineError::packaging(format!(
                    "{} is missing",
                    variant_name(expected)
                )))
            }
            _ => {
                return Err(PipelineError::packaging(format!(
                    "{} appears {found} times",
                    variant_name(expected)
                )))
            }
        }
    }
    if let Some(stray) = ordered.iter().find(|variant| {
        variant.template_id == 0 || usize::from(variant.template_id) > CAPTION_COUNT
    }) {
        return Err(PipelineError::packaging(format!(
            "unexpected template id {}",
            stray.template_id
        )));
    }
    let canvas = ordered
        .first()
        .map(|variant| variant.raster.dimensions())
        .unwrap_or_default();
    if canvas.0 == 0 || canvas.1 == 0 {
        return Err(PipelineError::packaging("variant rasters are empty"));
    }
    for variant in &ordered {
        let size = variant.raster.dimensions();
        if size != canvas {
            return Err(PipelineError::packaging(format!(
                "{} is {}x{}, expected {}x{}",
                variant.name(),
                size.0,
                size.1,
                canvas.0,
                canvas.1
            )));
        }
        if variant.caption.trim().is_empty() {
            return Err(PipelineError::packaging(format!(
                "{} has an empty caption",
                variant.name()
            )));
        }
        if variant.caption.contains(['\n', '\r']) {
            return Err(PipelineError::packaging(format!(
                "{} caption spans multiple lines",
                variant.name()
            )));
        }
    }
    Ok(ordered)
}

pub fn caption_manifest(variants: &[&CreativeVariant]) -> String {
    let mut out = String::new();
    for variant in variants {
        out.push_str(&manifest_line(variant.template_id, &variant.caption));
        out.push('\n');
    }
    out
}

fn encode_jpeg(raster: &RgbaImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(raster.clone()).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .context("JPEG encode failed")?;
    Ok(bytes)
}
