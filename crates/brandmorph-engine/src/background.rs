use std::panic::{self, AssertUnwindSafe};

use image::{Rgba, RgbaImage};

use crate::error::DegradedCapability;

const STAGE: &str = "background removal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoutMethod {
    AlphaChannel,
    BorderFlood,
    Passthrough,
}

impl CutoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlphaChannel => "alpha_channel",
            Self::BorderFlood => "border_flood",
            Self::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cutout {
    pub raster: RgbaImage,
    pub method: CutoutMethod,
    pub confidence: f32,
    pub degraded: Option<DegradedCapability>,
}

/// Rule-based subject isolation. `remove` always returns a usable raster;
/// when separation is not trustworthy the input passes through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundRemover {
    /// Max per-channel distance from the background colour still treated as
    /// background.
    pub tolerance: u8,
    /// Width of the soft edge beyond `tolerance`.
    pub feather: u8,
    pub min_border_uniformity: f32,
    pub min_foreground: f32,
    pub max_foreground: f32,
}

impl Default for BackgroundRemover {
    fn default() -> Self {
        Self {
            tolerance: 28,
            feather: 24,
            min_border_uniformity: 0.85,
            min_foreground: 0.02,
            max_foreground: 0.98,
        }
    }
}

impl BackgroundRemover {
    pub fn remove(&self, product: &RgbaImage) -> Cutout {
        match panic::catch_unwind(AssertUnwindSafe(|| self.separate(product))) {
            Ok(Ok(cutout)) => cutout,
            Ok(Err(degraded)) => passthrough(product, degraded),
            Err(_) => passthrough(
                product,
                DegradedCapability::new(STAGE, "separation heuristic panicked"),
            ),
        }
    }

    fn separate(&self, product: &RgbaImage) -> Result<Cutout, DegradedCapability> {
        let (width, height) = product.dimensions();
        if width < 3 || height < 3 {
            return Err(DegradedCapability::new(
                STAGE,
                format!("{width}x{height} is too small to separate"),
            ));
        }

        let total = (width as usize) * (height as usize);
        let translucent = product.pixels().filter(|pixel| pixel[3] < 250).count();
        if translucent * 100 > total {
            let raster = crop_to_alpha(product).ok_or_else(|| {
                DegradedCapability::new(STAGE, "product is fully transparent")
            })?;
            return Ok(Cutout {
                raster,
                method: CutoutMethod::AlphaChannel,
                confidence: 1.0,
                degraded: None,
            });
        }

        let border = border_indices(width, height);
        let background = border_median(product, &border);
        let uniform = border
            .iter()
            .filter(|(x, y)| distance(product.get_pixel(*x, *y), background) <= self.tolerance)
            .count();
        let uniformity = uniform as f32 / border.len() as f32;
        if uniformity < self.min_border_uniformity {
            return Err(DegradedCapability::new(
                STAGE,
                format!(
                    "border uniformity {uniformity:.2} below {:.2}",
                    self.min_border_uniformity
                ),
            ));
        }

        let flooded = self.flood_background(product, background, &border);
        let background_count = flooded.iter().filter(|is_bg| **is_bg).count();
        let foreground = 1.0 - background_count as f32 / total as f32;
        if foreground < self.min_foreground || foreground > self.max_foreground {
            return Err(DegradedCapability::new(
                STAGE,
                format!("foreground covers {:.1}% of the frame", foreground * 100.0),
            ));
        }

        let mut raster = product.clone();
        for y in 0..height {
            for x in 0..width {
                let idx = (y as usize) * (width as usize) + x as usize;
                let pixel = raster.get_pixel_mut(x, y);
                if flooded[idx] {
                    pixel[3] = 0;
                } else if touches(&flooded, width, height, x, y) {
                    pixel[3] = self.edge_alpha(distance(pixel, background)).min(pixel[3]);
                }
            }
        }

        let raster = crop_to_alpha(&raster).ok_or_else(|| {
            DegradedCapability::new(STAGE, "cutout left no visible pixels")
        })?;
        Ok(Cutout {
            raster,
            method: CutoutMethod::BorderFlood,
            confidence: uniformity,
            degraded: None,
        })
    }

    fn flood_background(
        &self,
        product: &RgbaImage,
        background: [u8; 3],
        border: &[(u32, u32)],
    ) -> Vec<bool> {
        let (width, height) = product.dimensions();
        let mut flooded = vec![false; (width as usize) * (height as usize)];
        let mut stack: Vec<(u32, u32)> = Vec::new();
        let is_background =
            |x: u32, y: u32| distance(product.get_pixel(x, y), background) <= self.tolerance;

        for &(x, y) in border {
            let idx = (y as usize) * (width as usize) + x as usize;
            if !flooded[idx] && is_background(x, y) {
                flooded[idx] = true;
                stack.push((x, y));
            }
        }
        while let Some((x, y)) = stack.pop() {
            for (nx, ny) in neighbours(x, y, width, height) {
                let idx = (ny as usize) * (width as usize) + nx as usize;
                if !flooded[idx] && is_background(nx, ny) {
                    flooded[idx] = true;
                    stack.push((nx, ny));
                }
            }
        }
        flooded
    }

    fn edge_alpha(&self, distance: u8) -> u8 {
        if self.feather == 0 || distance >= self.tolerance.saturating_add(self.feather) {
            return 255;
        }
        let into_band = u32::from(distance.saturating_sub(self.tolerance));
        ((into_band * 255) / u32::from(self.feather)).min(255) as u8
    }
}

fn passthrough(product: &RgbaImage, degraded: DegradedCapability) -> Cutout {
    tracing::warn!(reason = %degraded.reason, "background removal fell back to the original raster");
    Cutout {
        raster: product.clone(),
        method: CutoutMethod::Passthrough,
        confidence: 0.0,
        degraded: Some(degraded),
    }
}

fn distance(pixel: &Rgba<u8>, background: [u8; 3]) -> u8 {
    (0..3)
        .map(|channel| pixel[channel].abs_diff(background[channel]))
        .max()
        .unwrap_or(0)
}

fn border_indices(width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(2 * (width as usize + height as usize));
    for x in 0..width {
        out.push((x, 0));
        out.push((x, height - 1));
    }
    for y in 1..height - 1 {
        out.push((0, y));
        out.push((width - 1, y));
    }
    out
}

fn border_median(product: &RgbaImage, border: &[(u32, u32)]) -> [u8; 3] {
    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for &(x, y) in border {
        let pixel = product.get_pixel(x, y);
        for (channel, values) in channels.iter_mut().enumerate() {
            values.push(pixel[channel]);
        }
    }
    let mut out = [0u8; 3];
    for (channel, values) in channels.iter_mut().enumerate() {
        values.sort_unstable();
        out[channel] = values.get(values.len() / 2).copied().unwrap_or(255);
    }
    out
}

fn neighbours(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let candidates = [
        (x.checked_sub(1), Some(y)),
        (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
        (Some(x), y.checked_sub(1)),
        (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
    ];
    candidates
        .into_iter()
        .filter_map(|(nx, ny)| Some((nx?, ny?)))
}

fn touches(flooded: &[bool], width: u32, height: u32, x: u32, y: u32) -> bool {
    neighbours(x, y, width, height)
        .any(|(nx, ny)| flooded[(ny as usize) * (width as usize) + nx as usize])
}

/// Crops to the bounding box of pixels with any opacity.
fn crop_to_alpha(raster: &RgbaImage) -> Option<RgbaImage> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    for (x, y, pixel) in raster.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    if min_x == u32::MAX {
        return None;
    }
    Some(
        image::imageops::crop_imm(raster, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
            .to_image(),
    )
}
