use brandmorph_contracts::templates::{
    BackgroundStyle, CaptionPlate, Rect, Rgb, Shadow, Template, TemplateRegistry,
};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use sha2::{Digest, Sha256};

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;
const LOGO_PLATE_ALPHA: u8 = 220;
const LOGO_PLATE_RADIUS: u32 = 14;
const SHADOW_DOWNSCALE: u32 = 4;
pub const MIN_PRODUCT_SIDE: u32 = 240;
const MAX_PRODUCT_SIDE: u32 = 2400;
const SATURATION_PCT: i32 = 105;
const CONTRAST: f32 = 8.0;
const BRIGHTEN: i32 = 5;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;

#[derive(Debug, Clone)]
pub struct ComposedVariant {
    pub template_id: u8,
    pub raster: RgbaImage,
}

/// Renders templates against one run's assets. Pure function of its inputs:
/// no randomness, fixed filters, fixed z-order.
#[derive(Debug, Clone, Copy)]
pub struct LayoutComposer<'a> {
    templates: &'a TemplateRegistry,
}

impl<'a> LayoutComposer<'a> {
    pub fn new(templates: &'a TemplateRegistry) -> Self {
        Self { templates }
    }

    /// One raster per template, ordered by template id. The product is
    /// prepared once and shared by every template.
    pub fn compose_all(
        &self,
        logo: &RgbaImage,
        product: &RgbaImage,
        backdrop: Option<&RgbaImage>,
    ) -> Vec<ComposedVariant> {
        let product = prepare_product(product);
        self.templates
            .iter()
            .map(|template| ComposedVariant {
                template_id: template.id,
                raster: compose(template, logo, &product, backdrop),
            })
            .collect()
    }
}

/// Upscales small cutouts so the short side reaches [`MIN_PRODUCT_SIDE`],
/// then lifts saturation, contrast and brightness and sharpens. Alpha is
/// carried over untouched.
pub fn prepare_product(product: &RgbaImage) -> RgbaImage {
    let (width, height) = product.dimensions();
    if width == 0 || height == 0 {
        return product.clone();
    }
    let short = width.min(height);
    let base = if short < MIN_PRODUCT_SIDE {
        let long = width.max(height);
        let scale = (f64::from(MIN_PRODUCT_SIDE) / f64::from(short))
            .min(f64::from(MAX_PRODUCT_SIDE) / f64::from(long))
            .max(1.0);
        let tw = (f64::from(width) * scale).round().max(1.0) as u32;
        let th = (f64::from(height) * scale).round().max(1.0) as u32;
        imageops::resize(product, tw, th, RESIZE_FILTER)
    } else {
        product.clone()
    };

    let mut enhanced = base.clone();
    saturate(&mut enhanced, SATURATION_PCT);
    let enhanced = imageops::contrast(&enhanced, CONTRAST);
    let enhanced = imageops::brighten(&enhanced, BRIGHTEN);
    let mut enhanced = imageops::unsharpen(&enhanced, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
    for (dst, src) in enhanced.pixels_mut().zip(base.pixels()) {
        dst[3] = src[3];
    }
    enhanced
}

/// Scales each pixel's distance from its luma by `pct` percent.
fn saturate(image: &mut RgbaImage, pct: i32) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0.map(i32::from);
        let luma = (299 * r + 587 * g + 114 * b) / 1000;
        for channel in 0..3 {
            let value = luma + (i32::from(pixel[channel]) - luma) * pct / 100;
            pixel[channel] = value.clamp(0, 255) as u8;
        }
    }
}

pub fn compose(
    template: &Template,
    logo: &RgbaImage,
    product: &RgbaImage,
    backdrop: Option<&RgbaImage>,
) -> RgbaImage {
    let (width, height) = (template.canvas_width, template.canvas_height);
    let mut canvas = RgbaImage::new(width, height);

    paint_background(&mut canvas, &template.background, backdrop);

    let product_fit = template.product_slot.inset(template.padding);
    if let Some((scaled, x, y)) = fit_into(product, product_fit) {
        if let Some(shadow) = template.product_shadow {
            paint_shadow(&mut canvas, &scaled, x, y, shadow);
        }
        imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    }

    let logo_fit = template.logo_slot.inset(template.padding / 2);
    if let Some((scaled, x, y)) = fit_into(logo, logo_fit) {
        if template.logo_plate {
            let plate = Rect::new(
                x.saturating_sub(10),
                y.saturating_sub(8),
                scaled.width() + 20,
                scaled.height() + 16,
            );
            fill_rounded(
                &mut canvas,
                plate,
                [255, 255, 255],
                LOGO_PLATE_ALPHA,
                LOGO_PLATE_RADIUS,
            );
        }
        imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    }

    reserve_caption_box(&mut canvas, template.caption_slot, template.caption_plate);

    if template.vignette > 0 {
        paint_vignette(&mut canvas, template.vignette);
    }

    for pixel in canvas.pixels_mut() {
        pixel[3] = 255;
    }
    canvas
}

/// Hex SHA-256 over dimensions and pixel bytes.
pub fn raster_digest(raster: &RgbaImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raster.width().to_be_bytes());
    hasher.update(raster.height().to_be_bytes());
    hasher.update(raster.as_raw());
    hex::encode(hasher.finalize())
}

fn paint_background(canvas: &mut RgbaImage, style: &BackgroundStyle, backdrop: Option<&RgbaImage>) {
    let (width, height) = canvas.dimensions();
    match *style {
        BackgroundStyle::Solid { color } => {
            for pixel in canvas.pixels_mut() {
                *pixel = opaque(color);
            }
        }
        BackgroundStyle::VerticalGradient { top, bottom } => {
            vertical_gradient(canvas, top, bottom);
        }
        BackgroundStyle::DiagonalGradient { from, to } => {
            let span = (width + height).saturating_sub(2).max(1);
            for (x, y, pixel) in canvas.enumerate_pixels_mut() {
                *pixel = opaque(lerp_rgb(from, to, x + y, span));
            }
        }
        BackgroundStyle::RadialGlow { center, edge } => {
            let cx = i64::from(width / 2);
            let cy = i64::from(height * 2 / 5);
            let reach = isqrt((cx * cx + (i64::from(height) - cy).pow(2)) as u64).max(1);
            for (x, y, pixel) in canvas.enumerate_pixels_mut() {
                let dx = i64::from(x) - cx;
                let dy = i64::from(y) - cy;
                let dist = isqrt((dx * dx + dy * dy) as u64).min(reach);
                *pixel = opaque(lerp_rgb(center, edge, dist as u32, reach as u32));
            }
        }
        BackgroundStyle::SplitPanel {
            left,
            right,
            split_pct,
        } => {
            let split = width * u32::from(split_pct.min(100)) / 100;
            for (x, _, pixel) in canvas.enumerate_pixels_mut() {
                *pixel = opaque(if x < split { left } else { right });
            }
        }
        BackgroundStyle::GeneratedBackdrop {
            fallback_top,
            fallback_bottom,
            tint_alpha,
        } => match backdrop.filter(|image| image.width() > 0 && image.height() > 0) {
            Some(image) => {
                let filled = DynamicImage::ImageRgba8(image.clone())
                    .resize_to_fill(width, height, RESIZE_FILTER)
                    .to_rgba8();
                for (dst, src) in canvas.pixels_mut().zip(filled.pixels()) {
                    *dst = Rgba([src[0], src[1], src[2], 255]);
                    blend(dst, fallback_top, tint_alpha);
                }
            }
            None => vertical_gradient(canvas, fallback_top, fallback_bottom),
        },
    }
}

fn vertical_gradient(canvas: &mut RgbaImage, top: Rgb, bottom: Rgb) {
    let span = canvas.height().saturating_sub(1).max(1);
    for (_, y, pixel) in canvas.enumerate_pixels_mut() {
        *pixel = opaque(lerp_rgb(top, bottom, y, span));
    }
}

/// Scales `source` to fit `slot` preserving aspect ratio and centres it.
/// Returns the scaled raster and its top-left corner.
fn fit_into(source: &RgbaImage, slot: Rect) -> Option<(RgbaImage, u32, u32)> {
    let (sw, sh) = source.dimensions();
    if sw == 0 || sh == 0 || slot.width == 0 || slot.height == 0 {
        return None;
    }
    let (tw, th) = if u64::from(sw) * u64::from(slot.height) >= u64::from(sh) * u64::from(slot.width)
    {
        let th = (u64::from(sh) * u64::from(slot.width) / u64::from(sw)) as u32;
        (slot.width, th.max(1))
    } else {
        let tw = (u64::from(sw) * u64::from(slot.height) / u64::from(sh)) as u32;
        (tw.max(1), slot.height)
    };
    let scaled = if (tw, th) == (sw, sh) {
        source.clone()
    } else {
        imageops::resize(source, tw, th, RESIZE_FILTER)
    };
    let x = slot.x + (slot.width - tw) / 2;
    let y = slot.y + (slot.height - th) / 2;
    Some((scaled, x, y))
}

fn paint_shadow(canvas: &mut RgbaImage, subject: &RgbaImage, x: u32, y: u32, shadow: Shadow) {
    let margin = (shadow.blur_sigma.max(0.0) * 3.0).ceil() as u32;
    let (sw, sh) = subject.dimensions();
    let mut mask = RgbaImage::new(sw + 2 * margin, sh + 2 * margin);
    for (sx, sy, pixel) in subject.enumerate_pixels() {
        let alpha = (u32::from(pixel[3]) * u32::from(shadow.opacity) / 255) as u8;
        mask.put_pixel(sx + margin, sy + margin, Rgba([0, 0, 0, alpha]));
    }

    // Blur at quarter resolution; a full-size gaussian is far too slow here.
    let small_w = (mask.width() / SHADOW_DOWNSCALE).max(1);
    let small_h = (mask.height() / SHADOW_DOWNSCALE).max(1);
    let small = imageops::resize(&mask, small_w, small_h, FilterType::Triangle);
    let blurred = imageops::blur(&small, shadow.blur_sigma / SHADOW_DOWNSCALE as f32);
    let soft = imageops::resize(&blurred, mask.width(), mask.height(), FilterType::Triangle);

    let ox = i64::from(x) + i64::from(shadow.offset_x) - i64::from(margin);
    let oy = i64::from(y) + i64::from(shadow.offset_y) - i64::from(margin);
    imageops::overlay(canvas, &soft, ox, oy);
}

fn reserve_caption_box(canvas: &mut RgbaImage, slot: Rect, plate: CaptionPlate) {
    fill_rounded(canvas, slot, plate.color, plate.opacity, 0);
}

fn fill_rounded(canvas: &mut RgbaImage, rect: Rect, color: Rgb, alpha: u8, radius: u32) {
    let right = rect.right().min(canvas.width());
    let bottom = rect.bottom().min(canvas.height());
    let radius = radius.min(rect.width / 2).min(rect.height / 2);
    for y in rect.y..bottom {
        for x in rect.x..right {
            if radius > 0 && outside_corner(rect, radius, x, y) {
                continue;
            }
            blend(canvas.get_pixel_mut(x, y), color, alpha);
        }
    }
}

fn outside_corner(rect: Rect, radius: u32, x: u32, y: u32) -> bool {
    let left_edge = rect.x + radius;
    let right_edge = rect.right().saturating_sub(radius + 1);
    let top_edge = rect.y + radius;
    let bottom_edge = rect.bottom().saturating_sub(radius + 1);
    let cx = if x < left_edge {
        left_edge
    } else if x > right_edge {
        right_edge
    } else {
        return false;
    };
    let cy = if y < top_edge {
        top_edge
    } else if y > bottom_edge {
        bottom_edge
    } else {
        return false;
    };
    let dx = u64::from(x.abs_diff(cx));
    let dy = u64::from(y.abs_diff(cy));
    dx * dx + dy * dy > u64::from(radius) * u64::from(radius)
}

fn paint_vignette(canvas: &mut RgbaImage, strength: u8) {
    let (width, height) = canvas.dimensions();
    let cx = i64::from(width / 2);
    let cy = i64::from(height / 2);
    let max_sq = (cx * cx + cy * cy).max(1) as u64;
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = i64::from(x) - cx;
        let dy = i64::from(y) - cy;
        let dist_sq = (dx * dx + dy * dy) as u64;
        // Quadratic falloff: untouched centre, full strength in the corners.
        let alpha = (u64::from(strength) * dist_sq / max_sq).min(255) as u8;
        if alpha > 0 {
            blend(pixel, [0, 0, 0], alpha);
        }
    }
}

/// Straight-alpha "over" of a flat colour onto `dst`.
fn blend(dst: &mut Rgba<u8>, color: Rgb, alpha: u8) {
    let a = u16::from(alpha);
    let inv = 255 - a;
    for channel in 0..3 {
        let mixed = u16::from(color[channel]) * a + u16::from(dst[channel]) * inv;
        dst[channel] = ((mixed + 127) / 255) as u8;
    }
}

fn lerp_rgb(from: Rgb, to: Rgb, step: u32, span: u32) -> Rgb {
    let step = step.min(span);
    let mut out = [0u8; 3];
    for channel in 0..3 {
        let a = u32::from(from[channel]) * (span - step);
        let b = u32::from(to[channel]) * step;
        out[channel] = ((a + b) / span) as u8;
    }
    out
}

fn opaque(color: Rgb) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], 255])
}

fn isqrt(value: u64) -> u64 {
    if value < 2 {
        return value;
    }
    let mut x = (value as f64).sqrt() as u64;
    while x * x > value {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= value {
        x += 1;
    }
    x
}

#[cfg(test)]
mod tests {
    use brandmorph_contracts::templates::{
        BackgroundStyle, Rect, TemplateRegistry, CANVAS_SIZE, TEMPLATE_COUNT,
    };
    use image::{Rgba, RgbaImage};

    use super::{
        compose, fit_into, isqrt, lerp_rgb, prepare_product, raster_digest, saturate,
        LayoutComposer, MIN_PRODUCT_SIDE,
    };

    fn logo() -> RgbaImage {
        RgbaImage::from_fn(120, 60, |x, _| {
            if x < 60 {
                Rgba([20, 40, 200, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn product() -> RgbaImage {
        RgbaImage::from_pixel(90, 150, Rgba([220, 60, 30, 255]))
    }

    #[test]
    fn compose_all_yields_one_canvas_per_template() {
        let variants =
            LayoutComposer::new(TemplateRegistry::standard()).compose_all(&logo(), &product(), None);
        assert_eq!(variants.len(), TEMPLATE_COUNT);
        for (idx, variant) in variants.iter().enumerate() {
            assert_eq!(usize::from(variant.template_id), idx + 1);
            assert_eq!(variant.raster.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
            assert!(variant.raster.pixels().all(|pixel| pixel[3] == 255));
        }
    }

    #[test]
    fn composition_is_deterministic() {
        let registry = TemplateRegistry::standard();
        for id in [1u8, 8, 10] {
            let template = registry.get(id).expect("template exists");
            let first = compose(template, &logo(), &product(), None);
            let second = compose(template, &logo(), &product(), None);
            assert_eq!(raster_digest(&first), raster_digest(&second));
            assert_eq!(first.as_raw(), second.as_raw());
        }
    }

    #[test]
    fn templates_render_differently() {
        let registry = TemplateRegistry::standard();
        let one = compose(registry.get(1).expect("t1"), &logo(), &product(), None);
        let two = compose(registry.get(2).expect("t2"), &logo(), &product(), None);
        assert_ne!(raster_digest(&one), raster_digest(&two));
    }

    #[test]
    fn product_lands_inside_its_slot() {
        let template = TemplateRegistry::standard().get(9).expect("minimal");
        let canvas = compose(template, &logo(), &product(), None);
        let slot = template.product_slot;
        let centre = canvas.get_pixel(slot.x + slot.width / 2, slot.y + slot.height / 2);
        assert_eq!(centre, &Rgba([220, 60, 30, 255]));
    }

    #[test]
    fn backdrop_templates_use_backdrop_when_present() {
        let template = TemplateRegistry::standard().get(8).expect("backdrop template");
        assert!(matches!(
            template.background,
            BackgroundStyle::GeneratedBackdrop { .. }
        ));
        let backdrop = RgbaImage::from_pixel(64, 64, Rgba([0, 200, 0, 255]));
        let with = compose(template, &logo(), &product(), Some(&backdrop));
        let without = compose(template, &logo(), &product(), None);
        assert_ne!(raster_digest(&with), raster_digest(&without));
        // top edge sits outside every slot; it keeps the green cast
        let corner = with.get_pixel(CANVAS_SIZE / 2, 4);
        assert!(corner[1] > corner[0]);
    }

    #[test]
    fn empty_assets_still_render() {
        let template = TemplateRegistry::standard().get(1).expect("t1");
        let canvas = compose(template, &RgbaImage::new(0, 0), &RgbaImage::new(0, 0), None);
        assert_eq!(canvas.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
    }

    #[test]
    fn fit_preserves_aspect_and_centres() {
        let (scaled, x, y) =
            fit_into(&RgbaImage::new(200, 100), Rect::new(10, 10, 100, 100)).expect("fits");
        assert_eq!(scaled.dimensions(), (100, 50));
        assert_eq!((x, y), (10, 35));
    }

    #[test]
    fn small_products_are_upscaled_before_layout() {
        let small = RgbaImage::from_pixel(60, 120, Rgba([90, 120, 60, 255]));
        let prepared = prepare_product(&small);
        assert_eq!(prepared.dimensions(), (MIN_PRODUCT_SIDE, MIN_PRODUCT_SIDE * 2));

        let large = RgbaImage::from_pixel(300, 500, Rgba([90, 120, 60, 255]));
        assert_eq!(prepare_product(&large).dimensions(), (300, 500));
    }

    #[test]
    fn upscaling_respects_the_long_side_cap() {
        let sliver = RgbaImage::from_pixel(4000, 10, Rgba([90, 120, 60, 255]));
        assert_eq!(prepare_product(&sliver).dimensions(), (4000, 10));
    }

    #[test]
    fn enhancement_keeps_alpha_and_is_deterministic() {
        let cutout = RgbaImage::from_fn(260, 260, |x, y| {
            if (x / 20 + y / 20) % 2 == 0 {
                Rgba([150, 100, 80, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let first = prepare_product(&cutout);
        let second = prepare_product(&cutout);
        assert_eq!(first.as_raw(), second.as_raw());
        for (after, before) in first.pixels().zip(cutout.pixels()) {
            assert_eq!(after[3], before[3]);
        }
        // opaque squares gain contrast: the mid-tone red channel moves away from grey
        let centre = first.get_pixel(10, 10);
        assert!(centre[0] > 150);
    }

    #[test]
    fn saturation_pushes_channels_away_from_luma() {
        let mut pixel = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 100, 255]));
        saturate(&mut pixel, 105);
        let out = pixel.get_pixel(0, 0);
        assert!(out[0] > 200 && out[1] < 100);

        let mut grey = RgbaImage::from_pixel(1, 1, Rgba([128, 128, 128, 255]));
        saturate(&mut grey, 105);
        assert_eq!(grey.get_pixel(0, 0), &Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn lerp_hits_both_ends() {
        assert_eq!(lerp_rgb([0, 0, 0], [255, 100, 10], 0, 10), [0, 0, 0]);
        assert_eq!(lerp_rgb([0, 0, 0], [255, 100, 10], 10, 10), [255, 100, 10]);
    }

    #[test]
    fn isqrt_is_exact() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(1_000_000), 1000);
    }
}
