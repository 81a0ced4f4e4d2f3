use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;

use brandmorph_contracts::templates::{CaptionPlate, Rect, Template};
use image::RgbaImage;
use parley::layout::PositionedLayoutItem;
use parley::style::{FontStack, StyleProperty};
use parley::{Alignment, AlignmentOptions, FontContext, Layout, LayoutContext};

use crate::error::DegradedCapability;

const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");
const STAGE: &str = "caption rendering";
const CAPTION_INSET: u32 = 28;
const MAX_FONT_PX: f32 = 64.0;
const MIN_FONT_PX: f32 = 18.0;
const FONT_STEP: f32 = 0.88;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextBrush {
    r: u8,
    g: u8,
    b: u8,
    a: u8,
}

/// Draws caption text into a template's caption slot.
///
/// Output depends only on the font bytes, the template and the text: fonts
/// are registered from memory (no system lookup) and the size ladder is
/// fixed. Text wraps to the slot width and shrinks until it fits the slot
/// height or reaches the minimum size.
pub struct CaptionRenderer {
    font_ctx: FontContext,
    layout_ctx: LayoutContext<TextBrush>,
    family: String,
    font: vello_cpu::peniko::FontData,
}

impl fmt::Debug for CaptionRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptionRenderer")
            .field("family", &self.family)
            .finish()
    }
}

impl CaptionRenderer {
    /// Renderer over the font shipped with the engine.
    pub fn bundled() -> Result<Self, DegradedCapability> {
        Self::from_bytes(BUNDLED_FONT.to_vec())
    }

    pub fn from_file(path: &Path) -> Result<Self, DegradedCapability> {
        let bytes = fs::read(path).map_err(|err| {
            DegradedCapability::new(
                STAGE,
                format!("failed to read font {}: {err}", path.display()),
            )
        })?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DegradedCapability> {
        let mut font_ctx = FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.clone()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| DegradedCapability::new(STAGE, "no font families in font data"))?;
        let family = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| DegradedCapability::new(STAGE, "registered font family has no name"))?
            .to_string();
        Ok(Self {
            font_ctx,
            layout_ctx: LayoutContext::new(),
            family,
            font: vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes), 0),
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Letters `caption` over the caption plate of `template`. Pixels outside
    /// the caption slot are never touched.
    pub fn draw(
        &mut self,
        canvas: &mut RgbaImage,
        template: &Template,
        caption: &str,
    ) -> Result<(), DegradedCapability> {
        let text = caption.trim();
        let Some(slot) = clip_to_canvas(template.caption_slot, canvas) else {
            return Ok(());
        };
        if text.is_empty() {
            return Ok(());
        }
        let (Ok(width), Ok(height)) = (u16::try_from(slot.width), u16::try_from(slot.height))
        else {
            return Err(DegradedCapability::new(
                STAGE,
                format!("caption slot {}x{} is too large", slot.width, slot.height),
            ));
        };

        let inset = CAPTION_INSET.min(slot.width / 4).min(slot.height / 4);
        let area_width = (slot.width - 2 * inset) as f32;
        let area_height = (slot.height - 2 * inset) as f32;
        let brush = text_brush(template.caption_plate);
        let layout = self.fit_layout(text, brush, area_width, area_height, slot.height);
        let offset_y = inset as f32 + ((area_height - layout.height()) / 2.0).max(0.0);

        let mut ctx = vello_cpu::RenderContext::new(width, height);
        ctx.set_transform(vello_cpu::kurbo::Affine::translate((
            f64::from(inset),
            f64::from(offset_y),
        )));
        for line in layout.lines() {
            for item in line.items() {
                let PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                let brush = run.style().brush;
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                    brush.r, brush.g, brush.b, brush.a,
                ));
                let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(&self.font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }
        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(width, height);
        ctx.render_to_pixmap(&mut pixmap);

        composite_premul(canvas, slot, pixmap.data_as_u8_slice());
        Ok(())
    }

    fn fit_layout(
        &mut self,
        text: &str,
        brush: TextBrush,
        max_width: f32,
        max_height: f32,
        slot_height: u32,
    ) -> Layout<TextBrush> {
        let mut size = (slot_height as f32 * 0.34).clamp(MIN_FONT_PX, MAX_FONT_PX);
        loop {
            let layout = self.layout(text, size, brush, max_width);
            let next = size * FONT_STEP;
            if layout.height() <= max_height || next < MIN_FONT_PX {
                return layout;
            }
            size = next;
        }
    }

    fn layout(
        &mut self,
        text: &str,
        size_px: f32,
        brush: TextBrush,
        max_width: f32,
    ) -> Layout<TextBrush> {
        let family = self.family.clone();
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(StyleProperty::FontStack(FontStack::Source(Cow::Owned(
            family,
        ))));
        builder.push_default(StyleProperty::FontSize(size_px));
        builder.push_default(StyleProperty::Brush(brush));

        let mut layout: Layout<TextBrush> = builder.build(text);
        layout.break_all_lines(Some(max_width));
        layout.align(
            Some(max_width),
            Alignment::Start,
            AlignmentOptions::default(),
        );
        layout
    }
}

/// Dark lettering on light plates, white on dark ones.
fn text_brush(plate: CaptionPlate) -> TextBrush {
    let [r, g, b] = plate.color;
    let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000;
    if luma >= 128 {
        TextBrush {
            r: 24,
            g: 24,
            b: 30,
            a: 255,
        }
    } else {
        TextBrush {
            r: 255,
            g: 255,
            b: 255,
            a: 255,
        }
    }
}

fn clip_to_canvas(slot: Rect, canvas: &RgbaImage) -> Option<Rect> {
    let right = slot.right().min(canvas.width());
    let bottom = slot.bottom().min(canvas.height());
    if right <= slot.x || bottom <= slot.y {
        return None;
    }
    Some(Rect::new(slot.x, slot.y, right - slot.x, bottom - slot.y))
}

/// Premultiplied "over" of a slot-sized RGBA8 buffer onto `canvas`.
fn composite_premul(canvas: &mut RgbaImage, slot: Rect, premul: &[u8]) {
    for (idx, src) in premul.chunks_exact(4).enumerate() {
        let alpha = u16::from(src[3]);
        if alpha == 0 {
            continue;
        }
        let x = slot.x + idx as u32 % slot.width;
        let y = slot.y + idx as u32 / slot.width;
        if x >= canvas.width() || y >= canvas.height() {
            continue;
        }
        let dst = canvas.get_pixel_mut(x, y);
        let inv = 255 - alpha;
        for channel in 0..3 {
            let under = (u16::from(dst[channel]) * inv + 127) / 255;
            dst[channel] = (u16::from(src[channel]) + under).min(255) as u8;
        }
        let under = (u16::from(dst[3]) * inv + 127) / 255;
        dst[3] = (alpha + under).min(255) as u8;
    }
}
