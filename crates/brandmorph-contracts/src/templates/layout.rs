use serde::{Deserialize, Serialize};

pub type Rgb = [u8; 3];

/// Axis-aligned slot on a template canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Shrinks the rect by `padding` on every side, never below 1×1.
    pub fn inset(&self, padding: u32) -> Rect {
        let pad_x = padding.min(self.width.saturating_sub(1) / 2);
        let pad_y = padding.min(self.height.saturating_sub(1) / 2);
        Rect {
            x: self.x + pad_x,
            y: self.y + pad_y,
            width: (self.width - 2 * pad_x).max(1),
            height: (self.height - 2 * pad_y).max(1),
        }
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundStyle {
    Solid {
        color: Rgb,
    },
    VerticalGradient {
        top: Rgb,
        bottom: Rgb,
    },
    DiagonalGradient {
        from: Rgb,
        to: Rgb,
    },
    RadialGlow {
        center: Rgb,
        edge: Rgb,
    },
    SplitPanel {
        left: Rgb,
        right: Rgb,
        split_pct: u8,
    },
    /// Uses the run's generated backdrop when one exists, otherwise the
    /// fallback gradient. `tint_alpha` washes the backdrop toward the
    /// fallback top colour so slots stay legible.
    GeneratedBackdrop {
        fallback_top: Rgb,
        fallback_bottom: Rgb,
        tint_alpha: u8,
    },
}

impl BackgroundStyle {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Solid { .. } => "solid",
            Self::VerticalGradient { .. } => "vertical_gradient",
            Self::DiagonalGradient { .. } => "diagonal_gradient",
            Self::RadialGlow { .. } => "radial_glow",
            Self::SplitPanel { .. } => "split_panel",
            Self::GeneratedBackdrop { .. } => "generated_backdrop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub offset_x: i32,
    pub offset_y: i32,
    pub blur_sigma: f32,
    pub opacity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionPlate {
    pub color: Rgb,
    pub opacity: u8,
}

/// Declarative layout record. The composer walks every template the same way;
/// nothing about a template is expressed as code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: u8,
    pub name: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub padding: u32,
    pub logo_slot: Rect,
    pub product_slot: Rect,
    pub caption_slot: Rect,
    pub background: BackgroundStyle,
    pub product_shadow: Option<Shadow>,
    pub logo_plate: bool,
    pub caption_plate: CaptionPlate,
    pub vignette: u8,
}

impl Template {
    pub fn slots(&self) -> [(&'static str, Rect); 3] {
        [
            ("logo", self.logo_slot),
            ("product", self.product_slot),
            ("caption", self.caption_slot),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(format!("template {} has an empty canvas", self.id));
        }
        for (name, slot) in self.slots() {
            if !slot.fits_within(self.canvas_width, self.canvas_height) {
                return Err(format!(
                    "template {} {name} slot {:?} exceeds the {}x{} canvas",
                    self.id, slot, self.canvas_width, self.canvas_height
                ));
            }
        }
        Ok(())
    }
}
