use std::sync::OnceLock;

use indexmap::IndexMap;

use super::layout::{BackgroundStyle, CaptionPlate, Rect, Shadow, Template};

pub const CANVAS_SIZE: u32 = 1200;
pub const TEMPLATE_COUNT: usize = 12;

const SOFT_SHADOW: Shadow = Shadow {
    offset_x: 12,
    offset_y: 18,
    blur_sigma: 14.0,
    opacity: 150,
};

const LIGHT_PLATE: CaptionPlate = CaptionPlate {
    color: [255, 255, 255],
    opacity: 190,
};

const DARK_PLATE: CaptionPlate = CaptionPlate {
    color: [18, 18, 24],
    opacity: 170,
};

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: IndexMap<u8, Template>,
}

impl TemplateRegistry {
    pub fn new(templates: Option<IndexMap<u8, Template>>) -> Self {
        Self {
            templates: templates.unwrap_or_else(default_templates),
        }
    }

    /// Process-wide template set, built on first use and never mutated.
    pub fn standard() -> &'static TemplateRegistry {
        static STANDARD: OnceLock<TemplateRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| TemplateRegistry::new(None))
    }

    pub fn get(&self, id: u8) -> Option<&Template> {
        self.templates.get(&id)
    }

    pub fn iter(&self) -> indexmap::map::Values<'_, u8, Template> {
        self.templates.values()
    }

    pub fn ids(&self) -> Vec<u8> {
        self.templates.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Checks the registry shape the pipeline relies on: ids 1..=12 in
    /// ascending order, one shared canvas size, every slot inside it.
    pub fn validate(&self) -> Result<(), String> {
        if self.templates.len() != TEMPLATE_COUNT {
            return Err(format!(
                "expected {TEMPLATE_COUNT} templates, found {}",
                self.templates.len()
            ));
        }
        let mut canvas: Option<(u32, u32)> = None;
        for (idx, (id, template)) in self.templates.iter().enumerate() {
            if usize::from(*id) != idx + 1 || template.id != *id {
                return Err(format!(
                    "template ids must run 1..={TEMPLATE_COUNT} in order (found {id} at {idx})"
                ));
            }
            template.validate()?;
            let size = (template.canvas_width, template.canvas_height);
            match canvas {
                None => canvas = Some(size),
                Some(expected) if expected != size => {
                    return Err(format!(
                        "template {id} canvas {}x{} differs from {}x{}",
                        size.0, size.1, expected.0, expected.1
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn default_templates() -> IndexMap<u8, Template> {
    let mut map = IndexMap::new();

    let mut insert = |id: u8,
                      name: &str,
                      logo_slot: Rect,
                      product_slot: Rect,
                      caption_slot: Rect,
                      background: BackgroundStyle,
                      product_shadow: Option<Shadow>,
                      caption_plate: CaptionPlate,
                      vignette: u8| {
        map.insert(
            id,
            Template {
                id,
                name: name.to_string(),
                canvas_width: CANVAS_SIZE,
                canvas_height: CANVAS_SIZE,
                padding: 24,
                logo_slot,
                product_slot,
                caption_slot,
                background,
                product_shadow,
                logo_plate: true,
                caption_plate,
                vignette,
            },
        );
    };

    insert(
        1,
        "hero-center",
        Rect::new(36, 36, 180, 110),
        Rect::new(190, 170, 820, 700),
        Rect::new(0, 960, 1200, 240),
        BackgroundStyle::VerticalGradient {
            top: [250, 250, 250],
            bottom: [232, 236, 244],
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        60,
    );
    insert(
        2,
        "product-left",
        Rect::new(984, 36, 180, 110),
        Rect::new(40, 190, 640, 820),
        Rect::new(720, 420, 440, 360),
        BackgroundStyle::VerticalGradient {
            top: [245, 248, 255],
            bottom: [214, 226, 250],
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        40,
    );
    insert(
        3,
        "product-right",
        Rect::new(36, 36, 180, 110),
        Rect::new(520, 190, 640, 820),
        Rect::new(40, 420, 440, 360),
        BackgroundStyle::VerticalGradient {
            top: [255, 250, 245],
            bottom: [250, 226, 210],
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        40,
    );
    insert(
        4,
        "headline-top",
        Rect::new(984, 1054, 180, 110),
        Rect::new(200, 330, 800, 700),
        Rect::new(0, 0, 1200, 260),
        BackgroundStyle::DiagonalGradient {
            from: [250, 255, 250],
            to: [206, 236, 214],
        },
        Some(SOFT_SHADOW),
        DARK_PLATE,
        0,
    );
    insert(
        5,
        "split-panel",
        Rect::new(36, 36, 180, 110),
        Rect::new(600, 160, 560, 880),
        Rect::new(40, 760, 520, 300),
        BackgroundStyle::SplitPanel {
            left: [28, 32, 48],
            right: [238, 240, 246],
            split_pct: 50,
        },
        Some(SOFT_SHADOW),
        DARK_PLATE,
        0,
    );
    insert(
        6,
        "spotlight",
        Rect::new(510, 40, 180, 110),
        Rect::new(240, 200, 720, 680),
        Rect::new(120, 940, 960, 200),
        BackgroundStyle::RadialGlow {
            center: [255, 252, 240],
            edge: [214, 200, 176],
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        90,
    );
    insert(
        7,
        "diagonal-bold",
        Rect::new(36, 1054, 180, 110),
        Rect::new(120, 60, 960, 820),
        Rect::new(300, 900, 860, 240),
        BackgroundStyle::DiagonalGradient {
            from: [255, 94, 77],
            to: [255, 196, 120],
        },
        Some(SOFT_SHADOW),
        DARK_PLATE,
        50,
    );
    insert(
        8,
        "lifestyle-backdrop",
        Rect::new(36, 36, 180, 110),
        Rect::new(260, 240, 680, 640),
        Rect::new(0, 960, 1200, 240),
        BackgroundStyle::GeneratedBackdrop {
            fallback_top: [236, 240, 246],
            fallback_bottom: [196, 206, 222],
            tint_alpha: 70,
        },
        Some(SOFT_SHADOW),
        DARK_PLATE,
        70,
    );
    insert(
        9,
        "minimal",
        Rect::new(510, 60, 180, 110),
        Rect::new(330, 280, 540, 540),
        Rect::new(200, 900, 800, 200),
        BackgroundStyle::Solid {
            color: [248, 247, 244],
        },
        None,
        LIGHT_PLATE,
        0,
    );
    insert(
        10,
        "night",
        Rect::new(984, 36, 180, 110),
        Rect::new(200, 160, 800, 740),
        Rect::new(0, 940, 1200, 260),
        BackgroundStyle::Solid {
            color: [22, 24, 32],
        },
        Some(Shadow {
            offset_x: 0,
            offset_y: 24,
            blur_sigma: 22.0,
            opacity: 200,
        }),
        DARK_PLATE,
        120,
    );
    insert(
        11,
        "corner-feature",
        Rect::new(984, 1054, 180, 110),
        Rect::new(40, 40, 760, 760),
        Rect::new(640, 840, 520, 180),
        BackgroundStyle::RadialGlow {
            center: [240, 248, 255],
            edge: [170, 196, 230],
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        40,
    );
    insert(
        12,
        "backdrop-banner",
        Rect::new(984, 36, 180, 110),
        Rect::new(120, 200, 560, 760),
        Rect::new(700, 360, 460, 400),
        BackgroundStyle::GeneratedBackdrop {
            fallback_top: [44, 52, 70],
            fallback_bottom: [120, 136, 166],
            tint_alpha: 110,
        },
        Some(SOFT_SHADOW),
        LIGHT_PLATE,
        80,
    );

    if let Some(minimal) = map.get_mut(&9) {
        minimal.logo_plate = false;
    }
    map
}
