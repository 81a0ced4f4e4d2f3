mod layout;
mod registry;

pub use layout::{BackgroundStyle, CaptionPlate, Rect, Rgb, Shadow, Template};
pub use registry::{TemplateRegistry, CANVAS_SIZE, TEMPLATE_COUNT};
