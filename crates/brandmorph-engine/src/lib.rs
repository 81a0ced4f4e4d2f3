pub mod background;
pub mod captions;
pub mod compose;
pub mod config;
pub mod error;
pub mod generation;
pub mod lettering;
pub mod normalize;
pub mod package;
pub mod run;

#[cfg(test)]
mod testing;

pub use background::{BackgroundRemover, Cutout, CutoutMethod};
pub use captions::{Caption, CaptionBatch, CaptionGenerator, CaptionPool, CAPTION_COUNT};
pub use compose::{prepare_product, raster_digest, ComposedVariant, LayoutComposer};
pub use config::{CapabilityFlags, EngineConfig, GeminiSettings};
pub use error::{DegradedCapability, PipelineError, PipelineResult};
pub use generation::{
    CaptionRequest, CaptionStrategy, GenerationAdapter, GenerationFailure, ImageRequest,
    ImageStrategy, StrategyError,
};
pub use lettering::CaptionRenderer;
pub use normalize::{normalize_asset, AssetInput, AssetRole, NormalizedAsset};
pub use package::{CreativeVariant, PackageBuilder, PackageReceipt};
pub use run::{GenerationRun, RunFailure, RunInputs, RunOptions, RunReport};
