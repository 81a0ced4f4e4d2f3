use std::path::{Path, PathBuf};

use brandmorph_contracts::events::{EventPayload, EventWriter};
use brandmorph_contracts::runs::state::{FatalStage, RunState};
use brandmorph_contracts::runs::summary::RunSummary;
use brandmorph_contracts::runs::variant::{CaptionSource, VariantDescriptor};
use brandmorph_contracts::templates::TemplateRegistry;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::background::{BackgroundRemover, CutoutMethod};
use crate::captions::{CaptionGenerator, CaptionPool};
use crate::compose::{raster_digest, LayoutComposer};
use crate::config::EngineConfig;
use crate::error::{DegradedCapability, PipelineError};
use crate::generation::{AttemptRecord, GenerationAdapter, ImageRequest};
use crate::lettering::CaptionRenderer;
use crate::normalize::{normalize_asset, AssetInput, AssetRole, NormalizedAsset};
use crate::package::{CreativeVariant, PackageBuilder, PackageReceipt};

#[derive(Debug, Clone)]
pub struct RunInputs {
    pub logo: AssetInput,
    pub product: AssetInput,
    pub brand: String,
    pub product_name: String,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub archive_path: PathBuf,
    pub events_path: Option<PathBuf>,
    /// Generated when absent.
    pub run_id: Option<String>,
}

impl RunOptions {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            events_path: None,
            run_id: None,
        }
    }
}

/// Everything one run owns besides its inputs. Dropping it removes the
/// scratch directory.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    started_at: String,
    scratch: Option<TempDir>,
    events: EventWriter,
}

impl RunContext {
    pub fn new(run_id: Option<String>, events_path: Option<PathBuf>) -> Self {
        let run_id = run_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let scratch = tempfile::Builder::new()
            .prefix("brandmorph-run-")
            .tempdir()
            .map_err(|err| tracing::warn!(%err, "scratch directory unavailable"))
            .ok();
        Self {
            events: EventWriter::new(events_path, run_id.clone()),
            run_id,
            started_at: now_utc_iso(),
            scratch,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub started_at: String,
    pub finished_at: String,
    pub archive: PackageReceipt,
    pub variants: Vec<VariantDescriptor>,
    pub cutout_method: CutoutMethod,
    pub caption_strategy: Option<String>,
    pub backdrop_strategy: Option<String>,
    pub degradations: Vec<String>,
    pub events: Vec<Value>,
}

impl RunReport {
    pub fn caption_count(&self, source: CaptionSource) -> usize {
        self.variants
            .iter()
            .filter(|variant| variant.caption_source == source)
            .count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            state: self.state,
            archive_path: Some(self.archive.path.to_string_lossy().to_string()),
            variants: self.variants.clone(),
            degradations: self.degradations.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("run {run_id} failed during {stage}: {error}")]
pub struct RunFailure {
    pub run_id: String,
    pub stage: FatalStage,
    #[source]
    pub error: PipelineError,
    pub started_at: String,
    pub finished_at: String,
    pub degradations: Vec<String>,
    pub events: Vec<Value>,
}

impl RunFailure {
    pub fn state(&self) -> RunState {
        RunState::Failed(self.stage)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            state: self.state(),
            archive_path: None,
            variants: Vec::new(),
            degradations: self.degradations.clone(),
        }
    }
}

/// One pipeline execution. Consumed by [`GenerationRun::execute`]; only the
/// immutable report or failure escapes.
pub struct GenerationRun {
    context: RunContext,
    state: RunState,
    inputs: RunInputs,
    archive_path: PathBuf,
    config: EngineConfig,
    adapter: GenerationAdapter,
    captions: CaptionGenerator,
    background: BackgroundRemover,
    templates: &'static TemplateRegistry,
    degradations: Vec<String>,
}

impl GenerationRun {
    pub fn new(inputs: RunInputs, options: RunOptions, config: EngineConfig) -> Self {
        let adapter = GenerationAdapter::from_config(&config);
        Self {
            context: RunContext::new(options.run_id, options.events_path),
            state: RunState::Created,
            inputs,
            archive_path: options.archive_path,
            config,
            adapter,
            captions: CaptionGenerator::default(),
            background: BackgroundRemover::default(),
            templates: TemplateRegistry::standard(),
            degradations: Vec::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: GenerationAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_caption_pool(mut self, pool: CaptionPool) -> Self {
        self.captions = CaptionGenerator::new(pool);
        self
    }

    pub fn run_id(&self) -> &str {
        self.context.run_id()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn execute(mut self) -> Result<RunReport, RunFailure> {
        let capabilities = self.adapter.capabilities();
        self.record(
            "run_started",
            json!({
                "brand": self.inputs.brand,
                "product": self.inputs.product_name,
                "captions_enabled": capabilities.captions_enabled,
                "images_enabled": capabilities.images_enabled,
                "caption_strategies": self.adapter.caption_strategy_names(),
                "image_strategies": self.adapter.image_strategy_names(),
                "archive_path": self.archive_path.to_string_lossy(),
            }),
        );

        let max_dimension = self.config.max_working_dimension;
        let logo = match normalize_asset(AssetRole::Logo, &self.inputs.logo, max_dimension) {
            Ok(asset) => asset,
            Err(err) => return Err(self.fail(err)),
        };
        let product =
            match normalize_asset(AssetRole::Product, &self.inputs.product, max_dimension) {
                Ok(asset) => asset,
                Err(err) => return Err(self.fail(err)),
            };
        self.advance(RunState::Validated);
        for asset in [&logo, &product] {
            self.record_asset(asset);
        }

        let cutout = self.background.remove(&product.raster);
        self.record(
            "background_removed",
            json!({
                "method": cutout.method.as_str(),
                "confidence": cutout.confidence,
                "width": cutout.raster.width(),
                "height": cutout.raster.height(),
            }),
        );
        if let Some(degraded) = cutout.degraded.clone() {
            self.degrade(degraded);
        }
        self.keep_scratch_copy("cutout.png", &cutout.raster);

        let backdrop_request =
            ImageRequest::backdrop(&self.inputs.brand, &self.inputs.product_name);
        let (backdrop, backdrop_strategy) = match self.adapter.request_image(&backdrop_request) {
            Ok(generated) => {
                self.record_attempts("image", &generated.attempts);
                (Some(generated.payload), Some(generated.strategy))
            }
            Err(failure) => {
                self.record_attempts("image", &failure.attempts);
                self.degrade(DegradedCapability::new(
                    "backdrop generation",
                    failure.to_string(),
                ));
                (None, None)
            }
        };

        let composed = LayoutComposer::new(self.templates).compose_all(
            &logo.raster,
            &cutout.raster,
            backdrop.as_ref(),
        );
        self.advance(RunState::Composed);
        let digests: Vec<String> = composed
            .iter()
            .map(|variant| raster_digest(&variant.raster))
            .collect();
        self.record(
            "variants_composed",
            json!({
                "count": composed.len(),
                "backdrop": backdrop.is_some(),
                "digests": digests,
            }),
        );

        let batch = self
            .captions
            .generate(&self.adapter, &self.inputs.brand, &self.inputs.product_name);
        self.record_attempts("caption", &batch.attempts);
        if let Some(degraded) = batch.degraded.clone() {
            self.degrade(degraded);
        }
        self.advance(RunState::Captioned);
        self.record(
            "captions_generated",
            json!({
                "strategy": batch.strategy,
                "generated": batch.count(CaptionSource::Generated),
                "fallback": batch.count(CaptionSource::Fallback),
                "rejected": batch.rejected,
            }),
        );

        let mut variants: Vec<CreativeVariant> = composed
            .into_iter()
            .zip(batch.captions)
            .map(|(variant, caption)| CreativeVariant {
                template_id: variant.template_id,
                raster: variant.raster,
                caption: caption.text,
                caption_source: caption.source,
            })
            .collect();
        self.letter_captions(&mut variants);

        let receipt = match PackageBuilder::new(self.config.jpeg_quality)
            .build(&variants, &self.archive_path)
        {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail(err)),
        };
        self.advance(RunState::Packaged);
        self.record(
            "package_written",
            json!({
                "path": receipt.path.to_string_lossy(),
                "entries": receipt.entries,
                "size_bytes": receipt.size_bytes,
                "sha256": receipt.sha256,
            }),
        );

        self.advance(RunState::Completed);
        let descriptors: Vec<VariantDescriptor> =
            variants.iter().map(CreativeVariant::descriptor).collect();
        self.record(
            "run_finished",
            json!({
                "state": self.state.label(),
                "variants": descriptors.len(),
                "degradations": self.degradations.len(),
            }),
        );
        tracing::debug!(
            run_id = %self.context.run_id,
            archive = %receipt.path.display(),
            "run completed"
        );

        let started_at = self.context.started_at.clone();
        let run_id = self.context.run_id.clone();
        Ok(RunReport {
            run_id,
            state: self.state,
            started_at,
            finished_at: now_utc_iso(),
            archive: receipt,
            variants: descriptors,
            cutout_method: cutout.method,
            caption_strategy: batch.strategy,
            backdrop_strategy,
            degradations: self.degradations,
            events: self.context.events.into_events(),
        })
    }

    /// Draws each caption into its template's caption slot. Lettering never
    /// fails a run; the first error is recorded as one degradation.
    fn letter_captions(&mut self, variants: &mut [CreativeVariant]) {
        let Some(mut renderer) = self.caption_renderer() else {
            return;
        };
        let mut lettered = 0usize;
        let mut first_error = None;
        for variant in variants.iter_mut() {
            let Some(template) = self.templates.get(variant.template_id) else {
                continue;
            };
            match renderer.draw(&mut variant.raster, template, &variant.caption) {
                Ok(()) => lettered += 1,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(degraded) = first_error {
            self.degrade(degraded);
        }
        let digests: Vec<String> = variants
            .iter()
            .map(|variant| raster_digest(&variant.raster))
            .collect();
        self.record(
            "captions_rendered",
            json!({
                "font": renderer.family(),
                "count": lettered,
                "digests": digests,
            }),
        );
    }

    /// Configured font first, bundled face otherwise.
    fn caption_renderer(&mut self) -> Option<CaptionRenderer> {
        if let Some(path) = self.config.caption_font.clone() {
            match CaptionRenderer::from_file(&path) {
                Ok(renderer) => return Some(renderer),
                Err(degraded) => self.degrade(degraded),
            }
        }
        match CaptionRenderer::bundled() {
            Ok(renderer) => Some(renderer),
            Err(degraded) => {
                self.degrade(degraded);
                None
            }
        }
    }

    fn advance(&mut self, next: RunState) {
        match self.state.transition(next) {
            Ok(state) => self.state = state,
            Err(err) => {
                tracing::error!(%err, "run state machine rejected a transition");
                debug_assert!(false, "{err}");
            }
        }
    }

    fn fail(mut self, error: PipelineError) -> RunFailure {
        let stage = error.stage();
        self.advance(RunState::Failed(stage));
        self.record(
            "run_failed",
            json!({
                "stage": stage.as_str(),
                "error": error.to_string(),
            }),
        );
        tracing::warn!(run_id = %self.context.run_id, %stage, %error, "run failed");
        RunFailure {
            run_id: self.context.run_id.clone(),
            stage,
            error,
            started_at: self.context.started_at.clone(),
            finished_at: now_utc_iso(),
            degradations: self.degradations,
            events: self.context.events.into_events(),
        }
    }

    fn degrade(&mut self, degraded: DegradedCapability) {
        tracing::warn!(stage = degraded.stage, reason = %degraded.reason, "stage degraded");
        self.record(
            "degraded",
            json!({
                "stage": degraded.stage,
                "reason": degraded.reason,
            }),
        );
        self.degradations.push(degraded.to_string());
    }

    fn record_asset(&mut self, asset: &NormalizedAsset) {
        self.record(
            "asset_validated",
            json!({
                "role": asset.role.as_str(),
                "source": asset.source_name,
                "format": format!("{:?}", asset.format).to_lowercase(),
                "original_width": asset.original_width,
                "original_height": asset.original_height,
                "width": asset.width(),
                "height": asset.height(),
                "warnings": asset.warnings,
            }),
        );
    }

    fn record_attempts(&mut self, kind: &str, attempts: &[AttemptRecord]) {
        for attempt in attempts {
            self.record(
                "generation_attempt",
                json!({
                    "kind": kind,
                    "strategy": attempt.strategy,
                    "ok": attempt.succeeded(),
                    "elapsed_ms": attempt.elapsed.as_millis() as u64,
                    "error": attempt.error.as_ref().map(ToString::to_string),
                }),
            );
        }
    }

    fn keep_scratch_copy(&self, name: &str, raster: &image::RgbaImage) {
        let Some(dir) = self.context.scratch_dir() else {
            return;
        };
        let path = dir.join(name);
        if let Err(err) = raster.save(&path) {
            tracing::debug!(%err, path = %path.display(), "scratch copy skipped");
        }
    }

    fn record(&mut self, event_type: &str, payload: Value) {
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        self.context.events.record(event_type, payload);
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
