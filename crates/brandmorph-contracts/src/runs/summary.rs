use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::state::RunState;
use super::variant::{CaptionSource, VariantDescriptor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub state: RunState,
    pub archive_path: Option<String>,
    pub variants: Vec<VariantDescriptor>,
    pub degradations: Vec<String>,
}

impl RunSummary {
    pub fn caption_count(&self, source: CaptionSource) -> usize {
        self.variants
            .iter()
            .filter(|variant| variant.caption_source == source)
            .count()
    }
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert(
        "total_variants".to_string(),
        Value::Number(summary.variants.len().into()),
    );
    payload.insert(
        "generated_captions".to_string(),
        Value::Number(summary.caption_count(CaptionSource::Generated).into()),
    );
    payload.insert(
        "fallback_captions".to_string(),
        Value::Number(summary.caption_count(CaptionSource::Fallback).into()),
    );
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
