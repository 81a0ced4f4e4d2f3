use std::collections::HashSet;

use brandmorph_contracts::runs::variant::CaptionSource;

use crate::error::DegradedCapability;
use crate::generation::{AttemptRecord, CaptionRequest, GenerationAdapter};

pub const CAPTION_COUNT: usize = 12;
pub const MAX_CAPTION_CHARS: usize = 160;
const MAX_NAME_CHARS: usize = 48;
const STAGE: &str = "caption generation";

const BUILTIN_PHRASES: [&str; 24] = [
    "{brand} {product}: style meets performance.",
    "Upgrade your day with the {product} from {brand}.",
    "Feel the difference with {brand}'s {product}. Shop now!",
    "The {product} by {brand}, crafted for comfort and quality.",
    "Special offer: grab the {product} by {brand} today.",
    "Introducing the {product}. Only from {brand}.",
    "{brand} presents the {product}. Made to stand out.",
    "Meet the new {product} from {brand}.",
    "Your everyday just got better: {product} by {brand}.",
    "Designed by {brand}. Loved by everyone. The {product}.",
    "Make it yours: the {product} from {brand}.",
    "Less hassle, more joy with the {product} by {brand}.",
    "Built to last. The {brand} {product}.",
    "See why people switch to the {brand} {product}.",
    "The {product} you have been waiting for, by {brand}.",
    "Small upgrade, big difference: {brand} {product}.",
    "Bring home the {product}. Backed by {brand}.",
    "Quality you can feel in every {brand} {product}.",
    "Treat yourself to the {product} from {brand}.",
    "New season, new favourite: {brand} {product}.",
    "Simply better. The {product} by {brand}.",
    "From {brand} with care: the {product}.",
    "Limited stock. Get the {brand} {product} now.",
    "Everything you want in a {product}, from {brand}.",
];

/// Fallback phrases with `{brand}` and `{product}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionPool {
    phrases: Vec<String>,
}

impl Default for CaptionPool {
    fn default() -> Self {
        Self {
            phrases: BUILTIN_PHRASES.iter().map(|phrase| phrase.to_string()).collect(),
        }
    }
}

impl CaptionPool {
    /// Custom phrases first, then the built-in ones, so a short custom pool
    /// still yields enough distinct captions.
    pub fn new(custom: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let phrases = custom
            .into_iter()
            .chain(BUILTIN_PHRASES.iter().map(|phrase| phrase.to_string()))
            .map(|phrase| phrase.trim().to_string())
            .filter(|phrase| !phrase.is_empty() && seen.insert(phrase.to_lowercase()))
            .collect();
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Phrases with names substituted, normalized, invalid and duplicate
    /// renderings dropped. Order follows the pool.
    pub fn render(&self, brand: &str, product: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.phrases
            .iter()
            .filter_map(|phrase| {
                normalize_caption(
                    &phrase
                        .replace("{brand}", brand)
                        .replace("{product}", product),
                )
            })
            .filter(|caption| seen.insert(caption.to_lowercase()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub text: String,
    pub source: CaptionSource,
}

#[derive(Debug, Clone)]
pub struct CaptionBatch {
    /// Always `CAPTION_COUNT` entries; entry `i` belongs to template `i + 1`.
    pub captions: Vec<Caption>,
    pub strategy: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub rejected: usize,
    pub degraded: Option<DegradedCapability>,
}

impl CaptionBatch {
    pub fn count(&self, source: CaptionSource) -> usize {
        self.captions
            .iter()
            .filter(|caption| caption.source == source)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptionGenerator {
    pool: CaptionPool,
}

impl CaptionGenerator {
    pub fn new(pool: CaptionPool) -> Self {
        Self { pool }
    }

    pub fn generate(
        &self,
        adapter: &GenerationAdapter,
        brand: &str,
        product: &str,
    ) -> CaptionBatch {
        let brand = display_name(brand, "Brand");
        let product = display_name(product, "Product");
        let request = CaptionRequest::new(brand.clone(), product.clone(), CAPTION_COUNT);

        let mut captions: Vec<Caption> = Vec::with_capacity(CAPTION_COUNT);
        let mut seen = HashSet::new();
        let mut rejected = 0;
        let (strategy, attempts, mut degraded) = match adapter.request_captions(&request) {
            Ok(generated) => {
                for raw in &generated.payload {
                    if captions.len() == CAPTION_COUNT {
                        break;
                    }
                    match normalize_caption(raw) {
                        Some(text) if seen.insert(text.to_lowercase()) => captions.push(Caption {
                            text,
                            source: CaptionSource::Generated,
                        }),
                        _ => rejected += 1,
                    }
                }
                (Some(generated.strategy), generated.attempts, None)
            }
            Err(failure) => {
                let degraded = DegradedCapability::new(STAGE, failure.to_string());
                (None, failure.attempts, Some(degraded))
            }
        };

        let generated = captions.len();
        if generated < CAPTION_COUNT {
            for text in self.pool.render(&brand, &product) {
                if captions.len() == CAPTION_COUNT {
                    break;
                }
                if seen.insert(text.to_lowercase()) {
                    captions.push(Caption {
                        text,
                        source: CaptionSource::Fallback,
                    });
                }
            }
        }
        let mut serial = 1;
        while captions.len() < CAPTION_COUNT {
            let text = format!("{brand} {product} #{serial}");
            serial += 1;
            if seen.insert(text.to_lowercase()) {
                captions.push(Caption {
                    text,
                    source: CaptionSource::Fallback,
                });
            }
        }

        if degraded.is_none() && generated < CAPTION_COUNT {
            degraded = Some(DegradedCapability::new(
                STAGE,
                format!(
                    "{generated} usable generated captions, {} filled from the pool",
                    CAPTION_COUNT - generated
                ),
            ));
        }
        tracing::debug!(
            generated,
            rejected,
            fallback = CAPTION_COUNT - generated,
            "captions ready"
        );

        CaptionBatch {
            captions,
            strategy,
            attempts,
            rejected,
            degraded,
        }
    }
}

/// Single-line display form of a caption, or `None` if nothing usable is
/// left or it is longer than `MAX_CAPTION_CHARS`.
pub fn normalize_caption(raw: &str) -> Option<String> {
    let flattened: String = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect();
    let collapsed = flattened.split_whitespace().collect::<Vec<_>>().join(" ");
    let unlisted = strip_list_marker(&collapsed);
    let text = unlisted
        .trim_matches(|ch: char| matches!(ch, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .trim();
    if text.is_empty() || text.chars().count() > MAX_CAPTION_CHARS {
        return None;
    }
    Some(text.to_string())
}

/// Drops a leading bullet or `1.` / `2)` / `3:` numbering. A marker only
/// counts when whitespace follows it, so "1.5x faster" and "-20% off" survive.
fn strip_list_marker(text: &str) -> &str {
    let unbulleted = text
        .strip_prefix(|ch: char| matches!(ch, '-' | '*' | '•' | '·' | '–'))
        .and_then(followed_by_space)
        .unwrap_or(text);
    let digits = unbulleted.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 2 {
        let rest = &unbulleted[digits..];
        if let Some(stripped) = rest
            .strip_prefix(|ch: char| matches!(ch, '.' | ')' | ':'))
            .and_then(followed_by_space)
        {
            return stripped;
        }
    }
    unbulleted
}

fn followed_by_space(rest: &str) -> Option<&str> {
    rest.starts_with(char::is_whitespace)
        .then(|| rest.trim_start())
}

fn display_name(raw: &str, default: &str) -> String {
    let collapsed = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        return default.to_string();
    }
    collapsed.chars().take(MAX_NAME_CHARS).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use brandmorph_contracts::runs::variant::CaptionSource;
    use brandmorph_contracts::strategies::StrategyRegistry;

    use super::{
        display_name, normalize_caption, CaptionGenerator, CaptionPool, CAPTION_COUNT,
        MAX_CAPTION_CHARS,
    };
    use crate::config::CapabilityFlags;
    use crate::generation::{CaptionStrategy, GenerationAdapter};
    use crate::testing::{Script, ScriptedStrategy};

    fn adapter_with(script: Script) -> GenerationAdapter {
        let strategy = ScriptedStrategy::shared("scripted", script);
        GenerationAdapter::new(
            CapabilityFlags {
                captions_enabled: true,
                images_enabled: false,
            },
            StrategyRegistry::new(vec![strategy as Arc<dyn CaptionStrategy>]),
            StrategyRegistry::default(),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
    }

    fn disabled_adapter() -> GenerationAdapter {
        GenerationAdapter::new(
            CapabilityFlags::default(),
            StrategyRegistry::default(),
            StrategyRegistry::default(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn disabled_adapter_yields_twelve_pool_captions_in_order() {
        let batch = CaptionGenerator::default().generate(&disabled_adapter(), "Acme", "Rocket");
        assert_eq!(batch.captions.len(), CAPTION_COUNT);
        assert_eq!(batch.count(CaptionSource::Fallback), CAPTION_COUNT);
        assert_eq!(batch.captions[0].text, "Acme Rocket: style meets performance.");
        assert_eq!(
            batch.captions[1].text,
            "Upgrade your day with the Rocket from Acme."
        );
        assert!(batch.degraded.is_some());
        assert!(batch.strategy.is_none());
    }

    #[test]
    fn generated_captions_are_cleaned_deduped_and_topped_up() {
        let adapter = adapter_with(Script::Captions(vec![
            "1. Run faster than ever",
            "\"Run faster than ever\"",
            "2) Own the morning",
            "",
            "• Bold by design",
        ]));
        let batch = CaptionGenerator::default().generate(&adapter, "Acme", "Rocket");
        assert_eq!(batch.captions.len(), CAPTION_COUNT);
        let texts: Vec<&str> = batch.captions.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            &texts[..3],
            &["Run faster than ever", "Own the morning", "Bold by design"]
        );
        assert_eq!(batch.count(CaptionSource::Generated), 3);
        assert_eq!(batch.count(CaptionSource::Fallback), 9);
        assert_eq!(batch.rejected, 1);
        assert_eq!(batch.strategy.as_deref(), Some("scripted"));
        assert!(batch
            .degraded
            .as_ref()
            .is_some_and(|degraded| degraded.reason.starts_with("3 usable")));
    }

    #[test]
    fn surplus_generated_captions_are_cut_at_twelve() {
        let lines: Vec<&'static str> = vec![
            "Alpha", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India",
            "Juliet", "Kilo", "Lima", "Mike", "November",
        ];
        let batch = CaptionGenerator::default().generate(
            &adapter_with(Script::Captions(lines)),
            "A",
            "B",
        );
        assert_eq!(batch.count(CaptionSource::Generated), CAPTION_COUNT);
        assert_eq!(batch.captions[11].text, "Lima");
        assert!(batch.degraded.is_none());
    }

    #[test]
    fn failing_adapter_falls_back_entirely() {
        let batch = CaptionGenerator::default().generate(
            &adapter_with(Script::Fail("upstream 500")),
            "Acme",
            "Rocket",
        );
        assert_eq!(batch.count(CaptionSource::Fallback), CAPTION_COUNT);
        assert_eq!(batch.attempts.len(), 1);
        let reason = batch.degraded.map(|d| d.reason).unwrap_or_default();
        assert!(reason.contains("upstream 500"));
    }

    #[test]
    fn blank_names_use_defaults() {
        let batch = CaptionGenerator::default().generate(&disabled_adapter(), "  ", "\n");
        assert_eq!(batch.captions[0].text, "Brand Product: style meets performance.");
    }

    #[test]
    fn captions_are_unique_single_lines_for_awkward_names() {
        let long = "X".repeat(400);
        let batch =
            CaptionGenerator::default().generate(&disabled_adapter(), &long, "Line\nBreak");
        let mut seen = HashSet::new();
        for caption in &batch.captions {
            assert!(!caption.text.contains('\n'));
            assert!(!caption.text.is_empty());
            assert!(seen.insert(caption.text.to_lowercase()));
        }
        assert_eq!(batch.captions.len(), CAPTION_COUNT);
    }

    #[test]
    fn short_custom_pool_is_topped_up() {
        let pool = CaptionPool::new(vec![
            "{product} rules".to_string(),
            "{PRODUCT} RULES".to_string(),
            "{brand} forever".to_string(),
        ]);
        assert!(pool.phrases().len() >= CAPTION_COUNT);
        let batch = CaptionGenerator::new(pool).generate(&disabled_adapter(), "Acme", "Rocket");
        assert_eq!(batch.captions[0].text, "Rocket rules");
        assert_eq!(batch.captions[1].text, "Acme forever");
        assert_eq!(batch.captions.len(), CAPTION_COUNT);
    }

    #[test]
    fn normalize_rejects_empty_and_overlong() {
        assert_eq!(normalize_caption("  \t "), None);
        assert_eq!(normalize_caption("\"\""), None);
        assert_eq!(normalize_caption(&"a".repeat(MAX_CAPTION_CHARS + 1)), None);
        assert_eq!(
            normalize_caption("  multi\nline\tcaption  ").as_deref(),
            Some("multi line caption")
        );
        assert_eq!(normalize_caption("12: Twelve").as_deref(), Some("Twelve"));
        assert_eq!(normalize_caption("2024 was great").as_deref(), Some("2024 was great"));
    }

    #[test]
    fn list_markers_need_trailing_whitespace() {
        assert_eq!(
            normalize_caption("1.5x faster than before").as_deref(),
            Some("1.5x faster than before")
        );
        assert_eq!(normalize_caption("-20% off today").as_deref(), Some("-20% off today"));
        assert_eq!(normalize_caption("3)Ready").as_deref(), Some("3)Ready"));
        assert_eq!(normalize_caption("1. Faster").as_deref(), Some("Faster"));
        assert_eq!(normalize_caption("- 2) Bolder").as_deref(), Some("Bolder"));
        assert_eq!(normalize_caption("• Lighter").as_deref(), Some("Lighter"));
    }

    #[test]
    fn display_name_truncates_and_defaults() {
        assert_eq!(display_name("", "Brand"), "Brand");
        assert_eq!(display_name(" Acme \t Co ", "Brand"), "Acme Co");
        assert_eq!(display_name(&"y".repeat(100), "Brand").chars().count(), 48);
    }
}
