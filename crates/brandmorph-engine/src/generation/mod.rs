pub mod gemini;

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use brandmorph_contracts::strategies::{NamedStrategy, StrategyRegistry};
use image::RgbaImage;

use crate::config::{CapabilityFlags, EngineConfig};

pub use gemini::{GeminiBackend, GeminiContent, ImagenPredict, LegacyText};

pub const BACKDROP_SIZE: u32 = 1024;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("strategy panicked")]
    Panicked,
    #[error("latency budget exhausted")]
    BudgetExhausted,
}

/// Common surface of every invocation strategy.
pub trait GenerationStrategy: NamedStrategy + Send + Sync {
    /// `Some(reason)` when the strategy cannot be attempted at all, e.g.
    /// missing credentials. Checked before any worker is spawned.
    fn unavailable_reason(&self) -> Option<String> {
        None
    }
}

pub trait CaptionStrategy: GenerationStrategy {
    fn captions(
        &self,
        request: &CaptionRequest,
        timeout: Duration,
    ) -> Result<Vec<String>, StrategyError>;
}

pub trait ImageStrategy: GenerationStrategy {
    fn image(&self, request: &ImageRequest, timeout: Duration) -> Result<RgbaImage, StrategyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRequest {
    pub brand: String,
    pub product: String,
    pub count: usize,
}

impl CaptionRequest {
    pub fn new(brand: impl Into<String>, product: impl Into<String>, count: usize) -> Self {
        Self {
            brand: brand.into(),
            product: product.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: u32,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: BACKDROP_SIZE,
        }
    }

    pub fn backdrop(brand: &str, product: &str) -> Self {
        Self::new(format!(
            "Product photo of {product} by {brand}. Clean lifestyle backdrop, soft natural light, \
             generous empty space around the subject, no text, no logos."
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub strategy: String,
    pub elapsed: Duration,
    pub error: Option<StrategyError>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Generated<T> {
    pub payload: T,
    pub strategy: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Every strategy was skipped, failed or timed out.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} generation failed: {}", describe_attempts(.reason, .attempts))]
pub struct GenerationFailure {
    pub kind: &'static str,
    pub reason: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

fn describe_attempts(reason: &Option<String>, attempts: &[AttemptRecord]) -> String {
    if let Some(reason) = reason {
        return reason.clone();
    }
    if attempts.is_empty() {
        return "no strategies registered".to_string();
    }
    attempts
        .iter()
        .map(|attempt| match &attempt.error {
            Some(err) => format!("{}: {err}", attempt.strategy),
            None => format!("{}: ok", attempt.strategy),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Defensive front for the external generation capability.
///
/// Strategies are tried in registry order and each gets exactly one attempt
/// per request, run on its own worker thread and abandoned once its window
/// elapses. The window is the per-attempt timeout, shortened to whatever is
/// left of the request budget. Nothing is retained between requests.
pub struct GenerationAdapter {
    capabilities: CapabilityFlags,
    captions: StrategyRegistry<Arc<dyn CaptionStrategy>>,
    images: StrategyRegistry<Arc<dyn ImageStrategy>>,
    attempt_timeout: Duration,
    budget: Duration,
}

impl fmt::Debug for GenerationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationAdapter")
            .field("capabilities", &self.capabilities)
            .field("captions", &self.captions.names())
            .field("images", &self.images.names())
            .field("attempt_timeout", &self.attempt_timeout)
            .field("budget", &self.budget)
            .finish()
    }
}

impl GenerationAdapter {
    pub fn new(
        capabilities: CapabilityFlags,
        captions: StrategyRegistry<Arc<dyn CaptionStrategy>>,
        images: StrategyRegistry<Arc<dyn ImageStrategy>>,
        attempt_timeout: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            capabilities,
            captions,
            images,
            attempt_timeout,
            budget,
        }
    }

    /// Built-in Gemini strategies, reordered by `strategy_order`. All of them
    /// share one backend and its single HTTP client.
    pub fn from_config(config: &EngineConfig) -> Self {
        let backend = Arc::new(GeminiBackend::new(config.gemini.clone()));
        let content = Arc::new(GeminiContent::new(Arc::clone(&backend)));

        let mut captions: StrategyRegistry<Arc<dyn CaptionStrategy>> = StrategyRegistry::default();
        captions.push(content.clone());
        captions.push(Arc::new(LegacyText::new(Arc::clone(&backend))));

        let mut images: StrategyRegistry<Arc<dyn ImageStrategy>> = StrategyRegistry::default();
        images.push(content);
        images.push(Arc::new(ImagenPredict::new(backend)));

        Self::new(
            config.capabilities,
            captions.prioritize(&config.strategy_order),
            images.prioritize(&config.strategy_order),
            config.attempt_timeout,
            config.adapter_budget,
        )
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn caption_strategy_names(&self) -> Vec<String> {
        self.captions.names()
    }

    pub fn image_strategy_names(&self) -> Vec<String> {
        self.images.names()
    }

    pub fn request_captions(
        &self,
        request: &CaptionRequest,
    ) -> Result<Generated<Vec<String>>, GenerationFailure> {
        if !self.capabilities.captions_enabled {
            return Err(GenerationFailure {
                kind: "caption",
                reason: Some("caption generation disabled".to_string()),
                attempts: Vec::new(),
            });
        }
        let request = request.clone();
        self.first_success("caption", self.captions.strategies(), move |strategy, window| {
            let lines: Vec<String> = strategy
                .captions(&request, window)?
                .into_iter()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect();
            if lines.is_empty() {
                return Err(StrategyError::Malformed("no caption lines".to_string()));
            }
            Ok(lines)
        })
    }

    pub fn request_image(
        &self,
        request: &ImageRequest,
    ) -> Result<Generated<RgbaImage>, GenerationFailure> {
        if !self.capabilities.images_enabled {
            return Err(GenerationFailure {
                kind: "image",
                reason: Some("image generation disabled".to_string()),
                attempts: Vec::new(),
            });
        }
        let request = request.clone();
        self.first_success("image", self.images.strategies(), move |strategy, window| {
            let image = strategy.image(&request, window)?;
            if image.width() == 0 || image.height() == 0 {
                return Err(StrategyError::Malformed("image has zero dimensions".to_string()));
            }
            Ok(image)
        })
    }

    fn first_success<S, T, F>(
        &self,
        kind: &'static str,
        strategies: &[Arc<S>],
        call: F,
    ) -> Result<Generated<T>, GenerationFailure>
    where
        S: GenerationStrategy + ?Sized + 'static,
        T: Send + 'static,
        F: Fn(&S, Duration) -> Result<T, StrategyError> + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        let started = Instant::now();
        let mut attempts = Vec::with_capacity(strategies.len());

        for strategy in strategies {
            let name = strategy.name().to_string();
            if let Some(reason) = strategy.unavailable_reason() {
                attempts.push(AttemptRecord {
                    strategy: name,
                    elapsed: Duration::ZERO,
                    error: Some(StrategyError::Unavailable(reason)),
                });
                continue;
            }
            let remaining = self.budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                attempts.push(AttemptRecord {
                    strategy: name,
                    elapsed: Duration::ZERO,
                    error: Some(StrategyError::BudgetExhausted),
                });
                continue;
            }
            let window = self.attempt_timeout.min(remaining);

            let attempt_started = Instant::now();
            let outcome = spawn_attempt(&name, Arc::clone(strategy), Arc::clone(&call), window);
            let elapsed = attempt_started.elapsed();
            match outcome {
                Ok(payload) => {
                    tracing::debug!(kind, strategy = %name, ?elapsed, "generation attempt succeeded");
                    attempts.push(AttemptRecord {
                        strategy: name.clone(),
                        elapsed,
                        error: None,
                    });
                    return Ok(Generated {
                        payload,
                        strategy: name,
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::debug!(kind, strategy = %name, ?elapsed, error = %err, "generation attempt failed");
                    attempts.push(AttemptRecord {
                        strategy: name,
                        elapsed,
                        error: Some(err),
                    });
                }
            }
        }

        Err(GenerationFailure {
            kind,
            reason: None,
            attempts,
        })
    }
}

fn spawn_attempt<S, T, F>(
    name: &str,
    strategy: Arc<S>,
    call: Arc<F>,
    window: Duration,
) -> Result<T, StrategyError>
where
    S: GenerationStrategy + ?Sized + 'static,
    T: Send + 'static,
    F: Fn(&S, Duration) -> Result<T, StrategyError> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("brandmorph-{name}"))
        .spawn(move || {
            // Receiver may be gone after a timeout; the late result is dropped.
            let _ = tx.send((*call)(strategy.as_ref(), window));
        });
    if let Err(err) = spawned {
        return Err(StrategyError::Transport(format!(
            "could not start worker thread: {err}"
        )));
    }
    match rx.recv_timeout(window) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(StrategyError::TimedOut(window)),
        // Sender dropped without a send: the worker unwound.
        Err(RecvTimeoutError::Disconnected) => Err(StrategyError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use brandmorph_contracts::strategies::StrategyRegistry;
    use image::{Rgba, RgbaImage};

    use super::{
        CaptionRequest, CaptionStrategy, GenerationAdapter, ImageRequest, ImageStrategy,
        StrategyError,
    };
    use crate::config::{CapabilityFlags, EngineConfig};
    use crate::testing::{Script, ScriptedStrategy};

    const ENABLED: CapabilityFlags = CapabilityFlags {
        captions_enabled: true,
        images_enabled: true,
    };

    fn caption_adapter(
        strategies: Vec<Arc<ScriptedStrategy>>,
        attempt_timeout: Duration,
        budget: Duration,
    ) -> GenerationAdapter {
        let captions = StrategyRegistry::new(
            strategies
                .into_iter()
                .map(|strategy| strategy as Arc<dyn CaptionStrategy>)
                .collect(),
        );
        GenerationAdapter::new(
            ENABLED,
            captions,
            StrategyRegistry::default(),
            attempt_timeout,
            budget,
        )
    }

    fn request() -> CaptionRequest {
        CaptionRequest::new("Acme", "Rocket", 12)
    }

    #[test]
    fn first_successful_strategy_wins_in_priority_order() {
        let failing = ScriptedStrategy::shared("a", Script::Fail("boom"));
        let winner = ScriptedStrategy::shared("b", Script::Captions(vec!["One", "Two"]));
        let never = ScriptedStrategy::shared("c", Script::Captions(vec!["Three"]));
        let adapter = caption_adapter(
            vec![failing.clone(), winner.clone(), never.clone()],
            Duration::from_secs(2),
            Duration::from_secs(5),
        );

        let generated = adapter.request_captions(&request()).expect("b succeeds");
        assert_eq!(generated.strategy, "b");
        assert_eq!(generated.payload, vec!["One", "Two"]);
        assert_eq!(generated.attempts.len(), 2);
        assert!(!generated.attempts[0].succeeded());
        assert!(generated.attempts[1].succeeded());
        assert_eq!((failing.calls(), winner.calls(), never.calls()), (1, 1, 0));
    }

    #[test]
    fn unavailable_strategies_are_skipped_without_a_call() {
        let missing = ScriptedStrategy::shared("keyless", Script::Unavailable("no key"));
        let ok = ScriptedStrategy::shared("ok", Script::Captions(vec!["Hello"]));
        let adapter = caption_adapter(
            vec![missing.clone(), ok],
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        let generated = adapter.request_captions(&request()).expect("ok succeeds");
        assert_eq!(
            generated.attempts[0].error,
            Some(StrategyError::Unavailable("no key".to_string()))
        );
        assert_eq!(missing.calls(), 0);
    }

    #[test]
    fn slow_strategy_times_out_and_next_one_runs() {
        let slow = ScriptedStrategy::shared("slow", Script::Sleep(Duration::from_secs(3)));
        let fast = ScriptedStrategy::shared("fast", Script::Captions(vec!["Quick"]));
        let adapter = caption_adapter(
            vec![slow, fast],
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        let started = Instant::now();
        let generated = adapter.request_captions(&request()).expect("fast succeeds");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(generated.strategy, "fast");
        assert_eq!(
            generated.attempts[0].error,
            Some(StrategyError::TimedOut(Duration::from_millis(100)))
        );
    }

    #[test]
    fn total_budget_bounds_the_request() {
        let strategies = (0..4)
            .map(|idx| {
                ScriptedStrategy::shared(
                    &format!("slow-{idx}"),
                    Script::Sleep(Duration::from_secs(3)),
                )
            })
            .collect::<Vec<_>>();
        let adapter = caption_adapter(
            strategies.clone(),
            Duration::from_millis(150),
            Duration::from_millis(250),
        );
        let started = Instant::now();
        let failure = adapter.request_captions(&request()).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(failure.attempts.len(), 4);
        assert_eq!(
            failure.attempts.last().and_then(|attempt| attempt.error.clone()),
            Some(StrategyError::BudgetExhausted)
        );
        assert_eq!(strategies[3].calls(), 0);
    }

    #[test]
    fn panicking_strategy_is_a_failed_attempt() {
        let panics = ScriptedStrategy::shared("panics", Script::Panic);
        let ok = ScriptedStrategy::shared("ok", Script::Captions(vec!["Still here"]));
        let adapter = caption_adapter(
            vec![panics, ok],
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        let generated = adapter.request_captions(&request()).expect("ok succeeds");
        assert_eq!(generated.attempts[0].error, Some(StrategyError::Panicked));
    }

    #[test]
    fn blank_caption_payload_is_malformed() {
        let blank = ScriptedStrategy::shared("blank", Script::Captions(vec!["  ", ""]));
        let adapter = caption_adapter(vec![blank], Duration::from_secs(2), Duration::from_secs(5));
        let failure = adapter.request_captions(&request()).unwrap_err();
        assert!(matches!(
            failure.attempts[0].error,
            Some(StrategyError::Malformed(_))
        ));
        assert!(failure.to_string().starts_with("caption generation failed: blank:"));
    }

    #[test]
    fn disabled_capability_never_calls_strategies() {
        let ok = ScriptedStrategy::shared("ok", Script::Captions(vec!["Hi"]));
        let mut adapter = caption_adapter(
            vec![ok.clone()],
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        adapter.capabilities = CapabilityFlags::default();
        let failure = adapter.request_captions(&request()).unwrap_err();
        assert!(failure.attempts.is_empty());
        assert_eq!(failure.reason.as_deref(), Some("caption generation disabled"));
        assert_eq!(ok.calls(), 0);
    }

    #[test]
    fn image_requests_reject_empty_rasters() {
        let empty = ScriptedStrategy::shared("empty", Script::Image(RgbaImage::new(0, 0)));
        let good = ScriptedStrategy::shared(
            "good",
            Script::Image(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]))),
        );
        let images = StrategyRegistry::new(vec![
            empty as Arc<dyn ImageStrategy>,
            good as Arc<dyn ImageStrategy>,
        ]);
        let adapter = GenerationAdapter::new(
            ENABLED,
            StrategyRegistry::default(),
            images,
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        let generated = adapter
            .request_image(&ImageRequest::backdrop("Acme", "Rocket"))
            .expect("good succeeds");
        assert_eq!(generated.strategy, "good");
        assert_eq!(generated.payload.dimensions(), (4, 4));
    }

    #[test]
    fn empty_registry_fails_cleanly() {
        let adapter = caption_adapter(Vec::new(), Duration::from_secs(1), Duration::from_secs(1));
        let failure = adapter.request_captions(&request()).unwrap_err();
        assert!(failure.to_string().contains("no strategies registered"));
    }

    #[test]
    fn from_config_honours_strategy_order() {
        let config = EngineConfig {
            strategy_order: vec!["gemini-legacy-text".to_string(), "imagen-predict".to_string()],
            ..EngineConfig::default()
        };
        let adapter = GenerationAdapter::from_config(&config);
        assert_eq!(
            adapter.caption_strategy_names(),
            vec!["gemini-legacy-text", "gemini-content"]
        );
        assert_eq!(
            adapter.image_strategy_names(),
            vec!["imagen-predict", "gemini-content"]
        );
    }

    #[test]
    fn keyless_config_reports_every_strategy_unavailable() {
        let config = EngineConfig {
            capabilities: ENABLED,
            ..EngineConfig::default()
        };
        let adapter = GenerationAdapter::from_config(&config);
        let failure = adapter.request_captions(&request()).unwrap_err();
        assert_eq!(failure.attempts.len(), 2);
        assert!(failure
            .attempts
            .iter()
            .all(|attempt| matches!(attempt.error, Some(StrategyError::Unavailable(_)))));
    }
}
