// THEORY:
// The engine consumes a handful of externally configured values: where the models
// live, how long retrieval may take, whether accelerator hardware is present, and
// a few tunables for the face-isolation policy and the extraction schema. They are
// gathered once into an `AnalysisConfig` at process start and never change
// afterwards.
//
// Values come from `LOCALE_VISION_*` environment variables layered over the
// defaults below. Parsing goes through a lookup function so tests can feed a
// fixed map instead of touching the process environment.

use crate::core_modules::schema::StubFieldPolicy;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "LOCALE_VISION_";

/// Retrieval settings for the Resilient Fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound for a single direct retrieval.
    pub direct_timeout: Duration,
    /// Upper bound for the single rendering fallback.
    pub render_timeout: Duration,
    /// User agent presented by the pooled HTTP client.
    pub user_agent: String,
    /// Maximum number of rendering contexts alive at once.
    pub max_render_contexts: usize,
    /// Whether plain fetches may fall back to rendering.
    pub allow_rendering: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(30),
            user_agent: format!("locale_vision/{}", env!("CARGO_PKG_VERSION")),
            max_render_contexts: 2,
            allow_rendering: true,
        }
    }
}

/// Tunables for the Biometric Matcher. The match threshold is fixed and lives in
/// `face_matcher::MATCH_THRESHOLD`, not here.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Shared deadline for the whole match call, both fetches included.
    pub deadline: Duration,
    /// Detector candidates scoring below this are ignored.
    pub min_detection_score: f32,
    /// How many times larger the biggest face must be than the runner-up for the
    /// image to count as having a single prominent face.
    pub prominence_ratio: f32,
    /// Pixels of context kept around the detected face box before resizing.
    pub face_margin: u32,
    /// Whether image fetches may use the rendering fallback. A rendered page is
    /// markup, not pixels, so this is off unless a render engine produces images.
    pub render_images: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(45),
            min_detection_score: 0.9,
            prominence_ratio: 2.0,
            face_margin: 0,
            render_images: false,
        }
    }
}

/// Tunables for the Document Field Extractor.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Shared deadline for the whole extraction call.
    pub deadline: Duration,
    /// Confidence reported when the OCR engine exposes no score of its own.
    /// This constant does not reflect transcription quality.
    pub placeholder_confidence: f64,
    /// Whether fields without a real heuristic are reported absent or carry the
    /// legacy placeholder values.
    pub stub_fields: StubFieldPolicy,
    /// Whether document fetches may use the rendering fallback.
    pub render_documents: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            placeholder_confidence: 0.95,
            stub_fields: StubFieldPolicy::Absent,
            render_documents: false,
        }
    }
}

/// Where the opaque models come from and what hardware they may use.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Path to the face embedding model (ONNX export of a FaceNet-style network).
    pub embedder_path: Option<PathBuf>,
    /// Square input edge, in pixels, expected by the embedder.
    pub embedder_input_size: u32,
    /// Whether accelerator hardware may be used for inference.
    pub use_accelerator: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedder_path: None,
            embedder_input_size: 160,
            use_accelerator: false,
        }
    }
}

/// The complete, immutable configuration of the engine.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub fetch: FetchConfig,
    pub matcher: MatcherConfig,
    pub extractor: ExtractorConfig,
    pub models: ModelConfig,
    /// Size of the inference worker pool.
    pub inference_workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            matcher: MatcherConfig::default(),
            extractor: ExtractorConfig::default(),
            models: ModelConfig::default(),
            inference_workers: num_cpus::get().max(1),
        }
    }
}

impl AnalysisConfig {
    /// Builds a configuration from `LOCALE_VISION_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup, layering values over the defaults.
    /// Keys are given without the `LOCALE_VISION_` prefix in this listing:
    /// `FETCH_TIMEOUT_MS`, `RENDER_TIMEOUT_MS`, `USER_AGENT`, `MAX_RENDER_CONTEXTS`,
    /// `ALLOW_RENDERING`, `MATCH_DEADLINE_MS`, `MIN_DETECTION_SCORE`,
    /// `PROMINENCE_RATIO`, `FACE_MARGIN`, `RENDER_IMAGES`, `EXTRACT_DEADLINE_MS`,
    /// `PLACEHOLDER_CONFIDENCE`, `STUB_FIELDS`, `RENDER_DOCUMENTS`,
    /// `EMBEDDER_MODEL`, `EMBEDDER_INPUT_SIZE`, `USE_ACCELERATOR`,
    /// `INFERENCE_WORKERS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = AnalysisConfig::default();

        // --- Retrieval ---
        if let Some(ms) = env.parse::<u64>("FETCH_TIMEOUT_MS")? {
            config.fetch.direct_timeout = positive_millis("FETCH_TIMEOUT_MS", ms)?;
        }
        if let Some(ms) = env.parse::<u64>("RENDER_TIMEOUT_MS")? {
            config.fetch.render_timeout = positive_millis("RENDER_TIMEOUT_MS", ms)?;
        }
        if let Some(agent) = env.raw("USER_AGENT") {
            config.fetch.user_agent = agent;
        }
        if let Some(contexts) = env.parse::<usize>("MAX_RENDER_CONTEXTS")? {
            config.fetch.max_render_contexts = at_least_one("MAX_RENDER_CONTEXTS", contexts)?;
        }
        if let Some(allow) = env.flag("ALLOW_RENDERING")? {
            config.fetch.allow_rendering = allow;
        }

        // --- Matcher ---
        if let Some(ms) = env.parse::<u64>("MATCH_DEADLINE_MS")? {
            config.matcher.deadline = positive_millis("MATCH_DEADLINE_MS", ms)?;
        }
        if let Some(score) = env.parse::<f32>("MIN_DETECTION_SCORE")? {
            if !(0.0..=1.0).contains(&score) {
                return Err(invalid("MIN_DETECTION_SCORE", &score.to_string(), "must be within [0, 1]"));
            }
            config.matcher.min_detection_score = score;
        }
        if let Some(ratio) = env.parse::<f32>("PROMINENCE_RATIO")? {
            if !(ratio >= 1.0) {
                return Err(invalid("PROMINENCE_RATIO", &ratio.to_string(), "must be at least 1.0"));
            }
            config.matcher.prominence_ratio = ratio;
        }
        if let Some(margin) = env.parse::<u32>("FACE_MARGIN")? {
            config.matcher.face_margin = margin;
        }
        if let Some(render) = env.flag("RENDER_IMAGES")? {
            config.matcher.render_images = render;
        }

        // --- Extractor ---
        if let Some(ms) = env.parse::<u64>("EXTRACT_DEADLINE_MS")? {
            config.extractor.deadline = positive_millis("EXTRACT_DEADLINE_MS", ms)?;
        }
        if let Some(confidence) = env.parse::<f64>("PLACEHOLDER_CONFIDENCE")? {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(invalid(
                    "PLACEHOLDER_CONFIDENCE",
                    &confidence.to_string(),
                    "must be within [0, 1]",
                ));
            }
            config.extractor.placeholder_confidence = confidence;
        }
        if let Some(policy) = env.parse::<StubFieldPolicy>("STUB_FIELDS")? {
            config.extractor.stub_fields = policy;
        }
        if let Some(render) = env.flag("RENDER_DOCUMENTS")? {
            config.extractor.render_documents = render;
        }

        // --- Models ---
        if let Some(path) = env.raw("EMBEDDER_MODEL") {
            config.models.embedder_path = Some(PathBuf::from(path));
        }
        if let Some(size) = env.parse::<u32>("EMBEDDER_INPUT_SIZE")? {
            config.models.embedder_input_size = at_least_one("EMBEDDER_INPUT_SIZE", size as usize)? as u32;
        }
        if let Some(accelerate) = env.flag("USE_ACCELERATOR")? {
            config.models.use_accelerator = accelerate;
        }
        if let Some(workers) = env.parse::<usize>("INFERENCE_WORKERS")? {
            config.inference_workers = at_least_one("INFERENCE_WORKERS", workers)?;
        }

        Ok(config)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(key) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| invalid(key, &value, &e.to_string())),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.raw(key) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(invalid(key, &value, "expected a boolean")),
            },
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn positive_millis(key: &str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

fn at_least_one(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(invalid(key, "0", "must be at least 1"));
    }
    Ok(value)
}
