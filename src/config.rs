use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure loaded from lituk.toml and environment variables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub system: SystemConfig,
    pub ingest: IngestConfig,
    pub exam: ExamConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// System-level configuration for model providers and storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub chat_provider: String,
    pub chat_model: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub retries: u32,
    pub database_path: PathBuf,
}

/// Embedding configuration snapshot for use across components
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub retries: u32,
}

/// PDF ingestion pipeline tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub snap_window: usize,
    pub embed_batch_size: usize,
    pub batch_delay_ms: u64,
    pub llm_requests_per_minute: u32,
    pub generation_chunks: usize,
    pub max_upload_bytes: usize,
    pub duplicate_threshold: f64,
}

/// Mock exam rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExamConfig {
    pub mock_question_count: usize,
    pub pass_mark_percent: u32,
    pub time_limit_minutes: i64,
    pub readiness_window: usize,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub http_bind: std::net::SocketAddr,
    pub log_level: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
    pub chat_history_limit: usize,
    pub search_top_k: usize,
    pub search_min_score: f32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "lituk=info,tower_http=info".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            cors_origins: Vec::new(),
            request_timeout_ms: 90_000,
            chat_history_limit: 10,
            search_top_k: 5,
            search_min_score: 0.2,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lituk")
        .join("lituk.db")
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses LITUK_CONFIG environment variable or defaults to "lituk.toml"
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(env_path) = std::env::var("LITUK_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path =
            std::env::var("LITUK_CONFIG").unwrap_or_else(|_| "lituk.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply LITUK_* overrides on top of file values (env-first)
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("LITUK_DB_PATH") {
            self.system.database_path = PathBuf::from(path);
            tracing::debug!("LITUK_DB_PATH env override applied");
        }
        if let Ok(provider) = std::env::var("LITUK_CHAT_PROVIDER") {
            self.system.chat_provider = provider;
        }
        if let Ok(model) = std::env::var("LITUK_CHAT_MODEL") {
            self.system.chat_model = model;
        }
        if let Ok(provider) = std::env::var("LITUK_EMBED_PROVIDER") {
            self.system.embedding_provider = provider;
        }
        if let Ok(model) = std::env::var("LITUK_EMBED_MODEL") {
            self.system.embedding_model = model;
        }
        if let Some(dim) = env_parse::<usize>("LITUK_EMBED_DIM") {
            self.system.embedding_dimensions = dim;
        }
        if let Some(retries) = env_parse::<u32>("LITUK_RETRIES") {
            self.system.retries = retries;
        }
        if let Some(size) = env_parse::<usize>("LITUK_CHUNK_SIZE") {
            self.ingest.chunk_size = size;
        }
        if let Some(overlap) = env_parse::<usize>("LITUK_CHUNK_OVERLAP") {
            self.ingest.chunk_overlap = overlap;
        }
        if let Some(batch) = env_parse::<usize>("LITUK_EMBED_BATCH_SIZE") {
            self.ingest.embed_batch_size = batch;
        }
        if let Some(delay) = env_parse::<u64>("LITUK_BATCH_DELAY_MS") {
            self.ingest.batch_delay_ms = delay;
        }
    }

    /// Validate and clamp values that would otherwise break the pipeline
    fn validate(&mut self) -> anyhow::Result<()> {
        if self.system.retries == 0 {
            self.system.retries = 1;
        } else if self.system.retries > 10 {
            tracing::warn!("retries {} exceeds max 10, clamping to 10", self.system.retries);
            self.system.retries = 10;
        }

        if self.ingest.embed_batch_size == 0 {
            anyhow::bail!("ingest.embed_batch_size must be at least 1");
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            tracing::warn!(
                "chunk_overlap {} >= chunk_size {}, clamping",
                self.ingest.chunk_overlap,
                self.ingest.chunk_size
            );
            self.ingest.chunk_overlap = self.ingest.chunk_size.saturating_sub(1);
        }
        if !(0.0..=1.0).contains(&self.ingest.duplicate_threshold) {
            anyhow::bail!("ingest.duplicate_threshold must be between 0.0 and 1.0");
        }
        if self.ingest.llm_requests_per_minute == 0 {
            anyhow::bail!("ingest.llm_requests_per_minute must be at least 1");
        }
        if self.exam.pass_mark_percent > 100 {
            anyhow::bail!("exam.pass_mark_percent must be at most 100");
        }
        if self.exam.mock_question_count == 0 {
            anyhow::bail!("exam.mock_question_count must be at least 1");
        }

        match self.system.embedding_model.as_str() {
            "text-embedding-3-small" if self.system.embedding_dimensions != 1536 => {
                tracing::warn!(
                    "OpenAI text-embedding-3-small should use 1536 dimensions, got {}",
                    self.system.embedding_dimensions
                );
            }
            "text-embedding-3-large" if self.system.embedding_dimensions != 3072 => {
                tracing::warn!(
                    "OpenAI text-embedding-3-large should use 3072 dimensions, got {}",
                    self.system.embedding_dimensions
                );
            }
            _ => {}
        }

        Ok(())
    }

    /// Convenience: snapshot embedding configuration
    pub fn embedding(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: self.system.embedding_provider.clone(),
            model: self.system.embedding_model.clone(),
            dimensions: self.system.embedding_dimensions,
            retries: self.system.retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                chat_provider: "openai".to_string(),
                chat_model: "gpt-4o-mini".to_string(),
                embedding_provider: String::new(),
                embedding_model: "text-embedding-3-small".to_string(),
                embedding_dimensions: 1536,
                retries: 3,
                database_path: default_database_path(),
            },
            ingest: IngestConfig {
                chunk_size: 1000,
                chunk_overlap: 200,
                snap_window: 200,
                embed_batch_size: 5,
                batch_delay_ms: 1000,
                llm_requests_per_minute: 30,
                generation_chunks: 8,
                max_upload_bytes: 25 * 1024 * 1024,
                duplicate_threshold: 0.9,
            },
            exam: ExamConfig {
                mock_question_count: 24,
                pass_mark_percent: 75,
                time_limit_minutes: 45,
                readiness_window: 5,
            },
            runtime: RuntimeConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(defaults.openai_base_url),
            http_bind: env_parse("LITUK_HTTP_BIND").unwrap_or(defaults.http_bind),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            access_ttl_minutes: env_parse("LITUK_ACCESS_TTL_MINUTES")
                .filter(|&m: &i64| m > 0)
                .unwrap_or(defaults.access_ttl_minutes),
            refresh_ttl_days: env_parse("LITUK_REFRESH_TTL_DAYS")
                .filter(|&d: &i64| d > 0)
                .unwrap_or(defaults.refresh_ttl_days),
            cors_origins: std::env::var("LITUK_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            request_timeout_ms: env_parse("LITUK_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout_ms),
            chat_history_limit: env_parse("LITUK_CHAT_HISTORY_LIMIT")
                .unwrap_or(defaults.chat_history_limit),
            search_top_k: env_parse::<usize>("LITUK_SEARCH_TOP_K")
                .map(|k| k.clamp(1, 50))
                .unwrap_or(defaults.search_top_k),
            search_min_score: env_parse::<f32>("LITUK_SEARCH_MIN_SCORE")
                .filter(|s| (-1.0..=1.0).contains(s))
                .unwrap_or(defaults.search_min_score),
        }
    }
}
