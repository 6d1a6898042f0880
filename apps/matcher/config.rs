use anyhow::{Result, bail};
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::{info, warn};

pub const DEFAULT_COLLECTIONS: [&str; 8] = [
    "doctors",
    "hospitals",
    "appointments",
    "insurances",
    "medicalreports",
    "reviews",
    "symptomhistories",
    "users",
];

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MatcherConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub ranking: RankingConfig,
    pub poller: PollerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Ollama,
    Fastembed,
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbeddingProvider::Ollama),
            "fastembed" => Ok(EmbeddingProvider::Fastembed),
            "hashing" => Ok(EmbeddingProvider::Hashing),
            other => bail!("unknown embedding provider '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub host: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            host: "http://localhost:11434".to_string(),
            model: "all-minilm".to_string(),
            dimension: 384,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub doctors_collection: String,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            doctors_collection: "doctors".to_string(),
            default_top_k: 5,
            max_top_k: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub collections: Vec<String>,
    pub output_path: PathBuf,
    pub channel_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            output_path: PathBuf::from("./live_docs.jsonl"),
            channel_capacity: 1024,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be greater than zero");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than zero");
        }
        if self.poller.enabled && self.poller.interval_secs == 0 {
            bail!("poller.interval_secs must be greater than zero");
        }
        if self.poller.channel_capacity == 0 {
            bail!("poller.channel_capacity must be greater than zero");
        }
        if self.ranking.default_top_k == 0 || self.ranking.default_top_k > self.ranking.max_top_k {
            bail!(
                "ranking.default_top_k must be between 1 and max_top_k ({})",
                self.ranking.max_top_k
            );
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str> {
        match self.database.url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url),
            _ => bail!(utils::errors::DATABASE_URL_NOT_SET),
        }
    }
}

/// Load `matcher.yaml` (or `MATCHER_CONFIG_PATH`), then apply environment
/// overrides and validate.
pub fn load() -> Result<MatcherConfig> {
    let path = env::var("MATCHER_CONFIG_PATH").unwrap_or_else(|_| "matcher.yaml".to_string());
    let mut config = match fs::read_to_string(&path) {
        Ok(contents) => parse(&contents).unwrap_or_else(|err| {
            warn!(error = %err, path = %path, "Failed to parse matcher config, using defaults");
            MatcherConfig::default()
        }),
        Err(err) => {
            warn!(error = %err, path = %path, "Matcher config not found, using defaults");
            MatcherConfig::default()
        }
    };

    apply_overrides(&mut config, |key| env::var(key).ok());
    config.validate()?;

    info!(
        bind_addr = %config.server.bind_addr,
        provider = ?config.embedding.provider,
        model = %config.embedding.model,
        dimension = config.embedding.dimension,
        poller_enabled = config.poller.enabled,
        collections = config.poller.collections.len(),
        "Matcher config loaded"
    );

    Ok(config)
}

pub fn parse(contents: &str) -> Result<MatcherConfig> {
    Ok(serde_yaml::from_str(contents)?)
}

fn apply_overrides(config: &mut MatcherConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup("DATABASE_URL") {
        config.database.url = Some(value);
    }
    if let Some(value) = lookup("MATCHER_BIND_ADDR") {
        config.server.bind_addr = value;
    }
    if let Some(value) = lookup("OLLAMA_HOST") {
        config.embedding.host = value;
    }
    if let Some(value) = lookup("EMBED_MODEL") {
        config.embedding.model = value;
    }
    if let Some(value) = lookup("LIVE_OUTPUT_PATH") {
        config.poller.output_path = PathBuf::from(value);
    }
    if let Some(value) = lookup("POLL_COLLECTIONS") {
        config.poller.collections = value
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
    }

    override_parsed(&lookup, "EMBEDDING_PROVIDER", &mut config.embedding.provider);
    override_parsed(&lookup, "EMBEDDING_DIMENSION", &mut config.embedding.dimension);
    override_parsed(&lookup, "EMBEDDING_BATCH_SIZE", &mut config.embedding.batch_size);
    override_parsed(&lookup, "POLLER_ENABLED", &mut config.poller.enabled);
    override_parsed(&lookup, "POLL_INTERVAL", &mut config.poller.interval_secs);
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(err) => warn!(error = %err, key, value = %value, "Failed to parse override"),
        }
    }
}
