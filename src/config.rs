//! Configuration file parser for `<output>/feedcluster.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos. Command-line flags override the file.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::crawl::{FeedTemplate, TemplateSet};
use crate::presets::{self, Preset};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Crawl configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `access_token` so it never reaches the logs.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum crawl depth; the seed feed is depth 0. 0 = unlimited.
    pub depth_limit: u32,

    /// Number of distinct crawled items that must mention a website before
    /// it is promoted to a feed candidate.
    pub expansion_threshold: u32,

    /// Candidate feed-URL templates tried in rank order.
    pub feed_templates: Vec<FeedTemplate>,

    /// When set, only websites under one of these domains are promoted.
    pub follow_domains: Option<Vec<String>>,

    /// Hosts that are never promoted.
    pub ignore_domains: Vec<String>,

    /// Bundled site preset to apply by name; `"none"` disables presets.
    pub preset: Option<String>,

    /// Pick a preset from the seed URL when `preset` is unset.
    pub auto_preset: bool,

    /// Ask the API's feed search when no template candidate resolves.
    pub enable_search: bool,

    /// Concurrent page fetches / feed resolutions.
    pub concurrency: usize,

    /// Capacity of the worker → writer queue.
    pub queue_capacity: usize,

    /// Records per write transaction.
    pub batch_size: usize,

    /// Longest a partial batch waits before it is committed.
    pub flush_interval_ms: u64,

    /// Periodic checkpoint timer.
    pub checkpoint_interval_secs: u64,

    /// How long in-flight fetches may drain after an interrupt.
    pub drain_timeout_secs: u64,

    /// Attempts per page or resolution on rate limiting / transient errors.
    pub max_page_attempts: u32,

    /// Backoff base; attempt n waits `base * 2^(n-1)`.
    pub retry_base_delay_ms: u64,

    /// Base URL of the feed-caching API.
    pub api_base: String,

    /// Entries requested per API page.
    pub download_per_batch: u32,

    /// API ordering parameter (`oldest` or `newest`).
    pub download_order: String,

    /// API access token (alternative to FEEDLY_ACCESS_TOKEN env var).
    /// Env var takes precedence over config file.
    pub access_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depth_limit: 1,
            expansion_threshold: 1,
            feed_templates: FeedTemplate::defaults(),
            follow_domains: None,
            ignore_domains: Vec::new(),
            preset: None,
            auto_preset: true,
            enable_search: false,
            concurrency: 8,
            queue_capacity: 64,
            batch_size: 200,
            flush_interval_ms: 2000,
            checkpoint_interval_secs: 20,
            drain_timeout_secs: 30,
            max_page_attempts: 3,
            retry_base_delay_ms: 2000,
            api_base: "https://cloud.feedly.com".to_string(),
            download_per_batch: 1000,
            download_order: "oldest".to_string(),
            access_token: None,
        }
    }
}

/// Mask access_token in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("depth_limit", &self.depth_limit)
            .field("expansion_threshold", &self.expansion_threshold)
            .field("feed_templates", &self.feed_templates)
            .field("follow_domains", &self.follow_domains)
            .field("ignore_domains", &self.ignore_domains)
            .field("preset", &self.preset)
            .field("auto_preset", &self.auto_preset)
            .field("enable_search", &self.enable_search)
            .field("concurrency", &self.concurrency)
            .field("queue_capacity", &self.queue_capacity)
            .field("batch_size", &self.batch_size)
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("checkpoint_interval_secs", &self.checkpoint_interval_secs)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .field("max_page_attempts", &self.max_page_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("api_base", &self.api_base)
            .field("download_per_batch", &self.download_per_batch)
            .field("download_order", &self.download_order)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 20] = [
        "depth_limit",
        "expansion_threshold",
        "feed_templates",
        "follow_domains",
        "ignore_domains",
        "preset",
        "auto_preset",
        "enable_search",
        "concurrency",
        "queue_capacity",
        "batch_size",
        "flush_interval_ms",
        "checkpoint_interval_secs",
        "drain_timeout_secs",
        "max_page_attempts",
        "retry_base_delay_ms",
        "api_base",
        "download_per_batch",
        "download_order",
        "access_token",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to bound memory use.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            depth_limit = config.depth_limit,
            expansion_threshold = config.expansion_threshold,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Check value ranges and compile the feed templates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expansion_threshold < 1 {
            return Err(ConfigError::Invalid("expansion_threshold must be at least 1".into()));
        }
        for (key, value) in [
            ("concurrency", self.concurrency),
            ("queue_capacity", self.queue_capacity),
            ("batch_size", self.batch_size),
        ] {
            if value < 1 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }
        if self.max_page_attempts < 1 {
            return Err(ConfigError::Invalid("max_page_attempts must be at least 1".into()));
        }
        if let Some(name) = self.preset.as_deref() {
            if name != "none" && presets::find(name).is_none() {
                let known: Vec<&str> = presets::PRESETS.iter().map(|p| p.name).collect();
                return Err(ConfigError::Invalid(format!(
                    "unknown preset {name:?} (expected one of {}, or \"none\")",
                    known.join(", ")
                )));
            }
        }
        self.templates()?;
        Ok(())
    }

    /// The preset this crawl uses: the one named by `preset`, else the first
    /// whose site pattern matches `seed` when `auto_preset` is on.
    pub fn preset_for(&self, seed: &str) -> Result<Option<&'static Preset>, ConfigError> {
        match self.preset.as_deref() {
            Some("none") => Ok(None),
            Some(name) => presets::find(name)
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown preset {name:?}"))),
            None if self.auto_preset => Ok(presets::detect(seed)),
            None => Ok(None),
        }
    }

    /// This config with the preset for `seed` merged in.
    ///
    /// Preset templates go ahead of the configured ones, so their patterns
    /// win. The preset's follow list applies only when none is configured;
    /// its ignore list is added to the configured one.
    pub fn with_preset(&self, seed: &str) -> Result<Config, ConfigError> {
        let mut config = self.clone();
        let Some(preset) = self.preset_for(seed)? else {
            return Ok(config);
        };
        tracing::info!(preset = preset.name, seed, "Applying site preset");

        let mut templates = preset.feed_templates();
        templates.append(&mut config.feed_templates);
        config.feed_templates = templates;

        if config.follow_domains.is_none() && !preset.follow_domains.is_empty() {
            config.follow_domains = Some(preset.follow_domains.iter().map(|d| d.to_string()).collect());
        }
        for host in preset.ignore_domains {
            if !config.ignore_domains.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                config.ignore_domains.push(host.to_string());
            }
        }
        Ok(config)
    }

    /// Compile `feed_templates`.
    pub fn templates(&self) -> Result<TemplateSet, ConfigError> {
        TemplateSet::compile(&self.feed_templates).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
