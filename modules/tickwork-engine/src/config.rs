use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::schedule::TimeKeeper;

/// Which [`TimeSource`](crate::TimeSource) a processor built from config reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    #[default]
    Monotonic,
    Utc,
}

impl std::str::FromStr for ClockKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monotonic" => Ok(Self::Monotonic),
            "utc" => Ok(Self::Utc),
            other => bail!("unknown clock kind: {other}"),
        }
    }
}

/// Processor settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Milliseconds of scheduled work one tick may spend before deferring.
    pub max_time_processing_ms: i64,
    pub clock: ClockKind,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_time_processing_ms: TimeKeeper::DEFAULT_MAX_TIME_PROCESSING,
            clock: ClockKind::default(),
        }
    }
}

impl ProcessorConfig {
    /// Defaults, overridden by `TICKWORK_*` env vars (`.env` is read first).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `TICKWORK_MAX_TIME_PROCESSING_MS` and
    /// `TICKWORK_CLOCK` as returned by `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = var("TICKWORK_MAX_TIME_PROCESSING_MS") {
            self.max_time_processing_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("TICKWORK_MAX_TIME_PROCESSING_MS is not a number: {ms}"))?;
        }
        if let Some(clock) = var("TICKWORK_CLOCK") {
            self.clock = clock.parse()?;
        }
        Ok(())
    }

    pub fn log(&self) {
        tracing::info!("Processor config:");
        tracing::info!("  max_time_processing_ms: {}", self.max_time_processing_ms);
        tracing::info!("  clock: {:?}", self.clock);
    }
}
