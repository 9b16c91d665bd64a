use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tickwork_engine::ProcessorConfig;

/// Runner settings: how often to tick and what the demo workload does.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Milliseconds between `Processor::update` calls.
    pub tick_interval_ms: u64,
    /// Period of the demo heartbeat incident.
    pub heartbeat_ms: i64,
    /// Stop after this long. Zero runs until interrupted.
    pub run_for_ms: u64,
    pub processor: ProcessorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            heartbeat_ms: 1000,
            run_for_ms: 0,
            processor: ProcessorConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load from `path` when given, then apply `TICKWORK_*` env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("TICKWORK_TICK_INTERVAL_MS") {
            self.tick_interval_ms = parse_var("TICKWORK_TICK_INTERVAL_MS", &value)?;
        }
        if let Some(value) = var("TICKWORK_HEARTBEAT_MS") {
            self.heartbeat_ms = parse_var("TICKWORK_HEARTBEAT_MS", &value)?;
        }
        if let Some(value) = var("TICKWORK_RUN_FOR_MS") {
            self.run_for_ms = parse_var("TICKWORK_RUN_FOR_MS", &value)?;
        }
        self.processor.apply_env(var)
    }

    pub fn log(&self) {
        tracing::info!("Runner config:");
        tracing::info!("  tick_interval_ms: {}", self.tick_interval_ms);
        tracing::info!("  heartbeat_ms: {}", self.heartbeat_ms);
        tracing::info!("  run_for_ms: {}", self.run_for_ms);
        self.processor.log();
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} is not a valid number: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickwork_engine::ClockKind;

    #[test]
    fn nested_processor_table_is_read() {
        let config: RunnerConfig = toml::from_str(
            r#"
            tick_interval_ms = 5
            run_for_ms = 2000

            [processor]
            clock = "utc"
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_interval_ms, 5);
        assert_eq!(config.heartbeat_ms, 1000);
        assert_eq!(config.run_for_ms, 2000);
        assert_eq!(config.processor.clock, ClockKind::Utc);
        assert_eq!(config.processor.max_time_processing_ms, 10);
    }

    #[test]
    fn env_reaches_both_layers() {
        let mut config = RunnerConfig::default();
        config
            .apply_env(|key| match key {
                "TICKWORK_HEARTBEAT_MS" => Some("250".into()),
                "TICKWORK_MAX_TIME_PROCESSING_MS" => Some("3".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.heartbeat_ms, 250);
        assert_eq!(config.processor.max_time_processing_ms, 3);
    }

    #[test]
    fn negative_tick_interval_is_rejected() {
        let mut config = RunnerConfig::default();
        let err = config
            .apply_env(|key| (key == "TICKWORK_TICK_INTERVAL_MS").then(|| "-1".into()))
            .unwrap_err();
        assert!(err.to_string().contains("TICKWORK_TICK_INTERVAL_MS"));
    }
}
