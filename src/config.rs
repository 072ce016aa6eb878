//! Configuration management
//!
//! One TOML file covers the trigger thresholds, strategy tuning,
//! evaluation battery, deployment policy, loop schedule, and the
//! generation endpoint. Every section defaults sensibly, so a missing
//! or partial file still yields a working configuration.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Thresholds that gate automatic training.
    #[serde(default)]
    pub trigger: crate::training::trigger::TriggerConfig,
    /// Strategy tuning.
    #[serde(default)]
    pub trainer: crate::training::trainer::TrainerConfig,
    /// Evaluation battery settings.
    #[serde(default)]
    pub evaluation: crate::evaluation::EvaluationConfig,
    /// Auto-deployment policy.
    #[serde(default)]
    pub deployment: crate::deploy::DeploymentConfig,
    /// Training loop schedule.
    #[serde(default)]
    pub schedule: crate::training::scheduler::ScheduleConfig,
    /// Feedback retention.
    #[serde(default)]
    pub feedback: crate::feedback::FeedbackConfig,
    /// Text-generation endpoint.
    #[serde(default)]
    pub generation: crate::generation::GenerationConfig,
    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where the training database lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override the database path; defaults to training.db in the
    /// platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("training.db"))
    }
}

impl Config {
    /// Load the configuration, writing the defaults on first run.
    pub fn load() -> Result<Self> {
        let path = config_path();

        if !path.exists() {
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {:?}", path))?;
        Ok(config)
    }

    /// Write the configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(())
    }
}

/// Path of the configuration file.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "prompt-forge", "prompt-forge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("prompt-forge.toml"))
}

/// Platform data directory for the database.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "prompt-forge", "prompt-forge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
