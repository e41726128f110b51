//! Mount configuration
//!
//! Settings live in `settings.json` inside the platform config directory and
//! are created with defaults on first start. Command-line flags override them
//! for a single run.

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::remote::http_client::GRAPH_API_BASE;

static SETTINGS_FILE_NAME: &str = "settings.json";

pub struct ProjectConfig {
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub project_dirs: ProjectDirs,
}

impl ProjectConfig {
    /// Load settings from `settings_path`, or from the default location
    pub fn new(settings_path: Option<PathBuf>) -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "clouddrive", "clouddrive-fuse")
            .ok_or_else(|| anyhow!("Failed to get project directories"))?;
        for dir in [project_dirs.config_dir(), project_dirs.data_dir()] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            }
        }

        let settings_path = settings_path.unwrap_or_else(|| project_dirs.config_dir().join(SETTINGS_FILE_NAME));
        let settings = Settings::load_or_create(&settings_path)?;
        Ok(Self {
            settings,
            settings_path,
            project_dirs,
        })
    }
}

/// Which remote drive implementation to mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Graph,
    /// Scratch drive held in memory, lost on unmount
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "graph" => Ok(Backend::Graph),
            "memory" => Ok(Backend::Memory),
            other => Err(anyhow!("Unknown backend: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub mountpoint: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub read_only: bool,
    pub backend: Backend,
    /// File holding the access token; the environment is used when unset
    pub token_file: Option<PathBuf>,
    pub api_base_url: String,
    pub log_level: String,
    /// Owner reported for every entry; defaults to the mounting user
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mountpoint: None,
            cache_ttl_secs: 30,
            read_only: false,
            backend: Backend::Graph,
            token_file: None,
            api_base_url: GRAPH_API_BASE.to_string(),
            log_level: "info".to_string(),
            uid: None,
            gid: None,
        }
    }
}

impl Settings {
    /// Read settings, writing defaults if the file is missing or unreadable
    pub fn load_or_create(config_file_path: &Path) -> Result<Self> {
        match Self::load_settings_from_file(config_file_path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Error loading settings from file - creating default config: {}", e);
                let default = Self::default();
                default.save_to_file(config_file_path)?;
                Ok(default)
            }
        }
    }

    pub fn load_settings_from_file(config_file_path: &Path) -> Result<Self> {
        if !config_file_path.exists() {
            return Err(anyhow!("Config file not found"));
        }
        let data = fs::read_to_string(config_file_path)?;
        let settings: Self = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, config_file_path: &Path) -> Result<()> {
        if let Some(parent_path) = config_file_path.parent() {
            fs::create_dir_all(parent_path).context("Failed to create config directory")?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, data)
            .with_context(|| format!("Failed to write {}", config_file_path.display()))?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or_else(|_| {
            warn!("Invalid log level {:?}, using info", self.log_level);
            LevelFilter::Info
        })
    }
}
