use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::loader::DEFAULT_CACHE_TTL;

pub const DEFAULT_CONFIG_PATH: &str = "dashboard.json";
pub const SOURCE_ENV: &str = "DASHBOARD_SOURCE";

/// Application config, read from a JSON file.
///
/// Every field has a default so a partial (or absent) file is fine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Local CSV path or shareable drive URL.
    pub source: Option<String>,
    pub cache_ttl_secs: u64,
    /// Username to password.
    pub users: BTreeMap<String, String>,
    pub output_dir: PathBuf,
    /// Also export the per-level share dataset.
    pub show_level_share: bool,
    pub preview_rows: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            users: BTreeMap::new(),
            output_dir: PathBuf::from("."),
            show_level_share: false,
            preview_rows: 5,
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        s.parse::<Self>()
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Apply `DASHBOARD_SOURCE` then the command-line source, later wins.
    pub fn with_source_overrides(mut self, env: Option<String>, cli: Option<String>) -> Self {
        if let Some(source) = cli.or(env).filter(|s| !s.trim().is_empty()) {
            self.source = Some(source);
        }
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl std::fmt::Display for AppConfig {
    /// Writes a terminating newline.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", s)
    }
}

impl std::str::FromStr for AppConfig {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}
