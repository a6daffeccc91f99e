use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::themes::ThemeRegistry;
use crate::timeline::{DEFAULT_DOT_THRESHOLD_PX, FADED_OPACITY};

pub mod themes;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Cardline";
const APP_NAME: &str = "cardline";

pub const CONFIG_ENV: &str = "CARDLINE_CONFIG";
pub const DATA_ENV: &str = "CARDLINE_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            self.write_default_config(&default_cfg)?;
            default_cfg.post_load(&self.paths)?;
            tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub cards_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Lays every path out below explicit roots.
    pub fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            cards_path: data_dir.join("cards.json"),
            log_dir: state_dir.join("logs"),
            config_dir,
            config_file,
            data_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: ThemeName,
    /// Card collection file; empty means `<data_dir>/cards.json`.
    pub cards_path: PathBuf,
    pub persistence: PersistenceConfig,
    pub timeline: TimelineConfig,
    pub notifications: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Dark,
            cards_path: PathBuf::new(),
            persistence: PersistenceConfig::default(),
            timeline: TimelineConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.cards_path.as_os_str().is_empty() {
            self.cards_path = paths.cards_path.clone();
        }
        if !ThemeRegistry::default().contains(&self.theme) {
            tracing::warn!(?self.theme, "unknown theme in config, falling back to Dark");
            self.theme = ThemeName::Dark;
        }
        self.timeline.sanitize();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceBackend {
    Http,
    File,
}

impl Default for PersistenceBackend {
    fn default() -> Self {
        PersistenceBackend::Http
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    pub base_url: String,
    pub update_path: String,
    pub timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::Http,
            base_url: "http://127.0.0.1:3000".to_string(),
            update_path: "/api/updateData".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl PersistenceConfig {
    pub fn update_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.update_path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub dot_threshold_px: f64,
    /// Pixels represented by one terminal column.
    pub cell_width_px: f64,
    pub faded_opacity: f32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            dot_threshold_px: DEFAULT_DOT_THRESHOLD_PX,
            cell_width_px: 8.0,
            faded_opacity: FADED_OPACITY,
        }
    }
}

impl TimelineConfig {
    fn sanitize(&mut self) {
        let defaults = Self::default();
        if !(self.cell_width_px.is_finite() && self.cell_width_px > 0.0) {
            tracing::warn!(value = self.cell_width_px, "cell_width_px must be positive");
            self.cell_width_px = defaults.cell_width_px;
        }
        if !(self.dot_threshold_px.is_finite() && self.dot_threshold_px >= 0.0) {
            tracing::warn!(value = self.dot_threshold_px, "dot_threshold_px must not be negative");
            self.dot_threshold_px = defaults.dot_threshold_px;
        }
        self.faded_opacity = self.faded_opacity.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub duration_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { duration_ms: 3000 }
    }
}

impl NotificationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, std::hash::Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeName {
    Dark,
    Light,
}

impl Default for ThemeName {
    fn default() -> Self {
        ThemeName::Dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> ConfigPaths {
        let base = root.path();
        ConfigPaths::rooted(
            base.join("config"),
            base.join("config/config.toml"),
            base.join("data"),
            base.join("state"),
        )
    }

    #[test]
    fn first_run_writes_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        let loader = ConfigLoader::with_paths(paths.clone());

        let cfg = loader.load_or_init()?;
        assert!(paths.config_file.exists());
        assert!(paths.log_dir.is_dir());
        assert_eq!(cfg.cards_path, paths.data_dir.join("cards.json"));
        assert_eq!(cfg.persistence.update_url(), "http://127.0.0.1:3000/api/updateData");
        assert_eq!(cfg.notifications.duration(), Duration::from_millis(3000));

        let reloaded = loader.load()?;
        assert_eq!(reloaded.persistence.backend, PersistenceBackend::Http);
        assert_eq!(reloaded.cards_path, cfg.cards_path);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_section_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = temp_paths(&temp);
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "theme = \"light\"\n\n[persistence]\nbackend = \"file\"\n\n[timeline]\ncell_width_px = 0.0\n",
        )?;

        let cfg = ConfigLoader::with_paths(paths).load()?;
        assert_eq!(cfg.theme, ThemeName::Light);
        assert_eq!(cfg.persistence.backend, PersistenceBackend::File);
        assert_eq!(cfg.persistence.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.timeline.cell_width_px, 8.0);
        assert_eq!(cfg.timeline.dot_threshold_px, DEFAULT_DOT_THRESHOLD_PX);
        Ok(())
    }

    #[test]
    fn update_url_joins_without_double_slashes() {
        let cfg = PersistenceConfig {
            base_url: "https://cards.example/".into(),
            ..PersistenceConfig::default()
        };
        assert_eq!(cfg.update_url(), "https://cards.example/api/updateData");
    }
}
