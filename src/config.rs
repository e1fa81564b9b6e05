use crate::errors::{AppError, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the persisted configuration.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Default lookback window for lead extraction, in days.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;
/// Default retention for staging files, in days.
pub const DEFAULT_KEEP_DAYS: u32 = 30;

/// Persisted integration configuration.
///
/// Every section and field falls back to its default when absent, so a loaded
/// value is always fully populated. The legacy key names (`facebook`,
/// `b2cor`, `general`, ...) are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "facebook")]
    pub extraction: ExtractionConfig,
    #[serde(alias = "b2cor")]
    pub delivery: DeliveryConfig,
    #[serde(alias = "general")]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub form_ids: Vec<String>,
    pub ad_ids: Vec<String>,
    #[serde(alias = "days_back")]
    pub lookback_days: u32,
    pub schedule: ScheduleConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            form_ids: Vec::new(),
            ad_ids: Vec::new(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            schedule: ScheduleConfig::default(),
        }
    }
}

/// Schedule descriptor as persisted.
///
/// `cadence` stays free text here; it is parsed when a job is armed so that an
/// unknown value is rejected instead of being replaced by a default on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    #[serde(alias = "interval")]
    pub cadence: String,
    pub time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cadence: "daily".to_string(),
            time: "00:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub add_to_funnel: bool,
    #[serde(alias = "change_user")]
    pub change_owner: bool,
    pub add_history: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            add_to_funnel: true,
            change_owner: true,
            add_history: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub auto_process: bool,
    #[serde(alias = "keep_leads_days")]
    pub keep_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            auto_process: true,
            keep_days: DEFAULT_KEEP_DAYS,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`.
    ///
    /// A missing file yields defaults. A corrupt file is logged and also
    /// yields defaults; neither case is fatal.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No configuration file, using defaults");
                return Self::default();
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read configuration, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Config>(&raw) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Corrupt configuration file, using defaults");
                Self::default()
            }
        }
    }

    /// Writes the configuration as pretty JSON through a temporary file.
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let body = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

/// Runtime settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub staging_dir: PathBuf,
    pub credentials_dir: PathBuf,
    pub log_dir: PathBuf,
    pub facebook_graph_url: String,
    pub facebook_page_id: Option<String>,
    pub facebook_app_id: Option<String>,
    pub facebook_app_secret: Option<String>,
    pub b2cor_base_url: String,
    pub b2cor_funnel_id: Option<String>,
    pub b2cor_owner_id: Option<String>,
    pub b2cor_history_text: String,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = Self {
            config_path: env_path("LEAD_SYNC_CONFIG", DEFAULT_CONFIG_PATH),
            staging_dir: env_path("LEAD_SYNC_STAGING_DIR", "leads"),
            credentials_dir: env_path("LEAD_SYNC_CREDENTIALS_DIR", "credentials"),
            log_dir: env_path("LEAD_SYNC_LOG_DIR", "."),
            facebook_graph_url: env_url(
                "FACEBOOK_GRAPH_URL",
                "https://graph.facebook.com/v19.0",
            )?,
            facebook_page_id: env_opt("FACEBOOK_PAGE_ID"),
            facebook_app_id: env_opt("FACEBOOK_APP_ID"),
            facebook_app_secret: env_opt("FACEBOOK_APP_SECRET"),
            b2cor_base_url: env_url("B2COR_BASE_URL", "https://api.b2cor.com.br/v1")?,
            b2cor_funnel_id: env_opt("B2COR_FUNNEL_ID"),
            b2cor_owner_id: env_opt("B2COR_OWNER_ID"),
            b2cor_history_text: env_opt("B2COR_HISTORY_TEXT")
                .unwrap_or_else(|| "Lead importado do Facebook Ads".to_string()),
            http_timeout: Duration::from_secs(env_secs("LEAD_SYNC_HTTP_TIMEOUT_SECS", 30)?),
            poll_interval: Duration::from_secs(env_secs("LEAD_SYNC_POLL_SECS", 60)?),
        };

        Ok(settings)
    }

    /// Logs the resolved locations. Call once logging is initialised.
    pub fn log_summary(&self) {
        tracing::debug!("Config file: {}", self.config_path.display());
        tracing::debug!("Staging dir: {}", self.staging_dir.display());
        tracing::debug!("Graph API URL: {}", self.facebook_graph_url);
        tracing::debug!("B2Cor URL: {}", self.b2cor_base_url);
        if self.b2cor_funnel_id.is_none() {
            tracing::warn!("B2COR_FUNNEL_ID not set, funnel assignment will be skipped");
        }
        if self.b2cor_owner_id.is_none() {
            tracing::warn!("B2COR_OWNER_ID not set, owner change will be skipped");
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_opt(key).unwrap_or_else(|| default.to_string()))
}

fn env_url(key: &str, default: &str) -> anyhow::Result<String> {
    let value = env_opt(key).unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(&value)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", key, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", key);
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn env_secs(key: &str, default: u64) -> anyhow::Result<u64> {
    match env_opt(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| anyhow::anyhow!("{} must be a positive number of seconds", key)),
    }
}
