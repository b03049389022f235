use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;

/// Upstream tracking endpoint used when `TRACKER_API_BASE_URL` is unset.
pub const DEFAULT_API_BASE_URL: &str = "https://spx.vn/shipment/order/open/order/get_order_info";

/// How the poller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// A single user-triggered cycle, codes fetched in parallel.
    Once,
    /// Unattended monitoring, one cycle per poll interval.
    Watch,
}

impl FromStr for RunMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(RunMode::Once),
            "watch" => Ok(RunMode::Watch),
            other => Err(AppError::Config(format!(
                "TRACKER_MODE must be 'once' or 'watch', got '{}'",
                other
            ))),
        }
    }
}

/// Where per-code state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    File,
    Redis,
}

impl FromStr for StateBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StateBackend::File),
            "redis" => Ok(StateBackend::Redis),
            other => Err(AppError::Config(format!(
                "TRACKER_STATE_BACKEND must be 'file' or 'redis', got '{}'",
                other
            ))),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Upstream tracking endpoint (without query string)
    pub api_base_url: String,

    /// `language_code` query parameter sent upstream
    pub language_code: String,

    /// Relay entries in `<kind>:<template>` form; empty means built-in defaults
    pub relays: Vec<String>,

    /// Per-attempt request timeout in seconds (default: 15)
    pub request_timeout_secs: u64,

    /// Interval between monitoring cycles in seconds (default: 300)
    pub poll_interval_secs: u64,

    /// Pause between sequential lookups in watch mode, in milliseconds (default: 1000)
    pub request_delay_ms: u64,

    pub mode: RunMode,

    pub state_backend: StateBackend,

    /// State file path for the file backend
    pub state_file: PathBuf,

    /// Redis connection string for the redis backend
    pub redis_url: String,

    /// Redis key holding the serialized state
    pub state_key: String,

    /// File containing the tracking request list
    pub input_file: Option<PathBuf>,

    /// Inline tracking request list (newline or `;` separated)
    pub inline_codes: Option<String>,

    /// Discord webhook for change notifications
    pub discord_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            api_base_url: std::env::var("TRACKER_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            language_code: std::env::var("TRACKER_LANGUAGE_CODE")
                .unwrap_or_else(|_| "vi".to_string()),
            relays: std::env::var("TRACKER_RELAYS")
                .map(|raw| split_relay_entries(&raw))
                .unwrap_or_default(),
            request_timeout_secs: std::env::var("TRACKER_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TRACKER_REQUEST_TIMEOUT_SECS must be a valid u64"))?,
            poll_interval_secs: std::env::var("TRACKER_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TRACKER_POLL_INTERVAL_SECS must be a valid u64"))?,
            request_delay_ms: std::env::var("TRACKER_REQUEST_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TRACKER_REQUEST_DELAY_MS must be a valid u64"))?,
            mode: std::env::var("TRACKER_MODE")
                .unwrap_or_else(|_| "once".to_string())
                .parse()?,
            state_backend: std::env::var("TRACKER_STATE_BACKEND")
                .unwrap_or_else(|_| "file".to_string())
                .parse()?,
            state_file: std::env::var("TRACKER_STATE_FILE")
                .unwrap_or_else(|_| "tracking-state.json".to_string())
                .into(),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            state_key: std::env::var("TRACKER_STATE_KEY")
                .unwrap_or_else(|_| "parcel:tracking-state".to_string()),
            input_file: std::env::var("TRACKER_INPUT_FILE").ok().map(PathBuf::from),
            inline_codes: std::env::var("TRACKER_CODES").ok(),
            discord_webhook_url: std::env::var("DISCORD_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the poller cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("TRACKER_REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("TRACKER_POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.input_file.is_none() && self.inline_codes.is_none() {
            anyhow::bail!("either TRACKER_INPUT_FILE or TRACKER_CODES must be set");
        }
        Ok(())
    }

    /// Read the raw tracking request text from the configured source.
    ///
    /// The file wins over the inline list; `;` in the inline list acts as a line break.
    pub async fn read_input(&self) -> anyhow::Result<String> {
        if let Some(path) = &self.input_file {
            let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::anyhow!("cannot read TRACKER_INPUT_FILE {}: {}", path.display(), e)
            })?;
            return Ok(text);
        }
        Ok(self
            .inline_codes
            .as_deref()
            .map(|codes| codes.replace(';', "\n"))
            .unwrap_or_default())
    }
}

/// Split a comma-separated `TRACKER_RELAYS` value, dropping blank entries.
pub fn split_relay_entries(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
