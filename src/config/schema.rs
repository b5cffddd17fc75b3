use anyhow::{Context, Result};
use chrono_tz::Tz;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level meetbook configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `MEETBOOK_CONFIG_DIR` env → `~/.meetbook/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// HTTP gateway: bind address and request limits (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Target calendar and service-account credentials (`[calendar]`).
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// In-progress session bounds (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,
}

// ── Gateway ───────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Deadline for answering a request. Must exceed
    /// [`CalendarConfig::worst_case_call`]; `validate()` enforces it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_request_timeout_secs() -> u64 {
    75
}

fn default_body_limit_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            request_timeout_secs: default_request_timeout_secs(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

// ── Calendar ──────────────────────────────────────────────────────

/// Calendar gateway configuration (`[calendar]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Target calendar id. Overridden by `GOOGLE_CALENDAR_ID`.
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Service-account key file; `~` is expanded.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    /// IANA zone every booking is interpreted in. Default: `Asia/Kolkata`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Calendar API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_calendar_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Retries for transient failures (timeouts, 429, 5xx). Default: `1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_credentials_path() -> String {
    "~/.meetbook/service_account.json".into()
}

fn default_timezone() -> String {
    "Asia/Kolkata".into()
}

fn default_api_base() -> String {
    crate::calendar::google::DEFAULT_API_BASE.into()
}

fn default_calendar_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: None,
            credentials_path: default_credentials_path(),
            timezone: default_timezone(),
            api_base: default_api_base(),
            timeout_secs: default_calendar_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl CalendarConfig {
    /// The configured zone, parsed.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("calendar.timezone is not a known IANA zone: {}", self.timezone))
    }

    pub fn resolved_credentials_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(self.credentials_path.trim()).into_owned())
    }

    /// Longest one booking can spend in the gateway: every attempt may refresh
    /// the token and then insert, each bounded by `timeout_secs`, plus the
    /// linear backoff between attempts.
    pub fn worst_case_call(&self) -> std::time::Duration {
        let retries = u64::from(self.max_retries);
        let per_attempt = self.timeout_secs.saturating_mul(2);
        let backoff_steps = retries.saturating_mul(retries + 1) / 2;
        std::time::Duration::from_secs((retries + 1).saturating_mul(per_attempt))
            + std::time::Duration::from_millis(self.retry_backoff_ms.saturating_mul(backoff_steps))
    }

    pub fn has_calendar_id(&self) -> bool {
        self.calendar_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }
}

// ── Sessions ──────────────────────────────────────────────────────

/// Session store bounds (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle time after which a session is discarded. Default: 30 minutes.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Cap on concurrently tracked sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// How often the gateway sweeps expired sessions.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());

        Self {
            config_path: home.join(".meetbook").join(CONFIG_FILE_NAME),
            gateway: GatewayConfig::default(),
            calendar: CalendarConfig::default(),
            sessions: SessionsConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".meetbook"))
}

/// Pick the config directory: explicit flag, then `MEETBOOK_CONFIG_DIR`, then the default.
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var("MEETBOOK_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(dir.trim()).into_owned()));
        }
    }
    default_config_dir()
}

fn first_non_empty_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

impl Config {
    /// Load `config.toml` from the resolved directory, writing defaults on first run.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let dir = resolve_config_dir(config_dir)?;
        Self::load_or_init_in(&dir).await
    }

    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;

            // Restrict permissions on newly created config file (references credentials)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            calendar_configured = config.calendar.has_calendar_id(),
            timezone = %config.calendar.timezone,
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        // Gateway
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }
        if self.gateway.body_limit_bytes == 0 {
            anyhow::bail!("gateway.body_limit_bytes must be greater than 0");
        }

        // Calendar
        self.calendar.tz()?;
        if self.calendar.timeout_secs == 0 || self.calendar.connect_timeout_secs == 0 {
            anyhow::bail!("calendar.timeout_secs and calendar.connect_timeout_secs must be greater than 0");
        }
        if self.calendar.api_base.trim().is_empty() {
            anyhow::bail!("calendar.api_base must not be empty");
        }
        let worst_case = self.calendar.worst_case_call();
        if std::time::Duration::from_secs(self.gateway.request_timeout_secs) <= worst_case {
            anyhow::bail!(
                "gateway.request_timeout_secs ({}) must exceed the longest calendar call ({:.1}s with timeout_secs = {}, max_retries = {})",
                self.gateway.request_timeout_secs,
                worst_case.as_secs_f64(),
                self.calendar.timeout_secs,
                self.calendar.max_retries
            );
        }

        // Sessions
        if self.sessions.ttl_secs == 0 {
            anyhow::bail!("sessions.ttl_secs must be greater than 0");
        }
        if self.sessions.max_sessions == 0 {
            anyhow::bail!("sessions.max_sessions must be greater than 0");
        }
        if self.sessions.reap_interval_secs == 0 {
            anyhow::bail!("sessions.reap_interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Some(calendar_id) = first_non_empty_env(&["GOOGLE_CALENDAR_ID"]) {
            self.calendar.calendar_id = Some(calendar_id);
        }

        // Credentials: GOOGLE_SERVICE_ACCOUNT_FILE or MEETBOOK_CREDENTIALS
        if let Some(path) =
            first_non_empty_env(&["GOOGLE_SERVICE_ACCOUNT_FILE", "MEETBOOK_CREDENTIALS"])
        {
            self.calendar.credentials_path = path;
        }

        if let Some(timezone) = first_non_empty_env(&["MEETBOOK_TIMEZONE"]) {
            self.calendar.timezone = timezone;
        }

        // Gateway host: MEETBOOK_GATEWAY_HOST or HOST
        if let Some(host) = first_non_empty_env(&["MEETBOOK_GATEWAY_HOST", "HOST"]) {
            self.gateway.host = host;
        }

        // Gateway port: MEETBOOK_GATEWAY_PORT or PORT
        if let Some(port_str) = first_non_empty_env(&["MEETBOOK_GATEWAY_PORT", "PORT"]) {
            match port_str.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port_str, "Ignoring invalid gateway port override"),
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
