//! Configuration: device access, paths, timing budgets and channel filter.

mod duration_secs;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials;
use crate::error::{Error, Result};
use crate::types::{ChannelFilter, Credentials};

const TEMPLATE_HEADER: &str = "\
# playback-dl configuration
#
# [credentials] password may be written in plain text; it is encrypted in
# place on the next start. Timing values are in seconds.

";

/// Timeouts, intervals and retry budgets used by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between start-transfer and the first status poll.
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    /// Interval between reconciler ticks.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Overall budget for one batch.
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,
    /// Budget for the post-alert / post-queue file-settling wait.
    #[serde(with = "duration_secs")]
    pub settle_timeout: Duration,
    /// Interval between checks during the settling wait.
    #[serde(with = "duration_secs")]
    pub settle_interval: Duration,
    /// Unchanged-progress ticks required before the stall rule applies.
    pub stall_ticks: u32,
    /// Unchanged-progress time required before the stall rule applies.
    #[serde(with = "duration_secs")]
    pub stall_duration: Duration,
    /// Delay after the stop indicator disappears, letting events settle.
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,
    /// Transfer attempts per page.
    pub max_attempts: u32,
    /// Base of the exponential backoff between page attempts.
    #[serde(with = "duration_secs")]
    pub retry_base_delay: Duration,
    /// Login attempts before giving up.
    pub login_attempts: u32,
    /// Base of the exponential backoff between login attempts.
    #[serde(with = "duration_secs")]
    pub login_backoff: Duration,
    /// Optional bound on one page's whole retry loop.
    #[serde(with = "duration_secs::option", skip_serializing_if = "Option::is_none")]
    pub page_timeout: Option<Duration>,
    /// Time allowed for an orderly shutdown after an interrupt.
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            batch_timeout: Duration::from_secs(600),
            settle_timeout: Duration::from_secs(120),
            settle_interval: Duration::from_secs(1),
            stall_ticks: 30,
            stall_duration: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
            login_attempts: 3,
            login_backoff: Duration::from_secs(5),
            page_timeout: None,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl TimingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall batch budget.
    #[must_use]
    pub const fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Sets the file-settling budget.
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Sets the per-page bound.
    #[must_use]
    pub const fn with_page_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Sets the number of transfer attempts per page.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the retry backoff base.
    #[must_use]
    pub const fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Sets the login backoff base.
    #[must_use]
    pub const fn with_login_backoff(mut self, delay: Duration) -> Self {
        self.login_backoff = delay;
        self
    }

    /// Delay before attempt `attempt + 1` given that `attempt` (1-based) failed:
    /// `base * 2^(attempt - 1)`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff(self.retry_base_delay, attempt.saturating_sub(1))
    }

    /// Delay after login attempt `attempt` (0-based) failed: `base * 2^attempt`.
    #[must_use]
    pub fn login_delay(&self, attempt: u32) -> Duration {
        backoff(self.login_backoff, attempt)
    }
}

fn backoff(base: Duration, exponent: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(exponent.min(16)))
}

/// Directories for landed files, organized files and ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Where the remote drops transfers.
    pub landing_dir: PathBuf,
    /// Root of the per-channel organized tree.
    pub organized_dir: PathBuf,
    /// Where per-date ledgers are kept.
    pub state_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playback-dl");
        let landing_dir = data_dir.join("downloads");

        Self {
            organized_dir: landing_dir.join("cctv"),
            landing_dir,
            state_dir: default_state_dir(&data_dir),
        }
    }
}

/// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is
/// configured), falling back to the data directory.
fn default_state_dir(data_dir: &Path) -> PathBuf {
    std::env::var("STATE_DIRECTORY").map_or_else(
        |_| data_dir.join("ledgers"),
        |dir| PathBuf::from(dir).join("ledgers"),
    )
}

/// Where the device and its automation bridge live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Address of the recorder itself, forwarded to the bridge on login.
    pub host: String,
    /// Base URL of the UI-automation bridge.
    pub bridge_url: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.88.19".to_string(),
            bridge_url: "http://127.0.0.1:9730".to_string(),
        }
    }
}

/// Device login, optionally encrypted at rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
    /// Whether `password` holds a sealed value.
    pub encrypted: bool,
}

impl CredentialsConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Returns usable credentials, opening the password if it is sealed.
    #[must_use]
    pub fn decrypt_if_needed(&self) -> Option<Credentials> {
        let password = if self.encrypted {
            credentials::open(&self.password)?
        } else {
            self.password.clone()
        };
        Some(Credentials {
            username: self.username.clone(),
            password,
        })
    }

    /// Seals a plaintext password. No-op when already sealed.
    pub fn encrypt_in_place(&mut self) {
        if !self.encrypted {
            self.password = credentials::seal(&self.password);
            self.encrypted = true;
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub credentials: CredentialsConfig,
    pub paths: PathConfig,
    pub timing: TimingConfig,
    pub channels: ChannelFilter,
}

impl AppConfig {
    /// Default location: `$XDG_CONFIG_HOME/playback-dl/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playback-dl")
            .join("config.toml")
    }

    /// Loads the configuration, writing a template first if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or created.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote configuration template to {}", path.display());
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Saves the configuration atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let body = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, format!("{TEMPLATE_HEADER}{body}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.batch_timeout, Duration::from_secs(600));
        assert_eq!(timing.settle_timeout, Duration::from_secs(120));
        assert_eq!(timing.stall_ticks, 30);
        assert_eq!(timing.max_attempts, 3);
        assert!(timing.page_timeout.is_none());
    }

    #[test]
    fn retry_backoff_doubles() {
        let timing = TimingConfig::default();
        assert_eq!(timing.retry_delay(1), Duration::from_secs(5));
        assert_eq!(timing.retry_delay(2), Duration::from_secs(10));
        assert_eq!(timing.login_delay(0), Duration::from_secs(5));
        assert_eq!(timing.login_delay(2), Duration::from_secs(20));
    }

    #[test]
    fn builder_pattern() {
        let timing = TimingConfig::new()
            .with_batch_timeout(Duration::from_secs(30))
            .with_max_attempts(5)
            .with_retry_base_delay(Duration::from_millis(50))
            .with_page_timeout(Some(Duration::from_secs(90)));

        assert_eq!(timing.batch_timeout, Duration::from_secs(30));
        assert_eq!(timing.max_attempts, 5);
        assert_eq!(timing.retry_delay(2), Duration::from_millis(100));
        assert_eq!(timing.page_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.timing.page_timeout = Some(Duration::from_millis(1500));
        config.channels = ChannelFilter { min: 2, max: 4 };

        let text = toml::to_string(&config).unwrap();
        let loaded: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let loaded: AppConfig = toml::from_str(
            "[timing]\nbatch_timeout = 42\n\n[credentials]\nusername = \"op\"\n",
        )
        .unwrap();
        assert_eq!(loaded.timing.batch_timeout, Duration::from_secs(42));
        assert_eq!(loaded.timing.poll_interval, Duration::from_secs(2));
        assert_eq!(loaded.credentials.username, "op");
        assert_eq!(loaded.channels, ChannelFilter::default());
    }

    #[test]
    fn load_or_create_writes_template() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# playback-dl configuration"));

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded, created);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timing = [").unwrap();
        assert!(matches!(
            AppConfig::load_or_create(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn credentials_encrypt_in_place() {
        let mut creds = CredentialsConfig {
            username: "scrapper".into(),
            password: "sc@10001".into(),
            encrypted: false,
        };
        assert!(creds.has_credentials());

        creds.encrypt_in_place();
        assert!(creds.encrypted);
        assert_ne!(creds.password, "sc@10001");

        let plain = creds.decrypt_if_needed().unwrap();
        assert_eq!(plain.username, "scrapper");
        assert_eq!(plain.password, "sc@10001");

        let sealed = creds.password.clone();
        creds.encrypt_in_place();
        assert_eq!(creds.password, sealed);
    }

    #[test]
    fn default_paths_nest_organized_under_landing() {
        let paths = PathConfig::default();
        assert!(paths.organized_dir.starts_with(&paths.landing_dir));
        assert!(paths.state_dir.to_string_lossy().contains("ledgers"));
    }
}
