//! Biolatch configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::recency::RecencyTtl;
use crate::storage::FileStore;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration directory under the platform config dir
const CONFIG_DIR_NAME: &str = "biolatch";

const SECONDS_PER_DAY: u64 = 86_400;

/// Biolatch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiolatchConfig {
    /// Session tier window (seconds)
    #[serde(default = "default_short_ttl_secs")]
    pub short_ttl_secs: u64,

    /// Device trust window (days)
    #[serde(default = "default_long_ttl_days")]
    pub long_ttl_days: u64,

    /// File backing the device tier
    #[serde(default = "FileStore::default_path")]
    pub store_path: PathBuf,

    /// Longest a caller may wait for the lock; `None` waits forever
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,

    /// Name shown in the platform prompt
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Treat verification times ahead of the clock as untrusted
    ///
    /// Off by default, where such stamps count as fresh.
    #[serde(default)]
    pub reject_future_stamps: bool,
}

fn default_short_ttl_secs() -> u64 {
    crate::DEFAULT_SHORT_TTL.as_secs()
}

fn default_long_ttl_days() -> u64 {
    crate::DEFAULT_LONG_TTL.as_secs() / SECONDS_PER_DAY
}

fn default_display_name() -> String {
    "Member".to_string()
}

impl Default for BiolatchConfig {
    fn default() -> Self {
        Self {
            short_ttl_secs: default_short_ttl_secs(),
            long_ttl_days: default_long_ttl_days(),
            store_path: FileStore::default_path(),
            acquire_timeout_secs: None,
            display_name: default_display_name(),
            reject_future_stamps: false,
        }
    }
}

impl BiolatchConfig {
    /// Shorter windows, a bounded queue wait, and no trust in future stamps
    pub fn strict() -> Self {
        Self {
            short_ttl_secs: 60,
            long_ttl_days: 30,
            acquire_timeout_secs: Some(120),
            reject_future_stamps: true,
            ..Self::default()
        }
    }

    /// Longer session window for shared kiosks in back-of-house use
    pub fn relaxed() -> Self {
        Self {
            short_ttl_secs: 15 * 60,
            ..Self::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file, or fall back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject windows that would make the cache meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.short_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "short_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.long_ttl_days == 0 {
            return Err(ConfigError::Invalid(
                "long_ttl_days must be greater than zero".to_string(),
            ));
        }
        if self.long_ttl_days.saturating_mul(SECONDS_PER_DAY) < self.short_ttl_secs {
            return Err(ConfigError::Invalid(
                "device trust window is shorter than the session window".to_string(),
            ));
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "acquire_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Windows for [`crate::RecencyCache`]
    pub fn ttl(&self) -> RecencyTtl {
        RecencyTtl {
            short: Duration::from_secs(self.short_ttl_secs),
            long: Duration::from_secs(self.long_ttl_days.saturating_mul(SECONDS_PER_DAY)),
        }
    }

    /// Queue wait bound for [`crate::UnlockFacade`]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }
}
