//! mdacme configuration
//!
//! Loads and validates the agent configuration from a KDL document.
//!
//! # Example
//!
//! ```kdl
//! store "/var/lib/mdacme"
//!
//! ca {
//!     url "https://acme-staging-v02.api.letsencrypt.org/directory"
//!     protocol "ACME"
//! }
//!
//! drive {
//!     challenges "http-01" "tls-alpn-01"
//!     poll-interval-ms 500
//!     poll-timeout-secs 60
//!     renew-before-days 30
//! }
//!
//! transport {
//!     request-timeout-secs 30
//!     user-agent "mdacme/0.1"
//! }
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use validator::Validate;

mod kdl;
mod settings;

pub use settings::{
    CaDefaults, ChallengeType, DriveSettings, TransportSettings, UnknownChallengeType,
    DEFAULT_PROTOCOL,
};

/// Default location of the persistent store
pub const DEFAULT_STORE_DIR: &str = "/var/lib/mdacme";

/// Top-level agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory of the persistent store
    pub store_dir: PathBuf,
    /// CA applied to managed domains created without an explicit CA
    pub ca: CaDefaults,
    /// Drive behaviour (challenges, polling, renewal)
    pub drive: DriveSettings,
    /// HTTP transport towards the CA
    pub transport: TransportSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            ca: CaDefaults::default(),
            drive: DriveSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = Self::from_kdl(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from KDL source
    pub fn from_kdl(content: &str) -> Result<Self> {
        kdl::parse_document(content)
    }

    /// Validate field ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if let Some(ref url) = self.ca.url {
            let parsed =
                url::Url::parse(url).with_context(|| format!("Invalid CA url '{}'", url))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("CA url '{}' must use http or https", url);
            }
        }

        if self.ca.protocol.trim().is_empty() {
            anyhow::bail!("CA protocol must not be empty");
        }

        if self.drive.challenges.is_empty() {
            anyhow::bail!("drive 'challenges' must name at least one challenge type");
        }

        Validate::validate(&self.drive)
            .map_err(|e| anyhow::anyhow!("Invalid drive settings: {}", e))?;
        Validate::validate(&self.transport)
            .map_err(|e| anyhow::anyhow!("Invalid transport settings: {}", e))?;

        if self.drive.poll_max_interval_ms < self.drive.poll_interval_ms {
            anyhow::bail!(
                "poll-max-interval-ms ({}) must not be smaller than poll-interval-ms ({})",
                self.drive.poll_max_interval_ms,
                self.drive.poll_interval_ms
            );
        }

        debug!(
            store = %self.store_dir.display(),
            ca = ?self.ca.url,
            challenges = self.drive.challenges.len(),
            "Configuration validated"
        );
        Ok(())
    }
}
