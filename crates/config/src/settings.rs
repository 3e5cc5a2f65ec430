//! Configuration value types and their defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use validator::Validate;

/// The only CA protocol the agent speaks
pub const DEFAULT_PROTOCOL: &str = "ACME";

/// ACME challenge types the agent knows how to answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    /// Token served over plain HTTP at `/.well-known/acme-challenge/<token>`
    Http01,
    /// Self-signed certificate served via the `acme-tls/1` ALPN protocol
    TlsAlpn01,
    /// TXT record at `_acme-challenge.<domain>`
    Dns01,
}

impl ChallengeType {
    /// ACME wire name of the challenge type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for challenge names outside the supported set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown challenge type '{0}', expected one of: http-01, tls-alpn-01, dns-01")]
pub struct UnknownChallengeType(pub String);

impl FromStr for ChallengeType {
    type Err = UnknownChallengeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http-01" => Ok(Self::Http01),
            "tls-alpn-01" => Ok(Self::TlsAlpn01),
            "dns-01" => Ok(Self::Dns01),
            _ => Err(UnknownChallengeType(s.to_string())),
        }
    }
}

/// CA defaults applied when a managed domain is added
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaDefaults {
    /// ACME directory URL
    pub url: Option<String>,
    /// Protocol identifier
    pub protocol: String,
}

impl Default for CaDefaults {
    fn default() -> Self {
        Self {
            url: None,
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }
}

/// Drive behaviour
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct DriveSettings {
    /// Challenge types in order of preference, never empty
    pub challenges: Vec<ChallengeType>,
    /// First delay between two polls of a CA resource
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,
    /// Upper bound for the exponential poll backoff
    #[validate(range(min = 1))]
    pub poll_max_interval_ms: u64,
    /// Maximum time a single resource is polled
    #[validate(range(min = 1, max = 86400))]
    pub poll_timeout_secs: u64,
    /// Maximum number of polls of a single resource
    #[validate(range(min = 1))]
    pub max_poll_attempts: u32,
    /// A certificate expiring within this many days is renewed
    #[validate(range(max = 365))]
    pub renew_before_days: u32,
}

pub(crate) fn default_challenges() -> Vec<ChallengeType> {
    vec![ChallengeType::Http01]
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    1000
}

pub(crate) fn default_poll_max_interval_ms() -> u64 {
    10_000
}

pub(crate) fn default_poll_timeout_secs() -> u64 {
    300
}

pub(crate) fn default_max_poll_attempts() -> u32 {
    100
}

pub(crate) fn default_renew_before_days() -> u32 {
    30
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            challenges: default_challenges(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            renew_before_days: default_renew_before_days(),
        }
    }
}

impl DriveSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn renew_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.renew_before_days) * 86400)
    }
}

/// HTTP transport towards the CA
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct TransportSettings {
    /// Timeout for a whole request
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    /// Timeout for establishing the connection
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    /// User-Agent header sent to the CA
    #[validate(length(min = 1))]
    pub user_agent: String,
    /// Optional HTTP(S) proxy
    #[validate(url)]
    pub proxy: Option<String>,
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_connect_timeout_secs() -> u64 {
    10
}

pub(crate) fn default_user_agent() -> String {
    format!("mdacme/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

impl TransportSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
