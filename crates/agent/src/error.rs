//! Error types for driving managed domains.
//!
//! Failures fall into four classes that callers must treat differently:
//!
//! - [`ConfigError`]: local configuration is incomplete, nothing was sent to the CA
//! - [`NetworkError`]: the CA could not be reached, retry later
//! - [`ProtocolError`]: the CA rejected a request or returned something unusable,
//!   operator action is needed
//! - [`DriveError::Timeout`]: a bounded poll ran out, retry later

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::acme::problem::{http_status, EPROTO};
use crate::acme::Problem;

/// Top-level error of a drive
#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A poll of a CA resource exceeded its time or attempt bound
    #[error("{what} did not complete within {elapsed:?} ({attempts} attempts)")]
    Timeout {
        what: String,
        elapsed: Duration,
        attempts: u32,
    },

    /// The caller cancelled the drive
    #[error("drive cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DriveError {
    /// Whether re-invoking the drive without operator action may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriveError::Network(_) | DriveError::Timeout { .. } | DriveError::Cancelled
        )
    }

    /// Numeric status and description for structured reporting
    ///
    /// Network errors report their transport classification, the other classes
    /// report a fixed errno-style pair.
    pub fn status(&self) -> (i32, String) {
        match self {
            DriveError::Network(e) => (e.code, e.description.clone()),
            DriveError::Config(_) => (22, "Invalid argument".to_string()),
            DriveError::Protocol(e) => {
                let (code, description) = e.errno();
                (code, description.to_string())
            }
            DriveError::Timeout { .. } => (
                NetworkErrorKind::TimedOut.code(),
                NetworkErrorKind::TimedOut.description().to_string(),
            ),
            DriveError::Cancelled => (4, "Interrupted system call".to_string()),
            DriveError::Store(_) => (
                NetworkErrorKind::Other.code(),
                NetworkErrorKind::Other.description().to_string(),
            ),
        }
    }
}

/// Local precondition failures, detected before any network traffic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no contact information for managed domain '{0}'")]
    NoContactInfo(String),

    #[error("need to accept terms-of-service for managed domain '{0}'")]
    TosNotAccepted(String),

    #[error("no CA server URL for managed domain '{0}'")]
    NoCaUrl(String),

    #[error("invalid CA server URL '{url}' for managed domain '{md}'")]
    InvalidCaUrl { md: String, url: String },

    #[error("unknown CA protocol '{protocol}' for managed domain '{md}'")]
    UnknownProtocol { md: String, protocol: String },

    #[error("account {url} belongs to CA {account_ca}, managed domain uses {md_ca}")]
    AccountCaMismatch {
        url: String,
        account_ca: String,
        md_ca: String,
    },

    #[error("account {0} not found in store")]
    UnknownAccount(String),

    #[error("managed domain '{0}' not found")]
    UnknownMd(String),

    #[error("managed domain '{0}' already exists")]
    DuplicateMd(String),

    #[error("invalid domain name '{0}'")]
    InvalidDomain(String),

    #[error("managed domain needs at least one domain name")]
    NoDomains,

    #[error("no configured challenge type is supported by the challenge responder")]
    NoChallengeTypes,

    #[error("invalid transport settings: {0}")]
    Transport(String),
}

/// Fixed vocabulary of connection-level failures
///
/// Codes follow the BSD errno numbering so that they stay stable across
/// platforms and match what operators already know from other tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkErrorKind {
    ConnectionRefused,
    TimedOut,
    ConnectionReset,
    HostUnreachable,
    Dns,
    Tls,
    Other,
}

impl NetworkErrorKind {
    pub const fn code(self) -> i32 {
        match self {
            Self::ConnectionRefused => 61,
            Self::TimedOut => 60,
            Self::ConnectionReset => 54,
            Self::HostUnreachable => 65,
            Self::Dns => 8,
            Self::Tls => 80,
            Self::Other => 5,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "Connection refused",
            Self::TimedOut => "Operation timed out",
            Self::ConnectionReset => "Connection reset by peer",
            Self::HostUnreachable => "No route to host",
            Self::Dns => "Name resolution failed",
            Self::Tls => "TLS handshake failed",
            Self::Other => "Input/output error",
        }
    }
}

/// A CA request that failed below the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description} ({code}) contacting {url}: {detail}")]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub code: i32,
    pub description: String,
    pub url: String,
    /// Underlying error message, for logs
    pub detail: String,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            description: kind.description().to_string(),
            url: url.into(),
            detail: detail.into(),
        }
    }
}

/// The CA rejected a request or answered with something unusable
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("CA reported {problem} for {url}")]
    Problem { url: String, problem: Problem },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("unable to use ACME directory at {url}: {reason}")]
    UnsupportedDirectory { url: String, reason: String },

    #[error("CA requires {0}, which is not supported")]
    Unsupported(String),

    #[error("account {url} is {status}")]
    AccountUnusable { url: String, status: String },

    #[error("authorization for {domain} is {state}: {detail}")]
    AuthorizationFailed {
        domain: String,
        state: String,
        detail: String,
    },

    #[error("no usable challenge for {domain}, CA offered: {offered}")]
    NoUsableChallenge { domain: String, offered: String },

    #[error("order {url} failed: {detail}")]
    OrderFailed { url: String, detail: String },

    #[error("certificate rejected: {0}")]
    CertificateMismatch(String),

    #[error("key or signature error: {0}")]
    Crypto(String),
}

impl ProtocolError {
    /// Errno-style status, derived from the CA's problem type where there is one
    pub fn errno(&self) -> (i32, &'static str) {
        match self {
            ProtocolError::Problem { problem, .. } => problem.errno(),
            ProtocolError::HttpStatus { status, .. } => http_status(*status),
            _ => EPROTO,
        }
    }

    /// Whether the CA answered that the resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ProtocolError::HttpStatus { status, .. } => *status == 404,
            ProtocolError::Problem { problem, .. } => problem.status == Some(404),
            _ => false,
        }
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid store key '{0}'")]
    InvalidKey(String),

    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_refused_vocabulary() {
        let err = NetworkError::new(
            NetworkErrorKind::ConnectionRefused,
            "http://localhost:4711/directory",
            "tcp connect error",
        );
        assert_eq!(err.code, 61);
        assert_eq!(err.description, "Connection refused");

        let drive: DriveError = err.into();
        assert!(drive.is_retryable());
        assert_eq!(drive.status(), (61, "Connection refused".to_string()));
    }

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            NetworkErrorKind::ConnectionRefused,
            NetworkErrorKind::TimedOut,
            NetworkErrorKind::ConnectionReset,
            NetworkErrorKind::HostUnreachable,
            NetworkErrorKind::Dns,
            NetworkErrorKind::Tls,
            NetworkErrorKind::Other,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert_ne!(
            NetworkErrorKind::ConnectionRefused.code(),
            NetworkErrorKind::Dns.code()
        );
    }

    #[test]
    fn test_config_error_messages() {
        assert!(ConfigError::NoContactInfo("a.org".into())
            .to_string()
            .contains("no contact information"));
        assert!(ConfigError::TosNotAccepted("a.org".into())
            .to_string()
            .contains("need to accept terms-of-service"));
        assert!(ConfigError::NoCaUrl("a.org".into())
            .to_string()
            .contains("no CA server URL"));
        assert!(ConfigError::UnknownProtocol {
            md: "a.org".into(),
            protocol: "FOO".into()
        }
        .to_string()
        .contains("unknown CA protocol"));
    }

    #[test]
    fn test_protocol_status_follows_problem_type() {
        let rejected = |kind: &str| {
            DriveError::from(ProtocolError::Problem {
                url: "https://ca.test/new-order".into(),
                problem: Problem::new(kind, "rejected"),
            })
            .status()
        };
        assert_eq!(
            rejected("urn:ietf:params:acme:error:badCSR"),
            (22, "Invalid argument".to_string())
        );
        assert_eq!(
            rejected("urn:ietf:params:acme:error:userActionRequired"),
            (35, "Resource temporarily unavailable".to_string())
        );
        assert_eq!(
            rejected("urn:ietf:params:acme:error:unauthorized"),
            (13, "Permission denied".to_string())
        );
        assert_eq!(
            rejected("urn:ietf:params:acme:error:caa"),
            (71, "Protocol error".to_string())
        );

        let missing = DriveError::from(ProtocolError::HttpStatus {
            url: "https://ca.test/order/9".into(),
            status: 404,
        });
        assert_eq!(missing.status().0, 2);
        assert_eq!(
            DriveError::from(ProtocolError::Crypto("bad".into())).status().0,
            71
        );
    }

    #[test]
    fn test_retryable_classes() {
        assert!(!DriveError::from(ConfigError::NoDomains).is_retryable());
        assert!(!DriveError::from(ProtocolError::Crypto("bad".into())).is_retryable());
        assert!(DriveError::Timeout {
            what: "authorization".into(),
            elapsed: Duration::from_secs(1),
            attempts: 3,
        }
        .is_retryable());
    }
}
