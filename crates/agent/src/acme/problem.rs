//! RFC 7807 problem documents returned by the CA.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A problem document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Problem type URI, e.g. `urn:ietf:params:acme:error:badNonce`
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Well-known ACME error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadCsr,
    BadNonce,
    BadSignatureAlgorithm,
    InvalidContact,
    UnsupportedContact,
    Malformed,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Unauthorized,
    UnsupportedIdentifier,
    UserActionRequired,
    BadRevocationReason,
    Caa,
    Dns,
    Connection,
    Tls,
    IncorrectResponse,
    AccountDoesNotExist,
    ExternalAccountRequired,
    OrderNotReady,
    Other,
}

const KINDS: &[(&str, ProblemKind)] = &[
    ("acme:error:badCSR", ProblemKind::BadCsr),
    ("acme:error:badNonce", ProblemKind::BadNonce),
    ("acme:error:badSignatureAlgorithm", ProblemKind::BadSignatureAlgorithm),
    ("acme:error:invalidContact", ProblemKind::InvalidContact),
    ("acme:error:unsupportedContact", ProblemKind::UnsupportedContact),
    ("acme:error:malformed", ProblemKind::Malformed),
    ("acme:error:rateLimited", ProblemKind::RateLimited),
    ("acme:error:rejectedIdentifier", ProblemKind::RejectedIdentifier),
    ("acme:error:serverInternal", ProblemKind::ServerInternal),
    ("acme:error:unauthorized", ProblemKind::Unauthorized),
    ("acme:error:unsupportedIdentifier", ProblemKind::UnsupportedIdentifier),
    ("acme:error:userActionRequired", ProblemKind::UserActionRequired),
    ("acme:error:badRevocationReason", ProblemKind::BadRevocationReason),
    ("acme:error:caa", ProblemKind::Caa),
    ("acme:error:dns", ProblemKind::Dns),
    ("acme:error:connection", ProblemKind::Connection),
    ("acme:error:tls", ProblemKind::Tls),
    ("acme:error:incorrectResponse", ProblemKind::IncorrectResponse),
    ("acme:error:accountDoesNotExist", ProblemKind::AccountDoesNotExist),
    ("acme:error:externalAccountRequired", ProblemKind::ExternalAccountRequired),
    ("acme:error:orderNotReady", ProblemKind::OrderNotReady),
];

impl ProblemKind {
    /// Errno-style status and description reported for a problem of this kind
    ///
    /// `None` for kinds without a specific status.
    pub const fn status(self) -> Option<(i32, &'static str)> {
        match self {
            Self::BadCsr
            | Self::BadSignatureAlgorithm
            | Self::Malformed
            | Self::BadRevocationReason
            | Self::InvalidContact
            | Self::RateLimited
            | Self::RejectedIdentifier
            | Self::UnsupportedIdentifier => Some(EINVAL),
            Self::BadNonce | Self::UserActionRequired => Some(EAGAIN),
            Self::Unauthorized => Some(EACCES),
            _ => None,
        }
    }
}

pub(crate) const EINVAL: (i32, &str) = (22, "Invalid argument");
pub(crate) const EAGAIN: (i32, &str) = (35, "Resource temporarily unavailable");
pub(crate) const EACCES: (i32, &str) = (13, "Permission denied");
pub(crate) const ENOENT: (i32, &str) = (2, "No such file or directory");
pub(crate) const EPROTO: (i32, &str) = (71, "Protocol error");

/// Status for a bare HTTP error status
pub(crate) const fn http_status(status: u16) -> (i32, &'static str) {
    match status {
        400 => EINVAL,
        401 | 403 => EACCES,
        404 => ENOENT,
        _ => EPROTO,
    }
}

impl Problem {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: Some(detail.into()),
            status: None,
        }
    }

    /// Type with the `urn:ietf:params:` or `urn:` prefix removed
    pub fn short_type(&self) -> &str {
        let kind = self.kind.as_str();
        kind.strip_prefix("urn:ietf:params:")
            .or_else(|| kind.strip_prefix("urn:"))
            .unwrap_or(kind)
    }

    pub fn classify(&self) -> ProblemKind {
        let short = self.short_type();
        KINDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(short))
            .map(|(_, kind)| *kind)
            .unwrap_or(ProblemKind::Other)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.classify() == ProblemKind::BadNonce
    }

    /// Errno-style status of the problem, falling back to its HTTP status
    pub fn errno(&self) -> (i32, &'static str) {
        match self.classify().status() {
            Some(status) => status,
            None => self.status.map(http_status).unwrap_or(EPROTO),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_empty() {
            "unknown problem"
        } else {
            self.short_type()
        };
        match self.detail {
            Some(ref detail) if !detail.is_empty() => write!(f, "{} ({})", kind, detail),
            _ => f.write_str(kind),
        }
    }
}
