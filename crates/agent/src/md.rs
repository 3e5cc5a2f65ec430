//! Managed domain records
//!
//! A managed domain (MD) is a primary DNS name plus alias names that share
//! one certificate. The record is created by the operator, updated by the
//! operator and by the driver, and never deleted by the core.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol identifier of the only CA protocol the driver speaks
pub const ACME_PROTOCOL: &str = "ACME";

/// Drive state of a managed domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MdState {
    /// No usable certificate yet
    #[default]
    Incomplete,
    /// A certificate covering all names is stored
    Complete,
    /// The last drive was rejected by the CA, operator action is needed
    Error,
}

impl fmt::Display for MdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MdState::Incomplete => "incomplete",
            MdState::Complete => "complete",
            MdState::Error => "error",
        })
    }
}

fn default_protocol() -> String {
    ACME_PROTOCOL.to_string()
}

/// CA binding of a managed domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConfig {
    /// ACME directory URL
    #[serde(default)]
    pub url: Option<String>,
    /// Protocol identifier, compared case-insensitively against [`ACME_PROTOCOL`]
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Terms-of-service URL the operator accepted
    #[serde(default)]
    pub agreement: Option<String>,
    /// URL of the linked account
    #[serde(default)]
    pub account: Option<String>,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            url: None,
            protocol: default_protocol(),
            agreement: None,
            account: None,
        }
    }
}

/// Reference to the certificate last stored for a managed domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

/// A managed domain record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDomain {
    /// Primary name, also the identity of the record
    pub name: String,
    /// All names, primary first, lower-cased and unique
    pub domains: Vec<String>,
    /// Contact URIs
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub cert: CertInfo,
    #[serde(default)]
    pub state: MdState,
}

impl ManagedDomain {
    /// Create a managed domain from a list of names, the first being the primary
    pub fn new<I, S>(domains: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = normalize_domains(domains)?;
        Ok(Self {
            name: domains[0].clone(),
            domains,
            contacts: Vec::new(),
            ca: CaConfig::default(),
            cert: CertInfo::default(),
            state: MdState::Incomplete,
        })
    }

    /// The primary name
    pub fn primary(&self) -> &str {
        &self.name
    }

    /// Replace the name set
    ///
    /// The primary name stays part of the set and is moved to the front.
    pub fn set_domains<I, S>(&mut self, domains: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut domains = normalize_domains(domains)?;
        domains.retain(|d| d != &self.name);
        domains.insert(0, self.name.clone());
        self.domains = domains;
        Ok(())
    }

    /// Replace the contact list, turning bare e-mail addresses into `mailto:` URIs
    pub fn set_contacts<I, S>(&mut self, contacts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.contacts = normalize_contacts(contacts);
    }

    /// The accepted terms-of-service URL, if set and non-empty
    pub fn agreement(&self) -> Option<&str> {
        non_empty(self.ca.agreement.as_deref())
    }

    /// The CA directory URL, if set and non-empty
    pub fn ca_url(&self) -> Option<&str> {
        non_empty(self.ca.url.as_deref())
    }

    /// The linked account URL, if any
    pub fn account(&self) -> Option<&str> {
        non_empty(self.ca.account.as_deref())
    }

    /// Whether the configured protocol is ACME
    pub fn speaks_acme(&self) -> bool {
        self.ca.protocol.trim().eq_ignore_ascii_case(ACME_PROTOCOL)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Normalize contact URIs
pub fn normalize_contacts<I, S>(contacts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for contact in contacts {
        let contact = contact.as_ref().trim();
        if contact.is_empty() {
            continue;
        }
        let contact = if !contact.contains(':') && contact.contains('@') {
            format!("mailto:{}", contact)
        } else {
            contact.to_string()
        };
        if !out.contains(&contact) {
            out.push(contact);
        }
    }
    out
}

fn normalize_domains<I, S>(domains: I) -> Result<Vec<String>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for domain in domains {
        let domain = normalize_domain(domain.as_ref())?;
        if !out.contains(&domain) {
            out.push(domain);
        }
    }
    if out.is_empty() {
        return Err(ConfigError::NoDomains);
    }
    Ok(out)
}

/// Lower-case a DNS name and check its syntax
///
/// A single leading `*.` label is accepted for wildcard names.
pub fn normalize_domain(domain: &str) -> Result<String, ConfigError> {
    let name = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let invalid = || ConfigError::InvalidDomain(domain.to_string());

    if name.is_empty() || name.len() > 253 {
        return Err(invalid());
    }

    let base = name.strip_prefix("*.").unwrap_or(&name);
    for label in base.split('.') {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(invalid());
        }
    }

    Ok(name)
}
