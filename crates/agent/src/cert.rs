//! Issued certificate inspection
//!
//! A downloaded chain is only stored once its leaf covers exactly the names
//! of the managed domain and belongs to the private key the CSR was made with.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::error::ProtocolError;
use crate::store::{CertificateMeta, StoredCertificate};

/// A parsed certificate chain with its private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// PEM chain, leaf first
    pub chain_pem: String,
    /// PEM PKCS#8 private key of the leaf
    pub key_pem: String,
    pub common_name: Option<String>,
    /// DNS names of the subject alternative name extension
    pub names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Hex serial number
    pub serial: String,
    pub source_url: Option<String>,
}

impl Certificate {
    /// Parse the leaf of `chain_pem` and check it matches `key_pem`
    pub fn parse(
        chain_pem: &str,
        key_pem: &str,
        source_url: Option<String>,
    ) -> Result<Self, ProtocolError> {
        let blocks = ::pem::parse_many(chain_pem)
            .map_err(|e| ProtocolError::Crypto(format!("invalid certificate PEM: {}", e)))?;
        let leaf = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or_else(|| ProtocolError::Crypto("chain contains no certificate".to_string()))?;

        let (_, cert) = parse_x509_certificate(leaf.contents())
            .map_err(|e| ProtocolError::Crypto(format!("invalid X509 certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push(dns.to_ascii_lowercase());
                }
            }
        }

        let not_before = timestamp(cert.validity().not_before.timestamp())?;
        let not_after = timestamp(cert.validity().not_after.timestamp())?;

        let key = rcgen::KeyPair::from_pem(key_pem)
            .map_err(|e| ProtocolError::Crypto(format!("invalid certificate key: {}", e)))?;
        // the SPKI DER ends with the encoded public key
        if !cert.public_key().raw.ends_with(key.public_key_raw()) {
            return Err(ProtocolError::CertificateMismatch(
                "certificate does not belong to the private key".to_string(),
            ));
        }

        let serial = cert.raw_serial_as_string();
        debug!(serial = %serial, not_after = %not_after, "Parsed certificate");

        Ok(Self {
            chain_pem: chain_pem.to_string(),
            key_pem: key_pem.to_string(),
            common_name,
            names,
            not_before,
            not_after,
            serial,
            source_url,
        })
    }

    pub fn from_stored(stored: &StoredCertificate) -> Result<Self, ProtocolError> {
        Self::parse(
            &stored.cert_pem,
            &stored.key_pem,
            stored.meta.source_url.clone(),
        )
    }

    pub fn to_stored(&self, issued: DateTime<Utc>) -> StoredCertificate {
        StoredCertificate {
            cert_pem: self.chain_pem.clone(),
            key_pem: self.key_pem.clone(),
            meta: CertificateMeta {
                expires: self.not_after,
                issued,
                domains: self.names.clone(),
                source_url: self.source_url.clone(),
            },
        }
    }

    /// Whether the SAN names are exactly `names`, ignoring order and case
    pub fn covers(&self, names: &[String]) -> bool {
        let mut ours: Vec<String> = self.names.clone();
        let mut theirs: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        ours.sort_unstable();
        ours.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        ours == theirs
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.not_after
    }

    /// Whether the certificate expires within `window` of `now`
    pub fn needs_renewal(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now + window >= self.not_after,
            Err(_) => true,
        }
    }

    /// Check the certificate is usable for `names` at `now`
    pub fn validate_for(&self, names: &[String], now: DateTime<Utc>) -> Result<(), ProtocolError> {
        if !self.covers(names) {
            return Err(ProtocolError::CertificateMismatch(format!(
                "certificate names [{}] differ from [{}]",
                self.names.join(", "),
                names.join(", ")
            )));
        }
        if let (Some(cn), Some(primary)) = (self.common_name.as_deref(), names.first()) {
            if !cn.eq_ignore_ascii_case(primary) {
                return Err(ProtocolError::CertificateMismatch(format!(
                    "certificate common name {} is not {}",
                    cn, primary
                )));
            }
        }
        if !self.is_active(now) {
            return Err(ProtocolError::CertificateMismatch(format!(
                "certificate is not valid at {} (valid {} to {})",
                now, self.not_before, self.not_after
            )));
        }
        Ok(())
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, ProtocolError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ProtocolError::Crypto(format!("certificate time {} out of range", seconds)))
}
