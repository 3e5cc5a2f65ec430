//! Persistence of managed domains, accounts, authorizations and certificates
//!
//! The driver treats the store as the source of truth: every step re-reads
//! what it needs and writes its progress back before moving on. Every
//! `load_*` returns `Ok(None)` for missing entries, and every `save_*`
//! replaces the entry atomically.

use std::fmt;

use chrono::{DateTime, Utc};
use mdacme_config::ChallengeType;
use serde::{Deserialize, Serialize};

use crate::account::AccountRecord;
use crate::authz::AuthzSet;
use crate::error::StoreError;
use crate::md::ManagedDomain;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Certificate metadata stored alongside the certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    /// When the certificate expires
    pub expires: DateTime<Utc>,
    /// When the certificate was stored
    pub issued: DateTime<Utc>,
    /// Names covered by this certificate, in SAN order
    pub domains: Vec<String>,
    /// URL the chain was downloaded from
    #[serde(default)]
    pub source_url: Option<String>,
}

/// A stored certificate with its key and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCertificate {
    /// PEM-encoded certificate chain, leaf first
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key
    pub key_pem: String,
    pub meta: CertificateMeta,
}

/// Key-addressed persistent store
pub trait Store: Send + Sync + fmt::Debug {
    // =========================================================================
    // Managed domains
    // =========================================================================

    fn load_md(&self, name: &str) -> Result<Option<ManagedDomain>, StoreError>;

    fn save_md(&self, md: &ManagedDomain) -> Result<(), StoreError>;

    /// Names of all stored managed domains, sorted
    fn list_mds(&self) -> Result<Vec<String>, StoreError>;

    // =========================================================================
    // Accounts
    // =========================================================================

    fn load_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError>;

    fn save_account(&self, record: &AccountRecord) -> Result<(), StoreError>;

    /// Ids of all stored accounts, sorted
    fn list_accounts(&self) -> Result<Vec<String>, StoreError>;

    /// PEM-encoded account key
    fn load_account_key(&self, id: &str) -> Result<Option<String>, StoreError>;

    fn save_account_key(&self, id: &str, key_pem: &str) -> Result<(), StoreError>;

    /// Store the key of a new account under `id` unless the id is taken
    ///
    /// Returns `false` when a key already exists for `id`. The check and the
    /// write are one atomic step, so concurrent registrations never share an id.
    fn create_account_key(&self, id: &str, key_pem: &str) -> Result<bool, StoreError>;

    /// Look an account up by its CA-assigned URL
    fn find_account_by_url(&self, url: &str) -> Result<Option<AccountRecord>, StoreError> {
        for id in self.list_accounts()? {
            if let Some(record) = self.load_account(&id)? {
                if record.url == url {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Authorizations
    // =========================================================================

    fn load_authz_set(&self, md: &str) -> Result<Option<AuthzSet>, StoreError>;

    fn save_authz_set(&self, md: &str, set: &AuthzSet) -> Result<(), StoreError>;

    // =========================================================================
    // Keys and certificates
    // =========================================================================

    /// Private key generated for the next certificate of a managed domain
    fn load_staged_key(&self, md: &str) -> Result<Option<String>, StoreError>;

    fn save_staged_key(&self, md: &str, key_pem: &str) -> Result<(), StoreError>;

    /// Remove the staged key, succeeding if there is none
    fn remove_staged_key(&self, md: &str) -> Result<(), StoreError>;

    fn load_certificate(&self, md: &str) -> Result<Option<StoredCertificate>, StoreError>;

    fn save_certificate(&self, md: &str, cert: &StoredCertificate) -> Result<(), StoreError>;

    // =========================================================================
    // Challenge material
    // =========================================================================

    /// Publish challenge response material for an external server
    fn save_challenge(
        &self,
        domain: &str,
        kind: ChallengeType,
        content: &str,
    ) -> Result<(), StoreError>;

    fn load_challenge(&self, domain: &str, kind: ChallengeType)
        -> Result<Option<String>, StoreError>;

    /// Remove challenge material, succeeding if there is none
    fn remove_challenge(&self, domain: &str, kind: ChallengeType) -> Result<(), StoreError>;
}

/// Check that a key can be used as a single path component
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= 255
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
