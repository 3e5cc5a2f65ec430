//! mdacme Library
//!
//! Certificate acquisition for managed domains over ACME v2 (RFC 8555).
//!
//! A managed domain is a set of DNS names that share one certificate. The
//! [`Driver`] takes a managed domain from its stored state to an issued and
//! stored certificate:
//!
//! - **Preconditions**: contacts, terms-of-service agreement, CA URL and protocol
//! - **Accounts**: registration, reuse and agreement per CA
//! - **Authorizations**: challenge selection, triggering and bounded polling
//! - **Issuance**: order creation, CSR finalization and chain download
//! - **Persistence**: every step is written to a [`Store`] before the next begins
//!
//! A drive that fails or is interrupted is resumed by driving again.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdacme::{ChallengeManager, Driver, FileStore, ReqwestClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(FileStore::new(&config.store_dir)?);
//! let http = Arc::new(ReqwestClient::new(&config.transport)?);
//! let challenges = ChallengeManager::new();
//!
//! let driver = Driver::new(config.drive.clone(), store, http, Arc::new(challenges.clone()));
//! let cert = driver.drive("example.org", &CancellationToken::new()).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod account;
pub mod acme;
pub mod authz;
pub mod cert;
pub mod challenge;
pub mod clock;
pub mod driver;
pub mod error;
pub mod issuer;
pub mod md;
pub mod poll;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Orchestration
pub use driver::Driver;

// Domain model
pub use account::{Account, AccountManager, AccountRecord, TosStatus};
pub use authz::{AuthzEngine, AuthzRecord, AuthzSet, AuthzState};
pub use cert::Certificate;
pub use md::{CaConfig, CertInfo, ManagedDomain, MdState};

// Errors
pub use error::{
    ConfigError, DriveError, NetworkError, NetworkErrorKind, ProtocolError, StoreError,
};

// Boundaries
pub use challenge::{ChallengeManager, ChallengeResponder, PendingChallenge, StoreChallenges};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{FileStore, MemoryStore, Store, StoredCertificate};
pub use transport::{HttpClient, ReqwestClient};
