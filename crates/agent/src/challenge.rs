//! Challenge material handed to the serving side
//!
//! The driver never serves challenges itself. It hands the key authorization
//! of a selected challenge to a [`ChallengeResponder`] before triggering
//! validation and tears it down once the authorization left `pending`.
//!
//! Two responders are provided:
//!
//! - [`ChallengeManager`] keeps HTTP-01 tokens in memory for a server
//!   embedding the driver in-process
//! - [`StoreChallenges`] publishes material through the [`Store`] for an
//!   external server reading `challenges/<domain>/<type>.txt`

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use mdacme_config::ChallengeType;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::store::Store;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// A challenge selected for validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Name being validated, without a wildcard label
    pub domain: String,
    pub kind: ChallengeType,
    pub token: String,
    /// `token.thumbprint` of the account key
    pub key_authorization: String,
}

impl PendingChallenge {
    /// Request path an HTTP-01 validator fetches
    pub fn http_path(&self) -> String {
        format!("{}{}", ACME_CHALLENGE_PREFIX, self.token)
    }

    /// Value of the `_acme-challenge` TXT record for DNS-01
    pub fn dns_txt_value(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.key_authorization.as_bytes()))
    }

    /// Material a server needs to answer this challenge
    pub fn response_material(&self) -> String {
        match self.kind {
            ChallengeType::Dns01 => self.dns_txt_value(),
            ChallengeType::Http01 | ChallengeType::TlsAlpn01 => self.key_authorization.clone(),
        }
    }
}

/// Makes challenge responses servable
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    /// Whether the responder can answer this challenge type
    fn supports(&self, kind: ChallengeType) -> bool;

    /// Make the response servable, called before the CA is asked to validate
    async fn setup(&self, challenge: &PendingChallenge) -> Result<(), StoreError>;

    /// Withdraw the response, called after validation finished either way
    async fn teardown(&self, challenge: &PendingChallenge) -> Result<(), StoreError>;
}

/// In-process HTTP-01 responder
///
/// Holds the key authorization of every challenge between setup and
/// teardown, keyed by token. A server embedding the driver hands request
/// paths to [`ChallengeManager::respond`]. Clones share one table.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    tokens: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body to answer an HTTP-01 request for `path` with
    ///
    /// `None` for paths outside the challenge prefix and for tokens that
    /// are not set up.
    pub fn respond(&self, path: &str) -> Option<String> {
        let token = path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
        let body = self.tokens.get(token).map(|entry| entry.value().clone());
        trace!(token, found = body.is_some(), "HTTP-01 lookup");
        body
    }

    /// Challenges currently answered
    pub fn pending_count(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl ChallengeResponder for ChallengeManager {
    fn supports(&self, kind: ChallengeType) -> bool {
        kind == ChallengeType::Http01
    }

    async fn setup(&self, challenge: &PendingChallenge) -> Result<(), StoreError> {
        self.tokens
            .insert(challenge.token.clone(), challenge.key_authorization.clone());
        debug!(domain = %challenge.domain, token = %challenge.token, "Answering HTTP-01 challenge");
        Ok(())
    }

    async fn teardown(&self, challenge: &PendingChallenge) -> Result<(), StoreError> {
        if self.tokens.remove(&challenge.token).is_some() {
            debug!(domain = %challenge.domain, token = %challenge.token, "Withdrew HTTP-01 challenge");
        }
        Ok(())
    }
}

/// Publishes challenge material through the store
#[derive(Debug, Clone)]
pub struct StoreChallenges {
    store: Arc<dyn Store>,
    kinds: Vec<ChallengeType>,
}

impl StoreChallenges {
    /// Responder answering every challenge type
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_types(
            store,
            vec![
                ChallengeType::Http01,
                ChallengeType::TlsAlpn01,
                ChallengeType::Dns01,
            ],
        )
    }

    /// Responder limited to the challenge types the serving side handles
    pub fn with_types(store: Arc<dyn Store>, kinds: Vec<ChallengeType>) -> Self {
        Self { store, kinds }
    }
}

#[async_trait]
impl ChallengeResponder for StoreChallenges {
    fn supports(&self, kind: ChallengeType) -> bool {
        self.kinds.contains(&kind)
    }

    async fn setup(&self, challenge: &PendingChallenge) -> Result<(), StoreError> {
        self.store.save_challenge(
            &challenge.domain,
            challenge.kind,
            &challenge.response_material(),
        )?;
        debug!(domain = %challenge.domain, kind = %challenge.kind, "Published challenge material");
        Ok(())
    }

    async fn teardown(&self, challenge: &PendingChallenge) -> Result<(), StoreError> {
        self.store
            .remove_challenge(&challenge.domain, challenge.kind)?;
        debug!(domain = %challenge.domain, kind = %challenge.kind, "Removed challenge material");
        Ok(())
    }
}
