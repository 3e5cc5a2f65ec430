//! Domain authorizations
//!
//! Each name of a managed domain needs a `valid` authorization before the
//! order can be finalized. The engine drives one authorization at a time:
//!
//! ```text
//!   pending ──(challenge triggered, polled)──► valid
//!      │
//!      └────────────────────────────────────► invalid
//! ```
//!
//! Progress is written to the [`AuthzSet`] of the managed domain after every
//! change, so an interrupted drive picks up where it stopped.

use mdacme_config::ChallengeType;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::acme::{AcmeClient, Authorization, AuthorizationStatus, ChallengeStatus, Identifier};
use crate::challenge::{ChallengeResponder, PendingChallenge};
use crate::clock::Clock;
use crate::error::{DriveError, ProtocolError};
use crate::poll::{poll_until, PollPolicy, Progress};
use crate::store::Store;

/// Local view of an authorization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzState {
    Pending,
    Valid,
    Invalid,
    /// Expired, deactivated or revoked at the CA
    Expired,
}

impl From<AuthorizationStatus> for AuthzState {
    fn from(status: AuthorizationStatus) -> Self {
        match status {
            AuthorizationStatus::Pending => AuthzState::Pending,
            AuthorizationStatus::Valid => AuthzState::Valid,
            AuthorizationStatus::Invalid => AuthzState::Invalid,
            AuthorizationStatus::Deactivated
            | AuthorizationStatus::Expired
            | AuthorizationStatus::Revoked => AuthzState::Expired,
        }
    }
}

/// Persisted authorization of one name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzRecord {
    pub domain: String,
    /// CA location URL
    pub location: String,
    pub state: AuthzState,
    /// Diagnostic reported by the CA
    #[serde(default)]
    pub detail: Option<String>,
}

/// Authorizations and the current order of a managed domain
///
/// The set belongs to the account that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzSet {
    /// Account URL
    pub account: String,
    /// Order URL, if an order is in progress
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub authorizations: Vec<AuthzRecord>,
}

impl AuthzSet {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            order: None,
            authorizations: Vec::new(),
        }
    }

    pub fn get(&self, domain: &str) -> Option<&AuthzRecord> {
        self.authorizations.iter().find(|r| r.domain == domain)
    }

    /// Insert or replace the record of `record.domain`
    pub fn upsert(&mut self, record: AuthzRecord) {
        match self
            .authorizations
            .iter_mut()
            .find(|r| r.domain == record.domain)
        {
            Some(existing) => *existing = record,
            None => self.authorizations.push(record),
        }
    }

    pub fn remove(&mut self, domain: &str) -> Option<AuthzRecord> {
        let index = self.authorizations.iter().position(|r| r.domain == domain)?;
        Some(self.authorizations.remove(index))
    }

    /// Whether every name has a valid authorization
    pub fn all_valid(&self, names: &[String]) -> bool {
        names.iter().all(|name| {
            self.get(name)
                .map(|r| r.state == AuthzState::Valid)
                .unwrap_or(false)
        })
    }
}

/// Drives authorizations of one managed domain to a terminal state
pub struct AuthzEngine<'a> {
    pub(crate) client: &'a AcmeClient,
    pub(crate) store: &'a dyn Store,
    pub(crate) responder: &'a dyn ChallengeResponder,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) policy: PollPolicy,
    /// Challenge types in order of preference
    pub(crate) preferences: &'a [ChallengeType],
}

impl<'a> AuthzEngine<'a> {
    /// The stored set of `md`, or a fresh one if none exists or it belongs
    /// to another account
    pub fn load_set(&self, md: &str, account: &Account) -> Result<AuthzSet, DriveError> {
        match self.store.load_authz_set(md)? {
            Some(set) if set.account == account.url() => Ok(set),
            Some(set) => {
                warn!(
                    md = %md,
                    stored = %set.account,
                    account = %account.url(),
                    "Discarding authorizations of another account"
                );
                Ok(AuthzSet::new(account.url()))
            }
            None => Ok(AuthzSet::new(account.url())),
        }
    }

    /// Re-check persisted authorizations
    ///
    /// Pending ones are driven further, unusable or vanished ones are dropped
    /// together with the order that referenced them.
    pub async fn resume(
        &self,
        md: &str,
        account: &Account,
        set: &mut AuthzSet,
    ) -> Result<(), DriveError> {
        let records = set.authorizations.clone();
        for record in records {
            if matches!(record.state, AuthzState::Invalid | AuthzState::Expired) {
                self.drop_record(md, set, &record, "previously failed")?;
                continue;
            }

            let authz = match self
                .client
                .fetch::<Authorization>(&record.location, account.signer())
                .await
            {
                Ok(authz) => authz,
                Err(DriveError::Protocol(ref e)) if e.is_not_found() => {
                    self.drop_record(md, set, &record, "not found at CA")?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match authz.status {
                AuthorizationStatus::Pending => {
                    debug!(md = %md, domain = %record.domain, "Resuming pending authorization");
                    self.drive(md, account, set, &record.location, authz).await?;
                }
                AuthorizationStatus::Valid => {
                    self.record(md, set, &record.location, &authz)?;
                }
                status => {
                    let reason = format!("now {}", status.as_str());
                    self.drop_record(md, set, &record, &reason)?;
                }
            }
        }
        Ok(())
    }

    /// Drive every authorization of an order to `valid`
    pub async fn authorize(
        &self,
        md: &str,
        account: &Account,
        set: &mut AuthzSet,
        authorizations: &[String],
    ) -> Result<(), DriveError> {
        for location in authorizations {
            let authz: Authorization = self.client.fetch(location, account.signer()).await?;
            self.record(md, set, location, &authz)?;

            match authz.status {
                AuthorizationStatus::Valid => {
                    debug!(md = %md, domain = %authz.domain(), "Authorization already valid");
                }
                AuthorizationStatus::Pending => {
                    self.drive(md, account, set, location, authz).await?;
                }
                status => return Err(failure(&authz, status).into()),
            }
        }
        Ok(())
    }

    /// Request an authorization ahead of any order
    ///
    /// Needs the optional `newAuthz` resource of the CA. The record is not
    /// added to any set, the caller decides where it belongs.
    pub async fn create_pre_authorization(
        &self,
        account: &Account,
        domain: &str,
    ) -> Result<AuthzRecord, DriveError> {
        let directory = self.client.directory().await?;
        let new_authz = directory
            .new_authz
            .as_deref()
            .ok_or_else(|| ProtocolError::Unsupported("pre-authorization (newAuthz)".to_string()))?;

        let payload = json!({ "identifier": Identifier::dns(domain) });
        let created = self
            .client
            .post_json::<Authorization>(new_authz, account.signer(), Some(&payload))
            .await?;
        let location = created.location.ok_or_else(|| ProtocolError::InvalidResponse {
            url: new_authz.to_string(),
            reason: "authorization created without Location header".to_string(),
        })?;

        info!(domain = %domain, location = %location, "Created pre-authorization");
        Ok(AuthzRecord {
            domain: created.body.domain(),
            location,
            state: created.body.status.into(),
            detail: None,
        })
    }

    /// Answer a challenge of a pending authorization and wait for the result
    async fn drive(
        &self,
        md: &str,
        account: &Account,
        set: &mut AuthzSet,
        location: &str,
        authz: Authorization,
    ) -> Result<(), DriveError> {
        let domain = authz.domain();
        let (challenge, pending) = self.select_challenge(account, &authz)?;

        self.responder.setup(&pending).await?;
        let result = self
            .trigger_and_wait(account, location, &challenge.url, challenge.status, &domain)
            .await;
        if let Err(e) = self.responder.teardown(&pending).await {
            warn!(domain = %domain, error = %e, "Failed to remove challenge material");
        }

        let finished = result?;
        self.record(md, set, location, &finished)?;

        match finished.status {
            AuthorizationStatus::Valid => {
                info!(md = %md, domain = %domain, kind = %pending.kind, "Authorization valid");
                Ok(())
            }
            status => Err(failure(&finished, status).into()),
        }
    }

    async fn trigger_and_wait(
        &self,
        account: &Account,
        location: &str,
        challenge_url: &str,
        challenge_status: ChallengeStatus,
        domain: &str,
    ) -> Result<Authorization, DriveError> {
        if challenge_status == ChallengeStatus::Pending {
            self.client
                .post(challenge_url, account.signer(), Some(&json!({})))
                .await?;
            info!(domain = %domain, challenge = %challenge_url, "Challenge triggered");
        }

        let client = self.client;
        let what = format!("authorization of {}", domain);
        poll_until(&what, &self.policy, self.clock, self.cancel, |_| async move {
            let authz: Authorization = client.fetch(location, account.signer()).await?;
            if authz.status == AuthorizationStatus::Pending {
                Ok(Progress::Pending)
            } else {
                Ok(Progress::Done(authz))
            }
        })
        .await
    }

    fn select_challenge<'c>(
        &self,
        account: &Account,
        authz: &'c Authorization,
    ) -> Result<(&'c crate::acme::Challenge, PendingChallenge), ProtocolError> {
        for kind in self.preferences {
            if !self.responder.supports(*kind) {
                continue;
            }
            let offered = authz
                .challenges
                .iter()
                .find(|c| c.kind == kind.as_str() && c.token.is_some());
            if let Some(challenge) = offered {
                let token = challenge.token.clone().unwrap_or_default();
                let pending = PendingChallenge {
                    domain: authz.identifier.value.clone(),
                    kind: *kind,
                    key_authorization: account.key.key_authorization(&token),
                    token,
                };
                return Ok((challenge, pending));
            }
        }

        let offered: Vec<&str> = authz.challenges.iter().map(|c| c.kind.as_str()).collect();
        Err(ProtocolError::NoUsableChallenge {
            domain: authz.domain(),
            offered: offered.join(", "),
        })
    }

    fn record(
        &self,
        md: &str,
        set: &mut AuthzSet,
        location: &str,
        authz: &Authorization,
    ) -> Result<(), DriveError> {
        set.upsert(AuthzRecord {
            domain: authz.domain(),
            location: location.to_string(),
            state: authz.status.into(),
            detail: authz.problem().map(|p| p.to_string()),
        });
        self.store.save_authz_set(md, set)?;
        Ok(())
    }

    fn drop_record(
        &self,
        md: &str,
        set: &mut AuthzSet,
        record: &AuthzRecord,
        reason: &str,
    ) -> Result<(), DriveError> {
        warn!(
            md = %md,
            domain = %record.domain,
            location = %record.location,
            reason = %reason,
            "Dropping stale authorization"
        );
        set.remove(&record.domain);
        set.order = None;
        self.store.save_authz_set(md, set)?;
        Ok(())
    }
}

fn failure(authz: &Authorization, status: AuthorizationStatus) -> ProtocolError {
    ProtocolError::AuthorizationFailed {
        domain: authz.domain(),
        state: status.as_str().to_string(),
        detail: authz
            .problem()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "no detail provided by CA".to_string()),
    }
}
