//! Drive orchestration
//!
//! [`Driver::drive`] takes one managed domain from whatever state the store
//! holds to a stored certificate:
//!
//! ```text
//! preconditions ─► account ─► resume authorizations ─► order
//!                                                       │
//!        stored ◄── certificate ◄── finalize ◄── authorize names
//! ```
//!
//! Each step persists its progress before the next one starts, so a failed
//! or cancelled drive is resumed by driving again.

use std::sync::Arc;

use mdacme_config::DriveSettings;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountManager, AccountRecord, TosStatus};
use crate::acme::{AcmeClient, OrderStatus, ProblemKind};
use crate::authz::{AuthzEngine, AuthzRecord};
use crate::cert::Certificate;
use crate::challenge::ChallengeResponder;
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, DriveError, ProtocolError};
use crate::issuer::Issuer;
use crate::md::{normalize_domain, CertInfo, ManagedDomain, MdState};
use crate::poll::PollPolicy;
use crate::store::Store;
use crate::transport::HttpClient;


/// Drives managed domains through the ACME protocol
///
/// A driver holds no per-domain state; several domains may be driven
/// concurrently from one instance.
#[derive(Clone)]
pub struct Driver {
    settings: DriveSettings,
    store: Arc<dyn Store>,
    http: Arc<dyn HttpClient>,
    challenges: Arc<dyn ChallengeResponder>,
    clock: Arc<dyn Clock>,
}

impl Driver {
    pub fn new(
        settings: DriveSettings,
        store: Arc<dyn Store>,
        http: Arc<dyn HttpClient>,
        challenges: Arc<dyn ChallengeResponder>,
    ) -> Self {
        Self {
            settings,
            store,
            http,
            challenges,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for polling and validity checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// ACME client for the CA of `md`
    pub fn client_for(&self, md: &ManagedDomain) -> Result<AcmeClient, ConfigError> {
        let ca_url = md
            .ca_url()
            .ok_or_else(|| ConfigError::NoCaUrl(md.name.clone()))?;
        Ok(AcmeClient::new(ca_url, Arc::clone(&self.http)))
    }

    /// Local checks that must pass before the CA is contacted
    ///
    /// Checked in order: contacts, terms-of-service agreement, CA URL and
    /// protocol. The first failing check is reported.
    pub fn check_preconditions(&self, md: &ManagedDomain) -> Result<(), DriveError> {
        if md.contacts.is_empty() {
            return Err(ConfigError::NoContactInfo(md.name.clone()).into());
        }

        if md.agreement().is_none() {
            let agreed = match md.account() {
                Some(url) => self
                    .store
                    .find_account_by_url(url)?
                    .map(|record| record.has_agreed())
                    .unwrap_or(false),
                None => false,
            };
            if !agreed {
                return Err(ConfigError::TosNotAccepted(md.name.clone()).into());
            }
        }

        let Some(ca_url) = md.ca_url() else {
            return Err(ConfigError::NoCaUrl(md.name.clone()).into());
        };
        let absolute = url::Url::parse(ca_url)
            .map(|u| u.has_host())
            .unwrap_or(false);
        if !absolute {
            return Err(ConfigError::InvalidCaUrl {
                md: md.name.clone(),
                url: ca_url.to_string(),
            }
            .into());
        }

        if !md.speaks_acme() {
            return Err(ConfigError::UnknownProtocol {
                md: md.name.clone(),
                protocol: md.ca.protocol.clone(),
            }
            .into());
        }

        Ok(())
    }

    /// Obtain a certificate for the managed domain `name`
    ///
    /// Returns once the certificate is stored. A stored certificate that is
    /// still good is returned without contacting the CA.
    pub async fn drive(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Certificate, DriveError> {
        let mut md = self
            .store
            .load_md(name)?
            .ok_or_else(|| ConfigError::UnknownMd(name.to_string()))?;

        self.check_preconditions(&md)?;

        if let Some(cert) = self.current_certificate(&md)? {
            self.mark_complete(&mut md, &cert)?;
            debug!(md = %md.name, not_after = %cert.not_after, "Stored certificate still valid");
            return Ok(cert);
        }

        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }

        info!(md = %md.name, domains = ?md.domains, "Driving managed domain");
        match self.run(&mut md, cancel).await {
            Ok(cert) => Ok(cert),
            Err(e) => {
                self.record_failure(&mut md, &e);
                Err(e)
            }
        }
    }

    /// Drive every stored managed domain, sequentially
    pub async fn drive_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Result<Certificate, DriveError>)>, DriveError> {
        let mut results = Vec::new();
        for name in self.store.list_mds()? {
            let result = self.drive(&name, cancel).await;
            results.push((name, result));
        }
        Ok(results)
    }

    // =========================================================================
    // Out-of-band account operations
    // =========================================================================

    /// Register a new account at `ca_url`
    pub async fn register_account(
        &self,
        ca_url: &str,
        contacts: &[String],
        agreement: Option<&str>,
    ) -> Result<AccountRecord, DriveError> {
        let client = AcmeClient::new(ca_url, Arc::clone(&self.http));
        let account = AccountManager::new(&client, self.store.as_ref(), self.clock.as_ref())
            .register(ca_url, contacts, agreement)
            .await?;
        Ok(account.record)
    }

    /// Agree to terms of service on behalf of a stored account
    pub async fn agree_to_terms(
        &self,
        account_url: &str,
        agreement: &str,
    ) -> Result<AccountRecord, DriveError> {
        let client = self.account_client(account_url)?;
        let manager = AccountManager::new(&client, self.store.as_ref(), self.clock.as_ref());
        let mut account = manager.load_by_url(account_url)?;
        manager.agree_to_terms(&mut account, agreement).await?;
        Ok(account.record)
    }

    /// Create an authorization for `domain` outside of any order
    pub async fn pre_authorize(
        &self,
        account_url: &str,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthzRecord, DriveError> {
        let domain = normalize_domain(domain)?;
        let client = self.account_client(account_url)?;
        let account = AccountManager::new(&client, self.store.as_ref(), self.clock.as_ref())
            .load_by_url(account_url)?;
        let engine = AuthzEngine {
            client: &client,
            store: self.store.as_ref(),
            responder: self.challenges.as_ref(),
            clock: self.clock.as_ref(),
            cancel,
            policy: PollPolicy::from_settings(&self.settings),
            preferences: &self.settings.challenges,
        };
        engine.create_pre_authorization(&account, &domain).await
    }

    /// Client for the CA a stored account belongs to
    fn account_client(&self, account_url: &str) -> Result<AcmeClient, DriveError> {
        let record = self
            .store
            .find_account_by_url(account_url)?
            .ok_or_else(|| ConfigError::UnknownAccount(account_url.to_string()))?;
        Ok(AcmeClient::new(record.ca_url, Arc::clone(&self.http)))
    }

    async fn run(
        &self,
        md: &mut ManagedDomain,
        cancel: &CancellationToken,
    ) -> Result<Certificate, DriveError> {
        let client = self.client_for(md)?;
        let store = self.store.as_ref();
        let clock = self.clock.as_ref();
        let policy = PollPolicy::from_settings(&self.settings);

        let account = AccountManager::new(&client, store, clock)
            .resolve(md)
            .await?;
        store.save_md(md)?;

        let engine = AuthzEngine {
            client: &client,
            store,
            responder: self.challenges.as_ref(),
            clock,
            cancel,
            policy,
            preferences: &self.settings.challenges,
        };
        let issuer = Issuer {
            client: &client,
            store,
            clock,
            cancel,
            policy,
        };

        let mut set = engine.load_set(&md.name, &account)?;
        engine.resume(&md.name, &account, &mut set).await?;

        let handle = issuer
            .ensure_order(&md.name, &account, &mut set, &md.domains)
            .await?;
        if handle.order.status == OrderStatus::Pending {
            engine
                .authorize(&md.name, &account, &mut set, &handle.order.authorizations)
                .await?;
        }

        let cert = issuer
            .finalize(&md.name, &account, &mut set, handle, &md.domains)
            .await?;

        store.save_certificate(&md.name, &cert.to_stored(clock.now()))?;
        self.mark_complete(md, &cert)?;

        store.remove_staged_key(&md.name)?;
        set.order = None;
        store.save_authz_set(&md.name, &set)?;

        info!(
            md = %md.name,
            serial = %cert.serial,
            not_after = %cert.not_after,
            "Certificate saved"
        );
        Ok(cert)
    }

    /// The stored certificate, if it can be used without renewal
    fn current_certificate(&self, md: &ManagedDomain) -> Result<Option<Certificate>, DriveError> {
        let Some(stored) = self.store.load_certificate(&md.name)? else {
            return Ok(None);
        };
        let cert = match Certificate::from_stored(&stored) {
            Ok(cert) => cert,
            Err(e) => {
                warn!(md = %md.name, error = %e, "Ignoring unreadable stored certificate");
                return Ok(None);
            }
        };

        let now = self.clock.now();
        if let Err(e) = cert.validate_for(&md.domains, now) {
            debug!(md = %md.name, reason = %e, "Stored certificate not usable");
            return Ok(None);
        }
        if cert.needs_renewal(now, self.settings.renew_window()) {
            info!(md = %md.name, not_after = %cert.not_after, "Certificate due for renewal");
            return Ok(None);
        }
        Ok(Some(cert))
    }

    fn mark_complete(&self, md: &mut ManagedDomain, cert: &Certificate) -> Result<(), DriveError> {
        let info = CertInfo {
            url: cert.source_url.clone(),
            expires: Some(cert.not_after),
        };
        if md.state != MdState::Complete || md.cert != info {
            md.state = MdState::Complete;
            md.cert = info;
            self.store.save_md(md)?;
        }
        Ok(())
    }

    /// Persist what a failed drive means for the managed domain
    ///
    /// Only protocol failures change the record; retryable failures leave it
    /// untouched.
    fn record_failure(&self, md: &mut ManagedDomain, error: &DriveError) {
        let DriveError::Protocol(protocol) = error else {
            debug!(md = %md.name, error = %error, retryable = error.is_retryable(), "Drive failed");
            return;
        };
        warn!(md = %md.name, error = %protocol, "Drive failed, operator action needed");

        if let ProtocolError::Problem { problem, .. } = protocol {
            if problem.classify() == ProblemKind::UserActionRequired {
                self.mark_terms_pending(md);
            }
        }

        md.state = MdState::Error;
        if let Err(e) = self.store.save_md(md) {
            warn!(md = %md.name, error = %e, "Failed to record drive failure");
        }
    }

    fn mark_terms_pending(&self, md: &ManagedDomain) {
        let Some(url) = md.account() else {
            return;
        };
        match self.store.find_account_by_url(url) {
            Ok(Some(mut record)) => {
                record.tos = TosStatus::Pending;
                if let Err(e) = self.store.save_account(&record) {
                    warn!(account = %record.id, error = %e, "Failed to record pending agreement");
                } else {
                    info!(account = %record.id, "CA requires renewed terms-of-service agreement");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(md = %md.name, error = %e, "Failed to look up account"),
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
