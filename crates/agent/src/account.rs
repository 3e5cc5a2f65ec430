//! ACME account registration, reuse and terms-of-service agreement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::acme::{AccountResource, AccountStatus, AcmeClient, EcKey, Signer};
use crate::clock::Clock;
use crate::error::{ConfigError, DriveError, ProtocolError, StoreError};
use crate::md::ManagedDomain;
use crate::store::Store;

/// Local terms-of-service state of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TosStatus {
    /// Registered without agreeing
    #[default]
    None,
    /// The CA asked for agreement that has not been submitted yet
    Pending,
    Agreed,
}

/// Persisted account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Local id, `ACME-<host>-NNNN`
    pub id: String,
    /// CA-assigned account URL
    pub url: String,
    /// Directory URL of the CA the account belongs to
    pub ca_url: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    #[serde(default)]
    pub tos: TosStatus,
    /// Terms-of-service URL agreed to
    #[serde(default)]
    pub agreement: Option<String>,
    pub created: DateTime<Utc>,
}

impl AccountRecord {
    pub fn has_agreed(&self) -> bool {
        self.tos == TosStatus::Agreed
    }
}

/// An account record together with its key
#[derive(Debug)]
pub struct Account {
    pub record: AccountRecord,
    pub key: EcKey,
}

impl Account {
    pub fn url(&self) -> &str {
        &self.record.url
    }

    pub fn signer(&self) -> Signer<'_> {
        Signer::kid(&self.key, &self.record.url)
    }
}

/// Compare CA URLs ignoring a trailing slash
pub(crate) fn same_ca(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Resolves, registers and updates accounts at one CA
pub struct AccountManager<'a> {
    client: &'a AcmeClient,
    store: &'a dyn Store,
    clock: &'a dyn Clock,
}

impl<'a> AccountManager<'a> {
    pub fn new(client: &'a AcmeClient, store: &'a dyn Store, clock: &'a dyn Clock) -> Self {
        Self {
            client,
            store,
            clock,
        }
    }

    /// Find or create the account of a managed domain
    ///
    /// A linked account is loaded and validated at the CA. Without a link,
    /// a stored account of the same CA and contacts is reused, or a new one
    /// registered. The account URL is written onto `md`, the caller persists
    /// the record.
    pub async fn resolve(&self, md: &mut ManagedDomain) -> Result<Account, DriveError> {
        let ca_url = md
            .ca_url()
            .ok_or_else(|| ConfigError::NoCaUrl(md.name.clone()))?
            .to_string();

        let mut account = match md.account() {
            Some(url) => {
                let record = self
                    .store
                    .find_account_by_url(url)?
                    .ok_or_else(|| ConfigError::UnknownAccount(url.to_string()))?;
                if !same_ca(&record.ca_url, &ca_url) {
                    return Err(ConfigError::AccountCaMismatch {
                        url: record.url,
                        account_ca: record.ca_url,
                        md_ca: ca_url,
                    }
                    .into());
                }
                let account = self.load(record)?;
                self.validate(&account).await?;
                account
            }
            None => match self.find_reusable(&ca_url, &md.contacts)? {
                Some(account) => {
                    debug!(md = %md.name, account = %account.record.id, "Reusing stored account");
                    self.validate(&account).await?;
                    account
                }
                None => {
                    self.register(&ca_url, &md.contacts, md.agreement())
                        .await?
                }
            },
        };

        if md.account() != Some(account.url()) {
            info!(md = %md.name, account = %account.url(), "Linked account");
            md.ca.account = Some(account.url().to_string());
        }

        match md.agreement().map(str::to_string) {
            Some(agreement) => self.agree_to_terms(&mut account, &agreement).await?,
            None => {
                if account.record.has_agreed() {
                    md.ca.agreement = account.record.agreement.clone();
                }
            }
        }

        if !account.record.has_agreed() {
            return Err(ConfigError::TosNotAccepted(md.name.clone()).into());
        }

        Ok(account)
    }

    /// Register a new account
    ///
    /// The key is persisted before the CA is contacted and the record after
    /// the CA assigned its URL.
    pub async fn register(
        &self,
        ca_url: &str,
        contacts: &[String],
        agreement: Option<&str>,
    ) -> Result<Account, DriveError> {
        let directory = self.client.directory().await?;
        let key = EcKey::generate()?;
        let id = self.reserve_account_id(ca_url, &key.to_pem())?;

        let mut payload = json!({ "contact": contacts });
        if agreement.is_some() {
            payload["termsOfServiceAgreed"] = json!(true);
        }

        let created = self
            .client
            .post_json::<AccountResource>(&directory.new_account, Signer::jwk(&key), Some(&payload))
            .await?;
        let url = created
            .location
            .ok_or_else(|| ProtocolError::InvalidResponse {
                url: directory.new_account.clone(),
                reason: "account created without Location header".to_string(),
            })?;
        check_status(&url, created.body.status)?;

        let record = AccountRecord {
            id,
            url,
            ca_url: ca_url.to_string(),
            contacts: contacts.to_vec(),
            tos: if agreement.is_some() {
                TosStatus::Agreed
            } else {
                TosStatus::None
            },
            agreement: agreement.map(str::to_string),
            created: self.clock.now(),
        };
        self.store.save_account(&record)?;

        info!(account = %record.id, url = %record.url, "Registered ACME account");
        Ok(Account { record, key })
    }

    /// Submit agreement to the given terms of service
    ///
    /// Agreeing again to the URL already recorded does not contact the CA.
    pub async fn agree_to_terms(
        &self,
        account: &mut Account,
        agreement: &str,
    ) -> Result<(), DriveError> {
        if account.record.has_agreed() && account.record.agreement.as_deref() == Some(agreement) {
            debug!(account = %account.record.id, "Terms of service already agreed");
            return Ok(());
        }

        let payload = json!({ "termsOfServiceAgreed": true });
        let updated = self
            .client
            .post_json::<AccountResource>(account.url(), account.signer(), Some(&payload))
            .await?;
        check_status(account.url(), updated.body.status)?;

        account.record.tos = TosStatus::Agreed;
        account.record.agreement = Some(agreement.to_string());
        self.store.save_account(&account.record)?;

        info!(account = %account.record.id, agreement = %agreement, "Agreed to terms of service");
        Ok(())
    }

    /// Load a stored account by URL, checking it belongs to this CA
    pub fn load_by_url(&self, url: &str) -> Result<Account, DriveError> {
        let record = self
            .store
            .find_account_by_url(url)?
            .ok_or_else(|| ConfigError::UnknownAccount(url.to_string()))?;
        if !same_ca(&record.ca_url, self.client.ca_url()) {
            return Err(ConfigError::AccountCaMismatch {
                url: record.url,
                account_ca: record.ca_url,
                md_ca: self.client.ca_url().to_string(),
            }
            .into());
        }
        self.load(record)
    }

    fn load(&self, record: AccountRecord) -> Result<Account, DriveError> {
        let pem = self
            .store
            .load_account_key(&record.id)?
            .ok_or_else(|| StoreError::Corrupt(format!("account {} has no key", record.id)))?;
        let key = EcKey::from_pem(&pem)?;
        Ok(Account { record, key })
    }

    /// Check at the CA that the account is still usable
    async fn validate(&self, account: &Account) -> Result<(), DriveError> {
        let resource = self
            .client
            .post_json::<AccountResource>(account.url(), account.signer(), Some(&json!({})))
            .await?;
        check_status(account.url(), resource.body.status)?;
        debug!(account = %account.record.id, "Account is valid");
        Ok(())
    }

    fn find_reusable(
        &self,
        ca_url: &str,
        contacts: &[String],
    ) -> Result<Option<Account>, DriveError> {
        for id in self.store.list_accounts()? {
            let Some(record) = self.store.load_account(&id)? else {
                continue;
            };
            if !same_ca(&record.ca_url, ca_url) || !same_contacts(&record.contacts, contacts) {
                continue;
            }
            match self.load(record) {
                Ok(account) => return Ok(Some(account)),
                Err(e) => warn!(account = %id, error = %e, "Skipping unusable stored account"),
            }
        }
        Ok(None)
    }

    /// Claim the next free local id for an account of `ca_url` by storing its key
    fn reserve_account_id(&self, ca_url: &str, key_pem: &str) -> Result<String, DriveError> {
        let host = url::Url::parse(ca_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "ca".to_string());
        let chars: Vec<char> = host.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(16)..].iter().collect();
        let tail = tail.trim_start_matches('.');

        let existing = self.store.list_accounts()?;
        for n in 0..10_000u32 {
            let candidate = format!("ACME-{}-{:04}", tail, n);
            if existing.contains(&candidate) {
                continue;
            }
            if self.store.create_account_key(&candidate, key_pem)? {
                return Ok(candidate);
            }
        }
        Err(StoreError::Corrupt(format!("no free account id for {}", tail)).into())
    }
}

fn same_contacts(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

fn check_status(url: &str, status: AccountStatus) -> Result<(), ProtocolError> {
    match status {
        AccountStatus::Valid => Ok(()),
        AccountStatus::Deactivated => Err(ProtocolError::AccountUnusable {
            url: url.to_string(),
            status: "deactivated".to_string(),
        }),
        AccountStatus::Revoked => Err(ProtocolError::AccountUnusable {
            url: url.to_string(),
            status: "revoked".to_string(),
        }),
    }
}
