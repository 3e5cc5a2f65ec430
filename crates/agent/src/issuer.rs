//! Orders and certificate issuance
//!
//! An order moves `pending → ready → processing → valid`. The issuer creates
//! or resumes the order of a managed domain, submits the CSR once every
//! authorization is valid and downloads the chain. The certificate key is
//! staged in the store before the CSR leaves the process, so a drive that is
//! interrupted after finalization can still pick up the issued chain.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::acme::{AcmeClient, Identifier, Order, OrderStatus};
use crate::authz::AuthzSet;
use crate::cert::Certificate;
use crate::clock::Clock;
use crate::error::{DriveError, ProtocolError};
use crate::poll::{poll_until, PollPolicy, Progress};
use crate::store::Store;

/// An order together with its URL
#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub url: String,
    pub order: Order,
}

pub struct Issuer<'a> {
    pub(crate) client: &'a AcmeClient,
    pub(crate) store: &'a dyn Store,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) cancel: &'a CancellationToken,
    pub(crate) policy: PollPolicy,
}

impl<'a> Issuer<'a> {
    /// The order of the set if it is still usable for `names`, otherwise a new one
    pub async fn ensure_order(
        &self,
        md: &str,
        account: &Account,
        set: &mut AuthzSet,
        names: &[String],
    ) -> Result<OrderHandle, DriveError> {
        if let Some(url) = set.order.clone() {
            match self.reusable_order(md, account, &url, names).await? {
                Some(order) => {
                    debug!(md = %md, order = %url, status = ?order.status, "Resuming order");
                    return Ok(OrderHandle { url, order });
                }
                None => {
                    set.order = None;
                    self.store.save_authz_set(md, set)?;
                }
            }
        }

        let directory = self.client.directory().await?;
        let identifiers: Vec<Identifier> = names.iter().map(Identifier::dns).collect();
        let created = self
            .client
            .post_json::<Order>(
                &directory.new_order,
                account.signer(),
                Some(&json!({ "identifiers": identifiers })),
            )
            .await?;
        let url = created.location.ok_or_else(|| ProtocolError::InvalidResponse {
            url: directory.new_order.clone(),
            reason: "order created without Location header".to_string(),
        })?;

        set.order = Some(url.clone());
        self.store.save_authz_set(md, set)?;
        info!(md = %md, order = %url, names = names.len(), "Created order");

        Ok(OrderHandle {
            url,
            order: created.body,
        })
    }

    /// Finalize the order and return the validated certificate
    ///
    /// Expects every authorization of the order to be valid. The returned
    /// certificate is not yet stored.
    pub async fn finalize(
        &self,
        md: &str,
        account: &Account,
        set: &mut AuthzSet,
        handle: OrderHandle,
        names: &[String],
    ) -> Result<Certificate, DriveError> {
        let key_pem = self.staged_key(md)?;
        let OrderHandle { url, mut order } = handle;

        if order.status == OrderStatus::Pending {
            order = self
                .wait_for(account, &url, "order readiness", |s| s == OrderStatus::Pending)
                .await?;
        }

        if order.status == OrderStatus::Ready {
            let csr = build_csr(names, &key_pem)?;
            let submitted = self
                .client
                .post_json::<Order>(&order.finalize, account.signer(), Some(&json!({ "csr": csr })))
                .await?;
            info!(md = %md, order = %url, "Submitted certificate request");
            order = submitted.body;
        }

        if matches!(order.status, OrderStatus::Processing | OrderStatus::Ready) {
            order = self
                .wait_for(account, &url, "certificate issuance", |s| {
                    matches!(s, OrderStatus::Processing | OrderStatus::Ready)
                })
                .await?;
        }

        if order.status != OrderStatus::Valid {
            self.forget_order(md, set)?;
            return Err(ProtocolError::OrderFailed {
                url,
                detail: order
                    .error
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "order became invalid".to_string()),
            }
            .into());
        }

        let cert_url = order.certificate.ok_or_else(|| ProtocolError::InvalidResponse {
            url: url.clone(),
            reason: "valid order without certificate URL".to_string(),
        })?;
        let chain = self.client.download_chain(&cert_url, account.signer()).await?;

        let checked = Certificate::parse(&chain, &key_pem, Some(cert_url.clone()))
            .and_then(|cert| cert.validate_for(names, self.clock.now()).map(|_| cert));
        match checked {
            Ok(cert) => {
                debug!(md = %md, serial = %cert.serial, "Downloaded certificate");
                Ok(cert)
            }
            Err(e) => {
                warn!(md = %md, url = %cert_url, error = %e, "Rejecting issued certificate");
                self.forget_order(md, set)?;
                Err(e.into())
            }
        }
    }

    /// Fetch the persisted order and decide whether it can continue
    async fn reusable_order(
        &self,
        md: &str,
        account: &Account,
        url: &str,
        names: &[String],
    ) -> Result<Option<Order>, DriveError> {
        let order = match self.client.fetch::<Order>(url, account.signer()).await {
            Ok(order) => order,
            Err(DriveError::Protocol(ref e)) if e.is_not_found() => {
                warn!(md = %md, order = %url, "Persisted order no longer exists");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !order.covers_exactly(names) {
            warn!(md = %md, order = %url, "Persisted order is for other names");
            return Ok(None);
        }

        let usable = match order.status {
            OrderStatus::Pending | OrderStatus::Ready | OrderStatus::Processing => true,
            // only the staged key can complete a finalized order
            OrderStatus::Valid => self.store.load_staged_key(md)?.is_some(),
            OrderStatus::Invalid => false,
        };
        if !usable {
            warn!(md = %md, order = %url, status = ?order.status, "Persisted order is unusable");
            return Ok(None);
        }
        Ok(Some(order))
    }

    fn staged_key(&self, md: &str) -> Result<String, DriveError> {
        if let Some(pem) = self.store.load_staged_key(md)? {
            debug!(md = %md, "Using staged certificate key");
            return Ok(pem);
        }
        let pem = KeyPair::generate()
            .map_err(|e| ProtocolError::Crypto(format!("certificate key generation failed: {}", e)))?
            .serialize_pem();
        self.store.save_staged_key(md, &pem)?;
        debug!(md = %md, "Staged new certificate key");
        Ok(pem)
    }

    async fn wait_for<P>(
        &self,
        account: &Account,
        url: &str,
        what: &str,
        waiting: P,
    ) -> Result<Order, DriveError>
    where
        P: Fn(OrderStatus) -> bool,
    {
        let client = self.client;
        let waiting = &waiting;
        poll_until(what, &self.policy, self.clock, self.cancel, |_| async move {
            let order: Order = client.fetch(url, account.signer()).await?;
            if waiting(order.status) {
                Ok(Progress::Pending)
            } else {
                Ok(Progress::Done(order))
            }
        })
        .await
    }

    fn forget_order(&self, md: &str, set: &mut AuthzSet) -> Result<(), DriveError> {
        set.order = None;
        self.store.save_authz_set(md, set)?;
        Ok(())
    }
}

/// DER CSR for `names`, base64url encoded, with the first name as CN
pub(crate) fn build_csr(names: &[String], key_pem: &str) -> Result<String, ProtocolError> {
    let key = KeyPair::from_pem(key_pem)
        .map_err(|e| ProtocolError::Crypto(format!("invalid certificate key: {}", e)))?;
    let mut params = CertificateParams::new(names.to_vec())
        .map_err(|e| ProtocolError::Crypto(format!("invalid certificate names: {}", e)))?;
    let mut dn = DistinguishedName::new();
    if let Some(primary) = names.first() {
        dn.push(DnType::CommonName, primary.clone());
    }
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key)
        .map_err(|e| ProtocolError::Crypto(format!("CSR generation failed: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(csr.der()))
}
