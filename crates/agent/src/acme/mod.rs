//! ACME v2 protocol client (RFC 8555)
//!
//! [`AcmeClient`] owns the request conventions shared by every CA call:
//!
//! - the directory is fetched once per client and cached
//! - a nonce is taken from the last response, or fetched with `HEAD newNonce`
//! - bodies are JWS signed, POST-as-GET is used for resource reads
//! - a `badNonce` rejection is retried exactly once, nothing else is retried
//!
//! Higher level flows (accounts, authorizations, orders) live in their own
//! modules and only use the methods here.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{DriveError, ProtocolError};
use crate::transport::{HttpClient, HttpRequest, HttpResponse};

mod jws;
mod key;
pub(crate) mod problem;
mod resources;

pub use jws::Signer;
pub use key::EcKey;
pub use problem::{Problem, ProblemKind};
pub use resources::{
    AccountResource, AccountStatus, Authorization, AuthorizationStatus, Challenge,
    ChallengeStatus, Directory, DirectoryMeta, Identifier, Order, OrderStatus,
};

/// Content type of a PEM certificate chain download
pub const PEM_CHAIN: &str = "application/pem-certificate-chain";

/// A decoded successful response
#[derive(Debug, Clone)]
pub struct Resource<T> {
    pub body: T,
    /// `Location` header, the URL of a created resource
    pub location: Option<String>,
}

/// Client for one ACME CA
pub struct AcmeClient {
    ca_url: String,
    http: Arc<dyn HttpClient>,
    directory: Mutex<Option<Arc<Directory>>>,
    nonce: Mutex<Option<String>>,
}

impl AcmeClient {
    /// Create a client for the directory at `ca_url`
    pub fn new(ca_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            ca_url: ca_url.into(),
            http,
            directory: Mutex::new(None),
            nonce: Mutex::new(None),
        }
    }

    pub fn ca_url(&self) -> &str {
        &self.ca_url
    }

    /// The CA directory, fetched on first use
    pub async fn directory(&self) -> Result<Arc<Directory>, DriveError> {
        let cached = self.directory.lock().clone();
        if let Some(directory) = cached {
            return Ok(directory);
        }

        debug!(url = %self.ca_url, "Fetching ACME directory");
        let response = self.http.execute(HttpRequest::get(&self.ca_url)).await?;
        self.remember_nonce(&response);
        if !response.status.is_success() {
            return Err(error_response(&self.ca_url, &response).into());
        }

        let value: Value = response.json().map_err(|e| ProtocolError::InvalidResponse {
            url: self.ca_url.clone(),
            reason: format!("directory is not JSON: {}", e),
        })?;

        if value.get("new-reg").is_some() {
            return Err(ProtocolError::UnsupportedDirectory {
                url: self.ca_url.clone(),
                reason: "ACMEv1 directory, only ACMEv2 is supported".to_string(),
            }
            .into());
        }

        let directory: Directory =
            serde_json::from_value(value).map_err(|e| ProtocolError::UnsupportedDirectory {
                url: self.ca_url.clone(),
                reason: e.to_string(),
            })?;

        if directory.meta.external_account_required {
            return Err(ProtocolError::Unsupported("external account binding".to_string()).into());
        }

        let directory = Arc::new(directory);
        *self.directory.lock() = Some(Arc::clone(&directory));
        Ok(directory)
    }

    /// Signed POST, retried once with a fresh nonce on `badNonce`
    ///
    /// `payload = None` sends a POST-as-GET.
    pub async fn post(
        &self,
        url: &str,
        signer: Signer<'_>,
        payload: Option<&Value>,
    ) -> Result<HttpResponse, DriveError> {
        let mut retried = false;
        loop {
            let nonce = self.take_nonce().await?;
            let body = jws::sign(signer, &nonce, url, payload)?;

            trace!(url = %url, post_as_get = payload.is_none(), "Signed ACME request");
            let response = self.http.execute(HttpRequest::post_jose(url, body)).await?;
            self.remember_nonce(&response);

            if response.status.is_success() {
                return Ok(response);
            }

            let err = error_response(url, &response);
            if let ProtocolError::Problem { ref problem, .. } = err {
                if problem.is_bad_nonce() && !retried {
                    debug!(url = %url, "CA rejected nonce, retrying once");
                    retried = true;
                    continue;
                }
                warn!(url = %url, problem = %problem, "ACME request rejected");
            }
            return Err(err.into());
        }
    }

    /// Signed POST decoding a JSON resource
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        signer: Signer<'_>,
        payload: Option<&Value>,
    ) -> Result<Resource<T>, DriveError> {
        let response = self.post(url, signer, payload).await?;
        decode(url, &response)
    }

    /// POST-as-GET of a JSON resource
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        signer: Signer<'_>,
    ) -> Result<T, DriveError> {
        Ok(self.post_json(url, signer, None).await?.body)
    }

    /// POST-as-GET of a PEM certificate chain
    pub async fn download_chain(&self, url: &str, signer: Signer<'_>) -> Result<String, DriveError> {
        let response = self.post(url, signer, None).await?;
        let chain = String::from_utf8(response.body.to_vec()).map_err(|_| {
            ProtocolError::InvalidResponse {
                url: url.to_string(),
                reason: "certificate chain is not UTF-8".to_string(),
            }
        })?;
        if !chain.contains("-----BEGIN CERTIFICATE-----") {
            return Err(ProtocolError::InvalidResponse {
                url: url.to_string(),
                reason: "response contains no PEM certificate".to_string(),
            }
            .into());
        }
        Ok(chain)
    }

    async fn take_nonce(&self) -> Result<String, DriveError> {
        let cached = self.nonce.lock().take();
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let directory = self.directory().await?;
        let cached = self.nonce.lock().take();
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let response = self
            .http
            .execute(HttpRequest::head(&directory.new_nonce))
            .await?;
        if !response.status.is_success() {
            return Err(error_response(&directory.new_nonce, &response).into());
        }
        response
            .replay_nonce()
            .map(str::to_string)
            .ok_or_else(|| {
                ProtocolError::InvalidResponse {
                    url: directory.new_nonce.clone(),
                    reason: "missing Replay-Nonce header".to_string(),
                }
                .into()
            })
    }

    fn remember_nonce(&self, response: &HttpResponse) {
        if let Some(nonce) = response.replay_nonce() {
            *self.nonce.lock() = Some(nonce.to_string());
        }
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("ca_url", &self.ca_url)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<Resource<T>, DriveError> {
    let body = response.json().map_err(|e| ProtocolError::InvalidResponse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Resource {
        body,
        location: response.location().map(str::to_string),
    })
}

/// Turn an unsuccessful response into a protocol error
fn error_response(url: &str, response: &HttpResponse) -> ProtocolError {
    if response.is_problem() {
        if let Ok(mut problem) = response.json::<Problem>() {
            problem.status.get_or_insert(response.status.as_u16());
            return ProtocolError::Problem {
                url: url.to_string(),
                problem,
            };
        }
    }
    ProtocolError::HttpStatus {
        url: url.to_string(),
        status: response.status.as_u16(),
    }
}
