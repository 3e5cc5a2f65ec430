//! In-process ACME CA for tests
//!
//! [`FakeCa`] answers [`HttpRequest`]s the way an RFC 8555 server would:
//! it checks nonces and JWS signatures, keeps accounts, orders and
//! authorizations, and issues real certificates for submitted CSRs. Knobs
//! on the handle make it misbehave in controlled ways.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, IsCa, KeyPair,
};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};
use serde_json::{json, Value};

use crate::acme::PEM_CHAIN;
use crate::error::NetworkError;
use crate::transport::{HttpClient, HttpRequest, HttpResponse, PROBLEM_JSON, REPLAY_NONCE};

const BASE: &str = "https://ca.test";
const CHALLENGE_TYPES: [&str; 3] = ["http-01", "tls-alpn-01", "dns-01"];

struct FakeAccount {
    url: String,
    point: Vec<u8>,
    status: &'static str,
    contacts: Value,
    agreed: bool,
}

struct FakeAuthz {
    account: String,
    value: String,
    wildcard: bool,
    status: &'static str,
    triggered: Option<String>,
    polls_left: u32,
    error: Option<Value>,
}

struct FakeOrder {
    account: String,
    identifiers: Vec<String>,
    authz: Vec<usize>,
    finalized: bool,
    processing_left: u32,
    /// Chain signed at finalization, attached once processing is over
    signed: Option<usize>,
    certificate: Option<usize>,
}

struct State {
    counts: HashMap<String, usize>,
    nonces: HashSet<String>,
    next_nonce: u64,
    reject_nonces: u32,
    v1: bool,
    new_authz: bool,
    offered: Vec<&'static str>,
    fail_domains: HashSet<String>,
    pending_polls: u32,
    never_resolve: bool,
    issue_expired: bool,
    issue_missing_name: bool,
    accounts: Vec<FakeAccount>,
    authz: HashMap<usize, FakeAuthz>,
    next_authz: usize,
    orders: Vec<FakeOrder>,
    certs: Vec<String>,
    issuer: rcgen::Issuer<'static, KeyPair>,
    issuer_pem: String,
}

/// Handle to an in-process CA at `https://ca.test`
///
/// Clones share the same CA.
#[derive(Clone)]
pub(crate) struct FakeCa {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCa").finish_non_exhaustive()
    }
}

impl FakeCa {
    pub fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Fake ACME CA");
        params.distinguished_name = dn;
        let issuer_pem = params.self_signed(&key).unwrap().pem();

        Self {
            state: Arc::new(Mutex::new(State {
                counts: HashMap::new(),
                nonces: HashSet::new(),
                next_nonce: 0,
                reject_nonces: 0,
                v1: false,
                new_authz: true,
                offered: CHALLENGE_TYPES.to_vec(),
                fail_domains: HashSet::new(),
                pending_polls: 0,
                never_resolve: false,
                issue_expired: false,
                issue_missing_name: false,
                accounts: Vec::new(),
                authz: HashMap::new(),
                next_authz: 1,
                orders: Vec::new(),
                certs: Vec::new(),
                issuer: rcgen::Issuer::new(params, key),
                issuer_pem,
            })),
        }
    }

    pub fn base_url(&self) -> String {
        BASE.to_string()
    }

    pub fn directory_url(&self) -> String {
        format!("{}/directory", BASE)
    }

    pub fn tos_url(&self) -> String {
        format!("{}/terms.pdf", BASE)
    }

    pub fn http(&self) -> Arc<dyn HttpClient> {
        Arc::new(self.clone())
    }

    /// Requests received for a path
    pub fn count(&self, path: &str) -> usize {
        self.state.lock().counts.get(path).copied().unwrap_or(0)
    }

    pub fn serve_v1_directory(&self) {
        self.state.lock().v1 = true;
    }

    pub fn without_new_authz(&self) {
        self.state.lock().new_authz = false;
    }

    /// Answer the next `n` signed requests with `badNonce`
    pub fn reject_nonces(&self, n: u32) {
        self.state.lock().reject_nonces = n;
    }

    pub fn deactivate_account(&self, url: &str) {
        let mut state = self.state.lock();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.url == url) {
            account.status = "deactivated";
        }
    }

    /// Challenge types offered on new authorizations
    pub fn offer_only(&self, types: &[&'static str]) {
        self.state.lock().offered = types.to_vec();
    }

    /// Validation of `domain` fails
    pub fn fail_domain(&self, domain: &str) {
        self.state.lock().fail_domains.insert(domain.to_string());
    }

    pub fn allow_domain(&self, domain: &str) {
        self.state.lock().fail_domains.remove(domain);
    }

    /// Keep triggered authorizations pending for `n` polls
    pub fn pending_polls(&self, n: u32) {
        self.state.lock().pending_polls = n;
    }

    /// Keep triggered authorizations in `pending` while enabled
    pub fn never_resolve(&self, enabled: bool) {
        self.state.lock().never_resolve = enabled;
    }

    pub fn issue_expired(&self, enabled: bool) {
        self.state.lock().issue_expired = enabled;
    }

    /// Issue certificates lacking the last requested name
    pub fn issue_missing_name(&self, enabled: bool) {
        self.state.lock().issue_missing_name = enabled;
    }

    /// Forget every authorization, later fetches answer 404
    pub fn forget_authorizations(&self) {
        self.state.lock().authz.clear();
    }

    /// Authorizations ever created
    pub fn authz_created(&self) -> usize {
        self.state.lock().next_authz - 1
    }

    pub fn orders_created(&self) -> usize {
        self.state.lock().orders.len()
    }

    fn handle(&self, request: HttpRequest) -> HttpResponse {
        let path = request
            .url
            .strip_prefix(BASE)
            .unwrap_or(&request.url)
            .to_string();
        let mut state = self.state.lock();
        *state.counts.entry(path.clone()).or_insert(0) += 1;

        let mut response = if request.method == Method::GET && path == "/directory" {
            state.directory()
        } else if request.method == Method::HEAD && path == "/nonce" {
            HttpResponse::new(StatusCode::OK)
        } else if request.method == Method::POST {
            state.signed(&request, &path)
        } else {
            problem(StatusCode::NOT_FOUND, "malformed", "no such resource")
        };

        let nonce = state.fresh_nonce();
        response
            .headers
            .insert(REPLAY_NONCE, HeaderValue::from_str(&nonce).unwrap());
        response
    }
}

#[async_trait]
impl HttpClient for FakeCa {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        Ok(self.handle(request))
    }
}

impl State {
    fn fresh_nonce(&mut self) -> String {
        self.next_nonce += 1;
        let nonce = format!("nonce-{}", self.next_nonce);
        self.nonces.insert(nonce.clone());
        nonce
    }

    fn directory(&self) -> HttpResponse {
        if self.v1 {
            return json_response(
                StatusCode::OK,
                json!({
                    "new-reg": format!("{}/acme/new-reg", BASE),
                    "new-authz": format!("{}/acme/new-authz", BASE),
                    "new-cert": format!("{}/acme/new-cert", BASE),
                }),
            );
        }
        let mut directory = json!({
            "newNonce": format!("{}/nonce", BASE),
            "newAccount": format!("{}/new-account", BASE),
            "newOrder": format!("{}/new-order", BASE),
            "revokeCert": format!("{}/revoke-cert", BASE),
            "keyChange": format!("{}/key-change", BASE),
            "meta": { "termsOfService": format!("{}/terms.pdf", BASE) },
        });
        if self.new_authz {
            directory["newAuthz"] = json!(format!("{}/new-authz", BASE));
        }
        json_response(StatusCode::OK, directory)
    }

    /// Verify a JWS request and dispatch it
    fn signed(&mut self, request: &HttpRequest, path: &str) -> HttpResponse {
        let Some(jws) = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice::<Value>(b).ok())
        else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "body is not a JWS");
        };
        let part = |name: &str| jws[name].as_str().unwrap_or_default().to_string();
        let (protected_b64, payload_b64, signature_b64) =
            (part("protected"), part("payload"), part("signature"));
        let Some(protected) = decode_json(&protected_b64) else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "bad protected header");
        };

        let nonce = protected["nonce"].as_str().unwrap_or_default();
        if self.reject_nonces > 0 || !self.nonces.remove(nonce) {
            self.reject_nonces = self.reject_nonces.saturating_sub(1);
            return problem(StatusCode::BAD_REQUEST, "badNonce", "JWS has an invalid anti-replay nonce");
        }
        if protected["url"].as_str() != Some(request.url.as_str()) {
            return problem(StatusCode::UNAUTHORIZED, "unauthorized", "url header mismatch");
        }

        let (account, point) = match (protected.get("jwk"), protected["kid"].as_str()) {
            (Some(jwk), None) => match jwk_point(jwk) {
                Some(point) => (None, point),
                None => return problem(StatusCode::BAD_REQUEST, "badPublicKey", "unusable jwk"),
            },
            (None, Some(kid)) => match self.accounts.iter().find(|a| a.url == kid) {
                Some(account) => (Some(kid.to_string()), account.point.clone()),
                None => {
                    return problem(StatusCode::BAD_REQUEST, "accountDoesNotExist", "unknown kid")
                }
            },
            _ => return problem(StatusCode::BAD_REQUEST, "malformed", "need exactly one of jwk and kid"),
        };

        let signature = URL_SAFE_NO_PAD.decode(signature_b64).unwrap_or_default();
        let signing_input = format!("{}.{}", protected_b64, payload_b64);
        if UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point)
            .verify(signing_input.as_bytes(), &signature)
            .is_err()
        {
            return problem(StatusCode::BAD_REQUEST, "malformed", "JWS signature invalid");
        }

        let payload = if payload_b64.is_empty() {
            None
        } else {
            match decode_json(&payload_b64) {
                Some(value) => Some(value),
                None => return problem(StatusCode::BAD_REQUEST, "malformed", "payload is not JSON"),
            }
        };

        if path == "/new-account" {
            return self.new_account(point, payload);
        }
        let Some(account) = account else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "request needs kid");
        };

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["acct", _] => self.update_account(&account, path, payload),
            ["new-order"] => self.new_order(&account, payload),
            ["new-authz"] if self.new_authz => self.new_authz(&account, payload),
            ["order", id] => self.get_order(&account, id),
            ["order", id, "finalize"] => self.finalize(&account, id, payload),
            ["authz", id] => self.get_authz(&account, id),
            ["chall", id, kind] => self.trigger(&account, id, kind),
            ["cert", id] => self.get_cert(id),
            _ => problem(StatusCode::NOT_FOUND, "malformed", "no such resource"),
        }
    }

    fn new_account(&mut self, point: Vec<u8>, payload: Option<Value>) -> HttpResponse {
        let payload = payload.unwrap_or_else(|| json!({}));
        if let Some(existing) = self.accounts.iter().find(|a| a.point == point) {
            let mut response = json_response(StatusCode::OK, account_json(existing));
            set_location(&mut response, &existing.url);
            return response;
        }

        let url = format!("{}/acct/{}", BASE, self.accounts.len() + 1);
        let account = FakeAccount {
            url: url.clone(),
            point,
            status: "valid",
            contacts: payload.get("contact").cloned().unwrap_or_else(|| json!([])),
            agreed: payload["termsOfServiceAgreed"].as_bool().unwrap_or(false),
        };
        let mut response = json_response(StatusCode::CREATED, account_json(&account));
        set_location(&mut response, &url);
        self.accounts.push(account);
        response
    }

    fn update_account(&mut self, kid: &str, path: &str, payload: Option<Value>) -> HttpResponse {
        let url = format!("{}{}", BASE, path);
        if url != kid {
            return problem(StatusCode::UNAUTHORIZED, "unauthorized", "not your account");
        }
        let Some(account) = self.accounts.iter_mut().find(|a| a.url == url) else {
            return problem(StatusCode::NOT_FOUND, "accountDoesNotExist", "no such account");
        };
        if let Some(agreed) = payload
            .as_ref()
            .and_then(|p| p["termsOfServiceAgreed"].as_bool())
        {
            account.agreed = agreed;
        }
        json_response(StatusCode::OK, account_json(account))
    }

    fn account_status(&self, kid: &str) -> &'static str {
        self.accounts
            .iter()
            .find(|a| a.url == kid)
            .map(|a| a.status)
            .unwrap_or("valid")
    }

    fn authz_for(&mut self, account: &str, identifier: &str) -> usize {
        let (value, wildcard) = match identifier.strip_prefix("*.") {
            Some(rest) => (rest.to_string(), true),
            None => (identifier.to_string(), false),
        };
        let reusable = self.authz.iter().find(|(_, a)| {
            a.account == account
                && a.value == value
                && a.wildcard == wildcard
                && matches!(a.status, "pending" | "valid")
        });
        if let Some((id, _)) = reusable {
            return *id;
        }

        let id = self.next_authz;
        self.next_authz += 1;
        self.authz.insert(
            id,
            FakeAuthz {
                account: account.to_string(),
                value,
                wildcard,
                status: "pending",
                triggered: None,
                polls_left: 0,
                error: None,
            },
        );
        id
    }

    fn new_order(&mut self, account: &str, payload: Option<Value>) -> HttpResponse {
        if self.account_status(account) != "valid" {
            return problem(StatusCode::UNAUTHORIZED, "unauthorized", "account is not valid");
        }
        let identifiers: Vec<String> = payload
            .as_ref()
            .and_then(|p| p["identifiers"].as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|i| i["value"].as_str().map(str::to_string))
            .collect();
        if identifiers.is_empty() {
            return problem(StatusCode::BAD_REQUEST, "malformed", "order without identifiers");
        }

        let authz = identifiers
            .iter()
            .map(|identifier| self.authz_for(account, identifier))
            .collect();
        self.orders.push(FakeOrder {
            account: account.to_string(),
            identifiers,
            authz,
            finalized: false,
            processing_left: 1,
            signed: None,
            certificate: None,
        });
        let id = self.orders.len();
        let mut response = json_response(StatusCode::CREATED, self.order_json(id));
        set_location(&mut response, &format!("{}/order/{}", BASE, id));
        response
    }

    fn new_authz(&mut self, account: &str, payload: Option<Value>) -> HttpResponse {
        let Some(value) = payload
            .as_ref()
            .and_then(|p| p["identifier"]["value"].as_str().map(str::to_string))
        else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "missing identifier");
        };
        let id = self.authz_for(account, &value);
        let mut response = json_response(StatusCode::CREATED, self.authz_json(id));
        set_location(&mut response, &format!("{}/authz/{}", BASE, id));
        response
    }

    fn order_status(&self, id: usize) -> &'static str {
        let order = &self.orders[id - 1];
        if order.certificate.is_some() {
            return "valid";
        }
        if order.finalized {
            return "processing";
        }
        let states: Vec<&str> = order
            .authz
            .iter()
            .map(|a| self.authz.get(a).map(|a| a.status).unwrap_or("expired"))
            .collect();
        if states.iter().any(|s| *s != "pending" && *s != "valid") {
            "invalid"
        } else if states.iter().all(|s| *s == "valid") {
            "ready"
        } else {
            "pending"
        }
    }

    fn order_json(&self, id: usize) -> Value {
        let order = &self.orders[id - 1];
        let mut value = json!({
            "status": self.order_status(id),
            "identifiers": order
                .identifiers
                .iter()
                .map(|v| json!({"type": "dns", "value": v}))
                .collect::<Vec<_>>(),
            "authorizations": order
                .authz
                .iter()
                .map(|a| format!("{}/authz/{}", BASE, a))
                .collect::<Vec<_>>(),
            "finalize": format!("{}/order/{}/finalize", BASE, id),
        });
        if let Some(cert) = order.certificate {
            value["certificate"] = json!(format!("{}/cert/{}", BASE, cert));
        }
        if self.order_status(id) == "invalid" {
            value["error"] = json!({
                "type": "urn:ietf:params:acme:error:unauthorized",
                "detail": "an authorization of this order failed",
            });
        }
        value
    }

    fn find_order(&self, account: &str, id: &str) -> Option<usize> {
        let id: usize = id.parse().ok()?;
        let order = self.orders.get(id.checked_sub(1)?)?;
        (order.account == account).then_some(id)
    }

    fn get_order(&mut self, account: &str, id: &str) -> HttpResponse {
        let Some(id) = self.find_order(account, id) else {
            return problem(StatusCode::NOT_FOUND, "malformed", "no such order");
        };
        let order = &mut self.orders[id - 1];
        if order.finalized && order.certificate.is_none() {
            if order.processing_left > 0 {
                order.processing_left -= 1;
            } else {
                return self.issue(id);
            }
        }
        json_response(StatusCode::OK, self.order_json(id))
    }

    fn finalize(&mut self, account: &str, id: &str, payload: Option<Value>) -> HttpResponse {
        let Some(id) = self.find_order(account, id) else {
            return problem(StatusCode::NOT_FOUND, "malformed", "no such order");
        };
        if self.order_status(id) != "ready" {
            return problem(StatusCode::FORBIDDEN, "orderNotReady", "order is not ready");
        }
        let Some(csr) = payload
            .as_ref()
            .and_then(|p| p["csr"].as_str())
            .and_then(|c| URL_SAFE_NO_PAD.decode(c).ok())
        else {
            return problem(StatusCode::BAD_REQUEST, "badCSR", "missing CSR");
        };

        let csr_pem = pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", csr));
        let Ok(mut request) = CertificateSigningRequestParams::from_pem(&csr_pem) else {
            return problem(StatusCode::BAD_REQUEST, "badCSR", "CSR does not parse");
        };

        let order = &self.orders[id - 1];
        let mut requested: Vec<String> = request
            .params
            .subject_alt_names
            .iter()
            .filter_map(|san| match san {
                rcgen::SanType::DnsName(name) => Some(name.as_str().to_string()),
                _ => None,
            })
            .collect();
        let mut expected = order.identifiers.clone();
        requested.sort();
        expected.sort();
        if requested != expected {
            return problem(StatusCode::BAD_REQUEST, "badCSR", "CSR names differ from order");
        }

        if self.issue_expired {
            request.params.not_before = date_time_ymd(2020, 1, 1);
            request.params.not_after = date_time_ymd(2021, 1, 1);
        } else {
            request.params.not_before = date_time_ymd(2020, 1, 1);
            request.params.not_after = date_time_ymd(2049, 1, 1);
        }
        if self.issue_missing_name {
            request.params.subject_alt_names.pop();
        }

        let Ok(leaf) = request.signed_by(&self.issuer) else {
            return problem(StatusCode::INTERNAL_SERVER_ERROR, "serverInternal", "signing failed");
        };
        self.certs
            .push(format!("{}{}", leaf.pem(), self.issuer_pem));
        let order = &mut self.orders[id - 1];
        order.signed = Some(self.certs.len());
        order.finalized = true;
        json_response(StatusCode::OK, self.order_json(id))
    }

    /// Attach the certificate signed at finalization
    fn issue(&mut self, id: usize) -> HttpResponse {
        let order = &mut self.orders[id - 1];
        order.certificate = order.signed;
        json_response(StatusCode::OK, self.order_json(id))
    }

    fn authz_json(&self, id: usize) -> Value {
        let authz = &self.authz[&id];
        let challenges: Vec<Value> = self
            .offered
            .iter()
            .map(|kind| {
                let triggered = authz.triggered.as_deref() == Some(*kind);
                let status = match (authz.status, triggered) {
                    ("valid", true) => "valid",
                    ("invalid", true) => "invalid",
                    ("pending", true) => "processing",
                    _ => "pending",
                };
                let mut challenge = json!({
                    "type": kind,
                    "url": format!("{}/chall/{}/{}", BASE, id, kind),
                    "token": format!("token-{}-{}", id, kind),
                    "status": status,
                });
                if triggered {
                    if let Some(error) = &authz.error {
                        challenge["error"] = error.clone();
                    }
                }
                challenge
            })
            .collect();
        json!({
            "identifier": {"type": "dns", "value": authz.value},
            "status": authz.status,
            "wildcard": authz.wildcard,
            "challenges": challenges,
        })
    }

    fn get_authz(&mut self, account: &str, id: &str) -> HttpResponse {
        let Some(id) = id.parse::<usize>().ok().filter(|id| {
            self.authz
                .get(id)
                .map(|a| a.account == account)
                .unwrap_or(false)
        }) else {
            return problem(StatusCode::NOT_FOUND, "malformed", "no such authorization");
        };

        let never_resolve = self.never_resolve;
        let fails = self.fail_domains.contains(&self.authz[&id].value);
        if let Some(authz) = self.authz.get_mut(&id) {
            if authz.status == "pending" && authz.triggered.is_some() && !never_resolve {
                if authz.polls_left > 0 {
                    authz.polls_left -= 1;
                } else if fails {
                    authz.status = "invalid";
                    authz.error = Some(json!({
                        "type": "urn:ietf:params:acme:error:unauthorized",
                        "detail": format!("Invalid response from http://{}/.well-known/acme-challenge/", authz.value),
                        "status": 403,
                    }));
                } else {
                    authz.status = "valid";
                }
            }
        }
        json_response(StatusCode::OK, self.authz_json(id))
    }

    fn trigger(&mut self, account: &str, id: &str, kind: &str) -> HttpResponse {
        let pending_polls = self.pending_polls;
        let offered = self.offered.contains(&kind);
        let Some((id, authz)) = id
            .parse::<usize>()
            .ok()
            .and_then(|id| self.authz.get_mut(&id).map(|a| (id, a)))
            .filter(|(_, a)| a.account == account && offered)
        else {
            return problem(StatusCode::NOT_FOUND, "malformed", "no such challenge");
        };
        if authz.triggered.is_none() {
            authz.triggered = Some(kind.to_string());
            authz.polls_left = pending_polls;
        }
        let body = self.authz_json(id)["challenges"]
            .as_array()
            .and_then(|c| c.iter().find(|c| c["type"] == kind).cloned())
            .unwrap_or_default();
        json_response(StatusCode::OK, body)
    }

    fn get_cert(&self, id: &str) -> HttpResponse {
        let Some(chain) = id
            .parse::<usize>()
            .ok()
            .and_then(|id| self.certs.get(id.checked_sub(1)?))
        else {
            return problem(StatusCode::NOT_FOUND, "malformed", "no such certificate");
        };
        let mut response = HttpResponse::new(StatusCode::OK);
        response
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(PEM_CHAIN));
        response.body = Bytes::from(chain.clone());
        response
    }
}

fn account_json(account: &FakeAccount) -> Value {
    json!({
        "status": account.status,
        "contact": account.contacts,
        "termsOfServiceAgreed": account.agreed,
        "orders": format!("{}/orders", account.url),
    })
}

fn decode_json(part: &str) -> Option<Value> {
    let bytes = URL_SAFE_NO_PAD.decode(part).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn jwk_point(jwk: &Value) -> Option<Vec<u8>> {
    if jwk["kty"] != "EC" || jwk["crv"] != "P-256" {
        return None;
    }
    let x = URL_SAFE_NO_PAD.decode(jwk["x"].as_str()?).ok()?;
    let y = URL_SAFE_NO_PAD.decode(jwk["y"].as_str()?).ok()?;
    let mut point = vec![0x04];
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Some(point)
}

fn json_response(status: StatusCode, body: Value) -> HttpResponse {
    let mut response = HttpResponse::new(status);
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.body = Bytes::from(body.to_string());
    response
}

fn set_location(response: &mut HttpResponse, url: &str) {
    response
        .headers
        .insert(LOCATION, HeaderValue::from_str(url).unwrap());
}

fn problem(status: StatusCode, kind: &str, detail: &str) -> HttpResponse {
    let mut response = HttpResponse::new(status);
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
    response.body = Bytes::from(
        json!({
            "type": format!("urn:ietf:params:acme:error:{}", kind),
            "detail": detail,
        })
        .to_string(),
    );
    response
}
