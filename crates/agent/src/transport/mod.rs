//! HTTP transport towards the CA
//!
//! The ACME client talks to the CA exclusively through [`HttpClient`].
//! The production implementation is [`ReqwestClient`]; tests plug in an
//! in-process CA behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::NetworkError;

mod client;

pub use client::ReqwestClient;

/// Content type of JWS request bodies
pub const JOSE_JSON: &str = "application/jose+json";

/// Content type of RFC 7807 problem documents
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Response header carrying a fresh anti-replay nonce
pub const REPLAY_NONCE: &str = "replay-nonce";

/// A request to the CA
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::HEAD,
            ..Self::get(url)
        }
    }

    /// A POST carrying a flattened JWS
    pub fn post_jose(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JOSE_JSON));
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: Some(body.into()),
        }
    }
}

/// A response from the CA
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE)
    }

    /// Whether the body is an RFC 7807 problem document
    pub fn is_problem(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with(PROBLEM_JSON))
            .unwrap_or(false)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes HTTP requests
///
/// Implementations must not retry on their own. Failures below the HTTP
/// layer are reported as [`NetworkError`]; any HTTP status, including
/// errors, is a successful response at this level.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError>;
}
