//! reqwest-backed transport with failure classification.

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;
use mdacme_config::TransportSettings;
use tracing::{debug, trace};

use super::{HttpClient, HttpRequest, HttpResponse};
use crate::error::{ConfigError, NetworkError, NetworkErrorKind};

/// Production HTTP client
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: ::reqwest::Client,
}

impl ReqwestClient {
    pub fn new(settings: &TransportSettings) -> Result<Self, ConfigError> {
        let mut builder = ::reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .redirect(::reqwest::redirect::Policy::none());

        if let Some(ref proxy) = settings.proxy {
            let proxy = ::reqwest::Proxy::all(proxy)
                .map_err(|e| ConfigError::Transport(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let url = request.url.clone();
        trace!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| network_error(&url, &e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(&url, &e))?;

        trace!(url = %url, status = status.as_u16(), len = body.len(), "Received response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn network_error(url: &str, err: &::reqwest::Error) -> NetworkError {
    let kind = if err.is_timeout() {
        NetworkErrorKind::TimedOut
    } else {
        classify(err)
    };
    let detail = error_chain(err);
    debug!(url = %url, kind = ?kind, error = %detail, "Request failed");
    NetworkError::new(kind, url, detail)
}

/// Map an error and its sources onto the fixed failure vocabulary
pub(crate) fn classify(err: &(dyn StdError + 'static)) -> NetworkErrorKind {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused => return NetworkErrorKind::ConnectionRefused,
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    return NetworkErrorKind::ConnectionReset
                }
                io::ErrorKind::TimedOut => return NetworkErrorKind::TimedOut,
                io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                    return NetworkErrorKind::HostUnreachable
                }
                _ => {}
            }
        }

        // reqwest's own message embeds the URL
        let message = if e.is::<::reqwest::Error>() {
            String::new()
        } else {
            e.to_string().to_ascii_lowercase()
        };
        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            return NetworkErrorKind::Dns;
        }
        if message.contains("certificate")
            || message.contains("handshake")
            || message.contains("tls")
        {
            return NetworkErrorKind::Tls;
        }

        current = e.source();
    }

    NetworkErrorKind::Other
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}
