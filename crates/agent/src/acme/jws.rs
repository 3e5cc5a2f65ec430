//! Flattened JWS request bodies (RFC 8555 section 6.2).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use super::EcKey;
use crate::error::ProtocolError;

/// Key and key identification of a signed request
#[derive(Debug, Clone, Copy)]
pub struct Signer<'a> {
    pub key: &'a EcKey,
    /// Account URL; `None` embeds the public key as `jwk`
    pub kid: Option<&'a str>,
}

impl<'a> Signer<'a> {
    /// Signer for requests made before the account URL is known
    pub fn jwk(key: &'a EcKey) -> Self {
        Self { key, kid: None }
    }

    pub fn kid(key: &'a EcKey, account_url: &'a str) -> Self {
        Self {
            key,
            kid: Some(account_url),
        }
    }
}

/// Sign an ACME request body
///
/// A `None` payload produces a POST-as-GET with an empty payload.
pub fn sign(
    signer: Signer<'_>,
    nonce: &str,
    url: &str,
    payload: Option<&Value>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut protected = json!({
        "alg": "ES256",
        "nonce": nonce,
        "url": url,
    });
    match signer.kid {
        Some(kid) => protected["kid"] = json!(kid),
        None => protected["jwk"] = signer.key.jwk(),
    }

    let protected = encode_json(&protected)?;
    let payload = match payload {
        Some(value) => encode_json(value)?,
        None => String::new(),
    };

    let signing_input = format!("{}.{}", protected, payload);
    let signature = URL_SAFE_NO_PAD.encode(signer.key.sign(signing_input.as_bytes())?);

    serde_json::to_vec(&json!({
        "protected": protected,
        "payload": payload,
        "signature": signature,
    }))
    .map_err(|e| ProtocolError::Crypto(format!("failed to encode JWS: {}", e)))
}

fn encode_json(value: &Value) -> Result<String, ProtocolError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| ProtocolError::Crypto(format!("failed to encode JWS member: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
