//! ECDSA P-256 keys for accounts and certificates.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

const PEM_TAG: &str = "PRIVATE KEY";

/// An ECDSA P-256 key pair held as PKCS#8
pub struct EcKey {
    pair: EcdsaKeyPair,
    pkcs8: Vec<u8>,
}

impl EcKey {
    pub fn generate() -> Result<Self, ProtocolError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|e| ProtocolError::Crypto(format!("key generation failed: {}", e)))?;
        Self::from_pkcs8(document.as_ref())
    }

    pub fn from_pkcs8(der: &[u8]) -> Result<Self, ProtocolError> {
        let rng = SystemRandom::new();
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|e| ProtocolError::Crypto(format!("invalid P-256 PKCS#8 key: {}", e)))?;
        Ok(Self {
            pair,
            pkcs8: der.to_vec(),
        })
    }

    pub fn from_pem(pem_text: &str) -> Result<Self, ProtocolError> {
        let block = pem::parse(pem_text)
            .map_err(|e| ProtocolError::Crypto(format!("invalid key PEM: {}", e)))?;
        if block.tag() != PEM_TAG {
            return Err(ProtocolError::Crypto(format!(
                "expected a {} block, found {}",
                PEM_TAG,
                block.tag()
            )));
        }
        Self::from_pkcs8(block.contents())
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PEM_TAG, self.pkcs8.clone()))
    }

    /// Uncompressed public point `0x04 || x || y`
    pub fn public_key(&self) -> &[u8] {
        self.pair.public_key().as_ref()
    }

    /// Public key as a JSON Web Key
    pub fn jwk(&self) -> serde_json::Value {
        let (x, y) = self.coordinates();
        serde_json::json!({
            "crv": "P-256",
            "kty": "EC",
            "x": x,
            "y": y,
        })
    }

    /// RFC 7638 JWK thumbprint, base64url encoded
    pub fn thumbprint(&self) -> String {
        let (x, y) = self.coordinates();
        // members in lexicographic order, no whitespace
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            x, y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Key authorization for a challenge token
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint())
    }

    /// ES256 signature in the fixed `r || s` form used by JWS
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let rng = SystemRandom::new();
        let signature = self
            .pair
            .sign(&rng, data)
            .map_err(|e| ProtocolError::Crypto(format!("signing failed: {}", e)))?;
        Ok(signature.as_ref().to_vec())
    }

    fn coordinates(&self) -> (String, String) {
        let point = self.public_key();
        (
            URL_SAFE_NO_PAD.encode(&point[1..33]),
            URL_SAFE_NO_PAD.encode(&point[33..65]),
        )
    }
}

impl fmt::Debug for EcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcKey")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}
