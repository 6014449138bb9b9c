//! Share capabilities.
//!
//! A token is `base64url(JSON{b, k, n, f})`. Whoever holds it can fetch
//! and decrypt the file: it is a bearer credential with no expiry and no
//! revocation.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareCapability {
    #[serde(rename = "b")]
    pub blob_id: String,
    #[serde(rename = "k")]
    pub key_hex: String,
    #[serde(rename = "n")]
    pub nonce_hex: String,
    #[serde(rename = "f", default)]
    pub filename: String,
}

pub fn create_share_token(blob_id: &str, key_hex: &str, nonce_hex: &str, filename: &str) -> String {
    ShareCapability {
        blob_id: blob_id.to_string(),
        key_hex: key_hex.to_string(),
        nonce_hex: nonce_hex.to_string(),
        filename: filename.to_string(),
    }
    .to_token()
}

pub fn parse_share_token(token: &str) -> Result<ShareCapability> {
    ShareCapability::from_token(token)
}

/// `{base}/vault/share#{token}`. The fragment never reaches a server log.
pub fn share_link(base_url: &str, token: &str) -> String {
    format!("{}/vault/share#{}", base_url.trim_end_matches('/'), token)
}

impl ShareCapability {
    pub fn to_token(&self) -> String {
        // Serializing a struct of strings cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE.encode(json)
    }

    /// Accepts padded and unpadded encodings.
    pub fn from_token(token: &str) -> Result<Self> {
        let token = token.trim();
        let bytes = URL_SAFE
            .decode(token)
            .or_else(|_| URL_SAFE_NO_PAD.decode(token.trim_end_matches('=')))
            .map_err(|e| VaultError::InvalidToken(e.to_string()))?;
        let capability: ShareCapability = serde_json::from_slice(&bytes)
            .map_err(|e| VaultError::InvalidToken(e.to_string()))?;
        if capability.blob_id.is_empty() {
            return Err(VaultError::InvalidToken("empty blob id".to_string()));
        }
        Ok(capability)
    }
}
