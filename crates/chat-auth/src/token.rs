//! Bearer token payload decoding.
//!
//! The token is a three-part dot-separated string whose middle part is a
//! base64url JSON object. Signature verification happens upstream; only the
//! `c_hash` and `email` claims are read here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chat_types::{TokenClaims, TokenError};
use serde_json::Value;

const HASH_CLAIM: &str = "c_hash";
const EMAIL_CLAIM: &str = "email";

/// Decode the identity claims from a bearer token.
pub fn parse_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, got {}",
            parts.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {}", e)))?;
    let claims: Value = serde_json::from_slice(&payload)
        .map_err(|e| TokenError::Malformed(format!("payload is not JSON: {}", e)))?;
    if !claims.is_object() {
        return Err(TokenError::Malformed("payload is not a JSON object".to_string()));
    }

    Ok(TokenClaims {
        external_hash: string_claim(&claims, HASH_CLAIM)?,
        email: string_claim(&claims, EMAIL_CLAIM)?,
    })
}

fn string_claim(claims: &Value, name: &'static str) -> Result<String, TokenError> {
    match claims.get(name).and_then(Value::as_str).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(TokenError::MissingClaim(name)),
    }
}
