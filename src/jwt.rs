//! Unverified reading of ID token claims.
//!
//! The token is submitted to AWS STS, which verifies its signature, issuer
//! and audience. Only the caller's identity is read here, to label the
//! assumed-role session.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::ClaimError;

/// The subset of ID token claims used to name the AWS role session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub email: Option<String>,
    pub sub: Option<String>,
}

/// Decodes the payload segment of a compact JWT without verifying it.
pub fn decode_claims(id_token: &str) -> Result<IdentityClaims, ClaimError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or(ClaimError::MissingPayload)?;
    // Tolerate padded encoders; the JWS compact form never pads.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    if !value.is_object() {
        return Err(ClaimError::NotJson(serde::de::Error::custom(
            "payload is not an object",
        )));
    }
    Ok(IdentityClaims {
        email: string_claim(&value, "email"),
        sub: string_claim(&value, "sub"),
    })
}

/// Returns the `email` claim of an ID token.
pub fn extract_email(id_token: &str) -> Result<String, ClaimError> {
    decode_claims(id_token)?
        .email
        .ok_or(ClaimError::MissingClaim("email"))
}

fn string_claim(value: &serde_json::Value, name: &str) -> Option<String> {
    value.get(name)?.as_str().map(str::to_owned)
}
