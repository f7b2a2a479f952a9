//! Caller identity derived from a bearer token on every request.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ANONYMOUS_ID: &str = "anonymous";
pub const ANONYMOUS_NAME: &str = "Anonymous User";

/// Best-effort identity of the caller. Never persisted on its own; its `id`
/// and `name` are copied onto documents at upload time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_ID.to_string(),
            name: ANONYMOUS_NAME.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_ID
    }

    /// Build an identity from a decoded token payload.
    ///
    /// `id` falls back to `sub`, `name` falls back from `username` to `name`.
    /// Numeric ids are rendered in decimal.
    pub fn from_claims(claims: &Map<String, Value>) -> Self {
        let id = claim_string(claims, "id")
            .or_else(|| claim_string(claims, "sub"))
            .unwrap_or_else(|| ANONYMOUS_ID.to_string());
        let name = claim_string(claims, "username")
            .or_else(|| claim_string(claims, "name"))
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        Self { id, name }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Decode the payload segment of a JWT-shaped token without checking its
/// signature. Returns `None` for anything that is not `header.payload[.sig]`
/// with a base64url JSON object in the middle.
pub fn decode_claims_unverified(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn claim_string(claims: &Map<String, Value>, key: &str) -> Option<String> {
    match claims.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
