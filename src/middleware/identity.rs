use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::AppState;
use crate::models::identity::{Identity, decode_claims_unverified};

/// Custom header carrying the bare token.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Cookie name checked last.
pub const TOKEN_COOKIE: &str = "auth_token";

/// Turns a bearer token into an [`Identity`].
///
/// With a secret configured, tokens must carry a valid HS256 signature and
/// an unexpired `exp`. Without one, the payload is trusted as-is.
#[derive(Clone)]
pub struct TokenDecoder {
    key: Option<Arc<DecodingKey>>,
}

impl TokenDecoder {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            key: secret.map(|s| Arc::new(DecodingKey::from_secret(s.as_bytes()))),
        }
    }

    pub fn unverified() -> Self {
        Self { key: None }
    }

    pub fn verifies_signatures(&self) -> bool {
        self.key.is_some()
    }

    /// Identity for `token`; any failure yields the anonymous identity.
    pub fn identity(&self, token: &str) -> Identity {
        match self.claims(token) {
            Some(claims) => Identity::from_claims(&claims),
            None => Identity::anonymous(),
        }
    }

    fn claims(&self, token: &str) -> Option<Map<String, Value>> {
        match &self.key {
            Some(key) => {
                let validation = Validation::new(Algorithm::HS256);
                match decode::<Map<String, Value>>(token, key, &validation) {
                    Ok(data) => Some(data.claims),
                    Err(err) => {
                        tracing::debug!("rejected bearer token: {}", err);
                        None
                    }
                }
            }
            None => {
                let claims = decode_claims_unverified(token);
                if claims.is_none() {
                    tracing::debug!("could not decode bearer token payload");
                }
                claims
            }
        }
    }
}

/// Find the caller's token: `Authorization: Bearer`, then `x-access-token`,
/// then the `auth_token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let custom = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = custom {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Identity middleware.
/// Attaches an [`Identity`] to every request; never rejects a request.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = match extract_token(request.headers()) {
        Some(token) => state.tokens.identity(&token),
        None => Identity::anonymous(),
    };
    tracing::debug!("request identity: {} ({})", identity.id, identity.name);

    request.extensions_mut().insert(identity);
    next.run(request).await
}
