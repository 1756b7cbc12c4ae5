//! Bearer-token authentication.
//!
//! User tokens are `<user_id>.<hex HMAC-SHA256(AUTH_SECRET, user_id)>`. Issuing
//! them is the job of whatever identity service fronts this one;
//! [`issue_token`] exists for that service and for tests.

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use payrail::security::{parse_bearer, tokens_equal};
use payrail::{signer, PaymentError};

use crate::error::ApiError;
use crate::state::AppState;

const MAX_USER_ID_LEN: usize = 128;

/// The caller, as proven by a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

pub fn issue_token(secret: &[u8], user_id: &str) -> String {
    format!("{user_id}.{}", signer::compute_hmac(secret, user_id.as_bytes()))
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
}

/// Check a user token and return the user id it carries.
pub fn verify_token(secret: &[u8], token: &str) -> Result<String, PaymentError> {
    let (user_id, mac) = token
        .rsplit_once('.')
        .ok_or_else(|| PaymentError::Unauthenticated("malformed token".into()))?;
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(PaymentError::Unauthenticated("malformed token".into()));
    }
    if !signer::verify_hmac(secret, user_id.as_bytes(), mac) {
        return Err(PaymentError::Unauthenticated("invalid token".into()));
    }
    Ok(user_id.to_string())
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| PaymentError::Internal("application state missing".into()))?;
    let token = bearer(req)
        .ok_or_else(|| PaymentError::Unauthenticated("bearer token required".into()))?;
    let user_id = verify_token(&state.auth_secret, token).map_err(|e| {
        tracing::warn!(path = %req.path(), error = %e, "Rejected bearer token");
        e
    })?;
    Ok(AuthenticatedUser { user_id })
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

/// Require the admin bearer token. Admin endpoints are disabled when no
/// token is configured.
pub fn require_admin(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(PaymentError::Unauthorized("admin endpoints are disabled".into()).into());
    };
    let presented =
        bearer(req).ok_or_else(|| PaymentError::Unauthenticated("bearer token required".into()))?;
    if !tokens_equal(presented, expected) {
        tracing::warn!(path = %req.path(), "Rejected admin token");
        return Err(PaymentError::Unauthorized("admin token required".into()).into());
    }
    Ok(())
}

/// Check the /metrics bearer token. `Err` carries the response status.
pub fn metrics_authorized(req: &HttpRequest, state: &AppState) -> Result<(), u16> {
    match state.metrics_token.as_deref() {
        Some(token) => match bearer(req) {
            Some(presented) if tokens_equal(presented, token) => Ok(()),
            _ => Err(401),
        },
        None if state.public_metrics => Ok(()),
        None => Err(403),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let token = issue_token(b"secret", "u1");
        assert_eq!(verify_token(b"secret", &token).unwrap(), "u1");
    }

    #[test]
    fn user_ids_may_contain_dots() {
        let token = issue_token(b"secret", "first.last@example.com");
        assert_eq!(
            verify_token(b"secret", &token).unwrap(),
            "first.last@example.com"
        );
    }

    #[test]
    fn forged_or_malformed_tokens_fail() {
        let token = issue_token(b"other", "u1");
        assert!(matches!(
            verify_token(b"secret", &token),
            Err(PaymentError::Unauthenticated(_))
        ));
        assert!(verify_token(b"secret", "no-dot").is_err());
        assert!(verify_token(b"secret", ".abcdef").is_err());

        let swapped = issue_token(b"secret", "u1").replacen("u1", "u2", 1);
        assert!(verify_token(b"secret", &swapped).is_err());
    }
}
