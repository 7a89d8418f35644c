use std::sync::Arc;

use {
    axum::{
        extract::{Request, State},
        http::{StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    secrecy::ExposeSecret,
    serde_json::json,
    tracing::warn,
};

use crate::state::GatewayState;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison (prevents timing attacks).
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

/// Why an admin request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    TokenMissing,
    TokenMismatch,
}

impl AuthFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenMissing => "token_missing",
            Self::TokenMismatch => "token_mismatch",
        }
    }
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Check an `Authorization` header value against the configured admin token.
/// Without a configured token every request is allowed.
pub fn authorize_admin(expected: Option<&str>, header: Option<&str>) -> Result<(), AuthFailure> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let Some(given) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
        return Err(AuthFailure::TokenMissing);
    };
    if safe_equal(given.trim(), expected) {
        Ok(())
    } else {
        Err(AuthFailure::TokenMismatch)
    }
}

/// Middleware guarding the `/admin` routes.
pub async fn require_admin(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let expected = state.admin_token.as_ref().map(|t| t.expose_secret().as_str());

    match authorize_admin(expected, header) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            warn!(path = %request.uri().path(), reason = reason.as_str(), "admin request refused");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": false, "message": "unauthorized" })),
            )
                .into_response()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_without_configured_token() {
        assert_eq!(authorize_admin(None, None), Ok(()));
    }

    #[test]
    fn bearer_token_must_match() {
        let expected = Some("s3cret");
        assert_eq!(authorize_admin(expected, Some("Bearer s3cret")), Ok(()));
        assert_eq!(
            authorize_admin(expected, Some("Bearer s3crex")),
            Err(AuthFailure::TokenMismatch)
        );
        assert_eq!(
            authorize_admin(expected, Some("Basic s3cret")),
            Err(AuthFailure::TokenMissing)
        );
        assert_eq!(authorize_admin(expected, None), Err(AuthFailure::TokenMissing));
    }

    #[test]
    fn safe_equal_checks_length_and_content() {
        assert!(safe_equal("abc", "abc"));
        assert!(!safe_equal("abc", "abd"));
        assert!(!safe_equal("abc", "abcd"));
    }
}
