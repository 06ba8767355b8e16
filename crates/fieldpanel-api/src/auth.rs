//! HTTP Basic authentication for the control endpoints.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use fieldpanel_core::AuthConfig;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Username of the authenticated caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Compare through fixed-length digests so timing does not depend on where
/// the inputs first differ.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify_credentials(auth: &AuthConfig, username: &str, password: &str) -> bool {
    let user_ok = constant_time_eq(username, &auth.username);
    let pass_ok = constant_time_eq(password, auth.password.expose_secret());
    user_ok & pass_ok
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub async fn require_basic_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    let Some((username, password)) = credentials else {
        return Err(ApiError::Unauthorized("Not authenticated".to_string()));
    };

    if !verify_credentials(&state.settings.auth, &username, &password) {
        warn!(user = %username, path = %req.uri().path(), "Rejected credentials");
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    req.extensions_mut().insert(AuthenticatedUser(username));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn auth() -> AuthConfig {
        AuthConfig {
            username: "bakin".into(),
            password: SecretString::from("ozhugu".to_string()),
        }
    }

    #[test]
    fn parses_basic_header() {
        let header = format!("Basic {}", STANDARD.encode("bakin:ozhugu"));
        assert_eq!(
            parse_basic(&header),
            Some(("bakin".to_string(), "ozhugu".to_string()))
        );
        // passwords may contain ':'
        let header = format!("Basic {}", STANDARD.encode("u:a:b"));
        assert_eq!(parse_basic(&header), Some(("u".into(), "a:b".into())));
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert_eq!(parse_basic("Bearer abc"), None);
        assert_eq!(parse_basic("Basic !!!"), None);
        assert_eq!(parse_basic(&format!("Basic {}", STANDARD.encode("nocolon"))), None);
    }

    #[test]
    fn verifies_both_fields() {
        let auth = auth();
        assert!(verify_credentials(&auth, "bakin", "ozhugu"));
        assert!(!verify_credentials(&auth, "bakin", "wrong"));
        assert!(!verify_credentials(&auth, "other", "ozhugu"));
        assert!(!verify_credentials(&auth, "", ""));
    }
}
