//! Capability gate: signed-token verification
//!
//! Every inbound connection and API request passes through this gate
//! before any other component touches it. The agent does not mint tokens;
//! issuance happens at the login boundary outside the core. The gate only
//! consumes an already-issued, signed, time-bounded token and decodes the
//! identity embedded in it.
//!
//! Browsers cannot attach custom headers to a WebSocket upgrade, so for
//! the persistent channel the token rides in the handshake metadata
//! instead: a `token` query parameter or the session cookie. The helpers
//! at the bottom extract it from either location.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::identity::{Identity, Role};

/// Cookie that may carry the session token
pub const SESSION_COOKIE: &str = "vigil_token";

/// Query parameter that may carry the session token (WebSocket upgrades)
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Claims embedded in a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier
    pub sub: String,
    /// Display name
    pub name: String,
    /// Role wire name (`elevated` / `restricted`)
    pub role: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
}

/// Verifies session tokens and decodes the identity they carry
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier over an HS256 shared secret
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and decode the identity it carries.
    ///
    /// A missing or structurally malformed token is `Unauthenticated`; a
    /// token that parsed but failed verification (signature, expiry,
    /// unknown role) is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Identity, GateError> {
        if token.is_empty() {
            return Err(GateError::Unauthenticated);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => GateError::Unauthenticated,
                _ => GateError::Unauthorized,
            }
        })?;

        let role = Role::parse(&data.claims.role).ok_or(GateError::Unauthorized)?;

        Ok(Identity {
            subject: data.claims.sub,
            name: data.claims.name,
            role,
        })
    }
}

/// Extract a named cookie's value from a `Cookie` header
pub fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Extract the token from a raw query string
pub fn token_from_query(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == TOKEN_QUERY_PARAM && !value.is_empty() {
            Some(value)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret-for-unit-tests-minimum-32-chars";

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn mint(role: &str, exp: i64, secret: &str) -> String {
        let claims = Claims {
            sub: "user-1".to_string(),
            name: "Test User".to_string(),
            role: role.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_elevated() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint("elevated", now_secs() + 3600, SECRET);

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.subject, "user-1");
        assert_eq!(identity.role, Role::Elevated);
    }

    #[test]
    fn test_verify_restricted() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint("restricted", now_secs() + 3600, SECRET);

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.role, Role::Restricted);
    }

    #[test]
    fn test_empty_token_unauthenticated() {
        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(verifier.verify(""), Err(GateError::Unauthenticated));
    }

    #[test]
    fn test_garbage_token_unauthenticated() {
        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(
            verifier.verify("not-a-token"),
            Err(GateError::Unauthenticated)
        );
    }

    #[test]
    fn test_expired_token_unauthorized() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint("elevated", now_secs() - 3600, SECRET);
        assert_eq!(verifier.verify(&token), Err(GateError::Unauthorized));
    }

    #[test]
    fn test_wrong_signature_unauthorized() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint("elevated", now_secs() + 3600, "another-secret-of-sufficient-length");
        assert_eq!(verifier.verify(&token), Err(GateError::Unauthorized));
    }

    #[test]
    fn test_unknown_role_unauthorized() {
        let verifier = TokenVerifier::new(SECRET);
        let token = mint("superuser", now_secs() + 3600, SECRET);
        assert_eq!(verifier.verify(&token), Err(GateError::Unauthorized));
    }

    #[test]
    fn test_token_from_cookie_header() {
        let header = "theme=dark; vigil_token=abc.def.ghi; lang=en";
        assert_eq!(
            token_from_cookie_header(header, SESSION_COOKIE),
            Some("abc.def.ghi")
        );
        assert_eq!(token_from_cookie_header("theme=dark", SESSION_COOKIE), None);
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query("token=abc&x=1"), Some("abc"));
        assert_eq!(token_from_query("x=1&token=abc"), Some("abc"));
        assert_eq!(token_from_query("token="), None);
        assert_eq!(token_from_query("other=abc"), None);
    }
}
