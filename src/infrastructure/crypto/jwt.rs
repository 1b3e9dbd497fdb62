//! JWT bearer token verification
//!
//! Tokens are issued elsewhere; the gateway only checks signature, expiry
//! and issuer before accepting a command sender.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret
    pub secret: String,
    /// Expected `iss` claim
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "change-me".to_string(),
            issuer: "charge-gateway".to_string(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    pub iss: String,
    /// Caller role; absent means a plain user
    #[serde(default)]
    pub role: String,
}

impl TokenClaims {
    /// Numeric user id carried in `sub`, if it is one.
    pub fn user_id(&self) -> Option<i32> {
        self.sub.parse().ok()
    }

    /// Admins may issue commands billed to any account.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Verify and decode a JWT token
pub fn verify_token(
    token: &str,
    config: &JwtConfig,
) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.set_issuer(&[&config.issuer]);

    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
pub(crate) fn sign_for_tests(sub: &str, config: &JwtConfig, ttl_secs: i64) -> String {
    sign_with_role_for_tests(sub, "", config, ttl_secs)
}

#[cfg(test)]
pub(crate) fn sign_with_role_for_tests(sub: &str, role: &str, config: &JwtConfig, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = TokenClaims {
        sub: sub.to_string(),
        exp: now + ttl_secs,
        iat: now,
        iss: config.issuer.clone(),
        role: role.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".into(),
            issuer: "test".into(),
        }
    }

    #[test]
    fn valid_token_round_trips() {
        let token = sign_for_tests("42", &config(), 60);
        let claims = verify_token(&token, &config()).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert!(!claims.is_admin());

        let token = sign_with_role_for_tests("ops", "admin", &config(), 60);
        let claims = verify_token(&token, &config()).unwrap();
        assert!(claims.is_admin());
        assert_eq!(claims.user_id(), None);
    }

    #[test]
    fn wrong_secret_or_issuer_is_refused() {
        let token = sign_for_tests("42", &config(), 60);
        let other_secret = JwtConfig {
            secret: "other".into(),
            ..config()
        };
        assert!(verify_token(&token, &other_secret).is_err());

        let other_issuer = JwtConfig {
            issuer: "elsewhere".into(),
            ..config()
        };
        assert!(verify_token(&token, &other_issuer).is_err());
    }

    #[test]
    fn expired_token_is_refused() {
        let token = sign_for_tests("42", &config(), -3_600);
        assert!(verify_token(&token, &config()).is_err());
    }
}
