//! Session handling for the static credential table.
//!
//! Users come from configuration only; there is no user management. A
//! successful login yields a signed JWT that the API expects as a bearer
//! token on every route except health and login.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::config::{AuthConfig, UserCredential};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub hospital: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub username: String,
    pub role: String,
    pub hospital: Option<String>,
}

/// Hash a password into an Argon2id PHC string for the config file.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to hash password: {}", e)))
}

/// False on mismatch and on malformed stored hashes.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

pub struct Authenticator {
    users: Vec<UserCredential>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        if config.users.is_empty() {
            warn!("no users configured; every login will fail");
        }
        Self {
            users: config.users.clone(),
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl: Duration::minutes(config.session_ttl_minutes),
        }
    }

    pub fn login(&self, request: &LoginRequest) -> AppResult<Session> {
        request.validate()?;
        let user = self
            .users
            .iter()
            .find(|u| u.username == request.username)
            .filter(|u| verify_password(&request.password, &u.password_hash))
            .ok_or_else(|| {
                warn!(username = %request.username, "failed login");
                AppError::Unauthorized("invalid username or password".into())
            })?;

        let issued = Utc::now();
        let expires_at = issued + self.ttl;
        let claims = Claims {
            sub: user.username.clone(),
            role: user.role.clone(),
            hospital: user.hospital.clone(),
            iat: issued.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign session: {}", e)))?;

        info!(username = %user.username, role = %user.role, "user logged in");
        Ok(Session {
            token,
            token_type: "Bearer",
            expires_at,
            username: claims.sub,
            role: claims.role,
            hospital: claims.hospital,
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("invalid session: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            session_ttl_minutes: 60,
            users: vec![UserCredential {
                username: "billing".into(),
                password_hash: hash_password("s3cret").unwrap(),
                role: "billing".into(),
                hospital: Some("hope".into()),
            }],
        }
    }

    fn authenticator() -> Authenticator {
        Authenticator::new(&authenticator_config())
    }

    fn login(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.into(),
            password: password.into(),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }

    #[test]
    fn login_issues_verifiable_token() {
        let auth = authenticator();
        let session = auth.login(&login("billing", "s3cret")).unwrap();
        let claims = auth.verify(&session.token).unwrap();
        assert_eq!(claims.sub, "billing");
        assert_eq!(claims.hospital.as_deref(), Some("hope"));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn bad_credentials_are_unauthorized() {
        let auth = authenticator();
        assert!(matches!(auth.login(&login("billing", "nope")), Err(AppError::Unauthorized(_))));
        assert!(matches!(auth.login(&login("ghost", "s3cret")), Err(AppError::Unauthorized(_))));
        assert!(matches!(auth.login(&login("", "")), Err(AppError::Validation(_))));
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let auth = authenticator();
        let other = Authenticator::new(&AuthConfig {
            jwt_secret: "other-secret".into(),
            ..authenticator_config()
        });
        let foreign = other.login(&login("billing", "s3cret")).unwrap();
        assert!(auth.verify(&foreign.token).is_err());

        let past = Utc::now() - Duration::hours(2);
        let expired = encode(
            &Header::default(),
            &Claims {
                sub: "billing".into(),
                role: "billing".into(),
                hospital: None,
                iat: past.timestamp(),
                exp: (past + Duration::minutes(5)).timestamp(),
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(auth.verify(&expired), Err(AppError::Unauthorized(_))));
    }
}
