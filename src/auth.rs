//! Accounts, password hashing and access/refresh tokens
//!
//! Tokens are opaque: 32 random bytes, hex-encoded, handed to the client once.
//! Only their BLAKE3 hashes are stored, grouped by a login session so that a
//! refresh or logout can revoke every token of that session at once.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::{LitukError, Result};
use crate::storage::{Database, Role, TokenKind, User};
use crate::utils::{new_id, now_rfc3339, rfc3339};

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_BYTES: usize = 32;
const BAD_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: String,
    pub refresh_expires_at: String,
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| LitukError::Internal {
        message: format!("salt encoding failed: {e}"),
    })?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| LitukError::Internal {
            message: format!("password hashing failed: {e}"),
        })?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn token_hash(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(LitukError::validation("email address is not valid")),
    }
}

impl AuthService {
    pub fn new(db: Database, runtime: &RuntimeConfig) -> Self {
        Self {
            db,
            access_ttl: Duration::minutes(runtime.access_ttl_minutes),
            refresh_ttl: Duration::days(runtime.refresh_ttl_days),
        }
    }

    /// Create an account; the first account on an empty database is an admin
    pub fn register(&self, email: &str, password: &str, display_name: &str) -> Result<User> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LitukError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let display_name = match display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };
        let phc = hash_password(password)?;
        let user = self.db.create_account(&email, &display_name, &phc)?;
        info!("Registered user {} ({})", user.id, user.role.as_str());
        Ok(user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let email = email.trim().to_lowercase();
        let Some((user, phc)) = self.db.find_user_credentials(&email)? else {
            return Err(LitukError::unauthorized(BAD_CREDENTIALS));
        };
        if !verify_password(password, &phc) {
            return Err(LitukError::unauthorized(BAD_CREDENTIALS));
        }
        self.issue(&user.id)
    }

    fn issue(&self, user_id: &str) -> Result<TokenPair> {
        let now = Utc::now();
        let session_id = new_id();
        let access_token = new_token();
        let refresh_token = new_token();
        let access_expires_at = rfc3339(now + self.access_ttl);
        let refresh_expires_at = rfc3339(now + self.refresh_ttl);
        self.db.insert_token(
            &token_hash(&access_token),
            &session_id,
            user_id,
            TokenKind::Access,
            &access_expires_at,
        )?;
        self.db.insert_token(
            &token_hash(&refresh_token),
            &session_id,
            user_id,
            TokenKind::Refresh,
            &refresh_expires_at,
        )?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Look up a live token of the given kind; returns (session id, user id)
    fn live_token(&self, token: &str, kind: TokenKind) -> Result<(String, String)> {
        let record = self
            .db
            .find_token(&token_hash(token.trim()))?
            .ok_or_else(|| LitukError::unauthorized("unknown token"))?;
        if record.kind != kind.as_str() {
            return Err(LitukError::unauthorized("wrong token type"));
        }
        if record.revoked {
            return Err(LitukError::unauthorized("token has been revoked"));
        }
        let expires_at = DateTime::parse_from_rfc3339(&record.expires_at)?;
        if expires_at <= Utc::now() {
            return Err(LitukError::unauthorized("token has expired"));
        }
        Ok((record.session_id, record.user_id))
    }

    pub fn authenticate(&self, access_token: &str) -> Result<User> {
        let (_, user_id) = self.live_token(access_token, TokenKind::Access)?;
        self.db.get_user(&user_id).map_err(|e| match e {
            LitukError::NotFound { .. } => LitukError::unauthorized("account no longer exists"),
            other => other,
        })
    }

    /// Rotate: revoke the whole session behind `refresh_token` and issue a new pair
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let (_, user_id) = self.live_token(refresh_token, TokenKind::Refresh)?;
        if !self.db.consume_refresh_token(&token_hash(refresh_token.trim()))? {
            return Err(LitukError::unauthorized("token has been revoked"));
        }
        self.issue(&user_id)
    }

    pub fn logout(&self, access_token: &str) -> Result<()> {
        let (session_id, _) = self.live_token(access_token, TokenKind::Access)?;
        self.db.revoke_session(&session_id)?;
        Ok(())
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> Result<User> {
        let user = self.db.set_user_role(user_id, role)?;
        info!("User {} is now {}", user.id, role.as_str());
        Ok(user)
    }

    /// Create an admin account, or promote and re-password an existing one
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<User> {
        let normalized = normalize_email(email)?;
        match self.db.find_user_credentials(&normalized)? {
            Some((user, _)) => {
                if password.chars().count() < MIN_PASSWORD_LEN {
                    return Err(LitukError::validation(format!(
                        "password must be at least {MIN_PASSWORD_LEN} characters"
                    )));
                }
                self.db.set_password_hash(&user.id, &hash_password(password)?)?;
                self.set_role(&user.id, Role::Admin)
            }
            None => {
                let user = self.register(&normalized, password, "")?;
                if user.is_admin() {
                    Ok(user)
                } else {
                    self.set_role(&user.id, Role::Admin)
                }
            }
        }
    }

    /// Delete tokens that can no longer be used
    pub fn purge_expired(&self) -> Result<usize> {
        self.db.purge_expired_tokens(&now_rfc3339())
    }
}
