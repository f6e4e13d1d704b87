//! JWT service for session token issuance and verification
//!
//! Access and refresh tokens are signed with HS256 against two
//! distinct server-held secrets. Tokens are stateless: the service
//! keeps no per-session state, and logout is cookie clearing only.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::PortalError;
use crate::models::User;

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret for signing and verifying access tokens
    pub access_secret: String,
    /// Secret for signing and verifying refresh tokens
    pub refresh_secret: String,
    /// Access token expiration time in seconds (default: 1 hour)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 7 days)
    pub refresh_token_expiry: u64,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: Secret for access tokens
    /// - `JWT_REFRESH_SECRET`: Secret for refresh tokens
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 3600)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 604800)
    pub fn from_env() -> anyhow::Result<Self> {
        let access_secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        let refresh_secret = std::env::var("JWT_REFRESH_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_REFRESH_SECRET environment variable not set"))?;

        let access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "3600".to_string()) // 1 hour
            .parse()
            .unwrap_or(3600);

        let refresh_token_expiry = std::env::var("JWT_REFRESH_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "604800".to_string()) // 7 days
            .parse()
            .unwrap_or(604800);

        Ok(JwtConfig {
            access_secret,
            refresh_secret,
            access_token_expiry,
            refresh_token_expiry,
        })
    }
}

/// JWT claims structure
///
/// The claim shape is fixed: tokens whose claims do not deserialize
/// exactly are rejected at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    /// Account id
    pub sub: i64,
    /// Account email
    pub email: String,
    /// Administrator flag
    pub is_admin: bool,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
    /// Token kind (access or refresh)
    pub kind: TokenKind,
}

/// Token kind enum
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Access token
    Access,
    /// Refresh token
    Refresh,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        JwtService {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            validation,
            config,
        }
    }

    /// Issue an access token for an account
    pub fn issue_access_token(&self, user: &User) -> Result<String, PortalError> {
        self.issue(user.id, &user.email, user.is_admin, TokenKind::Access)
    }

    /// Issue a refresh token for an account
    pub fn issue_refresh_token(&self, user: &User) -> Result<String, PortalError> {
        self.issue(user.id, &user.email, user.is_admin, TokenKind::Refresh)
    }

    /// Mint a fresh access token carrying the same subject claims as a
    /// verified refresh token
    pub fn reissue_access_token(&self, refresh: &Claims) -> Result<String, PortalError> {
        self.issue(
            refresh.sub,
            &refresh.email,
            refresh.is_admin,
            TokenKind::Access,
        )
    }

    /// Validate an access token and return its claims
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, PortalError> {
        self.verify(token, TokenKind::Access)
    }

    /// Validate a refresh token and return its claims
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, PortalError> {
        self.verify(token, TokenKind::Refresh)
    }

    /// Get the access token expiry time in seconds
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time in seconds
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }

    fn issue(
        &self,
        sub: i64,
        email: &str,
        is_admin: bool,
        kind: TokenKind,
    ) -> Result<String, PortalError> {
        let now = now_secs()?;
        let (expiry, key) = match kind {
            TokenKind::Access => (self.config.access_token_expiry, &self.access_encoding),
            TokenKind::Refresh => (self.config.refresh_token_expiry, &self.refresh_encoding),
        };

        let claims = Claims {
            sub,
            email: email.to_string(),
            is_admin,
            iat: now,
            exp: now + expiry,
            kind,
        };

        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| PortalError::Internal(format!("failed to sign token: {e}")))
    }

    fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, PortalError> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let data = decode::<Claims>(token, key, &self.validation)
            .map_err(|_| PortalError::InvalidOrExpiredToken)?;

        // a refresh token must never pass where an access token is expected
        if data.claims.kind != kind {
            return Err(PortalError::InvalidOrExpiredToken);
        }

        Ok(data.claims)
    }
}

fn now_secs() -> Result<u64, PortalError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| PortalError::Internal(format!("failed to get current time: {e}")))
}
