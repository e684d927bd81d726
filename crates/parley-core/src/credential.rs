//! Signed join credentials.
//!
//! A credential is an HS256 JWT whose payload names the app key, the room
//! (`tpc`), the requested role and a validity window. Issue time comes from a
//! [`Clock`] so identical inputs under the same clock give identical tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::CredentialConfig;
use crate::errors::CredentialError;
use crate::session::Role;

/// Payload schema version understood by the conferencing service.
pub const TOKEN_VERSION: u8 = 1;

/// Issue time is backdated to tolerate clock drift against the service.
pub const ISSUE_BACKDATE_SECONDS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub app_key: String,
    /// Room ("topic") the credential is valid for.
    pub tpc: String,
    pub role_type: u8,
    pub version: u8,
    pub iat: i64,
    pub exp: i64,
    pub token_exp: i64,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for reproducible credentials.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Source of join credentials for the session controller.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, room: &str, role: Role) -> Result<String, CredentialError>;
}

/// Sign a join credential for `room` with the given app key material.
pub fn generate_credential(
    room: &str,
    role: Role,
    app_key: &str,
    app_secret: &SecretString,
    issued_at: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, CredentialError> {
    if app_key.trim().is_empty() {
        return Err(CredentialError::MissingSecret("app key"));
    }
    if app_secret.expose_secret().is_empty() {
        return Err(CredentialError::MissingSecret("app secret"));
    }
    if room.trim().is_empty() {
        return Err(CredentialError::EmptyRoom);
    }

    let ttl_seconds = i64::try_from(ttl.as_secs())
        .map_err(|_| CredentialError::Signing(format!("ttl out of range: {ttl:?}")))?;
    let iat = issued_at.timestamp() - ISSUE_BACKDATE_SECONDS;
    let exp = iat + ttl_seconds;
    let claims = CredentialClaims {
        app_key: app_key.to_string(),
        tpc: room.to_string(),
        role_type: role.as_u8(),
        version: TOKEN_VERSION,
        iat,
        exp,
        token_exp: exp,
    };

    let key = EncodingKey::from_secret(app_secret.expose_secret().as_bytes());
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
        .map_err(|e| CredentialError::Signing(e.to_string()))
}

/// Verify the signature of `token` and return its claims.
///
/// Expiry is not enforced here; the conferencing service is the authority on
/// whether a credential is still acceptable.
pub fn decode_credential(
    token: &str,
    app_secret: &SecretString,
) -> Result<CredentialClaims, CredentialError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let key = DecodingKey::from_secret(app_secret.expose_secret().as_bytes());
    jsonwebtoken::decode::<CredentialClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| CredentialError::Invalid(e.to_string()))
}

/// [`CredentialProvider`] signing locally with configured key material.
pub struct JwtCredentialProvider {
    config: CredentialConfig,
    clock: Arc<dyn Clock>,
}

impl JwtCredentialProvider {
    pub fn new(config: CredentialConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CredentialConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

#[async_trait]
impl CredentialProvider for JwtCredentialProvider {
    async fn credential(&self, room: &str, role: Role) -> Result<String, CredentialError> {
        let token = generate_credential(
            room,
            role,
            &self.config.app_key,
            &self.config.app_secret,
            self.clock.now(),
            self.config.token_ttl,
        )?;
        tracing::debug!(room, ?role, "join credential issued");
        Ok(token)
    }
}
