//! Upstream credential acquisition.
//!
//! The relay needs a bearer token before it can open a completion stream.
//! Where that token comes from is behind [`CredentialSource`] so handlers can
//! be exercised with injected sources.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ApiKey, AuthConfig};
use crate::error::{Error, Result};

/// Produces the bearer credential for one upstream call.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn bearer_token(&self) -> Result<ApiKey>;
}

/// A fixed key, sent as-is.
pub struct StaticKey(ApiKey);

impl StaticKey {
    pub fn new(key: ApiKey) -> Self {
        Self(key)
    }
}

#[async_trait]
impl CredentialSource for StaticKey {
    async fn bearer_token(&self) -> Result<ApiKey> {
        Ok(self.0.clone())
    }
}

/// A token read from the environment on every request.
///
/// Gateway identity tokens are rotated by the hosting platform, so the
/// value is never cached.
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvToken {
    async fn bearer_token(&self) -> Result<ApiKey> {
        match std::env::var(&self.var) {
            Ok(token) if !token.is_empty() => Ok(ApiKey::from(token)),
            Ok(_) => Err(Error::Auth(format!("'{}' is empty", self.var))),
            Err(e) => Err(Error::Auth(format!("'{}': {}", self.var, e))),
        }
    }
}

/// Always fails: no API key was configured.
pub struct Unconfigured;

#[async_trait]
impl CredentialSource for Unconfigured {
    async fn bearer_token(&self) -> Result<ApiKey> {
        Err(Error::ApiKeyMissing)
    }
}

/// Build the credential source described by `[auth]`.
///
/// The API key gates the relay: without one every request fails with
/// [`Error::ApiKeyMissing`] even if a token variable is configured.
pub fn from_config(auth: &AuthConfig) -> Arc<dyn CredentialSource> {
    match (&auth.api_key, &auth.token_env) {
        (None, _) => Arc::new(Unconfigured),
        (Some(_), Some(var)) => Arc::new(EnvToken::new(var.clone())),
        (Some(key), None) => Arc::new(StaticKey::new(key.clone())),
    }
}
