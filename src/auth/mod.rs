//! Credential acquisition.
//!
//! Everything remote needs a bearer token, and everything that needs one
//! asks a [`TokenProvider`]. Which provider is used is configuration
//! ([`crate::config::AuthFlow`]), not code:
//!
//! | Flow | Provider |
//! |------|----------|
//! | `token` | [`StaticToken`]: a pre-issued token from the environment |
//! | `browser` | [`CachedToken`] around [`browser::BrowserFlow`] |
//! | `device-code` | [`CachedToken`] around [`device_code::DeviceCodeFlow`] |
//!
//! Interactive flows are always wrapped in [`CachedToken`] so a request
//! signs in at most once; with caching enabled the tokens also persist
//! across runs.

pub mod browser;
pub mod cache;
pub mod device_code;
pub mod oauth;

pub use cache::CachedToken;

use crate::config::{AppSettings, AuthFlow};
use crate::error::RecoverletteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

/// Delegated permissions requested at sign-in.
pub const SCOPES: &str = "Files.ReadWrite User.Read offline_access";

/// Name of the persistent token cache.
pub const TOKEN_CACHE_NAME: &str = "recoverlette_cache";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("sign-in is not configured: {0}")]
    NotConfigured(String),

    #[error("sign-in was refused ({code}): {description}")]
    Denied { code: String, description: String },

    #[error("the sign-in code expired before it was used")]
    Expired,

    #[error("no sign-in completed within {secs}s")]
    TimedOut { secs: u64 },

    #[error("identity service unreachable: {0}")]
    Transport(String),

    #[error("unexpected identity service response: {0}")]
    InvalidResponse(String),
}

/// A bearer token. `Debug` never shows the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    secret: String,
    /// Unix seconds; `None` means unknown, treated as fresh.
    expires_at: Option<u64>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// A token valid for `lifetime` from now.
    pub fn expiring_in(secret: impl Into<String>, lifetime: Duration) -> Self {
        Self::new(secret, Some(unix_now() + lifetime.as_secs()))
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => unix_now() + EXPIRY_SKEW.as_secs() < at,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What an interactive sign-in yields.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access: AccessToken,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access", &self.access)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Source of bearer tokens for remote calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire_token(&self) -> Result<AccessToken, AuthError>;
}

/// A flow that involves the user, plus silent renewal.
#[async_trait]
pub trait InteractiveFlow: Send + Sync {
    /// Full sign-in; may open a browser or print a code.
    async fn sign_in(&self) -> Result<TokenSet, AuthError>;

    /// Redeem a refresh token without user interaction.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;
}

/// A fixed, pre-issued token.
pub struct StaticToken {
    token: AccessToken,
}

impl StaticToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret, None),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn acquire_token(&self) -> Result<AccessToken, AuthError> {
        Ok(self.token.clone())
    }
}

/// Build the provider the settings ask for.
///
/// A directly supplied access token always wins. Otherwise the configured
/// interactive flow is wrapped in a [`CachedToken`], persisted under the
/// user cache directory unless caching is disabled.
pub fn provider_from_settings(
    settings: &AppSettings,
) -> Result<Arc<dyn TokenProvider>, RecoverletteError> {
    settings.validate()?;

    if let Some(token) = &settings.access_token {
        info!("Using access token from the environment");
        return Ok(Arc::new(StaticToken::new(token.clone())));
    }

    let client = oauth::OAuthClient::from_settings(settings)?;
    let flow: Arc<dyn InteractiveFlow> = match settings.auth_flow {
        AuthFlow::Browser => Arc::new(browser::BrowserFlow::new(client)),
        AuthFlow::DeviceCode => Arc::new(device_code::DeviceCodeFlow::new(client)),
        AuthFlow::Token => {
            return Err(RecoverletteError::InvalidConfig(
                "auth flow 'token' needs an access token".into(),
            ))
        }
    };

    let path = if settings.token_cache {
        CachedToken::default_path(TOKEN_CACHE_NAME)
    } else {
        None
    };
    info!(
        "Sign-in: {:?} flow, client {}, tenant '{}', cache {}",
        settings.auth_flow,
        settings.redacted_client_id(),
        settings.tenant_id,
        path.as_ref().map_or("disabled".to_string(), |p| p.display().to_string()),
    );
    let client_id = settings.client_id.clone().unwrap_or_default();
    Ok(Arc::new(CachedToken::new(flow, path, client_id)))
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_hides_secret() {
        let t = AccessToken::new("eyJ.super.secret", Some(1));
        let shown = format!("{t:?}");
        assert!(!shown.contains("secret."), "got: {shown}");
        let set = TokenSet {
            access: t,
            refresh_token: Some("refresh-me".into()),
        };
        assert!(!format!("{set:?}").contains("refresh-me"));
    }

    #[test]
    fn freshness_honours_skew() {
        assert!(AccessToken::new("a", None).is_fresh());
        assert!(AccessToken::expiring_in("a", Duration::from_secs(3600)).is_fresh());
        assert!(!AccessToken::expiring_in("a", Duration::from_secs(60)).is_fresh());
        assert!(!AccessToken::new("a", Some(1)).is_fresh());
    }

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let p = StaticToken::new("abc");
        assert_eq!(p.acquire_token().await.unwrap().secret(), "abc");
    }

    #[test]
    fn settings_with_access_token_need_no_client_id() {
        let settings = AppSettings {
            access_token: Some("abc".into()),
            ..AppSettings::default()
        };
        assert!(provider_from_settings(&settings).is_ok());
    }

    #[test]
    fn interactive_flow_without_client_id_is_rejected() {
        let settings = AppSettings::default();
        let err = provider_from_settings(&settings).err().unwrap();
        assert!(matches!(err, RecoverletteError::InvalidConfig(_)));
    }

    #[test]
    fn device_code_settings_build_a_provider() {
        let settings = AppSettings {
            client_id: Some("00000000-0000-0000-0000-00000000abcd".into()),
            auth_flow: AuthFlow::DeviceCode,
            token_cache: false,
            ..AppSettings::default()
        };
        assert!(provider_from_settings(&settings).is_ok());
    }
}
