//! Shared client for the Microsoft identity platform v2.0 endpoints.

use super::{AccessToken, AuthError, TokenSet, SCOPES};
use crate::config::AppSettings;
use crate::error::RecoverletteError;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error from the token endpoint: either a protocol-level OAuth error the
/// caller may want to react to (`authorization_pending`, …) or a hard
/// failure.
#[derive(Debug)]
pub(crate) enum EndpointError {
    OAuth { code: String, description: String },
    Other(AuthError),
}

impl From<EndpointError> for AuthError {
    fn from(e: EndpointError) -> Self {
        match e {
            EndpointError::OAuth { code, description } => AuthError::Denied { code, description },
            EndpointError::Other(e) => e,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    authority: String,
    client_id: String,
}

impl OAuthClient {
    pub fn new(
        authority_url: &str,
        tenant: &str,
        client_id: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            authority: format!("{}/{}", authority_url.trim_end_matches('/'), tenant),
            client_id: client_id.into(),
        })
    }

    pub fn from_settings(settings: &AppSettings) -> Result<Self, RecoverletteError> {
        let client_id = settings
            .client_id
            .clone()
            .ok_or_else(|| RecoverletteError::InvalidConfig("client id is not set".into()))?;
        Ok(Self::new(
            &settings.authority_url,
            &settings.tenant_id,
            client_id,
        )?)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scopes(&self) -> &'static str {
        SCOPES
    }

    /// `<authority>/<tenant>/oauth2/v2.0/<name>`
    pub fn endpoint(&self, name: &str) -> String {
        format!("{}/oauth2/v2.0/{}", self.authority, name)
    }

    /// POST a form to `endpoint` and decode the JSON body as `T`, or the
    /// OAuth error it carries.
    pub(crate) async fn post_form<T>(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<T, EndpointError>
    where
        T: for<'de> Deserialize<'de>,
    {
        debug!("POST {}", endpoint);
        let response = self
            .http
            .post(endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| EndpointError::Other(AuthError::Transport(e.to_string())))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| EndpointError::Other(AuthError::Transport(e.to_string())))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| EndpointError::Other(AuthError::InvalidResponse(e.to_string())));
        }
        match serde_json::from_slice::<OAuthErrorBody>(&body) {
            Ok(err) => Err(EndpointError::OAuth {
                description: err.error_description.unwrap_or_default(),
                code: err.error,
            }),
            Err(_) => Err(EndpointError::Other(AuthError::InvalidResponse(format!(
                "HTTP {status} from identity endpoint"
            )))),
        }
    }

    /// Redeem a token-endpoint grant.
    pub(crate) async fn token(&self, form: &[(&str, &str)]) -> Result<TokenSet, EndpointError> {
        let response: TokenResponse = self.post_form(&self.endpoint("token"), form).await?;
        let access = match response.expires_in {
            Some(secs) => AccessToken::expiring_in(response.access_token, Duration::from_secs(secs)),
            None => AccessToken::new(response.access_token, None),
        };
        Ok(TokenSet {
            access,
            refresh_token: response.refresh_token,
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let set = self
            .token(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("scope", SCOPES),
                ("refresh_token", refresh_token),
            ])
            .await?;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_tenant_scoped() {
        let c = OAuthClient::new("https://login.example.test/", "consumers", "cid").unwrap();
        assert_eq!(
            c.endpoint("devicecode"),
            "https://login.example.test/consumers/oauth2/v2.0/devicecode"
        );
        assert_eq!(c.client_id(), "cid");
    }

    #[test]
    fn oauth_errors_become_denied() {
        let e: AuthError = EndpointError::OAuth {
            code: "invalid_grant".into(),
            description: "AADSTS70000".into(),
        }
        .into();
        assert!(matches!(e, AuthError::Denied { ref code, .. } if code == "invalid_grant"));
    }

    #[test]
    fn token_response_tolerates_missing_fields() {
        let r: TokenResponse = serde_json::from_str(r#"{"access_token":"x","token_type":"Bearer"}"#).unwrap();
        assert_eq!(r.access_token, "x");
        assert!(r.refresh_token.is_none());
        assert!(r.expires_in.is_none());
    }
}
