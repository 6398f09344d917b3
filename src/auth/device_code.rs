//! OAuth 2.0 device authorization grant.
//!
//! The user is shown a short code and a URL, signs in on any device, and we
//! poll the token endpoint until they do (or the code expires).

use super::oauth::{EndpointError, OAuthClient};
use super::{AuthError, InteractiveFlow, TokenSet, SCOPES};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_INTERVAL_SECS: u64 = 5;
const SLOW_DOWN_STEP_SECS: u64 = 5;

/// What the device-code endpoint returns.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeMessage {
    pub user_code: String,
    pub device_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
    /// Ready-to-print instructions, localised by the service.
    #[serde(default)]
    pub message: Option<String>,
}

/// Shows the code to the user.
pub type DeviceCodePrompt = Arc<dyn Fn(&DeviceCodeMessage) + Send + Sync>;

pub struct DeviceCodeFlow {
    client: OAuthClient,
    prompt: DeviceCodePrompt,
}

impl DeviceCodeFlow {
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            prompt: Arc::new(stderr_prompt),
        }
    }

    pub fn with_prompt(mut self, prompt: DeviceCodePrompt) -> Self {
        self.prompt = prompt;
        self
    }
}

fn stderr_prompt(msg: &DeviceCodeMessage) {
    match &msg.message {
        Some(text) => eprintln!("{text}"),
        None => eprintln!(
            "To sign in, open {} and enter the code {}",
            msg.verification_uri, msg.user_code
        ),
    }
}

/// What to do after one poll of the token endpoint.
#[derive(Debug, PartialEq, Eq)]
enum Poll {
    Wait,
    SlowDown,
    Fail(AuthError),
}

fn classify_poll_error(code: &str, description: String) -> Poll {
    match code {
        "authorization_pending" => Poll::Wait,
        "slow_down" => Poll::SlowDown,
        "expired_token" | "code_expired" => Poll::Fail(AuthError::Expired),
        _ => Poll::Fail(AuthError::Denied {
            code: code.to_string(),
            description,
        }),
    }
}

#[async_trait]
impl InteractiveFlow for DeviceCodeFlow {
    async fn sign_in(&self) -> Result<TokenSet, AuthError> {
        let msg: DeviceCodeMessage = self
            .client
            .post_form(
                &self.client.endpoint("devicecode"),
                &[("client_id", self.client.client_id()), ("scope", SCOPES)],
            )
            .await
            .map_err(AuthError::from)?;

        (self.prompt)(&msg);
        info!("Waiting for device-code sign-in (expires in {}s)", msg.expires_in);

        let deadline = Instant::now() + Duration::from_secs(msg.expires_in);
        let mut interval = msg.interval.unwrap_or(DEFAULT_INTERVAL_SECS).max(1);

        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            if Instant::now() >= deadline {
                return Err(AuthError::Expired);
            }
            let result = self
                .client
                .token(&[
                    ("grant_type", GRANT_TYPE),
                    ("client_id", self.client.client_id()),
                    ("device_code", msg.device_code.as_str()),
                ])
                .await;
            match result {
                Ok(set) => {
                    info!("Device-code sign-in complete");
                    return Ok(set);
                }
                Err(EndpointError::OAuth { code, description }) => {
                    match classify_poll_error(&code, description) {
                        Poll::Wait => debug!("Sign-in pending"),
                        Poll::SlowDown => {
                            interval += SLOW_DOWN_STEP_SECS;
                            debug!("Asked to slow down; polling every {}s", interval);
                        }
                        Poll::Fail(e) => return Err(e),
                    }
                }
                Err(EndpointError::Other(e)) => return Err(e),
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.client.refresh(refresh_token).await
    }
}
