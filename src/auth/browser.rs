//! Authorization code + PKCE through the system browser.
//!
//! A one-shot HTTP listener on `127.0.0.1` receives the redirect, and the
//! same address is advertised as the redirect URI, so the app registration
//! needs `http://127.0.0.1` as a public-client redirect URI (any port
//! matches a loopback registration).

use super::oauth::OAuthClient;
use super::{AuthError, InteractiveFlow, TokenSet, SCOPES};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

const DONE_PAGE: &str = "<!doctype html><html><body><h3>Sign-in complete.</h3>\
<p>You can close this window and return to the terminal.</p></body></html>";
const FAILED_PAGE: &str = "<!doctype html><html><body><h3>Sign-in failed.</h3>\
<p>See the terminal for details.</p></body></html>";

pub struct BrowserFlow {
    client: OAuthClient,
    timeout: Duration,
}

impl BrowserFlow {
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            timeout: SIGN_IN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str, challenge: &str) -> Result<Url, AuthError> {
        Url::parse_with_params(
            &self.client.endpoint("authorize"),
            &[
                ("client_id", self.client.client_id()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("response_mode", "query"),
                ("scope", SCOPES),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| AuthError::NotConfigured(format!("bad authority URL: {e}")))
    }
}

/// PKCE verifier/challenge pair (RFC 7636, S256).
#[derive(Debug, Clone)]
struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let challenge = challenge_for(&verifier);
        Self { verifier, challenge }
    }
}

fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Query parameters of the redirect request.
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code { code: String, state: String },
    Error { code: String, description: String },
}

/// Redirect URI pointing at the listener's own address, never a host name
/// that might resolve to another interface.
fn redirect_uri(listener: SocketAddr) -> String {
    format!("http://{}:{}", listener.ip(), listener.port())
}

/// Parse `GET /?code=..&state=.. HTTP/1.1`. `None` for anything that is not
/// a redirect (favicon probes and the like).
fn parse_redirect(request_line: &str) -> Option<Redirect> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let url = Url::parse(&format!("http://localhost{target}")).ok()?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Some(Redirect::Error {
            code: error.clone(),
            description: params.get("error_description").cloned().unwrap_or_default(),
        });
    }
    Some(Redirect::Code {
        code: params.get("code")?.clone(),
        state: params.get("state").cloned().unwrap_or_default(),
    })
}

async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    Ok(text.lines().next().unwrap_or_default().to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Could not answer the browser: {}", e);
    }
    let _ = stream.shutdown().await;
}

/// Accept connections until one carries the redirect.
async fn wait_for_redirect(listener: &TcpListener) -> Result<Redirect, AuthError> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|e| AuthError::Transport(format!("redirect listener: {e}")))?;
        let line = match read_request_line(&mut stream).await {
            Ok(line) => line,
            Err(e) => {
                debug!("Dropped connection from {}: {}", peer, e);
                continue;
            }
        };
        match parse_redirect(&line) {
            Some(redirect) => {
                let page = match redirect {
                    Redirect::Code { .. } => DONE_PAGE,
                    Redirect::Error { .. } => FAILED_PAGE,
                };
                respond(&mut stream, "200 OK", page).await;
                return Ok(redirect);
            }
            None => respond(&mut stream, "404 Not Found", "").await,
        }
    }
}

#[async_trait]
impl InteractiveFlow for BrowserFlow {
    async fn sign_in(&self) -> Result<TokenSet, AuthError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| AuthError::Transport(format!("cannot open redirect listener: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let port = addr.port();
        let redirect_uri = redirect_uri(addr);

        let pkce = Pkce::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = self.authorize_url(&redirect_uri, &state, &pkce.challenge)?;

        info!("Opening the browser for sign-in (redirect port {})", port);
        if let Err(e) = open::that_detached(url.as_str()) {
            warn!("Could not open a browser: {}", e);
            eprintln!("Open this URL to sign in:\n  {url}");
        }

        let redirect = tokio::time::timeout(self.timeout, wait_for_redirect(&listener))
            .await
            .map_err(|_| AuthError::TimedOut {
                secs: self.timeout.as_secs(),
            })??;

        let code = match redirect {
            Redirect::Error { code, description } => {
                return Err(AuthError::Denied { code, description })
            }
            Redirect::Code { state: returned, .. } if returned != state => {
                return Err(AuthError::InvalidResponse(
                    "sign-in redirect carried an unexpected state".into(),
                ))
            }
            Redirect::Code { code, .. } => code,
        };

        let set = self
            .client
            .token(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.client.client_id()),
                ("scope", SCOPES),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .await?;
        info!("Browser sign-in complete");
        Ok(set)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.client.refresh(refresh_token).await
    }
}
