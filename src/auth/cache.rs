//! Silent token reuse in front of an interactive flow.
//!
//! Lookup order on every [`TokenProvider::acquire_token`] call:
//!
//! 1. a fresh access token held in memory (loaded from disk on first use),
//! 2. a refresh token, redeemed without user interaction,
//! 3. a full interactive sign-in.
//!
//! With a path configured, the result is written back as JSON so the next
//! run can skip the sign-in. A cache written for another client id is
//! ignored. Cache read and write failures are logged and otherwise ignored:
//! the cache can always be rebuilt by signing in again.

use super::{AccessToken, AuthError, InteractiveFlow, TokenProvider, TokenSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    client_id: String,
    access_token: AccessToken,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct CachedToken {
    inner: Arc<dyn InteractiveFlow>,
    path: Option<PathBuf>,
    client_id: String,
    state: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    loaded: bool,
    tokens: Option<TokenSet>,
}

impl CachedToken {
    /// `path = None` keeps tokens in memory only.
    pub fn new(inner: Arc<dyn InteractiveFlow>, path: Option<PathBuf>, client_id: impl Into<String>) -> Self {
        Self {
            inner,
            path,
            client_id: client_id.into(),
            state: Mutex::new(Slot::default()),
        }
    }

    /// `<user cache dir>/recoverlette/<name>.json`
    pub fn default_path(name: &str) -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("recoverlette").join(format!("{name}.json")))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn load(&self) -> Option<TokenSet> {
        let path = self.path.as_ref()?;
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No token cache at {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<CacheRecord>(&raw) {
            Ok(record) if record.client_id == self.client_id => {
                debug!("Loaded token cache from {}", path.display());
                Some(TokenSet {
                    access: record.access_token,
                    refresh_token: record.refresh_token,
                })
            }
            Ok(_) => {
                debug!("Token cache belongs to another client id; ignoring");
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable token cache {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn store(&self, tokens: &TokenSet) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let record = CacheRecord {
            client_id: self.client_id.clone(),
            access_token: tokens.access.clone(),
            refresh_token: tokens.refresh_token.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        let tmp = path.with_extension("json.tmp");
        // A leftover temp file would keep its old mode.
        match tokio::fs::remove_file(&tmp).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await
    }
}

#[async_trait]
impl TokenProvider for CachedToken {
    async fn acquire_token(&self) -> Result<AccessToken, AuthError> {
        let mut slot = self.state.lock().await;
        if !slot.loaded {
            slot.tokens = self.load().await;
            slot.loaded = true;
        }

        if let Some(tokens) = &slot.tokens {
            if tokens.access.is_fresh() {
                return Ok(tokens.access.clone());
            }
        }

        let previous_refresh = slot.tokens.as_ref().and_then(|t| t.refresh_token.clone());
        let refreshed = match &previous_refresh {
            Some(refresh) => match self.inner.refresh(refresh).await {
                Ok(tokens) => {
                    debug!("Access token renewed silently");
                    Some(tokens)
                }
                Err(e) => {
                    info!("Silent renewal failed ({}); signing in again", e);
                    None
                }
            },
            None => None,
        };
        let mut tokens = match refreshed {
            Some(tokens) => tokens,
            None => self.inner.sign_in().await?,
        };
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = previous_refresh;
        }

        if let Err(e) = self.store(&tokens).await {
            warn!("Could not write token cache: {}", e);
        }
        let access = tokens.access.clone();
        slot.tokens = Some(tokens);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFlow {
        sign_ins: AtomicUsize,
        refreshes: AtomicUsize,
        fail_refresh: bool,
    }

    #[async_trait]
    impl InteractiveFlow for CountingFlow {
        async fn sign_in(&self) -> Result<TokenSet, AuthError> {
            let n = self.sign_ins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenSet {
                access: AccessToken::expiring_in(format!("signed-in-{n}"), Duration::from_secs(3600)),
                refresh_token: Some("rt".into()),
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(AuthError::Denied {
                    code: "invalid_grant".into(),
                    description: "revoked".into(),
                });
            }
            Ok(TokenSet {
                access: AccessToken::expiring_in("refreshed", Duration::from_secs(3600)),
                refresh_token: None,
            })
        }
    }

    fn write_cache(path: &Path, client_id: &str, access: AccessToken) {
        let record = CacheRecord {
            client_id: client_id.into(),
            access_token: access,
            refresh_token: Some("old-rt".into()),
        };
        std::fs::write(path, serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn signs_in_once_then_reuses() {
        let flow = Arc::new(CountingFlow::default());
        let cache = CachedToken::new(flow.clone(), None, "cid");
        assert_eq!(cache.acquire_token().await.unwrap().secret(), "signed-in-1");
        assert_eq!(cache.acquire_token().await.unwrap().secret(), "signed-in-1");
        assert_eq!(flow.sign_ins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("recoverlette_cache.json");

        let first = CachedToken::new(Arc::new(CountingFlow::default()), Some(path.clone()), "cid");
        first.acquire_token().await.unwrap();
        assert!(path.exists());

        let flow = Arc::new(CountingFlow::default());
        let second = CachedToken::new(flow.clone(), Some(path), "cid");
        assert_eq!(second.acquire_token().await.unwrap().secret(), "signed-in-1");
        assert_eq!(flow.sign_ins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_keeps_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_cache(&path, "cid", AccessToken::new("stale", Some(1)));

        let flow = Arc::new(CountingFlow::default());
        let cache = CachedToken::new(flow.clone(), Some(path.clone()), "cid");
        assert_eq!(cache.acquire_token().await.unwrap().secret(), "refreshed");
        assert_eq!(flow.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(flow.sign_ins.load(Ordering::SeqCst), 0);

        let saved: CacheRecord = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("old-rt"));
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_sign_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_cache(&path, "cid", AccessToken::new("stale", Some(1)));

        let flow = Arc::new(CountingFlow {
            fail_refresh: true,
            ..CountingFlow::default()
        });
        let cache = CachedToken::new(flow.clone(), Some(path), "cid");
        assert_eq!(cache.acquire_token().await.unwrap().secret(), "signed-in-1");
    }

    #[tokio::test]
    async fn cache_for_other_client_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        write_cache(
            &path,
            "someone-else",
            AccessToken::expiring_in("theirs", Duration::from_secs(3600)),
        );

        let flow = Arc::new(CountingFlow::default());
        let cache = CachedToken::new(flow.clone(), Some(path), "cid");
        assert_eq!(cache.acquire_token().await.unwrap().secret(), "signed-in-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_file_is_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        // A stale temp file from an interrupted run must not lend its mode.
        std::fs::write(path.with_extension("json.tmp"), b"{}").unwrap();
        std::fs::set_permissions(
            path.with_extension("json.tmp"),
            std::fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let cache = CachedToken::new(Arc::new(CountingFlow::default()), Some(path.clone()), "cid");
        cache.acquire_token().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
