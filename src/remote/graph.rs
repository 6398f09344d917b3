//! OneDrive through Microsoft Graph.
//!
//! Redirects are never followed automatically: content endpoints answer with
//! `302` to a pre-authenticated download URL, and that URL must be fetched
//! *without* the bearer token.

use super::{ArtifactId, ByteStream, DriveError, FolderRef, RemoteDrive, RemoteItem};
use crate::auth::TokenProvider;
use crate::config::OutputFormat;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const MAX_ERROR_BODY: usize = 300;

#[derive(Deserialize)]
struct DriveInfo {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_reference: Option<ParentReference>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentReference {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    drive_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct User {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct GraphDrive {
    http: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenProvider>,
    drive_id: OnceCell<String>,
}

impl GraphDrive {
    /// `base_url` is the versioned Graph root, e.g.
    /// `https://graph.microsoft.com/v1.0`.
    pub fn new(
        base_url: &str,
        tokens: Arc<dyn TokenProvider>,
        timeout_secs: u64,
    ) -> Result<Self, DriveError> {
        let base = Url::parse(base_url)
            .map_err(|e| DriveError::InvalidResponse(format!("bad Graph URL '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(DriveError::InvalidResponse(format!(
                "bad Graph URL '{base_url}'"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            base,
            tokens,
            drive_id: OnceCell::new(),
        })
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn url<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, DriveError> {
        let token = self.tokens.acquire_token().await?;
        debug!("{} {}", method, url);
        Ok(self.http.request(method, url).bearer_auth(token.secret()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DriveError> {
        request.send().await.map_err(transport)
    }

    async fn json<T>(&self, response: Response, what: &str) -> Result<T, DriveError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        if !status.is_success() {
            return Err(classify(status, &body, what));
        }
        serde_json::from_slice(&body)
            .map_err(|e| DriveError::InvalidResponse(format!("{what}: {e}")))
    }

    async fn drive_id(&self) -> Result<&str, DriveError> {
        let id = self
            .drive_id
            .get_or_try_init(|| async {
                let mut url = self.url(["me", "drive"]);
                url.set_query(Some("$select=id"));
                let response = self.send(self.request(Method::GET, url).await?).await?;
                let drive: DriveInfo = self.json(response, "drive").await?;
                debug!("Drive id: {}", drive.id);
                Ok::<_, DriveError>(drive.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Follow a content redirect (unauthenticated), or accept a direct body.
    async fn content(&self, response: Response, what: &str) -> Result<Response, DriveError> {
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok());
        match content_reply(status, location, what)? {
            ContentReply::Redirect(location) => {
                debug!("Following {} redirect for {}", status.as_u16(), what);
                let followed = self.send(self.http.get(location)).await?;
                ensure_success(followed, what).await
            }
            ContentReply::Direct => {
                warn!("{} returned {} directly instead of a redirect; using the body", what, status.as_u16());
                Ok(response)
            }
            ContentReply::Failed => ensure_success(response, what).await,
        }
    }
}

/// How the first response to a content request is handled.
#[derive(Debug, PartialEq, Eq)]
enum ContentReply {
    /// Fetch the body from this pre-authenticated URL.
    Redirect(String),
    /// The body is in this response.
    Direct,
    Failed,
}

fn content_reply(
    status: StatusCode,
    location: Option<&str>,
    what: &str,
) -> Result<ContentReply, DriveError> {
    if status.is_redirection() {
        return location
            .map(|l| ContentReply::Redirect(l.to_string()))
            .ok_or_else(|| DriveError::InvalidResponse(format!("{what}: redirect without Location")));
    }
    Ok(if status.is_success() {
        ContentReply::Direct
    } else {
        ContentReply::Failed
    })
}

/// A refused conversion means the source cannot be rendered as `format`.
fn conversion_error(e: DriveError, format: OutputFormat) -> DriveError {
    match e {
        DriveError::Http { status, code, message } if status == 406 || code == "notSupported" => {
            DriveError::FormatNotSupported { format, message }
        }
        other => other,
    }
}

fn transport(e: reqwest::Error) -> DriveError {
    if e.is_timeout() {
        DriveError::Timeout(e.to_string())
    } else {
        DriveError::Transport(e.to_string())
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response, DriveError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;
    Err(classify(status, &body, what))
}

/// Map a non-success Graph response to a [`DriveError`].
fn classify(status: StatusCode, body: &[u8], what: &str) -> DriveError {
    let (code, message) = match serde_json::from_slice::<GraphErrorBody>(body) {
        Ok(b) => (b.error.code, b.error.message),
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let text: String = text.chars().take(MAX_ERROR_BODY).collect();
            (String::new(), text)
        }
    };
    match status.as_u16() {
        404 => DriveError::NotFound(what.to_string()),
        _ if code == "itemNotFound" => DriveError::NotFound(what.to_string()),
        s @ (401 | 403) => DriveError::Unauthorized { status: s, message },
        s => DriveError::Http {
            status: s,
            code: if code.is_empty() { "unknown".into() } else { code },
            message,
        },
    }
}

/// Drive-root-relative path → path segments: leading `/` dropped, empty
/// segments skipped. Each segment is percent-encoded on insertion, which
/// covers `#` and `?` in file names.
fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('/').split('/').filter(|s| !s.is_empty())
}

#[async_trait]
impl RemoteDrive for GraphDrive {
    async fn account_name(&self) -> Result<Option<String>, DriveError> {
        let mut url = self.url(["me"]);
        url.set_query(Some("$select=displayName"));
        let response = self.send(self.request(Method::GET, url).await?).await?;
        let user: User = self.json(response, "me").await?;
        Ok(user.display_name)
    }

    async fn locate(&self, path: &str) -> Result<RemoteItem, DriveError> {
        let drive = self.drive_id().await?.to_string();

        let mut url = self.url(["drives", drive.as_str(), "root:"]);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(path_segments(path));
        }
        url.set_query(Some("$select=id,name,parentReference"));
        let response = self.send(self.request(Method::GET, url).await?).await?;
        let item: DriveItem = self.json(response, path).await?;

        let parent = match item.parent_reference.and_then(|p| p.id.map(|id| (id, p.drive_id))) {
            Some((id, parent_drive)) => FolderRef {
                drive_id: parent_drive.unwrap_or_else(|| drive.clone()),
                item_id: id,
            },
            None => {
                debug!("No parentReference for '{}'; using the drive root", path);
                let mut url = self.url(["drives", drive.as_str(), "root"]);
                url.set_query(Some("$select=id"));
                let response = self.send(self.request(Method::GET, url).await?).await?;
                let root: DriveItem = self.json(response, "drive root").await?;
                FolderRef {
                    drive_id: drive.clone(),
                    item_id: root.id,
                }
            }
        };

        let name = item.name.unwrap_or_else(|| {
            path_segments(path).last().unwrap_or_default().to_string()
        });
        Ok(RemoteItem {
            id: ArtifactId::new(drive, item.id),
            name,
            parent,
        })
    }

    async fn download(&self, item: &RemoteItem) -> Result<Bytes, DriveError> {
        let url = self.url(["drives", item.id.drive_id.as_str(), "items", item.id.item_id.as_str(), "content"]);
        let response = self.send(self.request(Method::GET, url).await?).await?;
        let response = self.content(response, &item.name).await?;
        response.bytes().await.map_err(transport)
    }

    async fn upload(
        &self,
        folder: &FolderRef,
        name: &str,
        content: Vec<u8>,
    ) -> Result<ArtifactId, DriveError> {
        // PUT /drives/{d}/items/{parent}:/{name}:/content
        let parent = format!("{}:", folder.item_id);
        let file = format!("{name}:");
        let url = self.url(["drives", folder.drive_id.as_str(), "items", parent.as_str(), file.as_str(), "content"]);
        let request = self
            .request(Method::PUT, url)
            .await?
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        let response = self.send(request).await?;
        let item: DriveItem = self.json(response, name).await?;
        Ok(ArtifactId::new(folder.drive_id.clone(), item.id))
    }

    async fn convert(
        &self,
        artifact: &ArtifactId,
        format: OutputFormat,
    ) -> Result<ByteStream, DriveError> {
        let mut url = self.url(["drives", artifact.drive_id.as_str(), "items", artifact.item_id.as_str(), "content"]);
        url.query_pairs_mut().append_pair("format", format.token());
        let response = self.send(self.request(Method::GET, url).await?).await?;
        let response = self
            .content(response, &artifact.item_id)
            .await
            .map_err(|e| conversion_error(e, format))?;
        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(transport))))
    }

    async fn delete(&self, artifact: &ArtifactId) -> Result<(), DriveError> {
        let url = self.url(["drives", artifact.drive_id.as_str(), "items", artifact.item_id.as_str()]);
        let response = self.send(self.request(Method::DELETE, url).await?).await?;
        ensure_success(response, &artifact.item_id).await.map(|_| ())
    }
}
