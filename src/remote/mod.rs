//! Remote storage and conversion.
//!
//! [`RemoteDrive`] is the seam between the orchestrator and a cloud drive
//! that can store a Word file and render it server-side. [`graph::GraphDrive`]
//! talks to OneDrive through Microsoft Graph; [`memory::MemoryDrive`] keeps
//! everything in process for offline runs and tests.

pub mod graph;
pub mod memory;

use crate::auth::AuthError;
use crate::config::OutputFormat;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use thiserror::Error;

/// Rendered bytes as they arrive from the converter.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DriveError>> + Send>>;

/// Identifies one item on one drive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub drive_id: String,
    pub item_id: String,
}

impl ArtifactId {
    pub fn new(drive_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            drive_id: drive_id.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.item_id)
    }
}

/// The folder a template lives in; temporary copies are created beside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub drive_id: String,
    pub item_id: String,
}

/// A located template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: ArtifactId,
    pub name: String,
    pub parent: FolderRef,
}

/// The temporary filled copy uploaded for conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempArtifact {
    pub id: ArtifactId,
    pub name: String,
}

impl fmt::Display for TempArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' (id {})", self.name, self.id)
    }
}

/// Failure of one remote call.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("access denied (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Direct conversion to this format is not available, typically on some
    /// account tiers. No fallback is attempted.
    #[error("conversion to '{format}' is not supported for this item or account: {message}")]
    FormatNotSupported { format: OutputFormat, message: String },

    #[error("HTTP {status} {code}: {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Storage + server-side conversion, as the orchestrator needs it.
///
/// Implementations must be safe to share across tasks. Every method is a
/// single remote call (plus whatever redirect following it implies); retries
/// and timeouts are the transport's business.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    /// Display name of the signed-in account, used as a sign-in check.
    async fn account_name(&self) -> Result<Option<String>, DriveError>;

    /// Resolve a drive-root-relative path such as `Documents/Letter.docx`.
    async fn locate(&self, path: &str) -> Result<RemoteItem, DriveError>;

    /// Fetch the content of `item`.
    async fn download(&self, item: &RemoteItem) -> Result<Bytes, DriveError>;

    /// Create (or overwrite) `name` inside `folder`.
    async fn upload(
        &self,
        folder: &FolderRef,
        name: &str,
        content: Vec<u8>,
    ) -> Result<ArtifactId, DriveError>;

    /// Ask the service to render `artifact` as `format`.
    async fn convert(
        &self,
        artifact: &ArtifactId,
        format: OutputFormat,
    ) -> Result<ByteStream, DriveError>;

    async fn delete(&self, artifact: &ArtifactId) -> Result<(), DriveError>;
}
