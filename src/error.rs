//! Error types for the recoverlette library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RecoverletteError`]: **Fatal**: the request cannot complete (sign-in
//!   failed, template missing, a remote stage failed, the rendered artifact is
//!   garbage). Returned as `Err(RecoverletteError)` from the top-level
//!   `render*` functions.
//!
//! * [`Warning`]: **Non-fatal**: something the user should know about that
//!   does not invalidate the output (a required placeholder with no value, a
//!   temporary file that could not be deleted). Collected into
//!   [`crate::output::RenderReport::warnings`] and logged.
//!
//! Every remote failure after the temporary copy exists carries it as
//! `leftover`: the copy is intentionally left on the drive so the failure can
//! be inspected, and the caller needs its name to find it.

use crate::auth::AuthError;
use crate::config::OutputFormat;
use crate::orchestrator::Stage;
use crate::remote::{DriveError, TempArtifact};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the recoverlette library.
#[derive(Debug, Error)]
pub enum RecoverletteError {
    // ── Credential errors ─────────────────────────────────────────────────
    /// No usable bearer token; nothing remote was attempted.
    #[error("Authentication failed: {0}\nCheck RECOVERLETTE_CLIENT_ID / RECOVERLETTE_TENANT_ID, or remove the token cache and sign in again.")]
    AuthFailure(#[from] AuthError),

    // ── Template errors ───────────────────────────────────────────────────
    /// The template path does not resolve to an item on the drive.
    #[error("Template not found on the drive: '{path}'\nPaths are relative to the drive root, e.g. 'Documents/CoverLetterTemplate.docx'.")]
    TemplateNotFound { path: String },

    /// The template exists but could not be fetched.
    #[error("Failed to download template '{path}': {source}")]
    TemplateDownloadFailed {
        path: String,
        #[source]
        source: DriveError,
    },

    /// The template bytes are not a readable Word package.
    #[error("Template is not a readable Word document: {detail}")]
    InvalidTemplate { detail: String },

    /// Required placeholders are unbound and the configured gate refused to
    /// continue. Never raised under the default warn-only policy.
    #[error("{} required placeholder(s) have no value: {}", .keys.len(), .keys.join(", "))]
    UndefinedPlaceholders { keys: Vec<String> },

    // ── Remote conversion errors ──────────────────────────────────────────
    /// A remote call failed while the orchestrator was in `stage`.
    #[error("Remote {stage} failed: {source}{}", leftover_hint(.leftover))]
    RemoteIo {
        stage: Stage,
        #[source]
        source: DriveError,
        leftover: Option<TempArtifact>,
    },

    /// The converter answered, but the bytes are not a plausible artifact.
    /// Nothing was written locally.
    #[error("Rendered {format} rejected ({size} bytes): {reason}{}", leftover_hint(.leftover))]
    EmptyOrInvalidArtifact {
        format: OutputFormat,
        size: usize,
        reason: String,
        leftover: Option<TempArtifact>,
    },

    /// The request was cancelled at or during `stage`.
    #[error("Cancelled during {stage}{}", leftover_hint(.leftover))]
    Cancelled {
        stage: Stage,
        leftover: Option<TempArtifact>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a local output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecoverletteError {
    /// Orchestrator stage the failure happened in, for remote failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RecoverletteError::RemoteIo { stage, .. } | RecoverletteError::Cancelled { stage, .. } => {
                Some(*stage)
            }
            RecoverletteError::EmptyOrInvalidArtifact { .. } => Some(Stage::Downloading),
            _ => None,
        }
    }

    /// Temporary copy left on the drive for inspection, if any.
    pub fn leftover(&self) -> Option<&TempArtifact> {
        match self {
            RecoverletteError::RemoteIo { leftover, .. }
            | RecoverletteError::EmptyOrInvalidArtifact { leftover, .. }
            | RecoverletteError::Cancelled { leftover, .. } => leftover.as_ref(),
            _ => None,
        }
    }
}

fn leftover_hint(leftover: &Option<TempArtifact>) -> String {
    match leftover {
        Some(artifact) => format!("\nTemporary file {artifact} was left on the drive for inspection."),
        None => String::new(),
    }
}

/// A non-fatal condition reported alongside a successful (or still running)
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Warning {
    /// A required placeholder had no binding; its token stays verbatim.
    #[error("Placeholder '{key}' has no value and was left unchanged")]
    UndefinedPlaceholder { key: String },

    /// The rendered output was saved but the temporary copy could not be
    /// deleted.
    #[error("Failed to delete temporary file '{name}' ({id}): {detail}. Manual cleanup may be required.")]
    CleanupFailed {
        id: String,
        name: String,
        detail: String,
    },
}
