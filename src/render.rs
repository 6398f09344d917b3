//! Top-level entry points.
//!
//! [`fill_template`] is the local half: open the package, scan, resolve,
//! rewrite, serialise. It never touches the network, so a broken template or
//! a refused undefined-placeholder gate fails before anything exists
//! remotely. [`render_remote`] adds the drive: fetch the template, fill it,
//! and hand the result to the [`Orchestrator`].

use bytes::Bytes;
use crate::auth::{provider_from_settings, AuthError};
use crate::config::{AppSettings, RenderConfig, UndefinedGate};
use crate::document::docx::DocxPackage;
use crate::error::RecoverletteError;
use crate::orchestrator::{ConversionJob, Orchestrator, OrchestratorSettings, Stage};
use crate::output::{write_atomic, FilledTemplate, RenderReport, RenderStats};
use crate::pipeline::resolve::{resolve, Bindings, Diagnostics, ResolvedToken};
use crate::pipeline::rewrite::rewrite;
use crate::pipeline::scan::scan;
use crate::remote::graph::GraphDrive;
use crate::remote::{DriveError, RemoteDrive, RemoteItem};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fill `template` (a `.docx` package) with `bindings`.
///
/// # Errors
/// - [`RecoverletteError::InvalidTemplate`] if the bytes are not a Word package
/// - [`RecoverletteError::UndefinedPlaceholders`] if required keys are unbound
///   and `config.undefined_gate` refuses to continue
pub fn fill_template(
    template: &[u8],
    bindings: &Bindings,
    config: &RenderConfig,
) -> Result<FilledTemplate, RecoverletteError> {
    let package = DocxPackage::open(template.to_vec())?;
    let (tokens, diagnostics) = resolve(
        scan(package.document(), &config.delimiters),
        bindings,
        config.ignorable_prefix.as_deref(),
    );
    debug!(
        "Found {} placeholder(s) in {} paragraph(s)",
        tokens.len(),
        package.document().paragraphs.len()
    );

    check_gate(&diagnostics, &config.undefined_gate)?;
    for key in &diagnostics.required_undefined {
        warn!(
            "Placeholder {} has no value and will appear verbatim in the output",
            config.delimiters.wrap(key)
        );
    }

    let (document, stats) = rewrite(package.document(), &tokens, &config.formatting);
    let bytes = package.write(&document)?;

    Ok(FilledTemplate {
        bytes,
        warnings: diagnostics.warnings(),
        tokens,
        diagnostics,
        rewrite: stats,
    })
}

/// List every placeholder in `template` with its classification under
/// `bindings`, without rewriting anything.
pub fn scan_template(
    template: &[u8],
    bindings: &Bindings,
    config: &RenderConfig,
) -> Result<(Vec<ResolvedToken>, Diagnostics), RecoverletteError> {
    let package = DocxPackage::open(template.to_vec())?;
    Ok(resolve(
        scan(package.document(), &config.delimiters),
        bindings,
        config.ignorable_prefix.as_deref(),
    ))
}

fn check_gate(diagnostics: &Diagnostics, gate: &UndefinedGate) -> Result<(), RecoverletteError> {
    if !diagnostics.has_required_undefined() {
        return Ok(());
    }
    let keys = &diagnostics.required_undefined;
    let proceed = match gate {
        UndefinedGate::Warn => true,
        UndefinedGate::Deny => false,
        UndefinedGate::Confirm(confirm) => confirm(keys),
    };
    if proceed {
        Ok(())
    } else {
        Err(RecoverletteError::UndefinedPlaceholders { keys: keys.clone() })
    }
}

fn template_error(path: &str, e: DriveError) -> RecoverletteError {
    match e {
        DriveError::NotFound(_) => RecoverletteError::TemplateNotFound {
            path: path.to_string(),
        },
        DriveError::Auth(e) => RecoverletteError::AuthFailure(e),
        other => RecoverletteError::TemplateDownloadFailed {
            path: path.to_string(),
            source: other,
        },
    }
}

/// Locate and download the template unless `cancel` fires first.
async fn fetch_template(
    drive: &dyn RemoteDrive,
    path: &str,
    cancel: &CancellationToken,
) -> Result<(RemoteItem, Bytes), RecoverletteError> {
    let fetch = async {
        let item = drive.locate(path).await?;
        let bytes = drive.download(&item).await?;
        Ok::<_, DriveError>((item, bytes))
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RecoverletteError::Cancelled {
            stage: Stage::Idle,
            leftover: None,
        }),
        result = fetch => result.map_err(|e| template_error(path, e)),
    }
}

/// Fetch the template at `template_path`, fill it, render it remotely, and
/// save the result to `destination`.
///
/// `cancel` may be triggered at any time; after the upload the temporary
/// copy is left on the drive, as on any failure.
///
/// # Errors
/// Everything [`fill_template`] returns, plus
/// [`RecoverletteError::TemplateNotFound`], remote stage failures
/// ([`RecoverletteError::RemoteIo`], [`RecoverletteError::Cancelled`]),
/// [`RecoverletteError::EmptyOrInvalidArtifact`] and
/// [`RecoverletteError::OutputWriteFailed`].
pub async fn render_remote(
    drive: &dyn RemoteDrive,
    template_path: &str,
    bindings: &Bindings,
    destination: impl AsRef<Path>,
    config: &RenderConfig,
    cancel: CancellationToken,
) -> Result<RenderReport, RecoverletteError> {
    let total_start = Instant::now();
    let destination = destination.as_ref();
    info!("Rendering '{}' → {}", template_path, destination.display());

    // ── Step 1: Fetch template ───────────────────────────────────────────
    let (item, template) = fetch_template(drive, template_path, &cancel).await?;
    if template.is_empty() {
        return Err(RecoverletteError::InvalidTemplate {
            detail: format!("'{template_path}' is empty"),
        });
    }
    info!("Downloaded template '{}' ({} bytes)", item.name, template.len());

    // ── Step 2: Fill locally ─────────────────────────────────────────────
    let fill_start = Instant::now();
    let filled = fill_template(&template, bindings, config)?;
    let fill_duration_ms = fill_start.elapsed().as_millis() as u64;
    if let Some(cb) = &config.progress_callback {
        cb.on_template_filled(
            filled.rewrite.replaced + filled.rewrite.deleted,
            filled.rewrite.left_verbatim,
        );
        for warning in &filled.warnings {
            cb.on_warning(warning);
        }
    }

    if let Some(path) = &config.save_filled_docx {
        write_atomic(path, &filled.bytes).await?;
        info!("Saved filled template to {}", path.display());
    }

    // ── Step 3: Convert remotely ─────────────────────────────────────────
    let settings = OrchestratorSettings {
        format: config.output_format,
        min_output_bytes: config.min_output_bytes,
        settle_delay: Duration::from_millis(config.settle_delay_ms),
        progress: config.progress_callback.clone(),
    };
    let job = ConversionJob {
        folder: item.parent.clone(),
        template_name: item.name.clone(),
        content: filled.bytes.clone(),
        destination: destination.to_path_buf(),
    };
    let remote_start = Instant::now();
    let outcome = Orchestrator::new(drive, settings, cancel).run(job).await?;
    let remote_duration_ms = remote_start.elapsed().as_millis() as u64;

    if let Some(cb) = &config.progress_callback {
        cb.on_render_complete(outcome.output_bytes);
    }

    let stats = RenderStats {
        template_bytes: template.len(),
        filled_bytes: filled.bytes.len(),
        output_bytes: outcome.output_bytes,
        tokens_found: filled.tokens.len(),
        tokens_replaced: filled.rewrite.replaced,
        tokens_deleted: filled.rewrite.deleted,
        tokens_unresolved: filled.rewrite.left_verbatim,
        fill_duration_ms,
        remote_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Rendered {} bytes in {}ms ({} replaced, {} unresolved)",
        stats.output_bytes, stats.total_duration_ms, stats.tokens_replaced, stats.tokens_unresolved
    );

    let mut warnings = filled.warnings;
    warnings.extend(outcome.warnings);
    Ok(RenderReport {
        output_path: destination.to_path_buf(),
        artifact: outcome.artifact,
        cleanup: outcome.cleanup,
        diagnostics: filled.diagnostics,
        warnings,
        stats,
    })
}

/// Synchronous wrapper around [`render_remote`].
///
/// Creates a new Tokio runtime internally. Do not call from within an
/// existing async context.
pub fn render_remote_sync(
    drive: &dyn RemoteDrive,
    template_path: &str,
    bindings: &Bindings,
    destination: impl AsRef<Path>,
    config: &RenderConfig,
) -> Result<RenderReport, RecoverletteError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RecoverletteError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(render_remote(
            drive,
            template_path,
            bindings,
            destination,
            config,
            CancellationToken::new(),
        ))
}

/// Sign in and open the user's OneDrive.
///
/// The token is acquired here, before any drive call, so a credential
/// problem surfaces as [`RecoverletteError::AuthFailure`] with nothing done
/// remotely. Missing sign-in settings and an unusable Graph URL are reported
/// the same way. Returns the drive and the account's display name.
pub async fn connect(
    settings: &AppSettings,
    config: &RenderConfig,
) -> Result<(GraphDrive, Option<String>), RecoverletteError> {
    let tokens = provider_from_settings(settings).map_err(|e| match e {
        RecoverletteError::InvalidConfig(msg) => AuthError::NotConfigured(msg).into(),
        other => other,
    })?;
    tokens.acquire_token().await?;

    let drive = GraphDrive::new(&settings.graph_url, tokens, config.request_timeout_secs)
        .map_err(|e| AuthError::NotConfigured(e.to_string()))?;
    let account = drive.account_name().await.map_err(|e| match e {
        DriveError::Auth(e) => RecoverletteError::AuthFailure(e),
        DriveError::Unauthorized { status, message } => {
            RecoverletteError::AuthFailure(AuthError::Denied {
                code: format!("HTTP {status}"),
                description: message,
            })
        }
        other => RecoverletteError::AuthFailure(AuthError::Transport(other.to_string())),
    })?;
    match &account {
        Some(name) => info!("Signed in as {}", name),
        None => info!("Signed in"),
    }
    Ok((drive, account))
}
