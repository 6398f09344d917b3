//! Remote conversion state machine.
//!
//! ```text
//! Idle ─▶ Uploading ─▶ Converting ─▶ Downloading ─▶ Cleaning ─▶ Done
//!   └──────────┴────────────┴─────────────┴──▶ Failed(stage)
//! ```
//!
//! * **Uploading** creates the temporary copy beside the template under a
//!   unique name.
//! * **Converting** waits for the upload to settle, then asks the drive to
//!   render the copy.
//! * **Downloading** drains the rendered stream, rejects implausible output,
//!   and writes the local file atomically.
//! * **Cleaning** deletes the temporary copy. A failure here is a
//!   [`Warning`]: the output is already saved.
//!
//! Any failure (or cancellation) before Cleaning leaves the temporary copy
//! on the drive for inspection and names it in the returned error.

use crate::config::OutputFormat;
use crate::error::{RecoverletteError, Warning};
use crate::output::{write_atomic, CleanupOutcome};
use crate::progress::ProgressCallback;
use crate::remote::{ByteStream, DriveError, FolderRef, RemoteDrive, TempArtifact};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A non-terminal orchestrator state; the argument of `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Uploading,
    Converting,
    Downloading,
    Cleaning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "idle",
            Stage::Uploading => "uploading",
            Stage::Converting => "converting",
            Stage::Downloading => "downloading",
            Stage::Cleaning => "cleaning",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Uploading,
    Converting,
    Downloading,
    Cleaning,
    Done,
    Failed(Stage),
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed(_))
    }

    fn stage(self) -> Option<Stage> {
        match self {
            State::Idle => Some(Stage::Idle),
            State::Uploading => Some(Stage::Uploading),
            State::Converting => Some(Stage::Converting),
            State::Downloading => Some(Stage::Downloading),
            State::Cleaning => Some(Stage::Cleaning),
            State::Done | State::Failed(_) => None,
        }
    }
}

impl From<Stage> for State {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Idle => State::Idle,
            Stage::Uploading => State::Uploading,
            Stage::Converting => State::Converting,
            Stage::Downloading => State::Downloading,
            Stage::Cleaning => State::Cleaning,
        }
    }
}

/// Knobs the orchestrator needs from [`crate::config::RenderConfig`].
#[derive(Clone, Default)]
pub struct OrchestratorSettings {
    pub format: OutputFormat,
    pub min_output_bytes: usize,
    pub settle_delay: Duration,
    pub progress: Option<ProgressCallback>,
}

/// One conversion request.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Folder of the source template; the temporary copy goes here.
    pub folder: FolderRef,
    /// Source template name, the base of the temporary name.
    pub template_name: String,
    /// Filled `.docx` bytes.
    pub content: Vec<u8>,
    /// Local path for the rendered output.
    pub destination: PathBuf,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub artifact: TempArtifact,
    pub output_bytes: usize,
    pub cleanup: CleanupOutcome,
    pub warnings: Vec<Warning>,
    pub duration: Duration,
}

/// `Letter.docx` → `Letter_temp_<32 hex>.docx`.
pub fn temp_artifact_name(template_name: &str) -> String {
    let unique = uuid::Uuid::new_v4().simple();
    match template_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_temp_{unique}.{ext}"),
        _ => format!("{template_name}_temp_{unique}"),
    }
}

/// Check that downloaded bytes look like a real artifact.
pub fn validate_artifact(bytes: &[u8], format: OutputFormat, minimum: usize) -> Result<(), String> {
    if bytes.len() < minimum {
        return Err(format!(
            "smaller than the {minimum}-byte minimum; the service likely returned an error page"
        ));
    }
    if let Some(magic) = format.magic() {
        if !bytes.starts_with(magic) {
            return Err(format!("does not start with the {format} file signature"));
        }
    }
    Ok(())
}

/// Drives one request through the state machine. Single use.
pub struct Orchestrator<'a> {
    drive: &'a dyn RemoteDrive,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
    state: State,
    history: Vec<State>,
    artifact: Option<TempArtifact>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        drive: &'a dyn RemoteDrive,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            drive,
            settings,
            cancel,
            state: State::Idle,
            history: vec![State::Idle],
            artifact: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[State] {
        &self.history
    }

    /// The temporary copy, once uploaded.
    pub fn artifact(&self) -> Option<&TempArtifact> {
        self.artifact.as_ref()
    }

    pub async fn run(&mut self, job: ConversionJob) -> Result<ConversionOutcome, RecoverletteError> {
        if self.state != State::Idle {
            return Err(RecoverletteError::Internal(format!(
                "orchestrator already ran (state {:?})",
                self.state
            )));
        }
        let started = Instant::now();
        let drive = self.drive;
        let format = self.settings.format;

        if self.cancel.is_cancelled() {
            return Err(self.fail(Stage::Idle, None));
        }

        // ── Uploading ────────────────────────────────────────────────────
        self.enter(Stage::Uploading);
        let name = temp_artifact_name(&job.template_name);
        info!("Uploading filled template as '{}' ({} bytes)", name, job.content.len());
        let id = self
            .guarded(Stage::Uploading, drive.upload(&job.folder, &name, job.content))
            .await?;
        self.artifact = Some(TempArtifact {
            id: id.clone(),
            name: name.clone(),
        });
        self.complete(Stage::Uploading);

        // ── Converting ───────────────────────────────────────────────────
        self.enter(Stage::Converting);
        if !self.settings.settle_delay.is_zero() {
            info!(
                "Waiting {:.1}s for the upload to settle",
                self.settings.settle_delay.as_secs_f64()
            );
            let delay = self.settings.settle_delay;
            self.guarded(Stage::Converting, async move {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
        }
        info!("Requesting {} conversion", format);
        let stream = self
            .guarded(Stage::Converting, drive.convert(&id, format))
            .await?;
        self.complete(Stage::Converting);

        // ── Downloading ──────────────────────────────────────────────────
        self.enter(Stage::Downloading);
        let bytes = self.guarded(Stage::Downloading, drain(stream)).await?;
        info!("Downloaded {} bytes of {}", bytes.len(), format);
        if let Err(reason) = validate_artifact(&bytes, format, self.settings.min_output_bytes) {
            let size = bytes.len();
            let leftover = self.artifact.clone();
            self.mark_failed(Stage::Downloading, &reason);
            return Err(RecoverletteError::EmptyOrInvalidArtifact {
                format,
                size,
                reason,
                leftover,
            });
        }
        if let Err(e) = write_atomic(&job.destination, &bytes).await {
            self.mark_failed(Stage::Downloading, &e.to_string());
            return Err(e);
        }
        info!("Saved {}", job.destination.display());
        self.complete(Stage::Downloading);

        // ── Cleaning ─────────────────────────────────────────────────────
        self.enter(Stage::Cleaning);
        let mut warnings = Vec::new();
        let cleanup = match drive.delete(&id).await {
            Ok(()) => {
                info!("Deleted temporary file '{}'", name);
                CleanupOutcome::Deleted
            }
            Err(e) => {
                let warning = Warning::CleanupFailed {
                    id: id.item_id.clone(),
                    name: name.clone(),
                    detail: e.to_string(),
                };
                warn!("{}", warning);
                if let Some(cb) = &self.settings.progress {
                    cb.on_warning(&warning);
                }
                warnings.push(warning);
                CleanupOutcome::Failed {
                    detail: e.to_string(),
                }
            }
        };
        self.complete(Stage::Cleaning);
        self.transition(State::Done);

        Ok(ConversionOutcome {
            artifact: TempArtifact { id, name },
            output_bytes: bytes.len(),
            cleanup,
            warnings,
            duration: started.elapsed(),
        })
    }

    /// Await `fut` unless cancelled first; map either outcome to a stage
    /// failure.
    async fn guarded<T, F>(&mut self, stage: Stage, fut: F) -> Result<T, RecoverletteError>
    where
        F: Future<Output = Result<T, DriveError>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = fut => Some(result),
        };
        match outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(self.fail(stage, Some(e))),
            None => Err(self.fail(stage, None)),
        }
    }

    /// Enter `Failed(stage)` and build the error; `None` means cancelled.
    fn fail(&mut self, stage: Stage, cause: Option<DriveError>) -> RecoverletteError {
        let leftover = self.artifact.clone();
        match cause {
            Some(source) => {
                self.mark_failed(stage, &source.to_string());
                RecoverletteError::RemoteIo {
                    stage,
                    source,
                    leftover,
                }
            }
            None => {
                self.mark_failed(stage, "cancelled");
                RecoverletteError::Cancelled { stage, leftover }
            }
        }
    }

    fn mark_failed(&mut self, stage: Stage, detail: &str) {
        error!("{} failed: {}", stage, detail);
        if let Some(artifact) = &self.artifact {
            warn!(
                "Skipping deletion: temporary file {} left on the drive for inspection",
                artifact
            );
        }
        if let Some(cb) = &self.settings.progress {
            cb.on_stage_failed(stage, detail);
        }
        self.transition(State::Failed(stage));
    }

    fn enter(&mut self, stage: Stage) {
        if let Some(cb) = &self.settings.progress {
            cb.on_stage_start(stage);
        }
        self.transition(stage.into());
    }

    fn complete(&mut self, stage: Stage) {
        if let Some(cb) = &self.settings.progress {
            cb.on_stage_complete(stage);
        }
    }

    fn transition(&mut self, next: State) {
        debug_assert!(!self.state.is_terminal(), "transition out of {:?}", self.state);
        if let (Some(from), State::Failed(stage)) = (self.state.stage(), next) {
            debug_assert_eq!(from, stage);
        }
        self.state = next;
        self.history.push(next);
    }
}

async fn drain(mut stream: ByteStream) -> Result<Vec<u8>, DriveError> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{DriveOperation, MemoryDrive};
    use crate::remote::RemoteDrive;

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            format: OutputFormat::Pdf,
            min_output_bytes: 16,
            settle_delay: Duration::ZERO,
            progress: None,
        }
    }

    async fn job(drive: &MemoryDrive, dest: PathBuf) -> ConversionJob {
        drive.insert("Docs/Letter.docx", b"template".to_vec());
        let item = drive.locate("Docs/Letter.docx").await.unwrap();
        ConversionJob {
            folder: item.parent,
            template_name: item.name,
            content: b"filled template body".to_vec(),
            destination: dest,
        }
    }

    #[test]
    fn temp_names_keep_extension_and_are_unique() {
        let a = temp_artifact_name("Cover Letter.docx");
        let b = temp_artifact_name("Cover Letter.docx");
        assert!(a.starts_with("Cover Letter_temp_"));
        assert!(a.ends_with(".docx"));
        assert_eq!(a.len(), "Cover Letter_temp_.docx".len() + 32);
        assert_ne!(a, b);
        assert!(temp_artifact_name("README").starts_with("README_temp_"));
    }

    #[test]
    fn artifact_validation() {
        let pdf = [b"%PDF-1.7".as_slice(), &[b' '; 100]].concat();
        assert!(validate_artifact(&pdf, OutputFormat::Pdf, 50).is_ok());
        assert!(validate_artifact(&pdf, OutputFormat::Pdf, 1000).is_err());
        let html = vec![b'<'; 200];
        assert!(validate_artifact(&html, OutputFormat::Pdf, 50).is_err());
        assert!(validate_artifact(&html, OutputFormat::Html, 50).is_ok());
    }

    #[tokio::test]
    async fn happy_path_reaches_done_and_deletes_copy() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;

        let mut orch = Orchestrator::new(&drive, settings(), CancellationToken::new());
        let outcome = orch.run(job).await.unwrap();

        assert_eq!(orch.state(), State::Done);
        assert_eq!(
            orch.history(),
            &[
                State::Idle,
                State::Uploading,
                State::Converting,
                State::Downloading,
                State::Cleaning,
                State::Done
            ]
        );
        assert_eq!(outcome.cleanup, CleanupOutcome::Deleted);
        assert!(!drive.exists(&outcome.artifact.id));
        assert!(std::fs::read(dir.path().join("out.pdf")).unwrap().starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn download_failure_leaves_copy() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        drive.fail_on(DriveOperation::Stream);

        let mut orch = Orchestrator::new(&drive, settings(), CancellationToken::new());
        let err = orch.run(job).await.unwrap_err();

        assert_eq!(orch.state(), State::Failed(Stage::Downloading));
        let leftover = err.leftover().cloned().unwrap();
        assert!(drive.exists(&leftover.id));
        assert!(!drive.calls().contains(&DriveOperation::Delete));
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[tokio::test]
    async fn upload_failure_has_nothing_to_leave() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        drive.fail_on(DriveOperation::Upload);

        let mut orch = Orchestrator::new(&drive, settings(), CancellationToken::new());
        let err = orch.run(job).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Uploading));
        assert!(err.leftover().is_none());
        assert_eq!(drive.file_names(), vec!["Letter.docx"]);
    }

    #[tokio::test]
    async fn small_output_is_rejected_and_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        let s = OrchestratorSettings {
            min_output_bytes: 1_000_000,
            ..settings()
        };

        let mut orch = Orchestrator::new(&drive, s, CancellationToken::new());
        let err = orch.run(job).await.unwrap_err();
        assert!(matches!(err, RecoverletteError::EmptyOrInvalidArtifact { .. }));
        assert!(!dir.path().join("out.pdf").exists());
        assert!(drive.exists(&err.leftover().unwrap().id));
    }

    #[tokio::test]
    async fn cleanup_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        drive.fail_on(DriveOperation::Delete);

        let mut orch = Orchestrator::new(&drive, settings(), CancellationToken::new());
        let outcome = orch.run(job).await.unwrap();
        assert_eq!(orch.state(), State::Done);
        assert!(matches!(outcome.cleanup, CleanupOutcome::Failed { .. }));
        assert!(matches!(outcome.warnings[..], [Warning::CleanupFailed { .. }]));
        assert!(dir.path().join("out.pdf").exists());
    }

    #[tokio::test]
    async fn cancellation_during_settle_keeps_copy() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        let cancel = CancellationToken::new();
        let s = OrchestratorSettings {
            settle_delay: Duration::from_secs(3600),
            ..settings()
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut orch = Orchestrator::new(&drive, s, cancel);
        let err = orch.run(job).await.unwrap_err();
        assert!(matches!(
            err,
            RecoverletteError::Cancelled {
                stage: Stage::Converting,
                ..
            }
        ));
        assert!(drive.exists(&err.leftover().unwrap().id));
    }

    #[tokio::test]
    async fn cancelled_before_start_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let job = job(&drive, dir.path().join("out.pdf")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut orch = Orchestrator::new(&drive, settings(), cancel);
        let err = orch.run(job).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Idle));
        assert_eq!(orch.state(), State::Failed(Stage::Idle));
        assert!(!drive.calls().contains(&DriveOperation::Upload));
    }

    #[tokio::test]
    async fn runs_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let drive = MemoryDrive::new();
        let first = job(&drive, dir.path().join("a.pdf")).await;
        let second = ConversionJob {
            destination: dir.path().join("b.pdf"),
            ..first.clone()
        };
        let mut orch = Orchestrator::new(&drive, settings(), CancellationToken::new());
        orch.run(first).await.unwrap();
        assert!(matches!(
            orch.run(second).await,
            Err(RecoverletteError::Internal(_))
        ));
    }
}
