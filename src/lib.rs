//! # recoverlette
//!
//! Fill `{{PLACEHOLDER}}` tokens in a Word template stored on OneDrive and
//! render the result to PDF (or HTML, JPG, GLB) through Microsoft Graph.
//!
//! ## Why this crate?
//!
//! A cover letter template usually lives next to the rest of a job search in
//! OneDrive. Producing a PDF means opening the template, replacing a dozen
//! fields by hand and exporting. This crate does the replacement locally on
//! the `.docx` package, keeping the run formatting of every placeholder even
//! when Word has split it across runs, then lets OneDrive do the conversion
//! so the output looks exactly like Word would print it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! template.docx (OneDrive)
//!  │
//!  ├─ 1. Fetch    locate + download the template
//!  ├─ 2. Scan     find {{KEY}} tokens across run boundaries
//!  ├─ 3. Resolve  defined / optional-undefined / required-undefined
//!  ├─ 4. Rewrite  splice values into runs, keep formatting
//!  ├─ 5. Convert  upload temp copy → ?format=pdf → download
//!  └─ 6. Cleanup  delete the temp copy (kept on failure for inspection)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recoverlette::{connect, render_remote, AppSettings, Bindings, RenderConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = AppSettings::load(None)?;
//!     let config = RenderConfig::default();
//!     let (drive, _account) = connect(&settings, &config).await?;
//!
//!     let bindings = Bindings::from_defines(["COMPANY=Acme", "TITLE=Engineer"])?;
//!     let report = render_remote(
//!         &drive,
//!         "Documents/CoverLetterTemplate.docx",
//!         &bindings,
//!         "Acme.pdf",
//!         &config,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!     for w in &report.warnings {
//!         eprintln!("warning: {w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `recoverlette` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! recoverlette = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod render;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{AuthError, TokenProvider};
pub use config::{
    AppSettings, AuthFlow, Delimiters, FormattingPolicy, OutputFormat, RenderConfig,
    RenderConfigBuilder, UndefinedGate,
};
pub use error::{RecoverletteError, Warning};
pub use orchestrator::{Orchestrator, Stage, State};
pub use output::{CleanupOutcome, FilledTemplate, RenderReport, RenderStats};
pub use pipeline::resolve::{Bindings, Diagnostics, Resolution};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use remote::graph::GraphDrive;
pub use remote::memory::MemoryDrive;
pub use remote::{DriveError, RemoteDrive, TempArtifact};
pub use render::{connect, fill_template, render_remote, render_remote_sync, scan_template};
