//! Progress-callback trait for remote render events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through upload, conversion, download and
//! cleanup.
//!
//! # Example
//!
//! ```rust
//! use recoverlette::{RenderProgressCallback, RenderConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, stage: Stage) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{stage} done ({n} stages so far)");
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { done: AtomicUsize::new(0) });
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(counter as Arc<dyn RenderProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Warning;
use crate::orchestrator::Stage;
use std::sync::Arc;

/// Called by the render pipeline at every stage transition.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for one request are delivered in order from
/// a single task.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once after the template has been filled locally.
    ///
    /// # Arguments
    /// * `replaced`: tokens substituted
    /// * `unresolved`: required tokens left verbatim
    fn on_template_filled(&self, replaced: usize, unresolved: usize) {
        let _ = (replaced, unresolved);
    }

    /// Called when the orchestrator enters `stage`.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when `stage` finishes without error.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when `stage` fails; `error` is human-readable.
    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called for each non-fatal condition, as it happens.
    fn on_warning(&self, warning: &Warning) {
        let _ = warning;
    }

    /// Called once after the output file was written.
    ///
    /// # Arguments
    /// * `output_bytes`: size of the written artifact
    fn on_render_complete(&self, output_bytes: usize) {
        let _ = output_bytes;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;
