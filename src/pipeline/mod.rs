//! Local template-filling stages.
//!
//! Each submodule implements exactly one transformation step. All three are
//! pure, synchronous functions over an in-memory [`crate::document::Document`]:
//! nothing here touches the network, so any error they surface aborts a
//! request before a remote artifact exists.
//!
//! ## Data Flow
//!
//! ```text
//! Document ──▶ scan ──▶ resolve ──▶ rewrite ──▶ Document
//!             (tokens)  (bindings)  (runs)
//! ```
//!
//! 1. [`scan`]: locate every placeholder, including ones split across runs
//! 2. [`resolve`]: classify each token against the bindings; collect
//!    undefined-key diagnostics
//! 3. [`rewrite`]: splice replacement runs into a copy of the document

pub mod resolve;
pub mod rewrite;
pub mod scan;
