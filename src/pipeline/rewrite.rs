//! Run rewriter: applies resolved tokens to a document.
//!
//! A token whose span covers runs `a..=b` is replaced by splicing, in place
//! of those runs:
//!
//! ```text
//! [text of a before the token]  style of a
//! [replacement value]           FormattingPolicy::style_for(style of a)
//! [embedded objects in a..=b]   unchanged
//! [text of b after the token]   style of b
//! ```
//!
//! Empty pieces are dropped and neighbouring pieces with identical style are
//! merged, so a token split as `{{CO` + `MPANY}}` becomes a single run.
//! Runs outside `a..=b` are never touched. Tokens are applied last-to-first
//! within a paragraph so earlier spans stay valid: the leading piece of run
//! `a` keeps its original offsets.

use crate::config::FormattingPolicy;
use crate::document::{Document, Run};
use crate::pipeline::resolve::ResolvedToken;
use crate::pipeline::scan::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Counters for one rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStats {
    /// Tokens replaced by a bound value.
    pub replaced: usize,
    /// Ignorable tokens removed.
    pub deleted: usize,
    /// Required tokens left verbatim.
    pub left_verbatim: usize,
    /// Paragraphs whose runs changed.
    pub paragraphs_changed: usize,
}

/// Produce a new document with every resolvable token substituted.
pub fn rewrite(
    document: &Document,
    resolved: &[ResolvedToken],
    policy: &FormattingPolicy,
) -> (Document, RewriteStats) {
    let mut stats = RewriteStats::default();
    let mut by_paragraph: BTreeMap<usize, Vec<(&Token, &str)>> = BTreeMap::new();

    for item in resolved {
        match item.resolution.replacement() {
            Some(value) => {
                if value.is_empty() {
                    stats.deleted += 1;
                } else {
                    stats.replaced += 1;
                }
                by_paragraph
                    .entry(item.token.paragraph)
                    .or_default()
                    .push((&item.token, value));
            }
            None => stats.left_verbatim += 1,
        }
    }

    let mut out = document.clone();
    for (index, mut edits) in by_paragraph {
        let Some(paragraph) = out.paragraphs.get_mut(index) else {
            continue;
        };
        edits.sort_by(|(x, _), (y, _)| y.start.cmp(&x.start));
        for (token, value) in edits {
            splice_token(&mut paragraph.runs, token, value, policy);
        }
        stats.paragraphs_changed += 1;
    }

    debug!(
        "Rewrite: {} replaced, {} deleted, {} left verbatim, {} paragraph(s) changed",
        stats.replaced, stats.deleted, stats.left_verbatim, stats.paragraphs_changed
    );
    (out, stats)
}

fn splice_token(runs: &mut Vec<Run>, token: &Token, value: &str, policy: &FormattingPolicy) {
    let (Some(first), Some(last)) = (token.span.first(), token.span.last()) else {
        return;
    };
    let (a, b) = (first.run, last.run);
    if b >= runs.len() || a > b {
        return;
    }

    let head = &runs[a];
    let tail = &runs[b];
    let mut pieces = Vec::with_capacity(3 + b - a);
    pieces.push(Run::new(&head.text[..first.offset], head.style.clone()));
    pieces.push(Run::new(value, policy.style_for(&head.style)));
    pieces.extend(runs[a..=b].iter().filter(|r| r.is_embedded()).cloned());
    pieces.push(Run::new(&tail.text[last.offset + last.len..], tail.style.clone()));

    let merged = coalesce(pieces);
    runs.splice(a..=b, merged);
}

/// Drop empty text pieces and merge adjacent text pieces sharing a style.
fn coalesce(pieces: Vec<Run>) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if !piece.is_embedded() && piece.text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(prev)
                if !prev.is_embedded() && !piece.is_embedded() && prev.style == piece.style =>
            {
                prev.text.push_str(&piece.text);
            }
            _ => out.push(piece),
        }
    }
    out
}
