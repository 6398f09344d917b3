//! In-memory rich-text model the placeholder pipeline operates on.
//!
//! A [`Document`] is an ordered list of [`Paragraph`]s; each paragraph is an
//! ordered list of [`Run`]s, and each run pairs a text string with a
//! [`RunStyle`]. Concatenating the run texts of a paragraph, in order, yields
//! the paragraph's visible text. The scanner relies on this to address a
//! placeholder that Word has fragmented across several runs.
//!
//! Inline objects that carry no text (drawings, page breaks, symbols,
//! bookmarks, proofing marks) are kept as *embedded* runs: zero-length text
//! plus the verbatim markup, so they survive a rewrite of the paragraph
//! around them. Wrappers such as hyperlinks or tracked insertions contribute
//! their start and end tags as two embedded runs, with their own runs read
//! in between.
//!
//! The model is format-agnostic; [`docx`] maps it to and from a Word package.

pub mod docx;

use serde::{Deserialize, Serialize};

/// A parsed template: every paragraph of every text-bearing part, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub paragraphs: Vec<Paragraph>,
}

impl Document {
    pub fn new(paragraphs: Vec<Paragraph>) -> Self {
        Self { paragraphs }
    }

    /// Visible text of every paragraph, one line per paragraph.
    pub fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One paragraph: an ordered sequence of runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub runs: Vec<Run>,
}

impl Paragraph {
    pub fn new(runs: Vec<Run>) -> Self {
        Self { runs }
    }

    /// Concatenation of all run texts.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A contiguous span of text sharing one style.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
    /// Verbatim markup for inline objects with no text of their own.
    /// Always paired with an empty `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<String>,
}

impl Run {
    pub fn new(text: impl Into<String>, style: RunStyle) -> Self {
        Self {
            text: text.into(),
            style,
            embedded: None,
        }
    }

    /// A run with default styling.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, RunStyle::default())
    }

    /// A zero-text run wrapping markup the codec does not interpret.
    pub fn embedded(markup: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            style: RunStyle::default(),
            embedded: Some(markup.into()),
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded.is_some()
    }
}

/// Character formatting of a run.
///
/// `source` keeps the original property markup so a run whose style was not
/// replaced is written back exactly as it was read. Styles built in code
/// (`source == None`) are synthesised from the typed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStyle {
    /// Font family name.
    pub font: Option<String>,
    /// Size in half-points (Word's native unit: 24 = 12pt).
    pub size: Option<u32>,
    /// Hex `RRGGBB` colour, or `auto`.
    pub color: Option<String>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    #[serde(skip)]
    pub source: Option<String>,
}

impl RunStyle {
    /// Same typed fields, detached from any source markup.
    pub fn detached(&self) -> Self {
        Self {
            source: None,
            ..self.clone()
        }
    }

    /// True when no property is set, i.e. the run inherits everything from
    /// its paragraph style.
    pub fn is_plain(&self) -> bool {
        self.source.is_none()
            && self.font.is_none()
            && self.size.is_none()
            && self.color.is_none()
            && !self.bold
            && !self.italic
            && !self.underline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_text_concatenates_runs() {
        let p = Paragraph::new(vec![
            Run::plain("Dear {{CO"),
            Run::embedded("<w:proofErr w:type=\"spellStart\"/>"),
            Run::plain("MPANY}},"),
        ]);
        assert_eq!(p.text(), "Dear {{COMPANY}},");
    }

    #[test]
    fn document_text_joins_paragraphs() {
        let doc = Document::new(vec![
            Paragraph::new(vec![Run::plain("one")]),
            Paragraph::default(),
            Paragraph::new(vec![Run::plain("three")]),
        ]);
        assert_eq!(doc.text(), "one\n\nthree");
    }

    #[test]
    fn detached_style_drops_source_only() {
        let style = RunStyle {
            bold: true,
            color: Some("FF0000".into()),
            source: Some("<w:rPr><w:b/></w:rPr>".into()),
            ..RunStyle::default()
        };
        let d = style.detached();
        assert!(d.source.is_none());
        assert!(d.bold);
        assert_eq!(d.color.as_deref(), Some("FF0000"));
        assert!(!d.is_plain());
        assert!(RunStyle::default().is_plain());
    }
}
