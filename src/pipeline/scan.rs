//! Token scanner.
//!
//! Word splits text into runs wherever formatting, proofing state or edit
//! history changes, so `{{COMPANY}}` regularly arrives as `{{CO` + `MPANY}}`.
//! The scanner never looks at one run at a time: it concatenates the run
//! texts of a paragraph into a single string, keeps the byte offset where
//! each run starts, matches delimiters against the whole string, and maps
//! each match back to the `(run, offset, len)` fragments it covers.
//!
//! Offsets are byte offsets into UTF-8 text. Matches always start and end on
//! delimiter boundaries, so fragments always fall on `char` boundaries.

use crate::config::Delimiters;
use crate::document::{Document, Paragraph};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The part of a token that lives in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Index of the run within its paragraph.
    pub run: usize,
    /// Byte offset inside the run's text.
    pub offset: usize,
    /// Byte length inside the run's text.
    pub len: usize,
}

/// One placeholder occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Index of the paragraph within the document.
    pub paragraph: usize,
    /// Key with surrounding whitespace removed.
    pub key: String,
    /// Literal token text including delimiters.
    pub raw: String,
    /// Byte range of `raw` in the paragraph's concatenated text.
    pub start: usize,
    pub end: usize,
    /// Fragments in run order; their concatenation equals `raw`.
    pub span: Vec<Fragment>,
}

/// A paragraph's concatenated text plus the offset of every run in it.
#[derive(Debug, Clone)]
pub struct ParagraphText {
    text: String,
    starts: Vec<usize>,
    lens: Vec<usize>,
}

impl ParagraphText {
    pub fn new(paragraph: &Paragraph) -> Self {
        let mut text = String::new();
        let mut starts = Vec::with_capacity(paragraph.runs.len());
        let mut lens = Vec::with_capacity(paragraph.runs.len());
        for run in &paragraph.runs {
            starts.push(text.len());
            lens.push(run.text.len());
            text.push_str(&run.text);
        }
        Self { text, starts, lens }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fragments covering the byte range `start..end`. Zero-length runs
    /// (embedded objects) never appear in a span.
    pub fn span(&self, start: usize, end: usize) -> Vec<Fragment> {
        self.starts
            .iter()
            .zip(&self.lens)
            .enumerate()
            .filter_map(|(run, (&run_start, &len))| {
                let lo = start.max(run_start);
                let hi = end.min(run_start + len);
                (lo < hi).then(|| Fragment {
                    run,
                    offset: lo - run_start,
                    len: hi - lo,
                })
            })
            .collect()
    }
}

/// Lazy iterator over every token in a document, in document order.
///
/// Paragraphs are scanned one at a time as the iterator advances. The
/// scanner borrows the document immutably; clone it (or call [`scan`]
/// again) to restart.
#[derive(Debug, Clone)]
pub struct TokenScanner<'a> {
    document: &'a Document,
    pattern: Regex,
    open: String,
    next_paragraph: usize,
    pending: std::vec::IntoIter<Token>,
}

/// Scan `document` for tokens wrapped in `delimiters`.
pub fn scan<'a>(document: &'a Document, delimiters: &Delimiters) -> TokenScanner<'a> {
    TokenScanner {
        document,
        pattern: delimiters.pattern(),
        open: delimiters.open.clone(),
        next_paragraph: 0,
        pending: Vec::new().into_iter(),
    }
}

impl TokenScanner<'_> {
    fn scan_paragraph(&self, index: usize, paragraph: &Paragraph) -> Vec<Token> {
        let text = ParagraphText::new(paragraph);
        let mut tokens = Vec::new();

        for caps in self.pattern.captures_iter(text.text()) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // `{{ a {{KEY}}`: the earlier open marker is unmatched and stays
            // literal; the token starts at the innermost open marker.
            let (start, key) = match inner.as_str().rfind(&self.open) {
                Some(pos) => (
                    inner.start() + pos,
                    &inner.as_str()[pos + self.open.len()..],
                ),
                None => (whole.start(), inner.as_str()),
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let end = whole.end();
            tokens.push(Token {
                paragraph: index,
                key: key.to_string(),
                raw: text.text()[start..end].to_string(),
                start,
                end,
                span: text.span(start, end),
            });
        }
        tokens
    }
}

impl Iterator for TokenScanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.next() {
                return Some(token);
            }
            let index = self.next_paragraph;
            let paragraph = self.document.paragraphs.get(index)?;
            self.next_paragraph += 1;
            self.pending = self.scan_paragraph(index, paragraph).into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Run;

    fn doc(paragraphs: &[&[&str]]) -> Document {
        Document::new(
            paragraphs
                .iter()
                .map(|runs| Paragraph::new(runs.iter().map(|t| Run::plain(*t)).collect()))
                .collect(),
        )
    }

    fn keys(document: &Document) -> Vec<String> {
        scan(document, &Delimiters::default()).map(|t| t.key).collect()
    }

    #[test]
    fn finds_token_in_a_single_run() {
        let d = doc(&[&["Dear {{NAME}},"]]);
        let tokens: Vec<_> = scan(&d, &Delimiters::default()).collect();
        assert_eq!(tokens.len(), 1);
        let t = &tokens[0];
        assert_eq!(t.key, "NAME");
        assert_eq!(t.raw, "{{NAME}}");
        assert_eq!((t.start, t.end), (5, 13));
        assert_eq!(t.span, vec![Fragment { run: 0, offset: 5, len: 8 }]);
    }

    #[test]
    fn token_split_across_two_runs() {
        let d = doc(&[&["{{CO", "MPANY}}"]]);
        let t = scan(&d, &Delimiters::default()).next().unwrap();
        assert_eq!(t.key, "COMPANY");
        assert_eq!(
            t.span,
            vec![
                Fragment { run: 0, offset: 0, len: 4 },
                Fragment { run: 1, offset: 0, len: 7 },
            ]
        );
    }

    #[test]
    fn token_split_across_many_runs_with_embedded_object() {
        let mut p = Paragraph::new(vec![
            Run::plain("x {"),
            Run::plain("{TI"),
            Run::embedded("<w:proofErr w:type=\"spellStart\"/>"),
            Run::plain("T"),
            Run::plain("LE}"),
            Run::plain("} y"),
        ]);
        p.runs[3].style.bold = true;
        let d = Document::new(vec![p]);
        let t = scan(&d, &Delimiters::default()).next().unwrap();
        assert_eq!(t.key, "TITLE");
        let runs: Vec<usize> = t.span.iter().map(|f| f.run).collect();
        assert_eq!(runs, vec![0, 1, 3, 4, 5]);
        assert_eq!(t.span[0], Fragment { run: 0, offset: 2, len: 1 });
        assert_eq!(t.span[4], Fragment { run: 5, offset: 0, len: 1 });
    }

    #[test]
    fn unmatched_open_marker_is_literal() {
        assert_eq!(keys(&doc(&[&["a {{ b {{KEY}} c"]])), vec!["KEY"]);
        assert!(keys(&doc(&[&["{{never closed"]])).is_empty());
        assert!(keys(&doc(&[&["closed only }}"]])).is_empty());
    }

    #[test]
    fn empty_keys_are_literal_and_keys_are_trimmed() {
        assert_eq!(keys(&doc(&[&["{{}} {{  }} {{ DATE }}"]])), vec!["DATE"]);
    }

    #[test]
    fn tokens_come_in_document_order() {
        let d = doc(&[&["{{A}} {{B}}"], &[], &["{{", "C}}"]]);
        let tokens: Vec<_> = scan(&d, &Delimiters::default()).collect();
        let order: Vec<(usize, &str)> =
            tokens.iter().map(|t| (t.paragraph, t.key.as_str())).collect();
        assert_eq!(order, vec![(0, "A"), (0, "B"), (2, "C")]);
    }

    #[test]
    fn scanner_is_restartable() {
        let d = doc(&[&["{{A}}"], &["{{B}}"]]);
        let mut first = scan(&d, &Delimiters::default());
        first.next();
        let again = first.clone();
        assert_eq!(again.count(), 1);
        assert_eq!(scan(&d, &Delimiters::default()).count(), 2);
    }

    #[test]
    fn custom_delimiters_are_matched_literally() {
        let delimiters = Delimiters {
            open: "[[".into(),
            close: "]]".into(),
        };
        let d = doc(&[&["{{IGNORED}} [[US", "ED]] $x"]]);
        let found: Vec<_> = scan(&d, &delimiters).map(|t| t.key).collect();
        assert_eq!(found, vec!["USED"]);
    }

    #[test]
    fn offsets_are_bytes_on_char_boundaries() {
        let d = doc(&[&["Grüße {{NAME}}"]]);
        let t = scan(&d, &Delimiters::default()).next().unwrap();
        assert_eq!(&"Grüße {{NAME}}"[t.start..t.end], "{{NAME}}");
    }
}
