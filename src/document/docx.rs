//! Word (`.docx`) package codec.
//!
//! A `.docx` file is a zip container of XML parts. The text a template author
//! sees lives in `word/document.xml`, with headers and footers in their own
//! `word/header*.xml` / `word/footer*.xml` parts. [`DocxPackage::open`]
//! parses those parts into a [`Document`] and remembers, for every
//! paragraph, the byte range it occupied in its part. Runs nested in
//! hyperlinks, tracked insertions, smart tags, content controls and simple
//! fields are read as part of the paragraph text.
//!
//! [`DocxPackage::write`] is surgical: a paragraph whose runs are unchanged
//! is copied byte for byte, only paragraphs the rewriter touched are
//! regenerated, and zip entries without a changed paragraph are raw-copied
//! (no recompression). Regenerated parts are stored with a fixed timestamp so
//! identical inputs produce identical packages.

use super::{Document, Paragraph, Run, RunStyle};
use crate::error::RecoverletteError;
use roxmltree::Node;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// WordprocessingML main namespace.
pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const MAIN_PART: &str = "word/document.xml";

/// A parsed Word package plus everything needed to write it back.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    source: Vec<u8>,
    parts: Vec<XmlPart>,
    original: Document,
}

#[derive(Debug, Clone)]
struct XmlPart {
    name: String,
    xml: String,
    /// Prefix bound to [`W_NS`] in this part, used for regenerated markup.
    prefix: String,
    slots: Vec<ParagraphSlot>,
}

/// Where a paragraph sits inside its part.
#[derive(Debug, Clone)]
struct ParagraphSlot {
    outer: Range<usize>,
    open_end: usize,
    close_start: usize,
    properties: Option<Range<usize>>,
}

impl DocxPackage {
    /// Parse a `.docx` byte buffer.
    ///
    /// # Errors
    /// [`RecoverletteError::InvalidTemplate`] when the bytes are not a zip
    /// archive, `word/document.xml` is missing, or a part is not well-formed
    /// XML.
    pub fn open(source: Vec<u8>) -> Result<Self, RecoverletteError> {
        let mut archive = ZipArchive::new(Cursor::new(source.as_slice())).map_err(invalid)?;

        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        if !names.iter().any(|n| n == MAIN_PART) {
            return Err(RecoverletteError::InvalidTemplate {
                detail: format!("not a Word document ({MAIN_PART} is missing)"),
            });
        }

        let mut parts = Vec::new();
        let mut paragraphs = Vec::new();
        for name in text_part_names(&names) {
            let mut xml = String::new();
            archive
                .by_name(&name)
                .map_err(invalid)?
                .read_to_string(&mut xml)
                .map_err(|e| RecoverletteError::InvalidTemplate {
                    detail: format!("{name}: {e}"),
                })?;
            let (part, mut found) = parse_part(&name, xml)?;
            debug!("{}: {} paragraphs", name, found.len());
            parts.push(part);
            paragraphs.append(&mut found);
        }

        Ok(Self {
            source,
            parts,
            original: Document::new(paragraphs),
        })
    }

    /// The document model as read from the package.
    pub fn document(&self) -> &Document {
        &self.original
    }

    /// Names of the XML parts that contributed paragraphs, in model order.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    /// Serialise `document` back into a `.docx` byte buffer.
    ///
    /// `document` must have the same paragraph count as [`Self::document`];
    /// the rewriter edits runs, never paragraphs.
    pub fn write(&self, document: &Document) -> Result<Vec<u8>, RecoverletteError> {
        if document.paragraphs.len() != self.original.paragraphs.len() {
            return Err(RecoverletteError::Internal(format!(
                "paragraph count changed from {} to {}",
                self.original.paragraphs.len(),
                document.paragraphs.len()
            )));
        }
        if *document == self.original {
            return Ok(self.source.clone());
        }

        let mut rewritten: HashMap<String, String> = HashMap::new();
        let mut base = 0;
        for part in &self.parts {
            let n = part.slots.len();
            let before = &self.original.paragraphs[base..base + n];
            let after = &document.paragraphs[base..base + n];
            if before != after {
                rewritten.insert(part.name.clone(), part.render(before, after));
            }
            base += n;
        }
        debug!("Regenerated parts: {:?}", rewritten.keys().collect::<Vec<_>>());

        self.repack(&rewritten)
    }

    fn repack(&self, rewritten: &HashMap<String, String>) -> Result<Vec<u8>, RecoverletteError> {
        let mut archive = ZipArchive::new(Cursor::new(self.source.as_slice())).map_err(invalid)?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(self.source.len())));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(invalid)?;
            match rewritten.get(entry.name()) {
                Some(xml) => {
                    let name = entry.name().to_string();
                    drop(entry);
                    writer.start_file(name, options).map_err(invalid)?;
                    writer
                        .write_all(xml.as_bytes())
                        .map_err(|e| RecoverletteError::Internal(format!("zip write: {e}")))?;
                }
                None => writer.raw_copy_file(entry).map_err(invalid)?,
            }
        }

        Ok(writer.finish().map_err(invalid)?.into_inner())
    }
}

impl XmlPart {
    fn render(&self, before: &[Paragraph], after: &[Paragraph]) -> String {
        let mut out = String::with_capacity(self.xml.len() + 256);
        let mut cursor = 0;
        for ((slot, old), new) in self.slots.iter().zip(before).zip(after) {
            out.push_str(&self.xml[cursor..slot.outer.start]);
            if old == new {
                out.push_str(&self.xml[slot.outer.clone()]);
            } else {
                self.write_paragraph(&mut out, slot, new);
            }
            cursor = slot.outer.end;
        }
        out.push_str(&self.xml[cursor..]);
        out
    }

    fn write_paragraph(&self, out: &mut String, slot: &ParagraphSlot, paragraph: &Paragraph) {
        let p = &self.prefix;
        if slot.open_end == slot.outer.end {
            // self-closing <w:p/>
            out.push_str(&format!("<{p}:p>"));
        } else {
            out.push_str(&self.xml[slot.outer.start..slot.open_end]);
        }
        if let Some(props) = &slot.properties {
            out.push_str(&self.xml[props.clone()]);
        }
        for run in &paragraph.runs {
            write_run(out, p, run);
        }
        if slot.open_end == slot.outer.end {
            out.push_str(&format!("</{p}:p>"));
        } else {
            out.push_str(&self.xml[slot.close_start..slot.outer.end]);
        }
    }
}

/// Main part first, then headers and footers in name order.
fn text_part_names(names: &[String]) -> Vec<String> {
    let mut extra: Vec<String> = names
        .iter()
        .filter(|n| {
            (n.starts_with("word/header") || n.starts_with("word/footer")) && n.ends_with(".xml")
        })
        .cloned()
        .collect();
    extra.sort();
    let mut out = vec![MAIN_PART.to_string()];
    out.extend(extra);
    out
}

fn parse_part(name: &str, xml: String) -> Result<(XmlPart, Vec<Paragraph>), RecoverletteError> {
    let (prefix, slots, paragraphs) = {
        let tree = roxmltree::Document::parse(&xml).map_err(|e| {
            RecoverletteError::InvalidTemplate {
                detail: format!("{name}: {e}"),
            }
        })?;
        let prefix = tree
            .root_element()
            .lookup_prefix(W_NS)
            .unwrap_or("w")
            .to_string();

        let mut slots = Vec::new();
        let mut paragraphs = Vec::new();
        for node in tree.descendants().filter(|n| is_w(n, "p")) {
            // Paragraphs inside text boxes travel with their host run.
            if node.ancestors().skip(1).any(|a| is_w(&a, "p")) {
                continue;
            }
            let (slot, paragraph) = read_paragraph(node, &xml);
            slots.push(slot);
            paragraphs.push(paragraph);
        }
        (prefix, slots, paragraphs)
    };

    Ok((
        XmlPart {
            name: name.to_string(),
            xml,
            prefix,
            slots,
        },
        paragraphs,
    ))
}

fn read_paragraph(node: Node<'_, '_>, xml: &str) -> (ParagraphSlot, Paragraph) {
    let outer = node.range();
    let open_end = node.first_child().map_or(outer.end, |c| c.range().start);
    let close_start = node.last_child().map_or(outer.end, |c| c.range().end);

    let mut properties = None;
    let mut runs = Vec::new();
    for child in node.children().filter(Node::is_element) {
        if is_w(&child, "pPr") {
            properties = Some(child.range());
        } else {
            read_inline(child, xml, &mut runs);
        }
    }

    (
        ParagraphSlot {
            outer,
            open_end,
            close_start,
            properties,
        },
        Paragraph::new(runs),
    )
}

/// Inline containers whose runs are part of the paragraph's visible text.
const TRANSPARENT: &[&str] = &[
    "hyperlink",
    "ins",
    "moveTo",
    "smartTag",
    "customXml",
    "sdt",
    "sdtContent",
    "fldSimple",
    "dir",
    "bdo",
];

/// Append the runs for one inline child of a paragraph.
///
/// A transparent container becomes its start tag and end tag as embedded
/// runs with its children read in between, so a regenerated paragraph keeps
/// the wrapper around whatever text ends up inside it.
fn read_inline(node: Node<'_, '_>, xml: &str, runs: &mut Vec<Run>) {
    let transparent = node.tag_name().namespace() == Some(W_NS)
        && TRANSPARENT.contains(&node.tag_name().name());

    if is_w(&node, "r") {
        read_run(node, xml, runs);
    } else if transparent && node.has_children() {
        let (open, close) = tags(node, xml);
        runs.push(Run::embedded(open));
        for child in node.children().filter(Node::is_element) {
            read_inline(child, xml, runs);
        }
        runs.push(Run::embedded(close));
    } else {
        runs.push(Run::embedded(&xml[node.range()]));
    }
}

/// Append a `w:r` as text sharing the run's style.
///
/// A child the model cannot carry as text (a drawing, a page break, a symbol)
/// is split out into a zero-width embedded run of its own, wrapped in a copy
/// of the run's tags and properties; the text on either side stays readable.
fn read_run(node: Node<'_, '_>, xml: &str, runs: &mut Vec<Run>) {
    let (open, close) = tags(node, xml);
    let mut style = RunStyle::default();
    let mut text = String::new();
    let mut split = false;

    for child in node.children().filter(Node::is_element) {
        if is_w(&child, "rPr") {
            style = read_style(child, xml);
            continue;
        }
        match run_text(&child) {
            Some(s) => text.push_str(s),
            None => {
                if !text.is_empty() {
                    runs.push(Run::new(std::mem::take(&mut text), style.clone()));
                }
                let props = style.source.as_deref().unwrap_or("");
                runs.push(Run::embedded(format!(
                    "{open}{props}{}{close}",
                    &xml[child.range()]
                )));
                split = true;
            }
        }
    }
    if !text.is_empty() || !split {
        runs.push(Run::new(text, style));
    }
}

/// Visible text of a run child; `None` for anything kept verbatim.
fn run_text<'a>(child: &Node<'a, '_>) -> Option<&'a str> {
    if child.tag_name().namespace() != Some(W_NS) {
        return None;
    }
    match child.tag_name().name() {
        "t" => Some(child.text().unwrap_or("")),
        "tab" => Some("\t"),
        "cr" => Some("\n"),
        // Page and column breaks carry no text.
        "br" => matches!(child.attribute((W_NS, "type")), None | Some("textWrapping"))
            .then_some("\n"),
        "lastRenderedPageBreak" => Some(""),
        _ => None,
    }
}

/// Start-tag and end-tag markup of an element, split around its content.
fn tags<'x>(node: Node<'_, '_>, xml: &'x str) -> (&'x str, &'x str) {
    let outer = node.range();
    let inner_start = node.first_child().map_or(outer.end, |c| c.range().start);
    let inner_end = node.last_child().map_or(outer.end, |c| c.range().end);
    (&xml[outer.start..inner_start], &xml[inner_end..outer.end])
}

fn read_style(rpr: Node<'_, '_>, xml: &str) -> RunStyle {
    let mut style = RunStyle {
        source: Some(xml[rpr.range()].to_string()),
        ..RunStyle::default()
    };
    for prop in rpr.children().filter(|n| n.is_element()) {
        let val = prop.attribute((W_NS, "val"));
        match prop.tag_name().name() {
            "rFonts" => style.font = prop.attribute((W_NS, "ascii")).map(str::to_string),
            "sz" => style.size = val.and_then(|v| v.parse().ok()),
            "color" => style.color = val.map(str::to_string),
            "b" => style.bold = is_on(val),
            "i" => style.italic = is_on(val),
            "u" => style.underline = val.is_some_and(|v| v != "none"),
            _ => {}
        }
    }
    style
}

/// OOXML on/off property: bare element or any value except an explicit off.
fn is_on(val: Option<&str>) -> bool {
    !matches!(val, Some("0" | "false" | "off"))
}

fn is_w(node: &Node<'_, '_>, local: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local
        && node.tag_name().namespace() == Some(W_NS)
}

fn write_run(out: &mut String, p: &str, run: &Run) {
    if let Some(markup) = &run.embedded {
        out.push_str(markup);
        return;
    }
    out.push_str(&format!("<{p}:r>"));
    write_style(out, p, &run.style);

    let mut pending = String::new();
    for ch in run.text.chars() {
        match ch {
            '\t' | '\n' => {
                flush_text(out, p, &mut pending);
                out.push_str(&if ch == '\t' {
                    format!("<{p}:tab/>")
                } else {
                    format!("<{p}:br/>")
                });
            }
            _ => pending.push(ch),
        }
    }
    flush_text(out, p, &mut pending);
    out.push_str(&format!("</{p}:r>"));
}

fn flush_text(out: &mut String, p: &str, pending: &mut String) {
    if pending.is_empty() {
        return;
    }
    out.push_str(&format!(
        "<{p}:t xml:space=\"preserve\">{}</{p}:t>",
        escape_xml(pending)
    ));
    pending.clear();
}

fn write_style(out: &mut String, p: &str, style: &RunStyle) {
    if let Some(source) = &style.source {
        out.push_str(source);
        return;
    }
    if style.is_plain() {
        return;
    }
    // Child order follows the CT_RPr sequence.
    out.push_str(&format!("<{p}:rPr>"));
    if let Some(font) = &style.font {
        let f = escape_xml(font);
        out.push_str(&format!(
            "<{p}:rFonts {p}:ascii=\"{f}\" {p}:hAnsi=\"{f}\" {p}:cs=\"{f}\"/>"
        ));
    }
    if style.bold {
        out.push_str(&format!("<{p}:b/>"));
    }
    if style.italic {
        out.push_str(&format!("<{p}:i/>"));
    }
    if let Some(color) = &style.color {
        out.push_str(&format!("<{p}:color {p}:val=\"{}\"/>", escape_xml(color)));
    }
    if let Some(size) = style.size {
        out.push_str(&format!("<{p}:sz {p}:val=\"{size}\"/><{p}:szCs {p}:val=\"{size}\"/>"));
    }
    if style.underline {
        out.push_str(&format!("<{p}:u {p}:val=\"single\"/>"));
    }
    out.push_str(&format!("</{p}:rPr>"));
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn invalid(e: zip::result::ZipError) -> RecoverletteError {
    RecoverletteError::InvalidTemplate {
        detail: e.to_string(),
    }
}
