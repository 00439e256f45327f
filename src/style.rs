//! Citation styles.
//!
//! A citation style formats one [`Entry`] as an HTML fragment. Like label
//! styles, they are looked up by name in a registry built at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::refs::{Entry, Person};

/// Name of the citation style used when none is configured.
pub const DEFAULT_CITATION_STYLE: &str = "plain";

/// Errors that can occur when resolving a citation style.
#[derive(Error, Debug)]
pub enum StyleError {
    #[error("unknown citation style '{name}' (available: {})", available.join(", "))]
    UnknownStyle {
        name: String,
        available: Vec<String>,
    },
}

/// Formats bibliography entries as HTML.
pub trait CitationStyle: Send + Sync {
    /// The registry name of this style.
    fn name(&self) -> &'static str;

    /// Formats `entry` as an inline HTML fragment (no surrounding block element).
    fn format_entry(&self, entry: &Entry) -> String;
}

/// Close to BibTeX's `plain`: layout depends on the entry type.
#[derive(Debug, Default)]
pub struct Plain;

impl CitationStyle for Plain {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn format_entry(&self, entry: &Entry) -> String {
        let mut out = Sentences::default();
        let title = entry.title().map(escape_html);

        match entry.entry_type.as_str() {
            "article" => {
                out.push(format_names(&entry.authors));
                out.push(title);
                let mut venue = entry.field("journal").map(emphasis).unwrap_or_default();
                if let Some(volume) = entry.field("volume") {
                    append(&mut venue, ", ", &escape_html(volume));
                    if let Some(number) = entry.field("number") {
                        venue.push_str(&format!("({})", escape_html(number)));
                    }
                }
                if let Some(pages) = entry.field("pages") {
                    let sep = if entry.field("volume").is_some() { ":" } else { ", " };
                    append(&mut venue, sep, &format_pages(pages));
                }
                if let Some(year) = entry.year() {
                    append(&mut venue, ", ", &escape_html(year));
                }
                out.push(Some(venue));
            }
            "book" | "booklet" | "manual" => {
                if entry.authors.is_empty() {
                    out.push(format_names(&entry.editors).map(|e| editors_suffix(e, &entry.editors)));
                } else {
                    out.push(format_names(&entry.authors));
                }
                out.push(entry.title().map(emphasis));
                out.push(publisher_year(entry, "publisher"));
            }
            "inproceedings" | "incollection" | "conference" | "inbook" => {
                out.push(format_names(&entry.authors));
                out.push(title);
                let mut venue = String::new();
                if let Some(editors) = format_names(&entry.editors) {
                    venue = editors_suffix(editors, &entry.editors);
                }
                if let Some(booktitle) = entry.field("booktitle") {
                    append(&mut venue, ", ", &emphasis(booktitle));
                }
                if let Some(pages) = entry.field("pages") {
                    append(&mut venue, ", ", &format!("pages {}", format_pages(pages)));
                }
                if !venue.is_empty() {
                    out.push(Some(format!("In {}", venue)));
                }
                out.push(publisher_year(entry, "publisher"));
            }
            "phdthesis" | "mastersthesis" | "thesis" => {
                out.push(format_names(&entry.authors));
                out.push(title);
                let kind = match entry.entry_type.as_str() {
                    "mastersthesis" => "Master's thesis",
                    _ => "PhD thesis",
                };
                let mut venue = entry
                    .field("type")
                    .map(escape_html)
                    .unwrap_or_else(|| kind.to_string());
                if let Some(school) = entry.field("school").or_else(|| entry.field("institution")) {
                    append(&mut venue, ", ", &escape_html(school));
                }
                if let Some(year) = entry.year() {
                    append(&mut venue, ", ", &escape_html(year));
                }
                out.push(Some(venue));
            }
            "techreport" | "report" => {
                out.push(format_names(&entry.authors));
                out.push(title);
                let mut venue = entry
                    .field("type")
                    .map(escape_html)
                    .unwrap_or_else(|| "Technical Report".to_string());
                if let Some(number) = entry.field("number") {
                    append(&mut venue, " ", &escape_html(number));
                }
                out.push(Some(venue));
                out.push(publisher_year(entry, "institution"));
            }
            _ => {
                out.push(format_names(&entry.authors));
                out.push(title);
                out.push(entry.field("howpublished").map(escape_html));
                out.push(entry.year().map(escape_html));
            }
        }

        out.push(entry.field("note").map(escape_html));
        let mut html = out.finish();
        if let Some(link) = link(entry) {
            append(&mut html, " ", &link);
        }
        html
    }
}

/// Authors, title and year only.
#[derive(Debug, Default)]
pub struct Minimal;

impl CitationStyle for Minimal {
    fn name(&self) -> &'static str {
        "minimal"
    }

    fn format_entry(&self, entry: &Entry) -> String {
        let mut out = Sentences::default();
        out.push(format_names(&entry.authors).or_else(|| format_names(&entry.editors)));
        out.push(entry.title().map(escape_html));
        out.push(entry.year().map(escape_html));
        out.finish()
    }
}

/// Collects sentence-like blocks, each terminated by a period.
#[derive(Default)]
struct Sentences {
    blocks: Vec<String>,
}

impl Sentences {
    fn push(&mut self, block: Option<String>) {
        if let Some(block) = block.filter(|b| !b.trim().is_empty()) {
            self.blocks.push(block);
        }
    }

    fn finish(self) -> String {
        self.blocks
            .into_iter()
            .map(|block| {
                let plain = block.trim_end_matches("</em>");
                if plain.ends_with(['.', '?', '!']) {
                    block
                } else {
                    format!("{}.", block)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn append(target: &mut String, separator: &str, text: &str) {
    if !target.is_empty() {
        target.push_str(separator);
    }
    target.push_str(text);
}

/// "A", "A and B", "A, B, and C".
fn format_names(people: &[Person]) -> Option<String> {
    let names: Vec<String> = people
        .iter()
        .map(|p| escape_html(&p.display_name()))
        .collect();

    match names.len() {
        0 => None,
        1 => Some(names[0].clone()),
        2 => Some(format!("{} and {}", names[0], names[1])),
        n => Some(format!("{}, and {}", names[..n - 1].join(", "), names[n - 1])),
    }
}

fn editors_suffix(names: String, editors: &[Person]) -> String {
    if editors.len() > 1 {
        format!("{}, editors", names)
    } else {
        format!("{}, editor", names)
    }
}

fn publisher_year(entry: &Entry, publisher_field: &str) -> Option<String> {
    let mut block = entry.field(publisher_field).map(escape_html).unwrap_or_default();
    if let Some(address) = entry.field("address").or_else(|| entry.field("location")) {
        append(&mut block, ", ", &escape_html(address));
    }
    if let Some(year) = entry.year() {
        append(&mut block, ", ", &escape_html(year));
    }
    Some(block)
}

fn format_pages(pages: &str) -> String {
    escape_html(&pages.replace("--", "\u{2013}"))
}

fn emphasis(text: &str) -> String {
    format!("<em>{}</em>", escape_html(text))
}

fn link(entry: &Entry) -> Option<String> {
    if let Some(doi) = entry.field("doi") {
        let doi = doi.trim_start_matches("https://doi.org/");
        return Some(format!(
            "<a href=\"https://doi.org/{}\">doi:{}</a>",
            escape_html(doi),
            escape_html(doi)
        ));
    }
    entry
        .field("url")
        .map(|url| format!("<a href=\"{0}\">{0}</a>", escape_html(url)))
}

/// Escapes text for use in HTML content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Citation styles by name.
pub struct CitationStyles {
    styles: BTreeMap<&'static str, Arc<dyn CitationStyle>>,
}

impl CitationStyles {
    pub fn empty() -> Self {
        CitationStyles {
            styles: BTreeMap::new(),
        }
    }

    /// A registry holding the builtin styles.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Plain);
        registry.register(Minimal);
        registry
    }

    pub fn register<S: CitationStyle + 'static>(&mut self, style: S) {
        self.styles.insert(style.name(), Arc::new(style));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CitationStyle>, StyleError> {
        self.styles
            .get(name)
            .cloned()
            .ok_or_else(|| StyleError::UnknownStyle {
                name: name.to_string(),
                available: self.names().iter().map(|n| n.to_string()).collect(),
            })
    }

    /// Returns the list of registered style names.
    pub fn names(&self) -> Vec<&'static str> {
        self.styles.keys().copied().collect()
    }
}

impl Default for CitationStyles {
    fn default() -> Self {
        Self::builtin()
    }
}
