//! Reference list rendering.
//!
//! Combines a [`Bibliography`], its [`Labels`] and a [`CitationStyle`] into a
//! [`ReferenceList`]: one rendered HTML fragment per entry, keyed by citation
//! key so citations can be linked to their targets.

use indexmap::IndexMap;

use crate::labels::{Label, Labels};
use crate::refs::Bibliography;
use crate::style::{escape_html, CitationStyle};

/// One formatted entry of the reference list.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEntry {
    pub key: String,
    pub label: Label,
    /// The entry formatted by the citation style. Never empty.
    pub html: String,
}

impl RenderedEntry {
    /// The `<li>` element for this entry, carrying its anchor id.
    pub fn to_list_item(&self) -> String {
        format!(
            "<li id=\"{}\"><span class=\"reference-label\">{}</span> {}</li>",
            self.label.anchor(),
            escape_html(&self.label.text),
            self.html
        )
    }
}

/// Rendered entries keyed by citation key, in label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceList {
    entries: IndexMap<String, RenderedEntry>,
}

impl ReferenceList {
    pub fn get(&self, key: &str) -> Option<&RenderedEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderedEntry> {
        self.entries.values()
    }

    /// The whole list as an HTML `<ul>`.
    pub fn to_html(&self) -> String {
        list_html(self.entries.values())
    }

    /// Only the entries for `keys`, still in label order and keeping their
    /// labels. Unknown keys are ignored.
    pub fn to_html_for<'a, I>(&self, keys: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wanted: Vec<&RenderedEntry> =
            keys.into_iter().filter_map(|key| self.get(key)).collect();
        wanted.sort_by_key(|entry| entry.label.index);
        wanted.dedup_by_key(|entry| entry.label.index);
        list_html(wanted.into_iter())
    }
}

fn list_html<'a>(entries: impl Iterator<Item = &'a RenderedEntry>) -> String {
    let mut html = String::from("<ul class=\"references\">\n");
    for entry in entries {
        html.push_str(&entry.to_list_item());
        html.push('\n');
    }
    html.push_str("</ul>");
    html
}

/// Formats every labelled entry of `bibliography` with `style`.
///
/// Entries without a label are skipped; with labels from
/// [`assign_labels`](crate::labels::assign_labels) on the same bibliography
/// there are none. An entry the style renders as empty falls back to its key.
pub fn render_references(
    bibliography: &Bibliography,
    labels: &Labels,
    style: &dyn CitationStyle,
) -> ReferenceList {
    let mut entries = IndexMap::with_capacity(labels.len());

    for (key, label) in labels.iter() {
        let Some(entry) = bibliography.get(key) else {
            continue;
        };
        let mut html = style.format_entry(entry);
        if html.trim().is_empty() {
            html = escape_html(key);
        }
        entries.insert(
            key.to_string(),
            RenderedEntry {
                key: key.to_string(),
                label: label.clone(),
                html,
            },
        );
    }

    ReferenceList { entries }
}

/// Appends a reference section (heading plus list) to a rendered page body.
///
/// # Arguments
///
/// * `body` - The page body, citations already rewritten
/// * `list_html` - The reference list, usually from [`ReferenceList::to_html_for`]
/// * `heading` - Section heading; empty for none
pub fn append_reference_section(body: &str, list_html: &str, heading: &str) -> String {
    let mut section = String::from("\n<section class=\"references\">\n");
    if !heading.is_empty() {
        section.push_str(&format!("<h2>{}</h2>\n", escape_html(heading)));
    }
    section.push_str(list_html);
    section.push_str("\n</section>\n");

    // Whole documents get the section at the end of their body.
    if let Some(pos) = body.to_ascii_lowercase().rfind("</body>") {
        let (head, tail) = body.split_at(pos);
        return format!("{}{}{}", head.trim_end(), section, tail);
    }

    let mut output = body.trim_end().to_string();
    output.push_str(&section);
    output
}
