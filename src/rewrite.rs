//! Citation rewriting.
//!
//! Parses a page's rendered HTML into a DOM, replaces every citation marker
//! with links into the reference list and serializes the result. Pages
//! without markers are returned untouched, so rewriting already rewritten
//! output is a no-op.

use std::cell::RefCell;
use std::rc::Rc;

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, parse_fragment, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use serde::Deserialize;
use thiserror::Error;

use crate::labels::LabelStyle;
use crate::markers::{parse_key_list, CitationItem, MarkerSyntax, TextMarker};
use crate::processor::ReferenceList;

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

const BOM: char = '\u{feff}';

/// Elements whose text is never scanned for inline markers.
const OPAQUE_ELEMENTS: &[&str] = &["a", "code", "kbd", "pre", "samp", "script", "style", "textarea"];

/// Errors raised while rewriting a page.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("unresolved citation '{key}' in {page}")]
    UnresolvedCitation { key: String, page: String },

    #[error("failed to serialize {page}: {source}")]
    Serialize {
        page: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to do with a citation key missing from the bibliography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedPolicy {
    /// Log a warning and leave the marker as literal text.
    #[default]
    Warn,
    /// Abort with [`RewriteError::UnresolvedCitation`].
    Fail,
}

/// The outcome of rewriting one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    /// The page HTML, identical to the input when nothing was replaced.
    pub html: String,
    /// Number of markers found, resolved or not.
    pub markers: usize,
    /// Resolved keys, in order of first citation.
    pub cited: Vec<String>,
    /// Keys left unresolved under [`UnresolvedPolicy::Warn`].
    pub unresolved: Vec<String>,
}

impl Rewritten {
    pub fn changed(&self) -> bool {
        !self.cited.is_empty()
    }
}

/// Replaces citation markers with links into a [`ReferenceList`].
pub struct Rewriter<'a> {
    references: &'a ReferenceList,
    label_style: &'a dyn LabelStyle,
    syntax: &'a MarkerSyntax,
    separator: &'a str,
    policy: UnresolvedPolicy,
}

enum Found {
    Element {
        node: Handle,
        items: Vec<CitationItem>,
    },
    Text {
        node: Handle,
        text: String,
        markers: Vec<TextMarker>,
    },
}

impl<'a> Rewriter<'a> {
    pub fn new(
        references: &'a ReferenceList,
        label_style: &'a dyn LabelStyle,
        syntax: &'a MarkerSyntax,
        separator: &'a str,
        policy: UnresolvedPolicy,
    ) -> Self {
        Rewriter {
            references,
            label_style,
            syntax,
            separator,
            policy,
        }
    }

    /// Counts the markers in `html` without rewriting anything.
    pub fn count_markers(&self, html: &str) -> usize {
        // Dropping the dom strips the children of every node, so keep it alive.
        let (_dom, root) = parse(html);
        count(&collect(&root, self.syntax))
    }

    /// Rewrites the markers of one page.
    ///
    /// # Arguments
    ///
    /// * `page` - Name of the page, used in diagnostics
    /// * `html` - The page's rendered HTML, a fragment or a whole document
    ///
    /// # Errors
    ///
    /// Under [`UnresolvedPolicy::Fail`], the first key missing from the
    /// reference list aborts with [`RewriteError::UnresolvedCitation`].
    pub fn rewrite(&self, page: &str, html: &str) -> Result<Rewritten, RewriteError> {
        let (_dom, root) = parse(html);
        let found = collect(&root, self.syntax);

        let mut result = Rewritten {
            html: String::new(),
            markers: count(&found),
            cited: Vec::new(),
            unresolved: Vec::new(),
        };

        for item in found {
            match item {
                Found::Element { node, items } => {
                    if let Some(sup) = self.resolve(page, &items, &mut result)? {
                        replace_node(&node, vec![sup]);
                    }
                }
                Found::Text {
                    node,
                    text,
                    markers,
                } => {
                    let mut pieces = Vec::new();
                    let mut last = 0;
                    let mut replaced = false;
                    for marker in &markers {
                        let (start, end) = marker.span;
                        if let Some(sup) = self.resolve(page, &marker.items, &mut result)? {
                            push_text(&mut pieces, &text[last..start]);
                            pieces.push(sup);
                            last = end;
                            replaced = true;
                        }
                    }
                    if replaced {
                        push_text(&mut pieces, &text[last..]);
                        replace_node(&node, pieces);
                    }
                }
            }
        }

        if !result.changed() {
            result.html = html.to_string();
            return Ok(result);
        }

        let serialized = serialize_children(&root).map_err(|source| RewriteError::Serialize {
            page: page.to_string(),
            source,
        })?;
        result.html = if html.starts_with(BOM) {
            format!("{}{}", BOM, serialized)
        } else {
            serialized
        };
        Ok(result)
    }

    /// Builds the replacement for one marker, or `None` when a key is
    /// unresolved and the policy is to warn.
    fn resolve(
        &self,
        page: &str,
        items: &[CitationItem],
        result: &mut Rewritten,
    ) -> Result<Option<Handle>, RewriteError> {
        let mut missing = items
            .iter()
            .filter(|i| self.references.get(&i.key).is_none())
            .peekable();
        if missing.peek().is_some() {
            for item in missing {
                if self.policy == UnresolvedPolicy::Fail {
                    return Err(RewriteError::UnresolvedCitation {
                        key: item.key.clone(),
                        page: page.to_string(),
                    });
                }
                log::warn!("unresolved citation '{}' in {}", item.key, page);
                if !result.unresolved.contains(&item.key) {
                    result.unresolved.push(item.key.clone());
                }
            }
            return Ok(None);
        }

        // <sup class="citation">[<a href="#reference1">1</a>, ...]</sup>
        let mut children = vec![text_node("[")];
        for (i, item) in items.iter().enumerate() {
            let Some(rendered) = self.references.get(&item.key) else {
                continue;
            };
            if i > 0 {
                children.push(text_node(self.separator));
            }
            let label = self.label_style.inline_text(&rendered.label.text);
            children.push(element(
                "a",
                &[("href", format!("#{}", rendered.label.anchor()))],
                vec![text_node(label)],
            ));
            if let Some(locator) = &item.locator {
                children.push(text_node(&format!(", {}", locator)));
            }
            if !result.cited.contains(&item.key) {
                result.cited.push(item.key.clone());
            }
        }
        children.push(text_node("]"));

        Ok(Some(element(
            "sup",
            &[("class", "citation".to_string())],
            children,
        )))
    }
}

fn count(found: &[Found]) -> usize {
    found
        .iter()
        .map(|f| match f {
            Found::Element { .. } => 1,
            Found::Text { markers, .. } => markers.len(),
        })
        .sum()
}

/// The `name`/`content` pairs of a page's `<meta>` elements, in document
/// order. Names are lower-cased; elements without both attributes are skipped.
pub fn meta_tags(html: &str) -> Vec<(String, String)> {
    let (_dom, root) = parse(html);
    let mut tags = Vec::new();
    walk_meta(&root, &mut tags);
    tags
}

fn walk_meta(node: &Handle, tags: &mut Vec<(String, String)>) {
    for child in node.children.borrow().iter() {
        let NodeData::Element { name, attrs, .. } = &child.data else {
            continue;
        };
        let tag = (&*name.local).to_ascii_lowercase();
        if tag == "meta" {
            let attrs = attrs.borrow();
            let value = |wanted: &str| {
                attrs
                    .iter()
                    .find(|a| (&*a.name.local).eq_ignore_ascii_case(wanted))
                    .map(|a| a.value.to_string())
            };
            if let (Some(name), Some(content)) = (value("name"), value("content")) {
                tags.push((name.to_ascii_lowercase(), content));
            }
        } else if !OPAQUE_ELEMENTS.contains(&tag.as_str()) {
            walk_meta(child, tags);
        }
    }
}

// ---------------------------------------------------------------------------
// DOM helpers
// ---------------------------------------------------------------------------

fn html_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NS), LocalName::from(local))
}

/// Whether `html` is a whole document rather than a body fragment. A byte
/// order mark, whitespace and comments may precede the first tag.
fn is_document(html: &str) -> bool {
    let mut rest = html.trim_start_matches(BOM).trim_start();
    while let Some(comment) = rest.strip_prefix("<!--") {
        match comment.find("-->") {
            Some(end) => rest = comment[end + 3..].trim_start(),
            None => return false,
        }
    }

    let head: String = rest.chars().take(9).collect::<String>().to_ascii_lowercase();
    ["<!doctype", "<html", "<body"]
        .iter()
        .any(|tag| head.starts_with(tag))
}

/// Parses `html` and returns the DOM together with the node whose children
/// make up the page: the document for whole documents, the synthetic `<html>`
/// context element for fragments.
fn parse(html: &str) -> (RcDom, Handle) {
    let html = html.trim_start_matches(BOM);
    if is_document(html) {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        let root = dom.document.clone();
        return (dom, root);
    }

    let dom = parse_fragment(
        RcDom::default(),
        ParseOpts::default(),
        html_name("body"),
        Vec::new(),
    )
    .one(html);
    let root = dom
        .document
        .children
        .borrow()
        .first()
        .cloned()
        .unwrap_or_else(|| dom.document.clone());
    (dom, root)
}

fn collect(root: &Handle, syntax: &MarkerSyntax) -> Vec<Found> {
    let mut found = Vec::new();
    walk(root, syntax, &mut found);
    found
}

fn walk(node: &Handle, syntax: &MarkerSyntax, found: &mut Vec<Found>) {
    for child in node.children.borrow().iter() {
        match &child.data {
            NodeData::Element { name, attrs, .. } => {
                let tag = (&*name.local).to_ascii_lowercase();
                if tag == syntax.tag() {
                    let keys = attrs
                        .borrow()
                        .iter()
                        .find(|a| (&*a.name.local).eq_ignore_ascii_case(syntax.attribute()))
                        .map(|a| a.value.to_string());
                    if let Some(keys) = keys {
                        let items = parse_key_list(&keys);
                        if !items.is_empty() {
                            found.push(Found::Element {
                                node: child.clone(),
                                items,
                            });
                        }
                        continue;
                    }
                }
                if OPAQUE_ELEMENTS.contains(&tag.as_str()) {
                    continue;
                }
                walk(child, syntax, found);
            }
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                let markers = syntax.find_in_text(&text);
                if !markers.is_empty() {
                    found.push(Found::Text {
                        node: child.clone(),
                        text,
                        markers,
                    });
                }
            }
            _ => {}
        }
    }
}

fn text_node(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

fn push_text(pieces: &mut Vec<Handle>, text: &str) {
    if !text.is_empty() {
        pieces.push(text_node(text));
    }
}

fn element(name: &str, attrs: &[(&str, String)], children: Vec<Handle>) -> Handle {
    let attrs = attrs
        .iter()
        .map(|(key, value)| Attribute {
            name: QualName::new(None, Namespace::from(""), LocalName::from(*key)),
            value: StrTendril::from_slice(value),
        })
        .collect();

    let node = Node::new(NodeData::Element {
        name: html_name(name),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    });
    for child in children {
        child.parent.set(Some(Rc::downgrade(&node)));
        node.children.borrow_mut().push(child);
    }
    node
}

/// Replaces `old` in its parent's children with `replacements`.
fn replace_node(old: &Handle, replacements: Vec<Handle>) {
    let Some(parent) = old.parent.take().and_then(|weak| weak.upgrade()) else {
        return;
    };
    let mut children = parent.children.borrow_mut();
    if let Some(pos) = children.iter().position(|c| Rc::ptr_eq(c, old)) {
        for node in &replacements {
            node.parent.set(Some(Rc::downgrade(&parent)));
        }
        children.splice(pos..pos + 1, replacements);
    }
}

fn serialize_children(root: &Handle) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = root.clone().into();
    serialize(
        &mut bytes,
        &handle,
        SerializeOpts {
            traversal_scope: TraversalScope::ChildrenOnly(None),
            ..Default::default()
        },
    )?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{assign_labels, NumberBrackets};
    use crate::processor::render_references;
    use crate::refs::{Bibliography, Entry};
    use crate::style::Minimal;
    use std::collections::BTreeMap;

    fn references() -> ReferenceList {
        let bib: Bibliography = ["smith2020", "jones2019"]
            .iter()
            .map(|key| Entry {
                key: key.to_string(),
                entry_type: "misc".to_string(),
                fields: BTreeMap::from([("title".to_string(), format!("Title {}", key))]),
                ..Default::default()
            })
            .collect();
        let labels = assign_labels(&NumberBrackets, &bib).unwrap();
        render_references(&bib, &labels, &Minimal)
    }

    fn rewrite(html: &str, policy: UnresolvedPolicy) -> Result<Rewritten, RewriteError> {
        let refs = references();
        let syntax = MarkerSyntax::default();
        Rewriter::new(&refs, &NumberBrackets, &syntax, ", ", policy).rewrite("post.html", html)
    }

    #[test]
    fn test_element_marker_becomes_link() {
        // Given: a page citing smith2020 with a cite element
        let html = r#"<p>As shown <cite data-keys="smith2020">smith2020</cite>.</p>"#;

        // When: we rewrite it
        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        // Then: the marker is replaced by a link to reference1
        assert_eq!(
            result.html,
            r##"<p>As shown <sup class="citation">[<a href="#reference1">1</a>]</sup>.</p>"##
        );
        assert_eq!(result.cited, vec!["smith2020"]);
        assert_eq!(result.markers, 1);
    }

    #[test]
    fn test_text_marker_with_several_keys() {
        let html = "<p>See [@jones2019; @smith2020, p. 4] and more.</p>";

        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        assert_eq!(
            result.html,
            r##"<p>See <sup class="citation">[<a href="#reference2">2</a>, <a href="#reference1">1</a>, p. 4]</sup> and more.</p>"##
        );
        assert_eq!(result.cited, vec!["jones2019", "smith2020"]);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let html = r#"<p>Text <cite data-keys="smith2020"></cite> and [@jones2019].</p>"#;

        let first = rewrite(html, UnresolvedPolicy::Warn).unwrap();
        let second = rewrite(&first.html, UnresolvedPolicy::Warn).unwrap();

        assert!(first.changed());
        assert!(!second.changed());
        assert_eq!(second.markers, 0);
        assert_eq!(second.html, first.html);
    }

    #[test]
    fn test_unresolved_warn_leaves_marker() {
        // Given: a page citing an unknown key
        let html = "<p>Unknown [@doe2099] here.</p>";

        // When: we rewrite under the warn policy
        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        // Then: the page is untouched and the key reported
        assert_eq!(result.html, html);
        assert_eq!(result.unresolved, vec!["doe2099"]);
        assert_eq!(result.markers, 1);
    }

    #[test]
    fn test_unresolved_fail_names_key_and_page() {
        let html = r#"<p><cite data-keys="smith2020,doe2099">x</cite></p>"#;

        let err = rewrite(html, UnresolvedPolicy::Fail).unwrap_err();

        match err {
            RewriteError::UnresolvedCitation { key, page } => {
                assert_eq!(key, "doe2099");
                assert_eq!(page, "post.html");
            }
            other => panic!("Expected UnresolvedCitation, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_resolution_keeps_other_markers() {
        let html = "<p>[@doe2099] but [@smith2020]</p>";

        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        assert!(result.html.contains("[@doe2099] but <sup"));
        assert_eq!(result.cited, vec!["smith2020"]);
    }

    #[test]
    fn test_code_is_not_scanned() {
        let html = "<p><code>[@smith2020]</code></p><pre>[@jones2019]</pre>";

        let result = rewrite(html, UnresolvedPolicy::Fail).unwrap();

        assert_eq!(result.html, html);
        assert_eq!(result.markers, 0);
    }

    #[test]
    fn test_whole_document_keeps_structure() {
        let html = "<!DOCTYPE html><html><head><title>T</title></head><body><p>[@smith2020]</p></body></html>";

        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        assert!(result.html.starts_with("<!DOCTYPE html><html><head><title>T</title></head><body>"));
        assert!(result.html.contains(r##"<a href="#reference1">1</a>"##));
        assert!(result.html.ends_with("</body></html>"));
    }

    #[test]
    fn test_document_with_byte_order_mark_keeps_structure() {
        // Given: a document as read from disk, byte order mark included
        let html = "\u{feff}<!DOCTYPE html><html><head><title>T</title></head><body><p>[@smith2020]</p></body></html>";

        // When: we rewrite it
        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        // Then: the mark and the document structure survive
        assert!(result
            .html
            .starts_with("\u{feff}<!DOCTYPE html><html><head><title>T</title></head><body>"));
        assert!(result.html.contains(r##"<a href="#reference1">1</a>"##));
        assert!(result.html.ends_with("</body></html>"));
    }

    #[test]
    fn test_document_after_leading_comment_keeps_structure() {
        let html = "<!-- generated -->\n<!DOCTYPE html><html><head><title>T</title></head><body><p>[@smith2020]</p></body></html>";

        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        assert!(result.html.starts_with("<!-- generated -->"));
        assert!(result.html.contains("<!DOCTYPE html><html><head><title>T</title></head><body>"));
        assert!(result.html.contains(r##"<a href="#reference1">1</a>"##));
        assert!(result.html.ends_with("</body></html>"));
    }

    #[test]
    fn test_is_document() {
        assert!(is_document("  <!doctype html><p>x</p>"));
        assert!(is_document("<!-- a --> <!-- b --><HTML>"));
        assert!(!is_document("<!-- note --><p>x</p>"));
        assert!(!is_document("<header>x</header>"));
    }

    #[test]
    fn test_every_unresolved_key_is_reported() {
        // Given: one marker with two unknown keys and one known key
        let html = "<p>[@doe2099; @smith2020; @roe2098]</p>";

        // When: we rewrite under the warn policy
        let result = rewrite(html, UnresolvedPolicy::Warn).unwrap();

        // Then: both unknown keys are reported and the marker stays literal
        assert_eq!(result.unresolved, vec!["doe2099", "roe2098"]);
        assert_eq!(result.html, html);
        assert!(result.cited.is_empty());
    }

    #[test]
    fn test_meta_tags_in_any_attribute_order() {
        let html = r#"<!DOCTYPE html><html><head>
<meta content="refs.bib" name="Bibliography">
<meta charset="utf-8" name="author" lang="en" content="Jo">
<meta name="description">
</head><body><pre><meta name="x" content="y"></pre></body></html>"#;

        let tags = meta_tags(html);

        assert_eq!(
            tags,
            vec![
                ("bibliography".to_string(), "refs.bib".to_string()),
                ("author".to_string(), "Jo".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_markers_returns_input_verbatim() {
        let html = "<p class='x'>Nothing <b>here</b></p>";
        let result = rewrite(html, UnresolvedPolicy::Fail).unwrap();
        assert_eq!(result.html, html);
        assert!(!result.changed());
    }

    #[test]
    fn test_count_markers() {
        let refs = references();
        let syntax = MarkerSyntax::default();
        let rewriter = Rewriter::new(&refs, &NumberBrackets, &syntax, ", ", UnresolvedPolicy::Fail);
        assert_eq!(
            rewriter.count_markers(r#"<cite data-keys="a"></cite> [@b] [@c; @d]"#),
            3
        );
    }

    #[test]
    fn test_custom_separator() {
        let refs = references();
        let syntax = MarkerSyntax::default();
        let rewriter = Rewriter::new(&refs, &NumberBrackets, &syntax, "; ", UnresolvedPolicy::Warn);

        let result = rewriter.rewrite("p", "[@smith2020; @jones2019]").unwrap();

        assert!(result.html.contains("</a>; <a"));
    }
}
