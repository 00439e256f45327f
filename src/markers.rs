//! Citation marker recognition.
//!
//! Two conventions are recognised in rendered HTML:
//!
//! - element markers, `<cite data-keys="smith2020,jones2019">...</cite>`
//!   (tag and attribute are configurable);
//! - inline-text markers, `[@smith2020]`, `[@a; @b]` or `[@a, p. 42]`,
//!   matched by a configurable pattern whose first capture group holds the
//!   `;`-separated items.

use regex::Regex;
use thiserror::Error;

/// Default inline-text marker pattern.
pub const DEFAULT_PATTERN: &str = r"\[@([^\[\]]+)\]";

/// Errors in a marker configuration.
#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("invalid marker pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("marker pattern '{0}' has no capture group for the citation keys")]
    MissingGroup(String),

    #[error("marker tag and attribute must not be empty")]
    EmptyElement,
}

/// A single cited key within a marker.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationItem {
    /// The citation key, without any leading `@`.
    pub key: String,
    /// Text following the key, e.g. "p. 42".
    pub locator: Option<String>,
}

/// An inline-text marker found in a text node.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMarker {
    pub items: Vec<CitationItem>,
    /// Start and end byte positions of the whole marker in the text.
    pub span: (usize, usize),
}

/// How citation markers are written in page markup.
#[derive(Debug, Clone)]
pub struct MarkerSyntax {
    tag: String,
    attribute: String,
    pattern: Option<Regex>,
}

impl MarkerSyntax {
    /// Builds a marker syntax. An empty `pattern` disables inline-text markers.
    pub fn new(tag: &str, attribute: &str, pattern: &str) -> Result<Self, MarkerError> {
        if tag.trim().is_empty() || attribute.trim().is_empty() {
            return Err(MarkerError::EmptyElement);
        }

        let pattern = if pattern.is_empty() {
            None
        } else {
            let re = Regex::new(pattern)?;
            if re.captures_len() < 2 {
                return Err(MarkerError::MissingGroup(pattern.to_string()));
            }
            Some(re)
        };

        Ok(MarkerSyntax {
            tag: tag.trim().to_ascii_lowercase(),
            attribute: attribute.trim().to_ascii_lowercase(),
            pattern,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Finds all inline-text markers in `text`.
    ///
    /// # Examples
    ///
    /// ```
    /// use site_references::markers::MarkerSyntax;
    ///
    /// let syntax = MarkerSyntax::default();
    /// let markers = syntax.find_in_text("As shown [@smith2020; @jones2019].");
    /// assert_eq!(markers.len(), 1);
    /// assert_eq!(markers[0].items[1].key, "jones2019");
    /// ```
    pub fn find_in_text(&self, text: &str) -> Vec<TextMarker> {
        let Some(re) = &self.pattern else {
            return Vec::new();
        };

        re.captures_iter(text)
            .filter_map(|cap| {
                let full = cap.get(0)?;
                let items = parse_items(cap.get(1)?.as_str());
                if items.is_empty() {
                    return None;
                }
                Some(TextMarker {
                    items,
                    span: (full.start(), full.end()),
                })
            })
            .collect()
    }
}

impl Default for MarkerSyntax {
    fn default() -> Self {
        MarkerSyntax {
            tag: "cite".to_string(),
            attribute: "data-keys".to_string(),
            pattern: Regex::new(DEFAULT_PATTERN).ok(),
        }
    }
}

/// Parses the `;`-separated items of an inline marker: `@a, p. 3; @b`.
fn parse_items(inner: &str) -> Vec<CitationItem> {
    inner
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            let part = part.strip_prefix('@').unwrap_or(part);
            let (key, locator) = match part.find(',') {
                Some(pos) => {
                    let locator = part[pos + 1..].trim();
                    (
                        part[..pos].trim(),
                        (!locator.is_empty()).then(|| locator.to_string()),
                    )
                }
                None => (part, None),
            };
            if key.is_empty() {
                return None;
            }
            Some(CitationItem {
                key: key.to_string(),
                locator,
            })
        })
        .collect()
}

/// Parses the key list of an element marker: keys separated by commas,
/// semicolons or whitespace.
///
/// # Examples
///
/// ```
/// use site_references::markers::parse_key_list;
///
/// let items = parse_key_list("smith2020, @jones2019;doe2021");
/// let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
/// assert_eq!(keys, vec!["smith2020", "jones2019", "doe2021"]);
/// ```
pub fn parse_key_list(value: &str) -> Vec<CitationItem> {
    value
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|key| key.trim().trim_start_matches('@'))
        .filter(|key| !key.is_empty())
        .map(|key| CitationItem {
            key: key.to_string(),
            locator: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(marker: &TextMarker) -> Vec<&str> {
        marker.items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_no_markers() {
        let syntax = MarkerSyntax::default();
        assert!(syntax.find_in_text("Plain text [not a marker] here.").is_empty());
    }

    #[test]
    fn test_single_marker_span() {
        // Given: a text with one marker
        let text = "See [@smith2020] for details.";

        // When: we look for markers
        let markers = MarkerSyntax::default().find_in_text(text);

        // Then: the key and span are reported
        assert_eq!(markers.len(), 1);
        assert_eq!(keys(&markers[0]), vec!["smith2020"]);
        assert_eq!(&text[markers[0].span.0..markers[0].span.1], "[@smith2020]");
    }

    #[test]
    fn test_grouped_marker_with_locators() {
        let markers =
            MarkerSyntax::default().find_in_text("[@a, p. 42; @b; @c, ch. 3]");

        assert_eq!(markers.len(), 1);
        assert_eq!(keys(&markers[0]), vec!["a", "b", "c"]);
        assert_eq!(markers[0].items[0].locator.as_deref(), Some("p. 42"));
        assert_eq!(markers[0].items[1].locator, None);
        assert_eq!(markers[0].items[2].locator.as_deref(), Some("ch. 3"));
    }

    #[test]
    fn test_multiple_markers_in_order() {
        let markers = MarkerSyntax::default().find_in_text("[@a] then [@b]");
        assert_eq!(markers.len(), 2);
        assert!(markers[0].span.0 < markers[1].span.0);
    }

    #[test]
    fn test_empty_marker_is_ignored() {
        assert!(MarkerSyntax::default().find_in_text("[@ ; ]").is_empty());
    }

    #[test]
    fn test_custom_pattern() {
        let syntax = MarkerSyntax::new("cite", "data-keys", r"\\cite\{([^}]+)\}").unwrap();
        let markers = syntax.find_in_text(r"as \cite{knuth84} shows");
        assert_eq!(keys(&markers[0]), vec!["knuth84"]);
    }

    #[test]
    fn test_disabled_pattern() {
        let syntax = MarkerSyntax::new("cite", "data-keys", "").unwrap();
        assert!(syntax.find_in_text("[@a]").is_empty());
    }

    #[test]
    fn test_pattern_without_group_is_rejected() {
        let result = MarkerSyntax::new("cite", "data-keys", r"\[@[^\]]+\]");
        assert!(matches!(result, Err(MarkerError::MissingGroup(_))));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = MarkerSyntax::new("cite", "data-keys", r"([");
        assert!(matches!(result, Err(MarkerError::InvalidPattern(_))));
    }

    #[test]
    fn test_tag_is_normalised() {
        let syntax = MarkerSyntax::new(" CITE ", "Data-Keys", DEFAULT_PATTERN).unwrap();
        assert_eq!(syntax.tag(), "cite");
        assert_eq!(syntax.attribute(), "data-keys");
    }

    #[test]
    fn test_parse_key_list_skips_blanks() {
        assert!(parse_key_list(" , ;  ").is_empty());
        assert_eq!(parse_key_list("a b").len(), 2);
    }
}
