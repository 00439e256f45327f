//! Label styles.
//!
//! A label style turns the ordered entries of a [`Bibliography`] into short
//! display labels such as `[3]` or `[Smi20]`. Styles are looked up by name in
//! a [`LabelStyles`] registry built at startup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::refs::{Bibliography, Entry, Person};

/// Name of the label style used when none is configured.
pub const DEFAULT_LABEL_STYLE: &str = "number_brackets";

/// Errors raised while assigning labels.
#[derive(Error, Debug)]
pub enum LabelError {
    #[error("label style '{style}' produced the label {label} for both '{first}' and '{second}'")]
    DuplicateLabel {
        style: String,
        label: String,
        first: String,
        second: String,
    },

    #[error("label style '{style}' produced {got} labels for {expected} entries")]
    LabelCount {
        style: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown label style '{name}' (available: {})", available.join(", "))]
    UnknownStyle {
        name: String,
        available: Vec<String>,
    },
}

/// A strategy assigning labels to entries.
///
/// Implementations must return exactly one label per entry, in entry order,
/// and must be deterministic for a fixed input order.
pub trait LabelStyle: Send + Sync {
    /// The registry name of this style.
    fn name(&self) -> &'static str;

    /// Returns one label per entry, in the order given.
    fn format_labels(&self, entries: &[&Entry]) -> Vec<String>;

    /// The text shown inside an inline citation for `label`.
    fn inline_text<'a>(&self, label: &'a str) -> &'a str {
        label.trim_start_matches('[').trim_end_matches(']')
    }
}

/// A label assigned to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// The rendered label, e.g. `[1]`.
    pub text: String,
    /// Zero-based position of the entry in label order.
    pub index: usize,
}

impl Label {
    /// The HTML id of the entry in the reference list.
    pub fn anchor(&self) -> String {
        format!("reference{}", self.index + 1)
    }
}

/// Labels keyed by citation key, in label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels {
    by_key: IndexMap<String, Label>,
}

impl Labels {
    pub fn get(&self, key: &str) -> Option<&Label> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Label)> {
        self.by_key.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Assigns labels to every entry of `bibliography` with `style`.
///
/// # Errors
///
/// A style that returns the wrong number of labels or the same label twice
/// violates the [`LabelStyle`] contract; both abort with a [`LabelError`].
pub fn assign_labels(
    style: &dyn LabelStyle,
    bibliography: &Bibliography,
) -> Result<Labels, LabelError> {
    let entries: Vec<&Entry> = bibliography.iter().collect();
    let texts = style.format_labels(&entries);

    if texts.len() != entries.len() {
        return Err(LabelError::LabelCount {
            style: style.name().to_string(),
            expected: entries.len(),
            got: texts.len(),
        });
    }

    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut by_key = IndexMap::with_capacity(entries.len());

    for (index, (entry, text)) in entries.iter().zip(texts.iter()).enumerate() {
        if let Some(first) = owners.insert(text.as_str(), entry.key.as_str()) {
            return Err(LabelError::DuplicateLabel {
                style: style.name().to_string(),
                label: text.clone(),
                first: first.to_string(),
                second: entry.key.clone(),
            });
        }
        by_key.insert(
            entry.key.clone(),
            Label {
                text: text.clone(),
                index,
            },
        );
    }

    Ok(Labels { by_key })
}

// ---------------------------------------------------------------------------
// Builtin styles
// ---------------------------------------------------------------------------

/// Sequential numbers in brackets, first entry first: `[1]`, `[2]`, ...
#[derive(Debug, Default)]
pub struct NumberBrackets;

impl LabelStyle for NumberBrackets {
    fn name(&self) -> &'static str {
        "number_brackets"
    }

    fn format_labels(&self, entries: &[&Entry]) -> Vec<String> {
        (1..=entries.len()).map(|n| format!("[{}]", n)).collect()
    }
}

/// Author abbreviation plus two-digit year: `[Smi20]`, `[SD20]`, `[ABC+20]`.
#[derive(Debug, Default)]
pub struct Alpha;

impl LabelStyle for Alpha {
    fn name(&self) -> &'static str {
        "alpha"
    }

    fn format_labels(&self, entries: &[&Entry]) -> Vec<String> {
        let bases: Vec<String> = entries
            .iter()
            .map(|entry| {
                let year = entry
                    .year()
                    .map(|y| {
                        let digits: String = y.chars().filter(char::is_ascii_digit).collect();
                        digits[digits.len().saturating_sub(2)..].to_string()
                    })
                    .unwrap_or_default();
                format!("{}{}", alpha_names(entry), year)
            })
            .collect();

        disambiguate(&bases)
            .into_iter()
            .map(|label| format!("[{}]", label))
            .collect()
    }
}

fn alpha_names(entry: &Entry) -> String {
    let people = contributors(entry);
    let letters = |name: &str, n: usize| -> String {
        name.chars().filter(|c| c.is_alphanumeric()).take(n).collect()
    };

    match people.len() {
        0 => {
            let fallback = entry.title().unwrap_or(&entry.key);
            letters(fallback, 3)
        }
        1 => letters(&people[0].family, 3),
        2..=4 => people.iter().map(|p| letters(&p.family, 1)).collect(),
        _ => {
            let initials: String = people[..3].iter().map(|p| letters(&p.family, 1)).collect();
            format!("{}+", initials)
        }
    }
}

/// Family names and year: `[Smith 2020]`, `[Smith and Doe 2020]`,
/// `[Smith et al. 2020]`.
#[derive(Debug, Default)]
pub struct AuthorYear;

impl LabelStyle for AuthorYear {
    fn name(&self) -> &'static str {
        "author_year"
    }

    fn format_labels(&self, entries: &[&Entry]) -> Vec<String> {
        let bases: Vec<String> = entries
            .iter()
            .map(|entry| {
                let people = contributors(entry);
                let names = match people.len() {
                    0 => entry.title().unwrap_or(&entry.key).to_string(),
                    1 => people[0].family.clone(),
                    2 => format!("{} and {}", people[0].family, people[1].family),
                    _ => format!("{} et al.", people[0].family),
                };
                format!("{} {}", names, entry.year().unwrap_or("n.d."))
            })
            .collect();

        disambiguate(&bases)
            .into_iter()
            .map(|label| format!("[{}]", label))
            .collect()
    }
}

fn contributors(entry: &Entry) -> &[Person] {
    if entry.authors.is_empty() {
        &entry.editors
    } else {
        &entry.authors
    }
}

/// Appends `a`, `b`, ... to every label that occurs more than once, skipping
/// suffixed forms that are already in use.
fn disambiguate(bases: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for base in bases {
        *counts.entry(base.as_str()).or_insert(0) += 1;
    }

    let mut taken: HashSet<String> = bases
        .iter()
        .filter(|b| counts[b.as_str()] == 1)
        .cloned()
        .collect();
    let mut next: HashMap<&str, usize> = HashMap::new();

    bases
        .iter()
        .map(|base| {
            if counts[base.as_str()] == 1 {
                return base.clone();
            }
            let n = next.entry(base.as_str()).or_insert(0);
            loop {
                let candidate = format!("{}{}", base, letter_suffix(*n));
                *n += 1;
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

/// 0 -> "a", 25 -> "z", 26 -> "aa".
fn letter_suffix(n: usize) -> String {
    let letter = char::from(b'a' + (n % 26) as u8);
    if n < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter_suffix(n / 26 - 1), letter)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Label styles by name.
pub struct LabelStyles {
    styles: BTreeMap<&'static str, Arc<dyn LabelStyle>>,
}

impl LabelStyles {
    /// A registry with no styles.
    pub fn empty() -> Self {
        LabelStyles {
            styles: BTreeMap::new(),
        }
    }

    /// A registry holding the builtin styles.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(NumberBrackets);
        registry.register(Alpha);
        registry.register(AuthorYear);
        registry
    }

    /// Registers `style` under its own name, replacing any previous style of
    /// that name.
    pub fn register<S: LabelStyle + 'static>(&mut self, style: S) {
        self.styles.insert(style.name(), Arc::new(style));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LabelStyle>, LabelError> {
        self.styles
            .get(name)
            .cloned()
            .ok_or_else(|| LabelError::UnknownStyle {
                name: name.to_string(),
                available: self.names().iter().map(|n| n.to_string()).collect(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.styles.keys().copied().collect()
    }
}

impl Default for LabelStyles {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(family: &str) -> Person {
        Person {
            family: family.to_string(),
            ..Default::default()
        }
    }

    fn entry(key: &str, authors: &[&str], year: &str) -> Entry {
        Entry {
            key: key.to_string(),
            entry_type: "article".to_string(),
            authors: authors.iter().map(|a| person(a)).collect(),
            fields: BTreeMap::from([("year".to_string(), year.to_string())]),
            ..Default::default()
        }
    }

    fn bibliography(entries: Vec<Entry>) -> Bibliography {
        entries.into_iter().collect()
    }

    #[test]
    fn test_number_brackets_follows_insertion_order() {
        // Given: smith2020 added before jones2019
        let bib = bibliography(vec![
            entry("smith2020", &["Smith"], "2020"),
            entry("jones2019", &["Jones"], "2019"),
        ]);

        // When: we assign number_brackets labels
        let labels = assign_labels(&NumberBrackets, &bib).unwrap();

        // Then: numbering follows the bibliography order
        assert_eq!(labels.get("smith2020").unwrap().text, "[1]");
        assert_eq!(labels.get("jones2019").unwrap().text, "[2]");
        assert_eq!(labels.get("jones2019").unwrap().anchor(), "reference2");
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let bib = bibliography(vec![
            entry("a", &["Smith"], "2020"),
            entry("b", &["Smith"], "2020"),
            entry("c", &["Doe", "Roe"], "2021"),
        ]);

        for style in [&NumberBrackets as &dyn LabelStyle, &Alpha, &AuthorYear] {
            let first = assign_labels(style, &bib).unwrap();
            let second = assign_labels(style, &bib).unwrap();
            assert_eq!(first, second, "style {} is not deterministic", style.name());
        }
    }

    #[test]
    fn test_empty_bibliography_gives_empty_labels() {
        let labels = assign_labels(&NumberBrackets, &Bibliography::new()).unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_alpha_labels() {
        let bib = bibliography(vec![
            entry("single", &["Smith"], "2020"),
            entry("pair", &["Doe", "Roe"], "1999"),
            entry("many", &["Ames", "Bell", "Cole", "Dunn", "Eddy"], "2011"),
        ]);

        let labels = assign_labels(&Alpha, &bib).unwrap();

        assert_eq!(labels.get("single").unwrap().text, "[Smi20]");
        assert_eq!(labels.get("pair").unwrap().text, "[DR99]");
        assert_eq!(labels.get("many").unwrap().text, "[ABC+11]");
    }

    #[test]
    fn test_alpha_disambiguates_collisions() {
        // Given: two entries that would both be labelled Smi20
        let bib = bibliography(vec![
            entry("first", &["Smith"], "2020"),
            entry("second", &["Smithers"], "2020"),
        ]);

        // When: we assign alpha labels
        let labels = assign_labels(&Alpha, &bib).unwrap();

        // Then: both get a suffix, in order
        assert_eq!(labels.get("first").unwrap().text, "[Smi20a]");
        assert_eq!(labels.get("second").unwrap().text, "[Smi20b]");
    }

    #[test]
    fn test_author_year_labels() {
        let bib = bibliography(vec![
            entry("one", &["Smith"], "2020"),
            entry("two", &["Smith", "Doe"], "2020"),
            entry("three", &["Smith", "Doe", "Roe"], "2020"),
        ]);

        let labels = assign_labels(&AuthorYear, &bib).unwrap();

        assert_eq!(labels.get("one").unwrap().text, "[Smith 2020]");
        assert_eq!(labels.get("two").unwrap().text, "[Smith and Doe 2020]");
        assert_eq!(labels.get("three").unwrap().text, "[Smith et al. 2020]");
        assert_eq!(AuthorYear.inline_text("[Smith 2020]"), "Smith 2020");
    }

    #[test]
    fn test_inline_text_strips_brackets() {
        assert_eq!(NumberBrackets.inline_text("[12]"), "12");
    }

    struct Constant;

    impl LabelStyle for Constant {
        fn name(&self) -> &'static str {
            "constant"
        }

        fn format_labels(&self, entries: &[&Entry]) -> Vec<String> {
            entries.iter().map(|_| "[x]".to_string()).collect()
        }
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let bib = bibliography(vec![entry("a", &[], "2020"), entry("b", &[], "2020")]);

        let err = assign_labels(&Constant, &bib).unwrap_err();

        match err {
            LabelError::DuplicateLabel { first, second, .. } => {
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("Expected DuplicateLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = LabelStyles::builtin();
        assert_eq!(registry.names(), vec!["alpha", "author_year", "number_brackets"]);
        assert!(registry.get(DEFAULT_LABEL_STYLE).is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(LabelError::UnknownStyle { .. })
        ));

        registry.register(Constant);
        assert_eq!(registry.get("constant").unwrap().name(), "constant");
    }

    #[test]
    fn test_letter_suffix() {
        assert_eq!(letter_suffix(0), "a");
        assert_eq!(letter_suffix(25), "z");
        assert_eq!(letter_suffix(26), "aa");
    }
}
