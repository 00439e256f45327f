//! Bibliography loading.
//!
//! Reads BibTeX/BibLaTeX (`.bib`) and CSL-JSON (`.json`, array or JSONL)
//! sources into a single ordered [`Bibliography`]. BibTeX grammar is handled
//! by the `biblatex` crate; this module only maps its entries onto our own
//! [`Entry`] model.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use biblatex::ChunksExt;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when loading a bibliography.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("bibliography file does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("cannot guess bibliography format of {} (expected a .bib or .json file)", path.display())]
    UnknownFormat { path: PathBuf },

    #[error("unknown bibliography format '{0}' (expected bibtex, biblatex or csljson)")]
    UnknownFormatName(String),
}

/// On-disk bibliography formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BibliographyFormat {
    /// BibTeX or BibLaTeX; `biblatex` reads both.
    Bibtex,
    /// CSL-JSON, either a JSON array or one object per line.
    CslJson,
}

impl BibliographyFormat {
    /// Guesses the format from a file extension.
    pub fn guess(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "bib" | "bibtex" => Ok(BibliographyFormat::Bibtex),
            "json" | "jsonl" => Ok(BibliographyFormat::CslJson),
            _ => Err(LoadError::UnknownFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

impl FromStr for BibliographyFormat {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bibtex" | "biblatex" | "bib" => Ok(BibliographyFormat::Bibtex),
            "csljson" | "csl-json" | "json" => Ok(BibliographyFormat::CslJson),
            other => Err(LoadError::UnknownFormatName(other.to_string())),
        }
    }
}

/// A contributor name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Person {
    pub family: String,
    pub given: String,
    /// Particle such as "van" or "de".
    pub prefix: String,
    pub suffix: String,
}

impl Person {
    /// Full name in reading order, e.g. "Ludwig van Beethoven Jr.".
    pub fn display_name(&self) -> String {
        [
            self.given.as_str(),
            self.prefix.as_str(),
            self.family.as_str(),
            self.suffix.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }

    fn from_biblatex(person: &biblatex::Person) -> Self {
        Person {
            family: person.name.clone(),
            given: person.given_name.clone(),
            prefix: person.prefix.clone(),
            suffix: person.suffix.clone(),
        }
    }
}

/// One bibliographic record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entry {
    /// The citation key, unique within a bibliography.
    pub key: String,
    /// Lower-case BibTeX entry type (`article`, `book`, ...).
    pub entry_type: String,
    pub authors: Vec<Person>,
    pub editors: Vec<Person>,
    /// Remaining fields by lower-case BibTeX field name, as plain text.
    pub fields: BTreeMap<String, String>,
}

impl Entry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.field("title")
    }

    /// Publication year from `year`, falling back to the leading part of `date`.
    pub fn year(&self) -> Option<&str> {
        self.field("year").or_else(|| {
            self.field("date")
                .map(|d| d.split(['-', '/']).next().unwrap_or(d))
        })
    }

    fn from_biblatex(entry: &biblatex::Entry) -> Self {
        let fields = entry
            .fields
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), "author" | "editor"))
            .map(|(name, chunks)| (name.to_lowercase(), chunks.format_verbatim()))
            .collect();

        let authors = entry
            .author()
            .map(|persons| persons.iter().map(Person::from_biblatex).collect())
            .unwrap_or_default();

        let editors = entry
            .editors()
            .map(|groups| {
                groups
                    .iter()
                    .flat_map(|(persons, _)| persons.iter().map(Person::from_biblatex))
                    .collect()
            })
            .unwrap_or_default();

        Entry {
            key: entry.key.clone(),
            entry_type: entry.entry_type.to_string().to_lowercase(),
            authors,
            editors,
            fields,
        }
    }
}

/// An ordered mapping from citation key to [`Entry`].
///
/// Iteration order is the order in which entries were first added, which is
/// the order label styles number them in.
#[derive(Debug, Clone, Default)]
pub struct Bibliography {
    entries: IndexMap<String, Entry>,
}

impl Bibliography {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Returns `false` and keeps the existing entry when the
    /// key is already present.
    pub fn insert(&mut self, entry: Entry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl FromIterator<Entry> for Bibliography {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        let mut bibliography = Bibliography::new();
        for entry in iter {
            bibliography.insert(entry);
        }
        bibliography
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Loads and merges bibliography files, in order.
///
/// The format of each file is guessed from its extension. When the same key
/// appears in more than one file, the first definition wins and a warning is
/// logged.
///
/// # Errors
///
/// Returns [`LoadError::NotFound`] for a missing path and
/// [`LoadError::Parse`] for a malformed file. There is no partial result.
pub fn load_bibliography<P: AsRef<Path>>(paths: &[P]) -> Result<Bibliography, LoadError> {
    let mut bibliography = Bibliography::new();

    for path in paths {
        let path = path.as_ref();
        let format = BibliographyFormat::guess(path)?;
        merge(&mut bibliography, load_file(path, format)?, path);
    }

    Ok(bibliography)
}

/// Loads a single bibliography file in the given format.
pub fn load_file(path: &Path, format: BibliographyFormat) -> Result<Vec<Entry>, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = match format {
        BibliographyFormat::Bibtex => parse_bibtex(&content),
        BibliographyFormat::CslJson => parse_csl_json(&content),
    };

    entries.map_err(|(line, message)| LoadError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    })
}

fn merge(bibliography: &mut Bibliography, entries: Vec<Entry>, path: &Path) {
    for entry in entries {
        let key = entry.key.clone();
        if !bibliography.insert(entry) {
            log::warn!(
                "duplicate citation key '{}' in {}, keeping the first definition",
                key,
                path.display()
            );
        }
    }
}

/// Parses BibTeX source. Errors carry a 1-based line and the parser message.
pub fn parse_bibtex(source: &str) -> Result<Vec<Entry>, (usize, String)> {
    let bibliography = biblatex::Bibliography::parse(source)
        .map_err(|e| (line_of(source, e.span.start), e.to_string()))?;

    Ok(bibliography.iter().map(Entry::from_biblatex).collect())
}

fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source
        .get(..end)
        .map_or(1, |prefix| prefix.matches('\n').count() + 1)
}

// ---------------------------------------------------------------------------
// CSL-JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CslItem {
    id: Value,
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    author: Vec<CslName>,
    #[serde(default)]
    editor: Vec<CslName>,
    #[serde(default)]
    issued: Option<CslDate>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CslName {
    #[serde(default)]
    family: String,
    #[serde(default)]
    given: String,
    #[serde(default)]
    literal: String,
    #[serde(rename = "non-dropping-particle", default)]
    particle: String,
    #[serde(default)]
    suffix: String,
}

#[derive(Debug, Deserialize)]
struct CslDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Value>>,
    #[serde(default)]
    literal: Option<String>,
}

impl From<&CslName> for Person {
    fn from(name: &CslName) -> Self {
        let family = if name.family.is_empty() {
            name.literal.clone()
        } else {
            name.family.clone()
        };
        Person {
            family,
            given: name.given.clone(),
            prefix: name.particle.clone(),
            suffix: name.suffix.clone(),
        }
    }
}

/// CSL variable name to BibTeX field name, for the fields styles render.
const CSL_FIELDS: &[(&str, &str)] = &[
    ("title", "title"),
    ("publisher", "publisher"),
    ("publisher-place", "address"),
    ("volume", "volume"),
    ("issue", "number"),
    ("page", "pages"),
    ("edition", "edition"),
    ("DOI", "doi"),
    ("URL", "url"),
    ("ISBN", "isbn"),
    ("note", "note"),
    ("genre", "type"),
];

impl CslItem {
    fn into_entry(self) -> Entry {
        let entry_type = match self.item_type.as_str() {
            "article" | "article-journal" | "article-magazine" | "article-newspaper" => "article",
            "book" => "book",
            "chapter" => "incollection",
            "paper-conference" => "inproceedings",
            "thesis" => "phdthesis",
            "report" => "techreport",
            _ => "misc",
        };

        let mut fields = BTreeMap::new();
        for (csl_name, bib_name) in CSL_FIELDS {
            if let Some(value) = self.rest.get(*csl_name).and_then(value_to_string) {
                fields.insert(bib_name.to_string(), value);
            }
        }

        if let Some(container) = self.rest.get("container-title").and_then(value_to_string) {
            let field = match entry_type {
                "article" => "journal",
                "inproceedings" | "incollection" => "booktitle",
                _ => "howpublished",
            };
            fields.insert(field.to_string(), container);
        }

        if let Some(year) = self.issued.as_ref().and_then(CslDate::year) {
            fields.insert("year".to_string(), year);
        }

        Entry {
            key: value_to_string(&self.id).unwrap_or_default(),
            entry_type: entry_type.to_string(),
            authors: self.author.iter().map(Person::from).collect(),
            editors: self.editor.iter().map(Person::from).collect(),
            fields,
        }
    }
}

impl CslDate {
    fn year(&self) -> Option<String> {
        self.date_parts
            .first()
            .and_then(|parts| parts.first())
            .and_then(value_to_string)
            .or_else(|| self.literal.clone())
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses CSL-JSON content: a JSON array, or JSONL with one object per line.
pub fn parse_csl_json(content: &str) -> Result<Vec<Entry>, (usize, String)> {
    let trimmed = content.trim();

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        let items: Vec<CslItem> =
            serde_json::from_str(trimmed).map_err(|e| (e.line(), e.to_string()))?;
        return Ok(items.into_iter().map(CslItem::into_entry).collect());
    }

    let mut entries = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: CslItem =
            serde_json::from_str(line).map_err(|e| (line_num + 1, e.to_string()))?;
        entries.push(item.into_entry());
    }

    Ok(entries)
}
