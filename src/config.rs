//! Plugin settings.
//!
//! Settings are read from a TOML file. Every option accepts both a short
//! lower-case name and the Pelican-style `REFERENCES_*` name, so the options
//! can live in a site-wide settings file next to unrelated keys:
//!
//! ```toml
//! REFERENCES_BIB_FILES = ["content/refs.bib"]
//! REFERENCES_UNRESOLVED_POLICY = "fail"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::labels::DEFAULT_LABEL_STYLE;
use crate::markers::{MarkerError, MarkerSyntax, DEFAULT_PATTERN};
use crate::rewrite::UnresolvedPolicy;
use crate::style::DEFAULT_CITATION_STYLE;

/// Errors that can occur when loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// Options recognised by the references plugin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// BibTeX/CSL-JSON sources, merged in order.
    #[serde(alias = "REFERENCES_BIB_FILES")]
    pub bib_files: Vec<PathBuf>,

    #[serde(alias = "REFERENCES_LABEL_STYLE")]
    pub label_style: String,

    #[serde(alias = "REFERENCES_CITATION_STYLE")]
    pub citation_style: String,

    #[serde(alias = "REFERENCES_UNRESOLVED_POLICY")]
    pub unresolved_policy: UnresolvedPolicy,

    #[serde(alias = "REFERENCES_MARKER_TAG")]
    pub marker_tag: String,

    #[serde(alias = "REFERENCES_MARKER_ATTRIBUTE")]
    pub marker_attribute: String,

    /// Inline-text marker regex; empty disables inline markers.
    #[serde(alias = "REFERENCES_MARKER_PATTERN")]
    pub marker_pattern: String,

    /// Text between links of a multi-key citation.
    #[serde(alias = "REFERENCES_SEPARATOR")]
    pub separator: String,

    /// Append the cited references to each page that cites something.
    #[serde(alias = "REFERENCES_APPEND_LIST")]
    pub append_list: bool,

    #[serde(alias = "REFERENCES_LIST_HEADING")]
    pub list_heading: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bib_files: Vec::new(),
            label_style: DEFAULT_LABEL_STYLE.to_string(),
            citation_style: DEFAULT_CITATION_STYLE.to_string(),
            unresolved_policy: UnresolvedPolicy::Warn,
            marker_tag: "cite".to_string(),
            marker_attribute: "data-keys".to_string(),
            marker_pattern: DEFAULT_PATTERN.to_string(),
            separator: ", ".to_string(),
            append_list: true,
            list_heading: "References".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file. Relative bibliography paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings: Settings =
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            settings.resolve_paths(base);
        }
        Ok(settings)
    }

    /// Makes relative bibliography paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in &mut self.bib_files {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// The marker syntax described by these settings.
    pub fn marker_syntax(&self) -> Result<MarkerSyntax, MarkerError> {
        MarkerSyntax::new(&self.marker_tag, &self.marker_attribute, &self.marker_pattern)
    }
}
