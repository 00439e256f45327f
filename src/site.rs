//! A filesystem host: every `*.html` file under an output directory is a page.
//!
//! Page metadata comes from `<meta name="..." content="...">` elements, so a page
//! can name its own bibliography with
//! `<meta name="bibliography" content="refs.bib">`. Relative paths are taken
//! from the page's directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Settings;
use crate::pipeline::{BuildError, Host, Page, BIBLIOGRAPHY_FORMAT_KEY, BIBLIOGRAPHY_KEY};
use crate::rewrite::meta_tags;

/// A generated HTML file.
#[derive(Debug, Clone)]
pub struct FilePage {
    path: PathBuf,
    name: String,
    metadata: BTreeMap<String, String>,
    body: String,
    dirty: bool,
}

impl FilePage {
    /// Reads `path`, naming the page by its path relative to `root`.
    pub fn read(root: &Path, path: &Path) -> Result<Self, BuildError> {
        let body = fs::read_to_string(path).map_err(|source| BuildError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let base = path.parent().unwrap_or(root);
        let metadata = read_metadata(&body, base);

        Ok(FilePage {
            path: path.to_path_buf(),
            name,
            metadata,
            body,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the body changed since it was read.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the body back if it changed.
    pub fn write(&mut self) -> Result<bool, BuildError> {
        if !self.dirty {
            return Ok(false);
        }
        fs::write(&self.path, &self.body).map_err(|source| BuildError::Io {
            action: "write",
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(true)
    }
}

impl Page for FilePage {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn set_body(&mut self, body: String) {
        if body != self.body {
            self.body = body;
            self.dirty = true;
        }
    }
}

/// Picks the plugin's metadata out of the page's `<meta>` elements.
///
/// Names match case-insensitively and ignore `_` and `-`, so
/// `BibliographyFormat` and `bibliography_format` are the same key. The first
/// element of each name wins.
fn read_metadata(html: &str, base: &Path) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    for (name, content) in meta_tags(html) {
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let normalized: String = name.chars().filter(|c| *c != '_' && *c != '-').collect();
        let (key, value) = match normalized.as_str() {
            "bibliography" => (
                BIBLIOGRAPHY_KEY,
                base.join(content).to_string_lossy().into_owned(),
            ),
            "bibliographyformat" => (BIBLIOGRAPHY_FORMAT_KEY, content.to_string()),
            _ => continue,
        };
        metadata.entry(key.to_string()).or_insert(value);
    }
    metadata
}

/// A site whose pages are the HTML files below `root`.
pub struct FsHost {
    root: PathBuf,
    settings: Settings,
    written: usize,
}

impl FsHost {
    pub fn new(root: impl Into<PathBuf>, settings: Settings) -> Self {
        FsHost {
            root: root.into(),
            settings,
            written: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files written by the last build.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The HTML files of the site, sorted by path.
    pub fn page_paths(&self) -> Result<Vec<PathBuf>, BuildError> {
        if !self.root.is_dir() {
            return Err(BuildError::Io {
                action: "read site directory",
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|err| BuildError::Io {
                action: "walk",
                path: err.path().unwrap_or(&self.root).to_path_buf(),
                source: err.into(),
            })?;
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
            {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }
}

impl Host for FsHost {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn for_each_page(
        &mut self,
        ready: &mut dyn FnMut(&mut dyn Page) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        self.written = 0;
        for path in self.page_paths()? {
            let mut page = FilePage::read(&self.root, &path)?;
            ready(&mut page)?;
            if page.write()? {
                log::debug!("wrote {}", page.path().display());
                self.written += 1;
            }
        }
        Ok(())
    }
}
