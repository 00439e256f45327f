//! Build orchestration.
//!
//! The host site generator is an injected collaborator: it owns the pages and
//! delivers two signals, build start and page ready. [`ReferencesPlugin`]
//! answers them. Everything derived from the bibliography lives in a
//! [`BuildContext`] created at build start and replaced at the next build.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::labels::{assign_labels, LabelError, LabelStyle, LabelStyles, Labels};
use crate::markers::{MarkerError, MarkerSyntax};
use crate::processor::{append_reference_section, render_references, ReferenceList};
use crate::refs::{load_bibliography, load_file, Bibliography, BibliographyFormat, LoadError};
use crate::rewrite::{RewriteError, Rewriter};
use crate::style::{CitationStyle, CitationStyles, StyleError};

/// Page metadata naming a page-specific bibliography file.
pub const BIBLIOGRAPHY_KEY: &str = "bibliography";

/// Page metadata overriding the format guessed from that file's extension.
pub const BIBLIOGRAPHY_FORMAT_KEY: &str = "bibliography_format";

/// Errors that abort a build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("{page} contains citation markers but no bibliography is configured (set REFERENCES_BIB_FILES)")]
    NoBibliography { page: String },

    #[error("page signal received before the build started")]
    NotStarted,

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A generated page as seen by the plugin.
pub trait Page {
    /// Name used in diagnostics, e.g. the output path.
    fn name(&self) -> &str;

    fn metadata(&self, _key: &str) -> Option<&str> {
        None
    }

    /// The fully rendered body.
    fn body(&self) -> &str;

    fn set_body(&mut self, body: String);
}

/// The two signals a host delivers to a content plugin.
pub trait Signals {
    /// Called once per build, before any page.
    fn on_build_start(&mut self, settings: &Settings) -> Result<(), BuildError>;

    /// Called for each page after its body is rendered and before it is written.
    fn on_page_ready(&mut self, page: &mut dyn Page) -> Result<(), BuildError>;
}

/// A site generator able to run a build.
pub trait Host {
    fn settings(&self) -> &Settings;

    /// Calls `ready` once per page, in a stable order, and persists whatever
    /// the callback changed. Stops at the first error.
    fn for_each_page(
        &mut self,
        ready: &mut dyn FnMut(&mut dyn Page) -> Result<(), BuildError>,
    ) -> Result<(), BuildError>;
}

/// Runs one build: the build-start signal, then one page-ready signal per page.
pub fn run_build<H, S>(host: &mut H, signals: &mut S) -> Result<(), BuildError>
where
    H: Host + ?Sized,
    S: Signals + ?Sized,
{
    let settings = host.settings().clone();
    signals.on_build_start(&settings)?;
    host.for_each_page(&mut |page: &mut dyn Page| signals.on_page_ready(page))
}

/// A page held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPage {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    pub body: String,
}

impl MemoryPage {
    pub fn new(name: &str, body: &str) -> Self {
        MemoryPage {
            name: name.to_string(),
            metadata: BTreeMap::new(),
            body: body.to_string(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

impl Page for MemoryPage {
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
        self.body = body;
    }
}

/// A bibliography with its labels and rendered reference list.
#[derive(Debug, Clone, Default)]
pub struct References {
    pub bibliography: Bibliography,
    pub labels: Labels,
    pub list: ReferenceList,
}

impl References {
    pub fn build(
        bibliography: Bibliography,
        label_style: &dyn LabelStyle,
        citation_style: &dyn CitationStyle,
    ) -> Result<Self, BuildError> {
        let labels = assign_labels(label_style, &bibliography)?;
        let list = render_references(&bibliography, &labels, citation_style);
        Ok(References {
            bibliography,
            labels,
            list,
        })
    }
}

/// Counters reported at the end of a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub pages: usize,
    pub rewritten: usize,
    pub citations: usize,
    pub unresolved: usize,
}

/// State for one build: settings, styles, and the loaded references.
pub struct BuildContext {
    settings: Settings,
    label_style: Arc<dyn LabelStyle>,
    citation_style: Arc<dyn CitationStyle>,
    syntax: MarkerSyntax,
    site: References,
    page_references: HashMap<PathBuf, References>,
    summary: BuildSummary,
}

impl BuildContext {
    /// Resolves styles and loads, labels and renders the site bibliography.
    pub fn new(
        settings: &Settings,
        label_styles: &LabelStyles,
        citation_styles: &CitationStyles,
    ) -> Result<Self, BuildError> {
        let label_style = label_styles.get(&settings.label_style)?;
        let citation_style = citation_styles.get(&settings.citation_style)?;
        let syntax = settings.marker_syntax()?;

        let bibliography = load_bibliography(&settings.bib_files)?;
        let site = References::build(bibliography, &*label_style, &*citation_style)?;

        Ok(BuildContext {
            settings: settings.clone(),
            label_style,
            citation_style,
            syntax,
            site,
            page_references: HashMap::new(),
            summary: BuildSummary::default(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The site-wide references.
    pub fn references(&self) -> &References {
        &self.site
    }

    pub fn summary(&self) -> BuildSummary {
        self.summary
    }

    /// Rewrites the citations of one page and appends its reference list.
    pub fn process_page(&mut self, page: &mut dyn Page) -> Result<(), BuildError> {
        let page_bibliography = page.metadata(BIBLIOGRAPHY_KEY).map(PathBuf::from);
        if let Some(path) = &page_bibliography {
            let format = page.metadata(BIBLIOGRAPHY_FORMAT_KEY).map(str::to_string);
            self.load_page_references(path, format.as_deref())?;
        }

        let references = match &page_bibliography {
            Some(path) => self.page_references.get(path).unwrap_or(&self.site),
            None => &self.site,
        };

        let rewriter = Rewriter::new(
            &references.list,
            &*self.label_style,
            &self.syntax,
            &self.settings.separator,
            self.settings.unresolved_policy,
        );

        self.summary.pages += 1;

        if page_bibliography.is_none() && self.settings.bib_files.is_empty() {
            if rewriter.count_markers(page.body()) > 0 {
                return Err(BuildError::NoBibliography {
                    page: page.name().to_string(),
                });
            }
            return Ok(());
        }

        let rewritten = rewriter.rewrite(page.name(), page.body())?;
        self.summary.citations += rewritten.cited.len();
        self.summary.unresolved += rewritten.unresolved.len();

        if !rewritten.changed() {
            return Ok(());
        }

        log::debug!(
            "{}: linked {} reference(s)",
            page.name(),
            rewritten.cited.len()
        );

        let mut body = rewritten.html;
        if self.settings.append_list {
            let list = references
                .list
                .to_html_for(rewritten.cited.iter().map(String::as_str));
            body = append_reference_section(&body, &list, &self.settings.list_heading);
        }
        page.set_body(body);
        self.summary.rewritten += 1;

        Ok(())
    }

    fn load_page_references(
        &mut self,
        path: &Path,
        format: Option<&str>,
    ) -> Result<(), BuildError> {
        if self.page_references.contains_key(path) {
            return Ok(());
        }

        let format = match format {
            Some(name) => name.parse::<BibliographyFormat>()?,
            None => BibliographyFormat::guess(path)?,
        };
        let bibliography: Bibliography = load_file(path, format)?.into_iter().collect();
        log::info!(
            "loaded {} entries from page bibliography {}",
            bibliography.len(),
            path.display()
        );

        let references =
            References::build(bibliography, &*self.label_style, &*self.citation_style)?;
        self.page_references.insert(path.to_path_buf(), references);
        Ok(())
    }
}

/// The references plugin: builds a [`BuildContext`] on build start and
/// rewrites each page as it becomes ready.
pub struct ReferencesPlugin {
    label_styles: LabelStyles,
    citation_styles: CitationStyles,
    context: Option<BuildContext>,
}

impl ReferencesPlugin {
    /// A plugin using the builtin label and citation styles.
    pub fn new() -> Self {
        Self::with_styles(LabelStyles::builtin(), CitationStyles::builtin())
    }

    pub fn with_styles(label_styles: LabelStyles, citation_styles: CitationStyles) -> Self {
        ReferencesPlugin {
            label_styles,
            citation_styles,
            context: None,
        }
    }

    /// The context of the current build, if one has started.
    pub fn context(&self) -> Option<&BuildContext> {
        self.context.as_ref()
    }
}

impl Default for ReferencesPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals for ReferencesPlugin {
    fn on_build_start(&mut self, settings: &Settings) -> Result<(), BuildError> {
        self.context = None;
        let context = BuildContext::new(settings, &self.label_styles, &self.citation_styles)?;
        log::info!(
            "loaded {} bibliography entries from {} file(s), labelled with {}",
            context.references().bibliography.len(),
            settings.bib_files.len(),
            settings.label_style
        );
        self.context = Some(context);
        Ok(())
    }

    fn on_page_ready(&mut self, page: &mut dyn Page) -> Result<(), BuildError> {
        self.context
            .as_mut()
            .ok_or(BuildError::NotStarted)?
            .process_page(page)
    }
}
