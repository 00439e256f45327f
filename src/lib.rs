//! site-references: bibliography and citation support for static site pipelines.
//!
//! This library provides functionality to:
//! - Load BibTeX and CSL-JSON bibliographies
//! - Assign citation labels with a pluggable label style
//! - Render a linkable reference list with a pluggable citation style
//! - Rewrite citation markers in generated HTML into links to that list
//!
//! The [`pipeline`] module wires these steps to the two signals a site
//! generator delivers: build start and page ready.

pub mod config;
pub mod labels;
pub mod markers;
pub mod pipeline;
pub mod processor;
pub mod refs;
pub mod rewrite;
pub mod site;
pub mod style;

pub use config::{ConfigError, Settings};
pub use labels::{assign_labels, Label, LabelError, LabelStyle, LabelStyles, Labels};
pub use markers::{CitationItem, MarkerSyntax};
pub use pipeline::{
    run_build, BuildContext, BuildError, BuildSummary, Host, MemoryPage, Page, References,
    ReferencesPlugin, Signals,
};
pub use processor::{render_references, ReferenceList, RenderedEntry};
pub use refs::{load_bibliography, Bibliography, BibliographyFormat, Entry, LoadError, Person};
pub use rewrite::{RewriteError, Rewriter, Rewritten, UnresolvedPolicy};
pub use site::{FilePage, FsHost};
pub use style::{CitationStyle, CitationStyles, StyleError};
