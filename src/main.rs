//! CLI for site-references - Link citations in generated HTML to a bibliography.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use site_references::labels::DEFAULT_LABEL_STYLE;
use site_references::style::DEFAULT_CITATION_STYLE;
use site_references::{
    load_bibliography, run_build, BuildError, CitationStyles, FsHost, LabelError, LabelStyles,
    References, ReferencesPlugin, RewriteError, Settings, UnresolvedPolicy,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Link citations in generated HTML pages to a BibTeX bibliography
#[derive(Parser)]
#[command(name = "site-references")]
#[command(version)]
#[command(after_help = "\
Examples:
  site-references process output/ --config pelicanconf.toml
  site-references process output/ --bib content/refs.bib --policy fail
  site-references labels --bib refs.bib --label-style alpha
  site-references render --bib refs.bib --citation-style minimal
  site-references styles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite citation markers in every HTML page of a site, in place
    #[command(after_help = "\
Examples:
  site-references process output/ --config site.toml
  site-references process output/ -b refs.bib -b extra.json

Marker syntax: <cite data-keys=\"a b\"></cite>, [@key], [@a; @b, p. 4]")]
    Process {
        /// Site output directory
        site: PathBuf,

        /// Settings file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Additional bibliography file (.bib or CSL-JSON), may be repeated
        #[arg(short, long)]
        bib: Vec<PathBuf>,

        /// What to do with unknown citation keys
        #[arg(short, long, value_enum)]
        policy: Option<Policy>,
    },

    /// Print the label assigned to each bibliography entry
    Labels {
        /// Bibliography file (.bib or CSL-JSON), may be repeated
        #[arg(short, long, required = true)]
        bib: Vec<PathBuf>,

        /// Label style name (see 'styles' command)
        #[arg(short, long, default_value = DEFAULT_LABEL_STYLE)]
        label_style: String,
    },

    /// Print the reference list as HTML
    Render {
        /// Bibliography file (.bib or CSL-JSON), may be repeated
        #[arg(short, long, required = true)]
        bib: Vec<PathBuf>,

        /// Label style name (see 'styles' command)
        #[arg(short, long, default_value = DEFAULT_LABEL_STYLE)]
        label_style: String,

        /// Citation style name (see 'styles' command)
        #[arg(short, long, default_value = DEFAULT_CITATION_STYLE)]
        citation_style: String,
    },

    /// List available label and citation styles
    Styles,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Warn,
    Fail,
}

impl From<Policy> for UnresolvedPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Warn => UnresolvedPolicy::Warn,
            Policy::Fail => UnresolvedPolicy::Fail,
        }
    }
}

// ---------------------------------------------------------------------------
// AppError: semantic exit codes
// ---------------------------------------------------------------------------

enum AppError {
    /// Exit 10: settings file unreadable / invalid
    Settings(String),
    /// Exit 11: bibliography file not found / invalid
    BibFile(String),
    /// Exit 12: label or citation style unknown / inconsistent
    Style(String),
    /// Exit 13: citation key not found in bibliography
    ReferenceNotFound(String),
    /// Exit 14: cannot read or write the site
    SiteIo(String),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            AppError::Settings(_) => 10,
            AppError::BibFile(_) => 11,
            AppError::Style(_) => 12,
            AppError::ReferenceNotFound(_) => 13,
            AppError::SiteIo(_) => 14,
        }
    }
}

impl From<BuildError> for AppError {
    fn from(e: BuildError) -> Self {
        let msg = e.to_string();
        match e {
            BuildError::Config(_) | BuildError::Marker(_) => AppError::Settings(msg),
            BuildError::Load(_) | BuildError::NoBibliography { .. } => AppError::BibFile(msg),
            BuildError::Label(_) | BuildError::Style(_) => AppError::Style(msg),
            BuildError::Rewrite(RewriteError::UnresolvedCitation { .. }) => {
                AppError::ReferenceNotFound(msg)
            }
            BuildError::Rewrite(_) | BuildError::Io { .. } | BuildError::NotStarted => {
                AppError::SiteIo(msg)
            }
        }
    }
}

impl From<LabelError> for AppError {
    fn from(e: LabelError) -> Self {
        AppError::Style(e.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Settings(msg) => {
                write!(
                    f,
                    "{}\n  hint: settings are TOML, e.g. REFERENCES_BIB_FILES = [\"refs.bib\"]",
                    msg
                )
            }
            AppError::BibFile(msg) => {
                write!(
                    f,
                    "{}\n  hint: use a BibTeX .bib file, or a .json file holding a CSL-JSON array or JSONL",
                    msg
                )
            }
            AppError::Style(msg) => {
                write!(
                    f,
                    "{}\n  hint: run 'site-references styles' to list the available styles",
                    msg
                )
            }
            AppError::ReferenceNotFound(msg) => {
                write!(
                    f,
                    "{}\n  hint: check that this citation key exists in your bibliography file, or use --policy warn",
                    msg
                )
            }
            AppError::SiteIo(msg) => {
                write!(
                    f,
                    "{}\n  hint: check that the site directory exists and is writable",
                    msg
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            site,
            config,
            bib,
            policy,
        } => {
            process_command(&site, config.as_deref(), bib, policy)?;
        }
        Commands::Labels { bib, label_style } => {
            labels_command(&bib, &label_style)?;
        }
        Commands::Render {
            bib,
            label_style,
            citation_style,
        } => {
            render_command(&bib, &label_style, &citation_style)?;
        }
        Commands::Styles => {
            styles_command();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Rewrite every page of a site through one build.
fn process_command(
    site: &Path,
    config: Option<&Path>,
    bib: Vec<PathBuf>,
    policy: Option<Policy>,
) -> Result<(), AppError> {
    // 1. Settings file, then command-line overrides
    let mut settings = match config {
        Some(path) => Settings::load(path).map_err(BuildError::from)?,
        None => Settings::default(),
    };
    settings.bib_files.extend(bib);
    if let Some(policy) = policy {
        settings.unresolved_policy = policy.into();
    }

    // 2. Run the build over the site directory
    let mut host = FsHost::new(site, settings);
    let mut plugin = ReferencesPlugin::new();
    run_build(&mut host, &mut plugin)?;

    // 3. Report
    if let Some(context) = plugin.context() {
        let summary = context.summary();
        eprintln!(
            "processed {} page(s), rewrote {}, linked {} citation(s), {} unresolved",
            summary.pages,
            host.written(),
            summary.citations,
            summary.unresolved
        );
    }

    Ok(())
}

/// Load, label and render the given bibliography files.
fn build_references(
    bib: &[PathBuf],
    label_style: &str,
    citation_style: &str,
) -> Result<References, AppError> {
    let bibliography = load_bibliography(bib).map_err(|e| AppError::BibFile(e.to_string()))?;
    let label_style = LabelStyles::builtin().get(label_style)?;
    let citation_style = CitationStyles::builtin()
        .get(citation_style)
        .map_err(|e| AppError::Style(e.to_string()))?;

    Ok(References::build(bibliography, &*label_style, &*citation_style)?)
}

/// Print `key<TAB>label` for every entry.
fn labels_command(bib: &[PathBuf], label_style: &str) -> Result<(), AppError> {
    let references = build_references(bib, label_style, DEFAULT_CITATION_STYLE)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (key, label) in references.labels.iter() {
        writeln!(handle, "{}\t{}", key, label.text)
            .map_err(|e| AppError::SiteIo(format!("stdout: {}", e)))?;
    }
    Ok(())
}

/// Print the full reference list.
fn render_command(
    bib: &[PathBuf],
    label_style: &str,
    citation_style: &str,
) -> Result<(), AppError> {
    let references = build_references(bib, label_style, citation_style)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", references.list.to_html())
        .map_err(|e| AppError::SiteIo(format!("stdout: {}", e)))
}

/// List available label and citation styles.
fn styles_command() {
    println!("label styles:");
    for name in LabelStyles::builtin().names() {
        println!("  {}", name);
    }
    println!("citation styles:");
    for name in CitationStyles::builtin().names() {
        println!("  {}", name);
    }
}
