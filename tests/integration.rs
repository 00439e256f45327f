//! Integration tests using TOML fixtures.
//!
//! This test harness loads test cases from TOML files in the `fixtures/` directory
//! and runs each page through one build of the references plugin.

mod common;

use std::fs;
use std::path::Path;

use serde::Deserialize;
use site_references::pipeline::{MemoryPage, Signals};
use site_references::{BuildError, ReferencesPlugin, Settings, UnresolvedPolicy};

use common::create_temp_file;

/// A test fixture loaded from a TOML file.
#[derive(Debug, Deserialize)]
struct Fixture {
    /// Name of the test case
    name: String,
    /// Rendered page HTML
    html: String,
    /// BibTeX source; empty means no bibliography files are configured
    #[serde(default)]
    bib: String,
    #[serde(default)]
    policy: UnresolvedPolicy,
    #[serde(default)]
    label_style: Option<String>,
    #[serde(default)]
    citation_style: Option<String>,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    append_list: bool,
    /// Expected page body, compared exactly
    #[serde(default)]
    expected: Option<String>,
    /// Fragments the page body must contain
    #[serde(default)]
    expected_contains: Vec<String>,
    /// Expected error message fragment (for error tests)
    #[serde(default)]
    expected_error: Option<String>,
}

/// Load all fixtures from a directory, sorted by file name.
fn load_fixtures(dir: &Path) -> Vec<(String, Fixture)> {
    let mut fixtures = Vec::new();

    if !dir.exists() {
        return fixtures;
    }

    let mut paths: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map_or(false, |e| e == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path).unwrap();
        let fixture: Fixture = toml::from_str(&content)
            .unwrap_or_else(|e| panic!("invalid fixture {}: {}", path.display(), e));
        let name = path.file_stem().unwrap().to_string_lossy().to_string();
        fixtures.push((name, fixture));
    }

    fixtures
}

/// Runs one build over a single page and returns the rewritten body.
fn run_fixture(fixture: &Fixture) -> Result<String, BuildError> {
    let bib_file = (!fixture.bib.trim().is_empty()).then(|| create_temp_file(&fixture.bib, ".bib"));

    let mut settings = Settings {
        bib_files: bib_file.iter().map(|f| f.path().to_path_buf()).collect(),
        unresolved_policy: fixture.policy,
        append_list: fixture.append_list,
        ..Default::default()
    };
    if let Some(style) = &fixture.label_style {
        settings.label_style = style.clone();
    }
    if let Some(style) = &fixture.citation_style {
        settings.citation_style = style.clone();
    }
    if let Some(separator) = &fixture.separator {
        settings.separator = separator.clone();
    }

    let mut plugin = ReferencesPlugin::new();
    plugin.on_build_start(&settings)?;

    let mut page = MemoryPage::new("page.html", &fixture.html);
    plugin.on_page_ready(&mut page)?;
    Ok(page.body)
}

/// Run rewrite tests - process a page and verify its body.
fn run_rewrite_test(name: &str, fixture: &Fixture) {
    let body = match run_fixture(fixture) {
        Ok(body) => body,
        Err(e) => panic!("Test '{}' failed with unexpected error: {}", name, e),
    };

    if let Some(expected) = &fixture.expected {
        assert_eq!(
            body.trim(),
            expected.trim(),
            "Test '{}' output mismatch",
            name
        );
    }

    for fragment in &fixture.expected_contains {
        assert!(
            body.contains(fragment.as_str()),
            "Test '{}' output is missing '{}':\n{}",
            name,
            fragment,
            body
        );
    }
}

/// Run error tests - verify proper error handling.
fn run_error_test(name: &str, fixture: &Fixture) {
    match run_fixture(fixture) {
        Ok(_) => {
            if fixture.expected_error.is_some() {
                panic!("Test '{}' expected an error but succeeded", name);
            }
        }
        Err(e) => {
            if let Some(expected_error) = &fixture.expected_error {
                let error_msg = e.to_string();
                assert!(
                    error_msg.contains(expected_error.as_str()),
                    "Test '{}' error mismatch: expected '{}', got '{}'",
                    name,
                    expected_error,
                    error_msg
                );
            } else {
                panic!("Test '{}' failed with unexpected error: {}", name, e);
            }
        }
    }
}

#[test]
fn test_rewrite_fixtures() {
    let fixtures_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/rewrite");
    let fixtures = load_fixtures(&fixtures_dir);
    assert!(!fixtures.is_empty());

    for (name, fixture) in fixtures {
        println!("Running rewrite test: {}", fixture.name);
        run_rewrite_test(&name, &fixture);
    }
}

#[test]
fn test_error_fixtures() {
    let fixtures_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/errors");
    let fixtures = load_fixtures(&fixtures_dir);
    assert!(!fixtures.is_empty());

    for (name, fixture) in fixtures {
        println!("Running error test: {}", fixture.name);
        run_error_test(&name, &fixture);
    }
}

#[test]
fn test_rewriting_twice_is_a_no_op() {
    // Given: a page rewritten once
    let fixture = Fixture {
        name: "idempotent".to_string(),
        html: "<p>As shown in [@smith2020; @jones2019].</p>".to_string(),
        bib: common::SAMPLE_BIB.to_string(),
        policy: UnresolvedPolicy::Warn,
        label_style: None,
        citation_style: None,
        separator: None,
        append_list: true,
        expected: None,
        expected_contains: Vec::new(),
        expected_error: None,
    };
    let once = run_fixture(&fixture).unwrap();

    // When: the output goes through another build
    let again = run_fixture(&Fixture {
        html: once.clone(),
        ..fixture
    })
    .unwrap();

    // Then: nothing changes
    assert_eq!(again, once);
}
