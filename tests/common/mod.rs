//! Shared test constants and helpers for integration tests.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Two entries in file order: `smith2020` is labelled `[1]`, `jones2019` `[2]`.
pub const SAMPLE_BIB: &str = r#"
@article{smith2020,
  author  = {Smith, John},
  title   = {A Study of Things},
  journal = {Journal of Studies},
  volume  = {12},
  pages   = {1--10},
  year    = {2020}
}

@book{jones2019,
  author    = {Jones, Mary and Brown, Alan},
  title     = {The Book of Examples},
  publisher = {Example Press},
  year      = {2019}
}
"#;

/// Helper to create a temporary file with content
pub fn create_temp_file(content: &str, extension: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Writes `content` to `root/relative`, creating parent directories.
pub fn write_page(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
