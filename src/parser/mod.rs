//! Test-file parsing
//!
//! Discovers suite files on disk and regroups their tests into scenarios.

mod scenario;
mod suite;

pub use scenario::{ParsedScenarios, ScenarioParser};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// File extensions recognised as suite files
pub const SUITE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid suite file {path}: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("{path}: test \"{test}\" runs unknown handler '{handler}'")]
    UnknownTest {
        path: PathBuf,
        test: String,
        handler: String,
    },

    #[error("{path}: suite \"{suite}\" uses unknown hook '{hook}'")]
    UnknownHook {
        path: PathBuf,
        suite: String,
        hook: String,
    },

    #[error("invalid grep pattern '{pattern}': {message}")]
    InvalidGrep { pattern: String, message: String },

    #[error("{path}: suite with empty description")]
    EmptyDescription { path: PathBuf },

    #[error("test directory not found: {0}")]
    MissingDir(PathBuf),
}

pub(crate) fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn is_suite_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUITE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// Every suite file below `dir`, in sorted walk order
pub fn discover_test_files(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    if !dir.is_dir() {
        return Err(ParseError::MissingDir(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ParseError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_suite_file(entry.path()) {
            files.push(entry.into_path());
        }
    }

    debug!("Discovered {} suite file(s) in {}", files.len(), dir.display());
    Ok(files)
}
