//! Uploaded document storage.
//!
//! Validates and stores documents uploaded through the admin surface.
//! Filenames are reduced to a safe basename before any filesystem touch,
//! and only the configured extensions are accepted. The retrieval core
//! itself never reads from this store; it only reads the fixed handbook
//! in the knowledge directory.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::UploadsConfig;
use crate::error::{DocentError, Result};
use crate::persistence;

/// Stores uploaded documents under a configured directory.
pub struct DocumentStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
}

/// Reduce a filename to a safe basename.
///
/// Path separators and parent components are stripped, whitespace runs
/// collapse to single underscores, and control characters are dropped.
/// Returns an empty string when nothing safe remains.
fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches('.');

    let mut out = String::with_capacity(basename.len());
    let mut last_was_space = false;
    for c in basename.chars() {
        if c.is_control() || c == ':' {
            continue;
        }
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push('_');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

impl DocumentStore {
    pub fn new(config: &UploadsConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
        }
    }

    fn validate_extension(&self, filename: &str) -> Result<()> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(DocentError::Validation {
                message: format!("Unsupported file type: '{}'", filename),
            });
        }
        Ok(())
    }

    /// Validate and save an uploaded document, returning its final path.
    pub fn save(&self, filename: &str, contents: &[u8]) -> Result<PathBuf> {
        self.validate_extension(filename)?;

        let safe_name = sanitize_filename(filename);
        if safe_name.is_empty() {
            return Err(DocentError::Validation {
                message: "Filename is empty after sanitization".into(),
            });
        }

        let path = self.dir.join(&safe_name);
        persistence::atomic_write(&path, contents)?;
        info!(file = %safe_name, bytes = contents.len(), "Stored uploaded document");
        Ok(path)
    }

    /// List stored document filenames, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a stored document by name.
    pub fn delete(&self, filename: &str) -> Result<()> {
        let safe_name = sanitize_filename(filename);
        let path = self.dir.join(&safe_name);
        if safe_name.is_empty() || !path.is_file() {
            return Err(DocentError::NotFound { path });
        }
        std::fs::remove_file(&path)?;
        info!(file = %safe_name, "Deleted uploaded document");
        Ok(())
    }
}
