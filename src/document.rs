use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text_by_pages;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One page (or unit) of source text with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Normalized text of the page
    pub text: String,
    /// File the text was read from
    pub source: PathBuf,
    /// Zero-based page index inside `source`
    pub page: usize,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<PathBuf>, page: usize) -> Self {
        Document {
            text: text.into(),
            source: source.into(),
            page,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Kinds of file the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Pdf,
    Text,
}

fn source_kind(path: &Path) -> Option<SourceKind> {
    let mime = from_path(path).first()?;
    let mime = mime.essence_str();
    if mime.starts_with("application/pdf") {
        Some(SourceKind::Pdf)
    } else if mime.starts_with("text/") {
        Some(SourceKind::Text)
    } else {
        None
    }
}

/// Loads every PDF and plain-text file found under a directory
#[derive(Debug, Default, Clone)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        DocumentLoader
    }

    /// Walk `dir` recursively and return one document per non-empty page.
    ///
    /// Files are visited in file-name order so repeated runs produce the same
    /// sequence.
    pub fn load<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<Document>> {
        let dir = dir.as_ref();
        info!("Starting to load documents from path: {}", dir.display());

        if !dir.exists() {
            return Err(RagError::NotFound(dir.display().to_string()));
        }

        let files = find_source_files(dir)?;
        info!("Found {} document files to process", files.len());

        let mut documents = Vec::new();
        for (path, kind) in &files {
            let pages = read_pages(path, *kind)?;
            for (page, text) in pages.into_iter().enumerate() {
                if text.is_empty() {
                    warn!("Skipping empty page {} of {}", page, path.display());
                    continue;
                }
                documents.push(Document::new(text, path.clone(), page));
            }
        }

        let total_chars: usize = documents.iter().map(Document::char_count).sum();
        info!(
            "Loaded {} pages from {} files ({} characters)",
            documents.len(),
            files.len(),
            total_chars
        );

        Ok(documents)
    }
}

fn find_source_files(dir: &Path) -> Result<Vec<(PathBuf, SourceKind)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            RagError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        match source_kind(entry.path()) {
            Some(kind) => files.push((entry.path().to_path_buf(), kind)),
            None => debug!("Ignoring unsupported file: {}", entry.path().display()),
        }
    }
    Ok(files)
}

/// Read a file and return its normalized pages
fn read_pages(path: &Path, kind: SourceKind) -> Result<Vec<String>> {
    match kind {
        SourceKind::Pdf => {
            debug!("Processing PDF document: {}", path.display());
            let pages = extract_text_by_pages(path).map_err(|e| {
                RagError::InvalidInput(format!(
                    "failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?;
            debug!("Extracted {} pages from {}", pages.len(), path.display());
            Ok(pages.iter().map(String::as_str).map(normalize_whitespace).collect())
        }
        SourceKind::Text => {
            debug!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)?;
            Ok(vec![normalize_whitespace(&content)])
        }
    }
}

/// Collapse extraction noise: drop CRs, squeeze runs of spaces, and cap blank
/// lines at one paragraph break
fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut pending_newlines = 0;
    let mut prev = ' ';

    for c in text.chars().filter(|c| *c != '\r') {
        if c == '\n' {
            pending_newlines += 1;
            continue;
        }
        if pending_newlines > 0 {
            normalized.push_str(if pending_newlines >= 2 { "\n\n" } else { "\n" });
            pending_newlines = 0;
            prev = '\n';
        }
        if c == ' ' && prev == ' ' {
            continue;
        }
        normalized.push(c);
        prev = c;
    }

    normalized.trim().to_string()
}
