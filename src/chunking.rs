use crate::document::Document;
use crate::error::{RagError, Result};
use log::info;
use std::path::PathBuf;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// Boundaries tried in order when picking where a chunk ends
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// A window of document text with the metadata it inherits
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source: PathBuf,
    pub page: usize,
    /// Position of this chunk among the chunks of its document
    pub chunk_index: usize,
    /// Character offset of the chunk inside the document text
    pub start: usize,
}

impl Chunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Splits documents into overlapping windows of at most `chunk_size`
/// characters, cutting at the coarsest natural boundary that fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Chunker {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidInput(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidInput(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Chunker {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split every document, preserving document order
    pub fn split_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        if documents.is_empty() {
            return Err(RagError::InvalidInput(
                "no documents provided for splitting".to_string(),
            ));
        }
        info!(
            "Splitting {} documents with chunk_size={}, chunk_overlap={}",
            documents.len(),
            self.chunk_size,
            self.chunk_overlap
        );

        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.text)
                    .into_iter()
                    .enumerate()
                    .map(move |(chunk_index, (start, text))| Chunk {
                        text,
                        source: doc.source.clone(),
                        page: doc.page,
                        chunk_index,
                        start,
                    })
            })
            .collect();

        if !chunks.is_empty() {
            let total: usize = chunks.iter().map(Chunk::char_count).sum();
            info!(
                "Split documents into {} chunks (average {} characters)",
                chunks.len(),
                total / chunks.len()
            );
        }

        Ok(chunks)
    }

    /// Split one text into `(start_offset, text)` windows.
    ///
    /// Offsets and lengths are in characters, not bytes.
    pub fn split_text(&self, text: &str) -> Vec<(usize, String)> {
        let chars: Vec<char> = text.chars().collect();
        let mut windows = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            if chars.len() - start <= self.chunk_size {
                windows.push((start, chars[start..].iter().collect()));
                break;
            }

            let end = self.find_cut(&chars, start);
            windows.push((start, chars[start..end].iter().collect()));
            start = end - self.chunk_overlap;
        }

        windows
    }

    /// Pick the end of the window starting at `start`. The cut always lands
    /// past `start + chunk_overlap` so the next window makes progress.
    fn find_cut(&self, chars: &[char], start: usize) -> usize {
        let limit = start + self.chunk_size;
        let floor = start + self.chunk_overlap;

        for separator in SEPARATORS {
            let sep: Vec<char> = separator.chars().collect();
            let mut cut = limit;
            while cut > floor {
                if cut >= sep.len() && chars[cut - sep.len()..cut] == sep[..] {
                    return cut;
                }
                cut -= 1;
            }
        }

        limit
    }
}
