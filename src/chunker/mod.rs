//! Document chunking
//!
//! Splits document text into overlapping character windows. Each chunk is
//! the indexing unit: it carries one vector and a stable index within its
//! document.

use crate::error::{RagError, Result};

/// A contiguous slice of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub chunk_index: usize,
}

/// Character-window chunker with overlap
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::config("chunk size must be greater than zero"));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::config(format!(
                "chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
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

    /// Split `text` into ordered chunks. Windows advance by
    /// `chunk_size - chunk_overlap` characters; the final window may be
    /// shorter. Whitespace-only windows are dropped, but indices stay
    /// contiguous from 0.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            if !window.trim().is_empty() {
                chunks.push(Chunk {
                    content: window,
                    chunk_index: chunks.len(),
                });
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
