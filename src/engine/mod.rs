//! Document engine abstraction
//!
//! The task layer never talks to a PDF library directly. Handlers receive an
//! injected [`DocumentEngine`] and drive documents through the
//! [`DocumentHandle`] trait, so the production backend (lopdf) and the
//! in-memory test engine are interchangeable.

mod lopdf_backend;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use lopdf_backend::LopdfEngine;

use std::path::Path;

/// Errors surfaced by a document backend
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("document is damaged or not a PDF: {0}")]
    Malformed(String),

    #[error("page {0} out of bounds")]
    PageOutOfBounds(usize),

    #[error("document is encrypted")]
    Encrypted,

    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Compression preset for [`SaveOptions`], lowest quality = smallest output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionLevel {
    Low,
    Medium,
    High,
}

/// Options applied when serializing a document to disk
#[derive(Clone, Copy, Debug, Default)]
pub struct SaveOptions {
    pub compression: Option<CompressionLevel>,
}

/// Text drawn onto a page (watermarks, stamps, page numbers)
#[derive(Clone, Debug)]
pub struct TextSpec {
    pub text: String,
    /// Position in PDF points from the page's lower-left corner
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    /// Counter-clockwise rotation in degrees
    pub rotation: f32,
    /// RGB components in `[0, 1]`
    pub color: (f32, f32, f32),
    /// Fill opacity in `[0, 1]`
    pub opacity: f32,
}

impl Default for TextSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            x: 0.0,
            y: 0.0,
            font_size: 12.0,
            rotation: 0.0,
            color: (0.0, 0.0, 0.0),
            opacity: 1.0,
        }
    }
}

/// Document information entries; `None` fields are left untouched
#[derive(Clone, Debug, Default)]
pub struct DocMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

/// One open document, owned by the worker thread for the duration of a task
pub trait DocumentHandle: Send {
    fn page_count(&self) -> usize;

    /// Page dimensions in points (width, height)
    fn page_size(&self, index: usize) -> Result<(f32, f32), EngineError>;

    /// Append pages from another file on disk.
    ///
    /// `pages` selects zero-based source indices in the given order (repeats
    /// allowed); `None` appends the whole document. Encrypted sources are
    /// rejected with [`EngineError::Encrypted`].
    fn append_pages_from(
        &mut self,
        source: &Path,
        pages: Option<&[usize]>,
    ) -> Result<(), EngineError>;

    fn delete_page(&mut self, index: usize) -> Result<(), EngineError>;

    /// Add `degrees` to the page's current rotation, normalized to 0/90/180/270
    fn rotate_page(&mut self, index: usize, degrees: i32) -> Result<(), EngineError>;

    fn insert_blank_page(
        &mut self,
        index: usize,
        width: f32,
        height: f32,
    ) -> Result<(), EngineError>;

    fn draw_text(&mut self, index: usize, spec: &TextSpec) -> Result<(), EngineError>;

    fn page_text(&self, index: usize) -> Result<String, EngineError>;

    fn set_metadata(&mut self, meta: &DocMetadata) -> Result<(), EngineError>;

    /// Encrypt the document with `password` as both owner and user password.
    /// Backends without encryption support return [`EngineError::Unsupported`].
    fn set_protection(&mut self, password: &str) -> Result<(), EngineError>;

    fn is_encrypted(&self) -> bool;

    /// Serialize to `path`. Callers are expected to go through the atomic
    /// writer rather than saving to the final destination directly.
    fn save(&mut self, path: &Path, options: &SaveOptions) -> Result<(), EngineError>;

    /// The file this handle was opened from, if any
    fn source_path(&self) -> Option<&Path>;

    /// Drop any read handle on the backing file so the destination can be
    /// replaced in the overwrite-in-place case. Backends that load documents
    /// fully into memory treat this as a no-op.
    fn release_source(&mut self) {}
}

/// Factory for document handles; injected into the task runner
pub trait DocumentEngine: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, EngineError>;

    fn create(&self) -> Result<Box<dyn DocumentHandle>, EngineError>;
}
