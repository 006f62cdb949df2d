//! In-memory document engine for tests
//!
//! Documents are JSON files on disk, so preflight, atomic replacement and
//! backup copies all exercise real filesystem paths. An optional per-operation
//! delay gives cancellation tests a window in which to trip the flag.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    DocMetadata, DocumentEngine, DocumentHandle, EngineError, SaveOptions, TextSpec,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FakePage {
    pub width: f32,
    pub height: f32,
    pub rotation: i32,
    pub text: String,
    #[serde(default)]
    pub overlays: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FakeDocData {
    pub pages: Vec<FakePage>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Filler so serialized documents clear the minimum-size preflight
    #[serde(default)]
    pub pad: String,
}

/// Write a plain `pages`-page document to `path`
pub fn write_doc(path: &Path, pages: usize) {
    let data = FakeDocData {
        pages: (0..pages)
            .map(|i| FakePage {
                width: 595.0,
                height: 842.0,
                rotation: 0,
                text: format!("page {}", i + 1),
                overlays: Vec::new(),
            })
            .collect(),
        ..FakeDocData::default()
    };
    write_doc_data(path, &data);
}

/// Write an encrypted marker document to `path`
pub fn write_encrypted_doc(path: &Path, pages: usize) {
    let data = FakeDocData {
        encrypted: true,
        pages: (0..pages).map(|_| FakePage::default()).collect(),
        ..FakeDocData::default()
    };
    write_doc_data(path, &data);
}

pub fn write_doc_data(path: &Path, data: &FakeDocData) {
    let mut data = data.clone();
    data.pad = "x".repeat(256);
    let json = serde_json::to_string_pretty(&data).unwrap();
    std::fs::write(path, json).unwrap();
}

/// Parse a document back for assertions
pub fn read_doc(path: &Path) -> FakeDocData {
    let bytes = std::fs::read(path).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    op_delay: Duration,
}

impl FakeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every mutating operation
    #[must_use]
    pub fn with_op_delay(delay: Duration) -> Self {
        Self { op_delay: delay }
    }
}

impl DocumentEngine for FakeEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, EngineError> {
        let bytes = std::fs::read(path)?;
        let data: FakeDocData = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Malformed(e.to_string()))?;
        Ok(Box::new(FakeDoc {
            data,
            source: Some(path.to_path_buf()),
            op_delay: self.op_delay,
        }))
    }

    fn create(&self) -> Result<Box<dyn DocumentHandle>, EngineError> {
        Ok(Box::new(FakeDoc {
            data: FakeDocData::default(),
            source: None,
            op_delay: self.op_delay,
        }))
    }
}

struct FakeDoc {
    data: FakeDocData,
    source: Option<PathBuf>,
    op_delay: Duration,
}

impl FakeDoc {
    fn page(&self, index: usize) -> Result<&FakePage, EngineError> {
        self.data
            .pages
            .get(index)
            .ok_or(EngineError::PageOutOfBounds(index))
    }

    fn page_mut(&mut self, index: usize) -> Result<&mut FakePage, EngineError> {
        self.data
            .pages
            .get_mut(index)
            .ok_or(EngineError::PageOutOfBounds(index))
    }

    fn dawdle(&self) {
        if !self.op_delay.is_zero() {
            std::thread::sleep(self.op_delay);
        }
    }
}

impl DocumentHandle for FakeDoc {
    fn page_count(&self) -> usize {
        self.data.pages.len()
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32), EngineError> {
        let page = self.page(index)?;
        Ok((page.width, page.height))
    }

    fn append_pages_from(
        &mut self,
        source: &Path,
        pages: Option<&[usize]>,
    ) -> Result<(), EngineError> {
        self.dawdle();
        let bytes = std::fs::read(source)?;
        let src: FakeDocData = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Malformed(e.to_string()))?;
        if src.encrypted {
            return Err(EngineError::Encrypted);
        }
        match pages {
            None => self.data.pages.extend(src.pages),
            Some(indices) => {
                for &i in indices {
                    let page = src
                        .pages
                        .get(i)
                        .ok_or(EngineError::PageOutOfBounds(i))?
                        .clone();
                    self.data.pages.push(page);
                }
            }
        }
        Ok(())
    }

    fn delete_page(&mut self, index: usize) -> Result<(), EngineError> {
        self.dawdle();
        if index >= self.data.pages.len() {
            return Err(EngineError::PageOutOfBounds(index));
        }
        self.data.pages.remove(index);
        Ok(())
    }

    fn rotate_page(&mut self, index: usize, degrees: i32) -> Result<(), EngineError> {
        self.dawdle();
        let page = self.page_mut(index)?;
        page.rotation = (page.rotation + degrees).rem_euclid(360) / 90 * 90;
        Ok(())
    }

    fn insert_blank_page(
        &mut self,
        index: usize,
        width: f32,
        height: f32,
    ) -> Result<(), EngineError> {
        self.dawdle();
        if index > self.data.pages.len() {
            return Err(EngineError::PageOutOfBounds(index));
        }
        self.data.pages.insert(
            index,
            FakePage {
                width,
                height,
                ..FakePage::default()
            },
        );
        Ok(())
    }

    fn draw_text(&mut self, index: usize, spec: &TextSpec) -> Result<(), EngineError> {
        self.dawdle();
        let overlay = format!("{}@{:.0},{:.0}", spec.text, spec.x, spec.y);
        self.page_mut(index)?.overlays.push(overlay);
        Ok(())
    }

    fn page_text(&self, index: usize) -> Result<String, EngineError> {
        Ok(self.page(index)?.text.clone())
    }

    fn set_metadata(&mut self, meta: &DocMetadata) -> Result<(), EngineError> {
        if let Some(title) = &meta.title {
            self.data.title = Some(title.clone());
        }
        if let Some(author) = &meta.author {
            self.data.author = Some(author.clone());
        }
        if let Some(subject) = &meta.subject {
            self.data.subject = Some(subject.clone());
        }
        if let Some(keywords) = &meta.keywords {
            self.data.keywords = Some(keywords.clone());
        }
        Ok(())
    }

    fn set_protection(&mut self, password: &str) -> Result<(), EngineError> {
        self.dawdle();
        self.data.encrypted = true;
        self.data.password = Some(password.to_string());
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        self.data.encrypted
    }

    fn save(&mut self, path: &Path, _options: &SaveOptions) -> Result<(), EngineError> {
        self.dawdle();
        let mut data = self.data.clone();
        data.pad = "x".repeat(256);
        let json =
            serde_json::to_string_pretty(&data).map_err(|e| EngineError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn release_source(&mut self) {
        self.source = None;
    }
}
