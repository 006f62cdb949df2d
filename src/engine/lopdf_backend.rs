//! Production document backend on lopdf
//!
//! Documents are loaded fully into memory, mutated through the object map and
//! serialized with prune/renumber on save. Page-tree edits go through the
//! page's immediate parent so nested trees keep working; inheritable
//! attributes (Resources, MediaBox, Rotate) are materialized onto pages that
//! cross document boundaries.

use std::path::{Path, PathBuf};

use log::debug;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use super::{
    CompressionLevel, DocMetadata, DocumentEngine, DocumentHandle, EngineError, SaveOptions,
    TextSpec,
};

const FONT_RESOURCE: &str = "FmHelv";
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];
/// Guard against cyclic Parent chains in damaged files
const MAX_TREE_DEPTH: usize = 32;

fn backend_err(e: lopdf::Error) -> EngineError {
    EngineError::Malformed(e.to_string())
}

/// Engine backed by the pure-Rust lopdf library
#[derive(Clone, Copy, Debug, Default)]
pub struct LopdfEngine;

impl LopdfEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for LopdfEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, EngineError> {
        let doc = Document::load(path).map_err(backend_err)?;
        if doc.is_encrypted() {
            return Err(EngineError::Encrypted);
        }
        Ok(Box::new(LopdfDocument {
            doc,
            source: Some(path.to_path_buf()),
            font_id: None,
        }))
    }

    fn create(&self) -> Result<Box<dyn DocumentHandle>, EngineError> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => Vec::<Object>::new(),
                "Count" => 0,
            }),
        );
        doc.trailer.set("Root", catalog_id);
        Ok(Box::new(LopdfDocument {
            doc,
            source: None,
            font_id: None,
        }))
    }
}

struct LopdfDocument {
    doc: Document,
    source: Option<PathBuf>,
    /// Lazily created Helvetica font object shared by all drawn text
    font_id: Option<ObjectId>,
}

impl LopdfDocument {
    fn page_id(&self, index: usize) -> Result<ObjectId, EngineError> {
        self.doc
            .get_pages()
            .values()
            .nth(index)
            .copied()
            .ok_or(EngineError::PageOutOfBounds(index))
    }

    fn root_pages_id(&self) -> Result<ObjectId, EngineError> {
        let root = self
            .doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(backend_err)?;
        let catalog = self.doc.get_dictionary(root).map_err(backend_err)?;
        catalog
            .get(b"Pages")
            .and_then(Object::as_reference)
            .map_err(backend_err)
    }

    /// Look `key` up on the node and then up its Parent chain, resolving one
    /// level of indirection on the value.
    fn inherited_attr(doc: &Document, node: ObjectId, key: &[u8]) -> Option<Object> {
        let mut current = node;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = doc.get_dictionary(current).ok()?;
            if let Ok(value) = dict.get(key) {
                return match value {
                    Object::Reference(id) => doc.get_object(*id).ok().cloned(),
                    other => Some(other.clone()),
                };
            }
            current = dict.get(b"Parent").ok()?.as_reference().ok()?;
        }
        None
    }

    fn page_dict_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary, EngineError> {
        self.doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(backend_err)
    }

    fn ensure_font(&mut self) -> ObjectId {
        if let Some(id) = self.font_id {
            return id;
        }
        let id = self.doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        self.font_id = Some(id);
        id
    }

    /// Materialized Resources dictionary for a page (own or inherited)
    fn resolved_resources(&self, page: ObjectId) -> Dictionary {
        match Self::inherited_attr(&self.doc, page, b"Resources") {
            Some(Object::Dictionary(d)) => d,
            _ => Dictionary::new(),
        }
    }

    fn append_content_stream(
        &mut self,
        page: ObjectId,
        ops: Vec<Operation>,
    ) -> Result<(), EngineError> {
        let bytes = Content { operations: ops }
            .encode()
            .map_err(backend_err)?;
        let stream_id = self
            .doc
            .add_object(Object::Stream(Stream::new(dictionary! {}, bytes)));

        let dict = self.page_dict_mut(page)?;
        let contents = dict.get(b"Contents").ok().cloned();
        let combined = match contents {
            Some(Object::Array(mut kids)) => {
                kids.push(Object::Reference(stream_id));
                Object::Array(kids)
            }
            Some(existing @ Object::Reference(_)) => {
                Object::Array(vec![existing, Object::Reference(stream_id)])
            }
            _ => Object::Reference(stream_id),
        };
        dict.set("Contents", combined);
        Ok(())
    }
}

fn as_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

impl DocumentHandle for LopdfDocument {
    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32), EngineError> {
        let id = self.page_id(index)?;
        let media_box = Self::inherited_attr(&self.doc, id, b"MediaBox")
            .ok_or_else(|| EngineError::Malformed("page has no MediaBox".into()))?;
        let values: Vec<f32> = media_box
            .as_array()
            .map_err(backend_err)?
            .iter()
            .filter_map(as_number)
            .collect();
        if values.len() != 4 {
            return Err(EngineError::Malformed("malformed MediaBox".into()));
        }
        Ok(((values[2] - values[0]).abs(), (values[3] - values[1]).abs()))
    }

    fn append_pages_from(
        &mut self,
        source: &Path,
        pages: Option<&[usize]>,
    ) -> Result<(), EngineError> {
        let mut src = Document::load(source).map_err(backend_err)?;
        if src.is_encrypted() {
            return Err(EngineError::Encrypted);
        }

        src.renumber_objects_with(self.doc.max_id + 1);
        let src_pages: Vec<ObjectId> = src.get_pages().values().copied().collect();
        let selected: Vec<ObjectId> = match pages {
            None => src_pages.clone(),
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    src_pages
                        .get(i)
                        .copied()
                        .ok_or(EngineError::PageOutOfBounds(i))
                })
                .collect::<Result<_, _>>()?,
        };

        // Pin inheritable attributes onto the pages while the source tree is
        // still intact; the pages are re-parented below.
        for &pid in &selected {
            for key in INHERITABLE_KEYS {
                let on_page = src
                    .get_dictionary(pid)
                    .map(|d| d.has(key))
                    .unwrap_or(false);
                if on_page {
                    continue;
                }
                if let Some(value) = Self::inherited_attr(&src, pid, key) {
                    if let Ok(dict) = src.get_object_mut(pid).and_then(Object::as_dict_mut) {
                        dict.set(key, value);
                    }
                }
            }
        }

        let prior_count = self.doc.get_pages().len();
        let root = self.root_pages_id()?;
        let src_max_id = src.max_id;

        // Carry every source object except its tree structure; orphans are
        // pruned on save.
        for (id, obj) in src.objects {
            let is_structure = obj
                .as_dict()
                .ok()
                .and_then(|d| d.get(b"Type").ok())
                .and_then(|t| t.as_name().ok())
                .map(|name| matches!(name, b"Catalog" | b"Pages"))
                .unwrap_or(false);
            if !is_structure {
                self.doc.objects.insert(id, obj);
            }
        }
        self.doc.max_id = self.doc.max_id.max(src_max_id);

        for &pid in &selected {
            if let Ok(dict) = self.doc.get_object_mut(pid).and_then(Object::as_dict_mut) {
                dict.set("Parent", Object::Reference(root));
            }
        }

        let root_dict = self
            .doc
            .get_object_mut(root)
            .and_then(Object::as_dict_mut)
            .map_err(backend_err)?;
        let mut kids = root_dict
            .get(b"Kids")
            .and_then(Object::as_array)
            .map(Clone::clone)
            .unwrap_or_default();
        kids.extend(selected.iter().map(|&id| Object::Reference(id)));
        root_dict.set("Kids", kids);
        root_dict.set("Count", (prior_count + selected.len()) as i64);

        debug!(
            "appended {} page(s) from {}",
            selected.len(),
            source.display()
        );
        Ok(())
    }

    fn delete_page(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.page_count() {
            return Err(EngineError::PageOutOfBounds(index));
        }
        self.doc.delete_pages(&[(index + 1) as u32]);
        Ok(())
    }

    fn rotate_page(&mut self, index: usize, degrees: i32) -> Result<(), EngineError> {
        let id = self.page_id(index)?;
        let current = Self::inherited_attr(&self.doc, id, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0) as i32;
        // Rotate must stay a multiple of 90
        let normalized = ((current + degrees).rem_euclid(360) / 90) * 90;
        self.page_dict_mut(id)?
            .set("Rotate", i64::from(normalized));
        Ok(())
    }

    fn insert_blank_page(
        &mut self,
        index: usize,
        width: f32,
        height: f32,
    ) -> Result<(), EngineError> {
        let count = self.page_count();
        let root = self.root_pages_id()?;
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(dictionary! {}, Vec::new())));

        // Insert next to the page currently at `index` so nested trees stay
        // consistent; an out-of-range index appends after the last page.
        let (parent_id, kid_pos) = if count == 0 {
            (root, 0)
        } else {
            let after_last = index >= count;
            let anchor = self.page_id(index.min(count - 1))?;
            let anchor_dict = self.doc.get_dictionary(anchor).map_err(backend_err)?;
            let parent = anchor_dict
                .get(b"Parent")
                .and_then(Object::as_reference)
                .unwrap_or(root);
            let parent_dict = self.doc.get_dictionary(parent).map_err(backend_err)?;
            let pos = parent_dict
                .get(b"Kids")
                .and_then(Object::as_array)
                .map_err(backend_err)?
                .iter()
                .position(|kid| matches!(kid, Object::Reference(id) if *id == anchor))
                .unwrap_or(0);
            (parent, if after_last { pos + 1 } else { pos })
        };

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => parent_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => dictionary! {},
            "Contents" => content_id,
        });

        let parent_dict = self
            .doc
            .get_object_mut(parent_id)
            .and_then(Object::as_dict_mut)
            .map_err(backend_err)?;
        let mut kids = parent_dict
            .get(b"Kids")
            .and_then(Object::as_array)
            .map(Clone::clone)
            .unwrap_or_default();
        kids.insert(kid_pos.min(kids.len()), Object::Reference(page_id));
        parent_dict.set("Kids", kids);

        // Bump Count up the parent chain
        let mut node = parent_id;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self
                .doc
                .get_object_mut(node)
                .and_then(Object::as_dict_mut)
                .map_err(backend_err)?;
            let count = dict.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
            dict.set("Count", count + 1);
            match dict.get(b"Parent").and_then(Object::as_reference) {
                Ok(parent) => node = parent,
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn draw_text(&mut self, index: usize, spec: &TextSpec) -> Result<(), EngineError> {
        let id = self.page_id(index)?;
        let font_id = self.ensure_font();

        let opacity = spec.opacity.clamp(0.0, 1.0);
        let gs_name = format!("FmGs{}", (opacity * 100.0).round() as u8);
        let gs_id = self.doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => opacity,
            "CA" => opacity,
        });

        let mut resources = self.resolved_resources(id);
        let mut fonts = resources
            .get(b"Font")
            .and_then(Object::as_dict)
            .map(Clone::clone)
            .unwrap_or_default();
        fonts.set(FONT_RESOURCE, Object::Reference(font_id));
        resources.set("Font", fonts);
        let mut gstates = resources
            .get(b"ExtGState")
            .and_then(Object::as_dict)
            .map(Clone::clone)
            .unwrap_or_default();
        gstates.set(gs_name.as_str(), Object::Reference(gs_id));
        resources.set("ExtGState", gstates);

        let (r, g, b) = spec.color;
        let theta = spec.rotation.to_radians();
        let (sin, cos) = theta.sin_cos();
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new("gs", vec![Object::Name(gs_name.into_bytes())]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(FONT_RESOURCE.into()),
                    spec.font_size.into(),
                ],
            ),
            Operation::new("rg", vec![r.into(), g.into(), b.into()]),
            Operation::new(
                "Tm",
                vec![
                    cos.into(),
                    sin.into(),
                    (-sin).into(),
                    cos.into(),
                    spec.x.into(),
                    spec.y.into(),
                ],
            ),
            Operation::new("Tj", vec![Object::string_literal(spec.text.as_str())]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ];

        self.page_dict_mut(id)?.set("Resources", resources);
        self.append_content_stream(id, ops)
    }

    fn page_text(&self, index: usize) -> Result<String, EngineError> {
        if index >= self.page_count() {
            return Err(EngineError::PageOutOfBounds(index));
        }
        self.doc
            .extract_text(&[(index + 1) as u32])
            .map_err(backend_err)
    }

    fn set_metadata(&mut self, meta: &DocMetadata) -> Result<(), EngineError> {
        let mut info = self
            .doc
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
            .ok()
            .and_then(|id| self.doc.get_dictionary(id).ok().cloned())
            .unwrap_or_default();

        let fields = [
            ("Title", &meta.title),
            ("Author", &meta.author),
            ("Subject", &meta.subject),
            ("Keywords", &meta.keywords),
        ];
        for (key, value) in fields {
            if let Some(text) = value {
                info.set(key, Object::string_literal(text.as_str()));
            }
        }

        let info_id = self.doc.add_object(Object::Dictionary(info));
        self.doc.trailer.set("Info", Object::Reference(info_id));
        Ok(())
    }

    // lopdf reads encrypted files but cannot write them
    fn set_protection(&mut self, _password: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("encryption"))
    }

    fn is_encrypted(&self) -> bool {
        self.doc.is_encrypted()
    }

    fn save(&mut self, path: &Path, options: &SaveOptions) -> Result<(), EngineError> {
        self.doc.prune_objects();
        self.doc.renumber_objects();
        match options.compression {
            Some(CompressionLevel::Low | CompressionLevel::Medium | CompressionLevel::High) => {
                self.doc.compress();
            }
            None => {}
        }
        self.doc.save(path)?;
        Ok(())
    }

    fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
