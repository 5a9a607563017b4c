use crate::content::encode_paths;
use crate::{
    AnnotationId, AnnotationRecord, AnnotationSubtype, AnnotationValue, DocumentHandle,
    NewAnnotation, PageBox, PdfEngine, PdfEngineError, VectorPath,
};
use doc_model::Rect;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Annotation dictionary keys that are part of the PDF vocabulary and never
/// reported as custom entries.
const STANDARD_KEYS: &[&[u8]] = &[
    b"Type",
    b"Subtype",
    b"Rect",
    b"Name",
    b"P",
    b"AP",
    b"AS",
    b"F",
    b"Contents",
    b"NM",
    b"M",
    b"CreationDate",
    b"Border",
    b"BS",
    b"C",
    b"CA",
    b"T",
    b"Subj",
    b"Popup",
    b"RC",
    b"IT",
    b"StructParent",
];

const MAX_INHERITANCE_DEPTH: usize = 32;

struct DocumentRecord {
    doc: Document,
    page_ids: Vec<ObjectId>,
}

#[derive(Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl std::fmt::Debug for LopdfEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LopdfEngine")
            .field("next_handle", &self.next_handle)
            .field("open_documents", &self.docs.len())
            .finish()
    }
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(bytes: &[u8]) -> Result<DocumentRecord, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        if page_ids.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(DocumentRecord { doc, page_ids })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn record_mut(&mut self, handle: DocumentHandle) -> Result<&mut DocumentRecord, PdfEngineError> {
        self.docs.get_mut(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl DocumentRecord {
    fn page_id(&self, page_index: u32) -> Result<ObjectId, PdfEngineError> {
        self.page_ids.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: self.page_ids.len() as u32,
        })
    }

    /// Looks up a page attribute, walking `/Parent` for inheritable entries.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<Object> {
        let mut current = Some(page_id);

        for _ in 0..MAX_INHERITANCE_DEPTH {
            let dict = self.doc.get_dictionary(current?).ok()?;
            if let Ok(value) = dict.get(key) {
                return Some(self.resolve(value).clone());
            }
            current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        }

        None
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(object),
            other => other,
        }
    }

    fn rect_of(&self, object: &Object) -> Option<Rect> {
        let array = self.resolve(object).as_array().ok()?;
        if array.len() != 4 {
            return None;
        }

        let mut values = [0.0_f32; 4];
        for (slot, value) in values.iter_mut().zip(array) {
            *slot = self.resolve(value).as_float().ok()?;
        }

        Some(Rect::from_corners(values[0], values[1], values[2], values[3]))
    }

    fn annotation_ids(&self, page_id: ObjectId) -> Result<Vec<ObjectId>, PdfEngineError> {
        let page = self.doc.get_dictionary(page_id)?;
        let Ok(annots) = page.get(b"Annots") else {
            return Ok(Vec::new());
        };

        let ids = match self.resolve(annots).as_array() {
            Ok(array) => array.iter().filter_map(|entry| entry.as_reference().ok()).collect(),
            Err(_) => Vec::new(),
        };

        Ok(ids)
    }

    fn set_annotation_ids(
        &mut self,
        page_id: ObjectId,
        ids: Vec<ObjectId>,
    ) -> Result<(), PdfEngineError> {
        let page = self.doc.get_dictionary_mut(page_id)?;
        if ids.is_empty() {
            page.remove(b"Annots");
        } else {
            page.set("Annots", ids.into_iter().map(Object::Reference).collect::<Vec<_>>());
        }
        Ok(())
    }

    fn read_annotation(&self, id: ObjectId) -> Option<AnnotationRecord> {
        let dict = self.doc.get_dictionary(id).ok()?;

        let subtype = match dict.get(b"Subtype").ok()? {
            Object::Name(name) => AnnotationSubtype::from_pdf_name(&String::from_utf8_lossy(name)),
            _ => return None,
        };
        let bounds = dict.get(b"Rect").ok().and_then(|rect| self.rect_of(rect)).unwrap_or_default();
        let name = match dict.get(b"Name") {
            Ok(Object::Name(name)) => Some(String::from_utf8_lossy(name).into_owned()),
            _ => None,
        };

        let mut custom = BTreeMap::new();
        for (key, value) in dict.iter() {
            if STANDARD_KEYS.contains(&key.as_slice()) {
                continue;
            }
            let value = match self.resolve(value) {
                Object::String(bytes, _) => AnnotationValue::String(bytes.clone()),
                Object::Integer(number) => AnnotationValue::Number(*number as f32),
                Object::Real(number) => AnnotationValue::Number(*number),
                Object::Name(name) => {
                    AnnotationValue::Name(String::from_utf8_lossy(name).into_owned())
                }
                _ => continue,
            };
            custom.insert(String::from_utf8_lossy(key).into_owned(), value);
        }

        Some(AnnotationRecord {
            id: AnnotationId { object: id.0, generation: id.1 },
            subtype,
            name,
            bounds,
            custom,
        })
    }

    /// Copies the page's effective resources onto the page itself and merges
    /// the given graphics states into its `ExtGState` dictionary.
    fn merge_graphics_states(
        &mut self,
        page_id: ObjectId,
        states: Dictionary,
    ) -> Result<(), PdfEngineError> {
        if states.is_empty() {
            return Ok(());
        }

        let mut resources = match self.inherited(page_id, b"Resources") {
            Some(Object::Dictionary(dict)) => dict,
            _ => Dictionary::new(),
        };
        let mut ext_states = match resources.get(b"ExtGState").map(|obj| self.resolve(obj)) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };

        for (name, state) in states.iter() {
            ext_states.set(name.clone(), state.clone());
        }
        resources.set("ExtGState", ext_states);

        self.doc.get_dictionary_mut(page_id)?.set("Resources", resources);
        Ok(())
    }

    /// Appends `bytes` as a new content stream. Existing content is wrapped in
    /// `q`/`Q` first so graphics state it leaves unbalanced does not carry over.
    fn append_content_stream(
        &mut self,
        page_id: ObjectId,
        bytes: Vec<u8>,
    ) -> Result<(), PdfEngineError> {
        let existing = match self.doc.get_dictionary(page_id)?.get(b"Contents") {
            Ok(contents) => match self.resolve(contents) {
                Object::Array(streams) => streams.clone(),
                Object::Stream(_) => vec![contents.clone()],
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        };

        let mut contents = Vec::with_capacity(existing.len() + 3);
        if !existing.is_empty() {
            let save = self.doc.add_object(Stream::new(dictionary! {}, b"q\n".to_vec()));
            let restore = self.doc.add_object(Stream::new(dictionary! {}, b"\nQ\n".to_vec()));
            contents.push(Object::Reference(save));
            contents.extend(existing);
            contents.push(Object::Reference(restore));
        }
        let appended = self.doc.add_object(Stream::new(dictionary! {}, bytes));
        contents.push(Object::Reference(appended));

        self.doc.get_dictionary_mut(page_id)?.set("Contents", contents);
        Ok(())
    }

    fn appearance_stream(
        &mut self,
        bounds: Rect,
        paths: &[VectorPath],
    ) -> Result<ObjectId, PdfEngineError> {
        let (bytes, states) = encode_paths(paths)?;
        let form = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![
                    Object::Real(bounds.x),
                    Object::Real(bounds.y),
                    Object::Real(bounds.max_x()),
                    Object::Real(bounds.max_y()),
                ],
                "Resources" => dictionary! { "ExtGState" => states },
            },
            bytes,
        );

        Ok(self.doc.add_object(form))
    }
}

fn annotation_value_object(value: AnnotationValue) -> Object {
    match value {
        AnnotationValue::String(bytes) => Object::String(bytes, StringFormat::Hexadecimal),
        AnnotationValue::Number(number) => Object::Real(number),
        AnnotationValue::Name(name) => Object::Name(name.into_bytes()),
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError> {
        let record = Self::load(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        debug!(handle = handle.raw(), pages = record.page_ids.len(), "opened document");
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.page_ids.len() as u32)
    }

    fn page_bounds(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        page_box: PageBox,
    ) -> Result<Rect, PdfEngineError> {
        let record = self.record(handle)?;
        let page_id = record.page_id(page_index)?;

        let media = record
            .inherited(page_id, b"MediaBox")
            .and_then(|object| record.rect_of(&object))
            .unwrap_or(Rect::new(0.0, 0.0, 612.0, 792.0));

        let bounds = match page_box {
            PageBox::Media => media,
            PageBox::Crop => record
                .inherited(page_id, b"CropBox")
                .and_then(|object| record.rect_of(&object))
                .unwrap_or(media),
        };

        Ok(bounds)
    }

    fn annotations(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<AnnotationRecord>, PdfEngineError> {
        let record = self.record(handle)?;
        let page_id = record.page_id(page_index)?;

        Ok(record
            .annotation_ids(page_id)?
            .into_iter()
            .filter_map(|id| record.read_annotation(id))
            .collect())
    }

    fn add_annotation(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        annotation: NewAnnotation,
    ) -> Result<AnnotationId, PdfEngineError> {
        let record = self.record_mut(handle)?;
        let page_id = record.page_id(page_index)?;
        let bounds = annotation.bounds;

        let mut dict = dictionary! {
            "Type" => "Annot",
            "Subtype" => Object::Name(annotation.subtype.as_pdf_name().as_bytes().to_vec()),
            "Rect" => vec![
                Object::Real(bounds.x),
                Object::Real(bounds.y),
                Object::Real(bounds.max_x()),
                Object::Real(bounds.max_y()),
            ],
            "F" => 4,
            "P" => Object::Reference(page_id),
        };

        if let Some(name) = annotation.name {
            dict.set("Name", Object::Name(name.into_bytes()));
        }
        for (key, value) in annotation.custom {
            dict.set(key.into_bytes(), annotation_value_object(value));
        }
        if !annotation.appearance.is_empty() {
            let appearance = record.appearance_stream(bounds, &annotation.appearance)?;
            dict.set("AP", dictionary! { "N" => Object::Reference(appearance) });
        }

        let annot_id = record.doc.add_object(Object::Dictionary(dict));
        let mut ids = record.annotation_ids(page_id)?;
        ids.push(annot_id);
        record.set_annotation_ids(page_id, ids)?;

        Ok(AnnotationId { object: annot_id.0, generation: annot_id.1 })
    }

    fn remove_annotation(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        id: AnnotationId,
    ) -> Result<(), PdfEngineError> {
        let record = self.record_mut(handle)?;
        let page_id = record.page_id(page_index)?;
        let target: ObjectId = (id.object, id.generation);

        let mut ids = record.annotation_ids(page_id)?;
        let before = ids.len();
        ids.retain(|existing| *existing != target);

        if ids.len() == before {
            return Err(PdfEngineError::AnnotationNotFound {
                page: page_index,
                object: id.object,
                generation: id.generation,
            });
        }

        record.set_annotation_ids(page_id, ids)?;
        record.doc.objects.remove(&target);
        Ok(())
    }

    fn append_page_content(
        &mut self,
        handle: DocumentHandle,
        page_index: u32,
        paths: &[VectorPath],
    ) -> Result<(), PdfEngineError> {
        if paths.is_empty() {
            return Ok(());
        }

        let record = self.record_mut(handle)?;
        let page_id = record.page_id(page_index)?;
        let (bytes, states) = encode_paths(paths)?;

        record.merge_graphics_states(page_id, states)?;
        record.append_content_stream(page_id, bytes)
    }

    fn to_bytes(&mut self, handle: DocumentHandle) -> Result<Vec<u8>, PdfEngineError> {
        let record = self.record_mut(handle)?;
        record.doc.prune_objects();

        let mut buffer = Vec::new();
        record.doc.save_to(&mut buffer)?;
        Ok(buffer)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}
