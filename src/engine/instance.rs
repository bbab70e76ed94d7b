//! Document instance shared by engine backends
//!
//! A [`PageBackend`] knows how to open a document and produce per-page data.
//! [`PdfInstance`] turns it into an [`EngineInstance`]: method routing,
//! parameter decoding, layout filtering and sentence navigation.

use std::collections::HashMap;

use log::{debug, warn};

use super::heap::{EngineHeap, Region};
use super::native::{self, EnumValue, NativeValue, ResourceIds};
use super::sentences::{ParagraphSource, SentenceCursor};
use super::types::{LayoutConfigs, LoadError, Location, Markable, PageSize, PdfInfo};
use super::{methods, properties, EngineInstance, InvokeError, Params};
use crate::bridge::value::Value;

/// Page-level access to one opened document
pub trait PageBackend {
    /// Open the document from its bytes, replacing any previous one
    fn load(&mut self, bytes: &[u8]) -> Result<(), LoadError>;

    fn page_count(&self) -> usize;

    /// Unscaled page size in points
    fn page_size(&self, page: usize) -> Result<PageSize, InvokeError>;

    /// Rasterize to exactly `width` x `height` RGBA pixels
    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        background: i64,
    ) -> Result<Vec<u8>, InvokeError>;

    /// All paragraphs of a page with their sentences as inner segments
    fn paragraphs(&mut self, page: usize) -> Result<Vec<Markable>, InvokeError>;

    fn sentence_text(&mut self, page: usize, par: i32, snt: i32) -> String;

    /// Document metadata; page count, page size and file size are filled in
    /// by the instance
    fn info(&self) -> PdfInfo;

    fn page_label(&self, page: usize) -> String {
        (page + 1).to_string()
    }
}

const METHODS: &[&str] = &[
    methods::LOAD_PDF,
    methods::PAGE_SIZE,
    methods::GET_ALL_PAGE_SIZES,
    methods::GET_PAGE_IMAGE,
    methods::GET_MARKABLES,
    methods::GET_PDF_DOC_INFO,
    methods::PAGE_LABEL,
    methods::PAGE_NO_BY_LABEL,
    methods::SET_CONFIGS,
    methods::SET_CURRENT_SENTENCE,
    methods::GOTO_NEXT_SENTENCE,
    methods::GOTO_PREV_SENTENCE,
    methods::GET_SENTENCE_CONTENT,
];

const PROPERTIES: &[&str] = &[
    properties::PAGE_COUNT,
    properties::SENTENCE_VIRTUAL_PAGE_IDX,
    properties::SENTENCE_REAL_PAGE_IDX,
    properties::SENTENCE_PAR_IDX,
    properties::SENTENCE_IDX,
];

/// Layout-filtered, cached view of the backend's paragraphs
struct Pages<'a, B> {
    backend: &'a mut B,
    configs: &'a LayoutConfigs,
    cache: &'a mut HashMap<usize, Vec<Markable>>,
}

impl<B: PageBackend> Pages<'_, B> {
    fn load(&mut self, page: usize) -> Result<Vec<Markable>, InvokeError> {
        if let Some(cached) = self.cache.get(&page) {
            return Ok(cached.clone());
        }
        let configs = self.configs;
        let kept: Vec<Markable> = self
            .backend
            .paragraphs(page)?
            .into_iter()
            .filter(|m| configs.keeps(m))
            .collect();
        self.cache.insert(page, kept.clone());
        Ok(kept)
    }
}

impl<B: PageBackend> ParagraphSource for Pages<'_, B> {
    fn page_count(&self) -> usize {
        self.backend.page_count()
    }

    fn paragraphs(&mut self, page: usize) -> Vec<Markable> {
        self.load(page).unwrap_or_else(|e| {
            warn!("Paragraphs of page {page} unavailable: {e}");
            Vec::new()
        })
    }

    fn sentence_text(&mut self, page: usize, par: i32, snt: i32) -> String {
        self.backend.sentence_text(page, par, snt)
    }
}

pub struct PdfInstance<B> {
    backend: B,
    loaded: Option<Region>,
    configs: LayoutConfigs,
    cursor: SentenceCursor,
    markables: HashMap<usize, Vec<Markable>>,
    ids: ResourceIds,
}

impl<B: PageBackend> PdfInstance<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            loaded: None,
            configs: LayoutConfigs::default(),
            cursor: SentenceCursor::new(),
            markables: HashMap::new(),
            ids: ResourceIds::new(),
        }
    }

    fn pages(&mut self) -> Pages<'_, B> {
        Pages {
            backend: &mut self.backend,
            configs: &self.configs,
            cache: &mut self.markables,
        }
    }

    fn require_loaded(&self, method: &str) -> Result<(), InvokeError> {
        match self.loaded {
            Some(_) => Ok(()),
            None => Err(InvokeError::Engine(format!("{method}: no document loaded"))),
        }
    }

    fn page(&self, params: &Params<'_>, index: usize) -> Result<usize, InvokeError> {
        let page = params.index(index)?;
        let count = self.backend.page_count();
        if page >= count {
            return Err(InvokeError::Engine(format!(
                "page index {page} out of range (page count {count})"
            )));
        }
        Ok(page)
    }

    fn sentence(sentence: super::ActiveSentence) -> Result<NativeValue, InvokeError> {
        Ok(NativeValue::record(&sentence)?
            .with_field("Location", native::location(sentence.location)))
    }

    fn load_pdf(
        &mut self,
        heap: &EngineHeap,
        params: &Params<'_>,
    ) -> Result<NativeValue, InvokeError> {
        let offset = params.index(0)?;
        let len = params.index(1)?;
        if params.get(2).is_ok() {
            self.configs = params.record(2)?;
        }
        let region = Region { offset, len };
        let bytes = heap
            .read(region)
            .map_err(|e| InvokeError::Engine(e.to_string()))?;

        self.markables.clear();
        self.cursor = SentenceCursor::new();
        let outcome = match self.backend.load(bytes) {
            Ok(()) => {
                self.loaded = Some(region);
                debug!("Loaded document: {len} bytes, {} pages", self.backend.page_count());
                LoadError::None
            }
            Err(code) => {
                self.loaded = None;
                warn!("Document failed to load: {code:?}");
                code
            }
        };
        Ok(NativeValue::Enum(EnumValue {
            enum_name: LoadError::WIRE_NAME,
            code: outcome.code(),
        }))
    }

    fn page_image(&mut self, params: &Params<'_>) -> Result<NativeValue, InvokeError> {
        let page = self.page(params, 0)?;
        let background = params.int_or(1, -1)?;
        let size: PageSize = match params.get(2) {
            Ok(_) => params.record(2)?,
            Err(_) => self.backend.page_size(page)?,
        };
        let width = size.width.round().max(1.0) as u32;
        let height = size.height.round().max(1.0) as u32;
        self.backend
            .render(page, width, height, background)
            .map(NativeValue::Binary)
    }

    fn page_no_by_label(&self, label: &str) -> i64 {
        (0..self.backend.page_count())
            .find(|&p| self.backend.page_label(p) == label)
            .map_or(0, |p| p as i64 + 1)
    }

    fn doc_info(&self, params: &Params<'_>) -> Result<NativeValue, InvokeError> {
        let page = params.int_or(0, 0)?;
        let mut info = self.backend.info();
        info.page_count = self.backend.page_count() as i32;
        info.file_size = self.loaded.map_or(0, |r| r.len as u64);
        if let Ok(page) = usize::try_from(page) {
            if page < self.backend.page_count() {
                info.page_size = self.backend.page_size(page)?;
            }
        }
        NativeValue::record(&info)
    }
}

impl<B: PageBackend> EngineInstance for PdfInstance<B> {
    fn has_member(&self, name: &str) -> bool {
        METHODS.contains(&name) || PROPERTIES.contains(&name)
    }

    fn call(
        &mut self,
        heap: &EngineHeap,
        method: &str,
        params: &[Value],
    ) -> Result<NativeValue, InvokeError> {
        let params = Params::new(method, params);
        if method == methods::LOAD_PDF {
            return self.load_pdf(heap, &params);
        }
        if method == methods::SET_CONFIGS {
            self.configs = params.record(0)?;
            self.markables.clear();
            return Ok(NativeValue::NULL);
        }
        self.require_loaded(method)?;

        match method {
            methods::PAGE_SIZE => {
                let page = self.page(&params, 0)?;
                NativeValue::record(&self.backend.page_size(page)?)
            }
            methods::GET_ALL_PAGE_SIZES => {
                let sizes = (0..self.backend.page_count())
                    .map(|p| self.backend.page_size(p).and_then(|s| NativeValue::record(&s)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NativeValue::vector(&self.ids, sizes))
            }
            methods::GET_PAGE_IMAGE => self.page_image(&params),
            methods::GET_MARKABLES => {
                let page = self.page(&params, 0)?;
                let paragraphs = self.pages().load(page)?;
                let items = paragraphs
                    .iter()
                    .map(|m| native::markable(&self.ids, m))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NativeValue::vector(&self.ids, items))
            }
            methods::GET_PDF_DOC_INFO => self.doc_info(&params),
            methods::PAGE_LABEL => {
                let page = self.page(&params, 0)?;
                Ok(NativeValue::from(self.backend.page_label(page)))
            }
            methods::PAGE_NO_BY_LABEL => {
                let label = params.string(0)?;
                Ok(NativeValue::from(self.page_no_by_label(label)))
            }
            methods::SET_CURRENT_SENTENCE => {
                let page = params.int32(0)?;
                let par = params.int32_or(1, -1)?;
                let snt = params.int32_or(2, -1)?;
                let location = match params.get(3) {
                    Ok(_) => params.record::<Location>(3)?,
                    Err(_) => Location::Main,
                };
                let mut cursor = std::mem::take(&mut self.cursor);
                let sentence = cursor.set(&mut self.pages(), page, par, snt, location);
                self.cursor = cursor;
                Self::sentence(sentence)
            }
            methods::GOTO_NEXT_SENTENCE => {
                let mut cursor = std::mem::take(&mut self.cursor);
                let sentence = cursor.next(&mut self.pages());
                self.cursor = cursor;
                Self::sentence(sentence)
            }
            methods::GOTO_PREV_SENTENCE => {
                let mut cursor = std::mem::take(&mut self.cursor);
                let sentence = cursor.prev(&mut self.pages());
                self.cursor = cursor;
                Self::sentence(sentence)
            }
            methods::GET_SENTENCE_CONTENT => {
                let mut cursor = std::mem::take(&mut self.cursor);
                let text = cursor.content(&mut self.pages());
                self.cursor = cursor;
                Ok(NativeValue::from(text))
            }
            other => Err(InvokeError::UnknownMethod(other.to_string())),
        }
    }

    fn property(&self, name: &str) -> Result<NativeValue, InvokeError> {
        let sentence = self.cursor.current();
        let value = match name {
            properties::PAGE_COUNT => self.loaded.map_or(0, |_| self.backend.page_count() as i64),
            properties::SENTENCE_VIRTUAL_PAGE_IDX => i64::from(sentence.page_index),
            properties::SENTENCE_REAL_PAGE_IDX => i64::from(sentence.real_page_index),
            properties::SENTENCE_PAR_IDX => i64::from(sentence.par_index),
            properties::SENTENCE_IDX => i64::from(sentence.snt_index),
            other => return Err(InvokeError::UnknownMethod(other.to_string())),
        };
        Ok(NativeValue::from(value))
    }
}
