//! Document engine contract
//!
//! The engine is consumed as an opaque service: the dispatcher creates
//! instances, invokes methods and reads properties by name, and sanitizes the
//! [`NativeValue`] results before they cross back to the client.

pub mod heap;
pub mod instance;
#[cfg(feature = "pdf")]
pub mod mupdf_engine;
pub mod native;
pub mod sentences;
pub mod types;

use serde::de::DeserializeOwned;

use crate::bridge::value::Value;

pub use heap::{EngineHeap, HeapError, Region};
pub use instance::{PageBackend, PdfInstance};
#[cfg(feature = "pdf")]
pub use mupdf_engine::MupdfEngine;
pub use native::{EnumValue, NativeSequence, NativeValue, NativeVec, ResourceId, ResourceIds};
pub use sentences::{ParagraphSource, SentenceCursor};
pub use types::{
    ActiveSentence, BoundingBox, ContentType, LayoutConfigs, LoadError, Location, Markable,
    PageSize, PdfInfo,
};

/// Engine method names
pub mod methods {
    pub const LOAD_PDF: &str = "loadPdf";
    pub const PAGE_SIZE: &str = "pageSize";
    pub const GET_ALL_PAGE_SIZES: &str = "getAllPageSizes";
    pub const GET_PAGE_IMAGE: &str = "getPageImage";
    pub const GET_MARKABLES: &str = "getMarkables";
    pub const GET_PDF_DOC_INFO: &str = "getPDFDocInfo";
    pub const PAGE_LABEL: &str = "pageLabel";
    pub const PAGE_NO_BY_LABEL: &str = "pageNoByLabel";
    pub const SET_CONFIGS: &str = "setConfigs";
    pub const SET_CURRENT_SENTENCE: &str = "setCurrentSentence";
    pub const GOTO_NEXT_SENTENCE: &str = "gotoNextSentence";
    pub const GOTO_PREV_SENTENCE: &str = "gotoPrevSentence";
    pub const GET_SENTENCE_CONTENT: &str = "getSentenceContent";
}

/// Engine property names
pub mod properties {
    pub const PAGE_COUNT: &str = "PageCount";
    pub const SENTENCE_VIRTUAL_PAGE_IDX: &str = "SentenceVirtualPageIdx";
    pub const SENTENCE_REAL_PAGE_IDX: &str = "SentenceRealPageIdx";
    pub const SENTENCE_PAR_IDX: &str = "SentenceParIdx";
    pub const SENTENCE_IDX: &str = "SentenceIdx";
}

/// An enum class registered with the engine, broadcast at initialization
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub name: &'static str,
    pub variants: Vec<(&'static str, i64)>,
}

/// The enum classes every engine in this crate registers
#[must_use]
pub fn standard_enums() -> Vec<EnumDescriptor> {
    vec![
        Location::descriptor(),
        ContentType::descriptor(),
        LoadError::descriptor(),
    ]
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    #[error("Method does not exist: {0}")]
    UnknownMethod(String),

    #[error("bad params for {method}: {reason}")]
    BadParams { method: String, reason: String },

    #[error("{0}")]
    Engine(String),
}

/// The engine module: a factory for document instances
pub trait DocumentEngine {
    fn enums(&self) -> Vec<EnumDescriptor>;

    fn create_instance(&mut self) -> Result<Box<dyn EngineInstance>, InvokeError>;
}

/// One constructed document object living on the engine side
pub trait EngineInstance {
    /// Whether `name` is a method or property of this instance
    fn has_member(&self, name: &str) -> bool;

    fn call(
        &mut self,
        heap: &EngineHeap,
        method: &str,
        params: &[Value],
    ) -> Result<NativeValue, InvokeError>;

    fn property(&self, name: &str) -> Result<NativeValue, InvokeError>;
}

/// Positional parameter access with uniform error reporting
pub struct Params<'a> {
    method: &'a str,
    values: &'a [Value],
}

impl<'a> Params<'a> {
    #[must_use]
    pub fn new(method: &'a str, values: &'a [Value]) -> Self {
        Self { method, values }
    }

    fn bad(&self, reason: String) -> InvokeError {
        InvokeError::BadParams {
            method: self.method.to_string(),
            reason,
        }
    }

    pub fn get(&self, index: usize) -> Result<&'a Value, InvokeError> {
        self.values
            .get(index)
            .ok_or_else(|| self.bad(format!("missing parameter {index}")))
    }

    pub fn int(&self, index: usize) -> Result<i64, InvokeError> {
        self.get(index)?
            .as_i64()
            .ok_or_else(|| self.bad(format!("parameter {index} is not an integer")))
    }

    /// Integer that must fit the engine's 32-bit indices
    pub fn int32(&self, index: usize) -> Result<i32, InvokeError> {
        let v = self.int(index)?;
        i32::try_from(v).map_err(|_| self.bad(format!("parameter {index} out of range: {v}")))
    }

    /// Non-negative integer, e.g. a page index
    pub fn index(&self, index: usize) -> Result<usize, InvokeError> {
        let v = self.int(index)?;
        usize::try_from(v).map_err(|_| self.bad(format!("parameter {index} is negative: {v}")))
    }

    pub fn string(&self, index: usize) -> Result<&'a str, InvokeError> {
        self.get(index)?
            .as_str()
            .ok_or_else(|| self.bad(format!("parameter {index} is not a string")))
    }

    pub fn record<T: DeserializeOwned>(&self, index: usize) -> Result<T, InvokeError> {
        self.get(index)?
            .clone()
            .decode()
            .map_err(|e| self.bad(format!("parameter {index}: {e}")))
    }

    /// Optional integer parameter with a default when absent
    pub fn int_or(&self, index: usize, default: i64) -> Result<i64, InvokeError> {
        if self.values.len() <= index {
            return Ok(default);
        }
        self.int(index)
    }

    pub fn int32_or(&self, index: usize, default: i32) -> Result<i32, InvokeError> {
        if self.values.len() <= index {
            return Ok(default);
        }
        self.int32(index)
    }
}
