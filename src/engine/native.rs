//! Engine-native result values
//!
//! The engine boundary tags every result explicitly instead of leaving the
//! consumer to guess from its shape: enum-like values carry their code,
//! sequence-like values are native resources with size/get/release.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::warn;
use serde::Serialize;

use super::InvokeError;
use super::types::{ContentType, Location, Markable};
use crate::bridge::value::{Scalar, Value};

/// Identity of a native resource, used to release it at most once
pub type ResourceId = u64;

/// Resource identities of one engine instance, unique within it
#[derive(Debug, Default)]
pub struct ResourceIds {
    last: Cell<ResourceId>,
}

impl ResourceIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allocate(&self) -> ResourceId {
        let id = self.last.get() + 1;
        self.last.set(id);
        id
    }
}

/// A native sequence (size/get capability) whose memory is owned by the engine
pub trait NativeSequence: fmt::Debug {
    fn resource_id(&self) -> ResourceId;
    fn size(&self) -> usize;
    fn get(&self, index: usize) -> NativeValue;
    /// Free the native memory. Must be called at most once.
    fn release(&self);
}

/// Instance of a registered enum class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumValue {
    pub enum_name: &'static str,
    pub code: i64,
}

/// Value as returned by an engine instance, before sanitization
#[derive(Clone, Debug)]
pub enum NativeValue {
    Scalar(Scalar),
    Binary(Vec<u8>),
    Enum(EnumValue),
    Sequence(Rc<dyn NativeSequence>),
    /// Plain list whose elements may still be native
    List(Vec<NativeValue>),
    Record(Vec<(String, NativeValue)>),
}

impl NativeValue {
    pub const NULL: Self = Self::Scalar(Scalar::Null);

    /// Encode a plain serializable record
    pub fn record<T: Serialize>(value: &T) -> Result<Self, InvokeError> {
        Value::encode(value)
            .map(Self::from)
            .map_err(|e| InvokeError::Engine(e.to_string()))
    }

    /// Wrap items into an engine-owned vector
    #[must_use]
    pub fn vector(ids: &ResourceIds, items: Vec<NativeValue>) -> Self {
        Self::Sequence(NativeVec::new(ids, items))
    }

    /// Append or replace a field on a record value
    #[must_use]
    pub fn with_field(self, name: &str, value: NativeValue) -> Self {
        match self {
            Self::Record(mut fields) => {
                fields.retain(|(k, _)| k != name);
                fields.push((name.to_string(), value));
                Self::Record(fields)
            }
            other => other,
        }
    }
}

impl From<Value> for NativeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(s) => Self::Scalar(s),
            Value::Binary(b) => Self::Binary(b),
            Value::Sequence(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Record(fields) => Self::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! native_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for NativeValue {
                fn from(v: $t) -> Self {
                    Self::from(Value::from(v))
                }
            }
        )*
    };
}

native_from_scalar!(bool, i32, i64, u32, usize, f32, f64, String, &str);

/// Engine-owned vector
pub struct NativeVec {
    id: ResourceId,
    items: RefCell<Option<Vec<NativeValue>>>,
    releases: Cell<usize>,
}

impl NativeVec {
    #[must_use]
    pub fn new(ids: &ResourceIds, items: Vec<NativeValue>) -> Rc<Self> {
        Rc::new(Self {
            id: ids.allocate(),
            items: RefCell::new(Some(items)),
            releases: Cell::new(0),
        })
    }

    /// How many times `release` was called
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.get()
    }
}

impl fmt::Debug for NativeVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeVec")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("releases", &self.releases.get())
            .finish()
    }
}

impl NativeSequence for NativeVec {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn size(&self) -> usize {
        self.items.borrow().as_ref().map_or(0, Vec::len)
    }

    fn get(&self, index: usize) -> NativeValue {
        match self.items.borrow().as_ref().and_then(|items| items.get(index)) {
            Some(item) => item.clone(),
            None => {
                warn!("Native vector {} read out of range at {index}", self.id);
                NativeValue::NULL
            }
        }
    }

    fn release(&self) {
        self.releases.set(self.releases.get() + 1);
        self.items.borrow_mut().take();
    }
}

/// Tag the enum fields of a markable so the sanitizer sees engine enum values
pub fn markable(ids: &ResourceIds, m: &Markable) -> Result<NativeValue, InvokeError> {
    let inner = m
        .inner_segments
        .iter()
        .map(|segment| markable(ids, segment))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NativeValue::record(m)?
        .with_field("Location", location(m.location))
        .with_field(
            "Type",
            NativeValue::Enum(EnumValue {
                enum_name: ContentType::WIRE_NAME,
                code: m.content_type.code(),
            }),
        )
        .with_field("InnerSegments", NativeValue::vector(ids, inner)))
}

#[must_use]
pub fn location(loc: Location) -> NativeValue {
    NativeValue::Enum(EnumValue {
        enum_name: Location::WIRE_NAME,
        code: loc.code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_scoped_to_their_allocator() {
        let first = ResourceIds::new();
        let second = ResourceIds::new();
        assert_eq!(first.allocate(), 1);
        assert_eq!(first.allocate(), 2);
        assert_eq!(second.allocate(), 1);

        let vec = NativeVec::new(&second, vec![NativeValue::from(1_i64)]);
        assert_eq!(vec.resource_id(), 2);
    }

    #[test]
    fn markable_vectors_get_distinct_ids() {
        let ids = ResourceIds::new();
        let m = Markable {
            page_index: 0,
            par_index: 1,
            snt_index: -1,
            bounding_box: crate::engine::BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            location: Location::Main,
            content_type: ContentType::Text,
            inner_segments: vec![],
        };
        let NativeValue::Record(fields) = markable(&ids, &m).unwrap() else {
            panic!("markable is not a record");
        };
        let inner = fields
            .iter()
            .find_map(|(k, v)| match v {
                NativeValue::Sequence(seq) if k == "InnerSegments" => Some(seq.resource_id()),
                _ => None,
            })
            .unwrap();
        assert_eq!(inner, 1);
        assert_eq!(ids.allocate(), 2);
    }
}
