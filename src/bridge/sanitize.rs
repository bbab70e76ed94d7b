//! Result sanitization
//!
//! Converts engine-native results into plain [`Value`]s before they are posted
//! back to the client. Native sequences are materialized by indexed access and
//! released afterwards, unless an enclosing native sequence still owns them.
//! Each resource is released at most once per traversal, even when it is
//! reachable along several paths.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::engine::{NativeValue, ResourceId};

use super::value::{Scalar, Value};

/// Sanitize one engine result
#[must_use]
pub fn sanitize(value: NativeValue) -> Value {
    let mut sanitizer = Sanitizer::default();
    let out = sanitizer.visit(value, false);
    if sanitizer.released_count() > 0 {
        debug!("Sanitizer released {} native sequences", sanitizer.released_count());
    }
    out
}

#[derive(Debug, Default)]
pub struct Sanitizer {
    released: HashSet<ResourceId>,
    materialized: HashMap<ResourceId, Value>,
}

impl Sanitizer {
    /// `owned_by_parent` is true for elements read out of a native sequence,
    /// whose memory goes away with that sequence.
    pub fn visit(&mut self, value: NativeValue, owned_by_parent: bool) -> Value {
        match value {
            NativeValue::Scalar(s) => Value::Scalar(s),
            NativeValue::Binary(bytes) => Value::Binary(bytes),
            NativeValue::Enum(e) => Value::Scalar(Scalar::Int(e.code)),
            NativeValue::List(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| self.visit(item, owned_by_parent))
                    .collect(),
            ),
            NativeValue::Record(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(name, field)| (name, self.visit(field, owned_by_parent)))
                    .collect(),
            ),
            NativeValue::Sequence(seq) => {
                let id = seq.resource_id();
                if let Some(done) = self.materialized.get(&id) {
                    return done.clone();
                }
                let items: Vec<Value> = (0..seq.size())
                    .map(|i| self.visit(seq.get(i), true))
                    .collect();
                let out = Value::Sequence(items);
                if !owned_by_parent && self.released.insert(id) {
                    seq.release();
                }
                self.materialized.insert(id, out.clone());
                out
            }
        }
    }

    #[must_use]
    pub fn released_count(&self) -> usize {
        self.released.len()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::engine::{EnumValue, NativeVec, ResourceIds};

    fn ints(values: &[i64]) -> Vec<NativeValue> {
        values.iter().map(|&v| NativeValue::from(v)).collect()
    }

    #[test]
    fn enums_become_codes() {
        let value = NativeValue::Enum(EnumValue {
            enum_name: "enuLocation",
            code: 5,
        });
        assert_eq!(sanitize(value), Value::from(5_i64));
    }

    #[test]
    fn sequences_keep_order_and_length() {
        let ids = ResourceIds::new();
        let seq = NativeVec::new(&ids, ints(&[3, 1, 2]));
        let out = sanitize(NativeValue::Sequence(seq.clone()));
        assert_eq!(
            out,
            Value::Sequence(vec![Value::from(3_i64), Value::from(1_i64), Value::from(2_i64)])
        );
        assert_eq!(seq.release_count(), 1);
    }

    #[test]
    fn nested_sequences_are_released_by_their_owner_only() {
        let ids = ResourceIds::new();
        let inner = NativeVec::new(&ids, ints(&[1]));
        let outer = NativeVec::new(&ids, vec![NativeValue::Sequence(inner.clone())]);
        let out = sanitize(NativeValue::Sequence(outer.clone()));
        assert_eq!(out.as_sequence().map(<[Value]>::len), Some(1));
        assert_eq!(outer.release_count(), 1);
        assert_eq!(inner.release_count(), 0);
    }

    #[test]
    fn shared_resource_is_released_once() {
        let ids = ResourceIds::new();
        let shared = NativeVec::new(&ids, ints(&[7, 8]));
        let value = NativeValue::Record(vec![
            ("A".into(), NativeValue::Sequence(shared.clone())),
            ("B".into(), NativeValue::Sequence(shared.clone())),
        ]);
        let out = sanitize(value);
        assert_eq!(out.field("A"), out.field("B"));
        assert_eq!(shared.release_count(), 1);
        assert_eq!(Rc::strong_count(&shared), 1);
    }

    #[test]
    fn sanitizing_plain_values_is_idempotent() {
        let ids = ResourceIds::new();
        let value = NativeValue::Record(vec![
            ("Width".into(), NativeValue::from(612.0_f64)),
            (
                "Items".into(),
                NativeValue::vector(
                    &ids,
                    vec![NativeValue::from("a"), NativeValue::Binary(vec![1, 2])],
                ),
            ),
        ]);
        let once = sanitize(value);
        let twice = sanitize(NativeValue::from(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn sibling_sequences_from_one_instance_are_each_released() {
        let ids = ResourceIds::new();
        let first = NativeVec::new(&ids, ints(&[1]));
        let second = NativeVec::new(&ids, ints(&[2]));
        let out = sanitize(NativeValue::List(vec![
            NativeValue::Sequence(first.clone()),
            NativeValue::Sequence(second.clone()),
        ]));
        assert_eq!(
            out,
            Value::Sequence(vec![
                Value::Sequence(vec![Value::from(1_i64)]),
                Value::Sequence(vec![Value::from(2_i64)]),
            ])
        );
        assert_eq!(first.release_count(), 1);
        assert_eq!(second.release_count(), 1);
    }
}
