//! Message protocol between the client and the engine worker
//!
//! Client to worker: `{type: "call", method, params, isProperty, callId}`.
//! Worker to client: `callResult`, `callError`, and the lifecycle messages
//! `initialized` / `initializationError`. Binary payloads travel inside the
//! messages as owned buffers, so posting a message moves them to the receiver.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RemoteError;
use super::value::Value;

/// Instance creation, handled by the dispatcher itself
pub const METHOD_NEW: &str = "new";
/// Instance destruction, handled by the dispatcher itself
pub const METHOD_DELETE: &str = "delete";
/// Copies the document bytes into engine memory before the engine sees the call
pub const METHOD_LOAD_PDF: &str = "loadPdf";
/// Returns the engine-owned document buffer without invoking the instance
pub const METHOD_GET_PDF_BUFFER: &str = "getPDFBuffer";

/// Enum name -> (variant name -> code), broadcast once at initialization
pub type EnumTable = BTreeMap<String, BTreeMap<String, i64>>;

/// Unique, monotonically increasing call identifier within one channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identifier of an engine-side instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Value::from(handle.0)
    }
}

impl Handle {
    /// Read a handle back from a `new` reply or a params slot
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Self)
    }
}

/// One invocation. Produced once per call and never mutated after posting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub method: String,
    /// First element is the instance handle for instance calls
    pub params: Vec<Value>,
    pub is_property: bool,
    pub call_id: CallId,
}

impl CallEnvelope {
    /// Split the leading handle from the remaining params
    #[must_use]
    pub fn target(&self) -> Option<(Handle, &[Value])> {
        let (first, rest) = self.params.split_first()?;
        Handle::from_value(first).map(|handle| (handle, rest))
    }
}

/// Client to worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Call(CallEnvelope),
}

/// Worker to client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    Initialized { enums: EnumTable },
    InitializationError { error: String },
    CallResult { result: Value, call_id: CallId },
    CallError { error: RemoteError, call_id: CallId },
}

impl WorkerMessage {
    #[must_use]
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::CallResult { call_id, .. } | Self::CallError { call_id, .. } => Some(*call_id),
            Self::Initialized { .. } | Self::InitializationError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_message_uses_wire_field_names() {
        let msg = ClientMessage::Call(CallEnvelope {
            method: "PageCount".into(),
            params: vec![Handle(3).into()],
            is_property: true,
            call_id: CallId(7),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "call");
        assert_eq!(json["method"], "PageCount");
        assert_eq!(json["isProperty"], true);
        assert_eq!(json["callId"], 7);
    }

    #[test]
    fn worker_replies_are_tagged() {
        let msg = WorkerMessage::CallError {
            error: RemoteError::invocation("Method does not exist: nope"),
            call_id: CallId(2),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "callError");
        assert_eq!(json["callId"], 2);

        let back: WorkerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn target_requires_leading_handle() {
        let envelope = CallEnvelope {
            method: "pageSize".into(),
            params: vec![Value::from(4_u32), Value::from(1_u32)],
            is_property: false,
            call_id: CallId(0),
        };
        let (handle, rest) = envelope.target().unwrap();
        assert_eq!(handle, Handle(4));
        assert_eq!(rest, &[Value::from(1_u32)]);

        let bare = CallEnvelope {
            params: vec![],
            ..envelope
        };
        assert!(bare.target().is_none());
    }
}
