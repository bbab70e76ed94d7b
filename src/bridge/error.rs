//! Bridge error kinds

use serde::{Deserialize, Serialize};

use super::protocol::CallId;

/// Errors observed by the caller of a bridged call
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("call {call_id} ({method}) timed out waiting for the engine")]
    ChannelTimeout { call_id: CallId, method: String },

    #[error("{0}")]
    Invocation(String),

    #[error("engine failed to initialize: {0}")]
    InitializationFailure(String),

    #[error("{0}")]
    ResourceConflict(String),

    #[error("engine channel disconnected")]
    Disconnected,

    #[error("unexpected reply shape: {0}")]
    Decode(String),
}

impl BridgeError {
    /// Rebuild the local error from a `callError` payload
    #[must_use]
    pub fn from_remote(error: RemoteError) -> Self {
        match error.kind {
            RemoteErrorKind::Invocation => Self::Invocation(error.message),
            RemoteErrorKind::ResourceConflict => Self::ResourceConflict(error.message),
            RemoteErrorKind::InitializationFailure => Self::InitializationFailure(error.message),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ChannelTimeout { .. })
    }
}

/// Error kinds that can be reported by the worker side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteErrorKind {
    Invocation,
    ResourceConflict,
    InitializationFailure,
}

/// Error payload of a `callError` message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn invocation(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Invocation,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::ResourceConflict,
            message: message.into(),
        }
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::InitializationFailure,
            message: message.into(),
        }
    }
}
