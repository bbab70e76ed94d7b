//! Asynchronous invocation bridge to the document engine
//!
//! The client side ([`CallChannel`]) and the worker side ([`host`], owning
//! the [`Dispatcher`]) share nothing but messages. Results are sanitized into
//! plain [`Value`]s on the worker before they are posted back.

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod sanitize;
pub mod transport;
pub mod value;

pub use channel::{CallChannel, DEFAULT_CALL_TIMEOUT, PendingReply, Readiness};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, RemoteError, RemoteErrorKind};
pub use host::{EngineHost, spawn_engine_host};
pub use protocol::{CallEnvelope, CallId, ClientMessage, EnumTable, Handle, WorkerMessage};
pub use registry::HandleRegistry;
pub use sanitize::sanitize;
pub use transport::{InProcessTransport, Transport};
pub use value::{Scalar, Value};
