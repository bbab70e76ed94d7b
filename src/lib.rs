// Export modules for use in tests
pub mod bridge;
pub mod document;
pub mod engine;
pub mod panic_handler;
pub mod settings;
pub mod viewer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bridge::{BridgeError, CallChannel, EngineHost, spawn_engine_host};
pub use document::RemoteDocument;
pub use settings::ViewerConfig;
pub use viewer::{DocumentViewer, ViewerError, ViewerEvent};
