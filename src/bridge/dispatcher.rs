//! Worker-side request routing
//!
//! Instance lifecycle (`new`/`delete`) and raw buffer retrieval
//! (`getPDFBuffer`) are handled here; `loadPdf` has its byte buffer moved
//! into engine memory first; every other call goes to the instance by name.
//! Until the engine reports readiness, calls are parked and replayed once
//! it does.

use log::{debug, error, info, warn};

use crate::engine::{DocumentEngine, EngineHeap, EnumDescriptor, InvokeError};

use super::error::RemoteError;
use super::protocol::{
    CallEnvelope, EnumTable, Handle, METHOD_DELETE, METHOD_GET_PDF_BUFFER, METHOD_LOAD_PDF,
    METHOD_NEW, WorkerMessage,
};
use super::registry::{HandleRegistry, INSTANCE_DOES_NOT_EXIST};
use super::sanitize::sanitize;
use super::value::Value;

enum EngineState {
    Starting,
    Ready(Box<dyn DocumentEngine>),
    Failed(String),
}

pub struct Dispatcher {
    state: EngineState,
    deferred: Vec<CallEnvelope>,
    registry: HandleRegistry,
    heap: EngineHeap,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn enum_table(descriptors: &[EnumDescriptor]) -> EnumTable {
    descriptors
        .iter()
        .map(|d| {
            (
                d.name.to_string(),
                d.variants
                    .iter()
                    .map(|(name, code)| ((*name).to_string(), *code))
                    .collect(),
            )
        })
        .collect()
}

fn invocation(err: InvokeError) -> RemoteError {
    RemoteError::invocation(err.to_string())
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EngineState::Starting,
            deferred: Vec::new(),
            registry: HandleRegistry::new(),
            heap: EngineHeap::new(),
        }
    }

    /// Handle one call. `None` means the call was parked until readiness.
    pub fn dispatch(&mut self, envelope: CallEnvelope) -> Option<WorkerMessage> {
        match &self.state {
            EngineState::Starting => {
                debug!(
                    "Deferring call {} {} until the engine is ready",
                    envelope.call_id, envelope.method
                );
                self.deferred.push(envelope);
                None
            }
            EngineState::Failed(reason) => Some(WorkerMessage::CallError {
                error: RemoteError::initialization(reason.clone()),
                call_id: envelope.call_id,
            }),
            EngineState::Ready(_) => Some(self.execute(envelope)),
        }
    }

    /// Record the outcome of engine initialization. Returns the lifecycle
    /// message followed by the replies to every parked call.
    pub fn engine_ready(
        &mut self,
        outcome: Result<Box<dyn DocumentEngine>, String>,
    ) -> Vec<WorkerMessage> {
        let deferred = std::mem::take(&mut self.deferred);
        let mut out = Vec::with_capacity(deferred.len() + 1);
        match outcome {
            Ok(engine) => {
                let enums = enum_table(&engine.enums());
                info!("Engine initialized, replaying {} deferred calls", deferred.len());
                self.state = EngineState::Ready(engine);
                out.push(WorkerMessage::Initialized { enums });
                out.extend(deferred.into_iter().map(|envelope| self.execute(envelope)));
            }
            Err(reason) => {
                error!("Engine initialization failed: {reason}");
                out.push(WorkerMessage::InitializationError {
                    error: reason.clone(),
                });
                out.extend(deferred.into_iter().map(|envelope| WorkerMessage::CallError {
                    error: RemoteError::initialization(reason.clone()),
                    call_id: envelope.call_id,
                }));
                self.state = EngineState::Failed(reason);
            }
        }
        out
    }

    fn execute(&mut self, envelope: CallEnvelope) -> WorkerMessage {
        let call_id = envelope.call_id;
        let method = envelope.method.clone();
        match self.route(envelope) {
            Ok(result) => {
                debug!("call {call_id} {method} ok");
                WorkerMessage::CallResult { result, call_id }
            }
            Err(error) => {
                debug!("call {call_id} {method} failed: {}", error.message);
                WorkerMessage::CallError { error, call_id }
            }
        }
    }

    fn route(&mut self, envelope: CallEnvelope) -> Result<Value, RemoteError> {
        let CallEnvelope {
            method,
            mut params,
            is_property,
            ..
        } = envelope;

        if method == METHOD_NEW {
            return self.create();
        }

        let handle = params
            .first()
            .and_then(Handle::from_value)
            .ok_or_else(|| RemoteError::invocation(INSTANCE_DOES_NOT_EXIST))?;

        match method.as_str() {
            METHOD_DELETE => self.delete(handle),
            METHOD_GET_PDF_BUFFER => self.pdf_buffer(handle),
            _ if is_property => {
                let instance = self.registry.instance_mut(handle)?;
                if params.len() > 1 {
                    return Err(RemoteError::invocation("Properties can't have params."));
                }
                if !instance.has_member(&method) {
                    return Err(invocation(InvokeError::UnknownMethod(method)));
                }
                instance.property(&method).map(sanitize).map_err(invocation)
            }
            _ => {
                if method == METHOD_LOAD_PDF {
                    params = self.stage_document(handle, params)?;
                }
                let instance = self.registry.instance_mut(handle)?;
                if !instance.has_member(&method) {
                    return Err(invocation(InvokeError::UnknownMethod(method)));
                }
                instance
                    .call(&self.heap, &method, &params[1..])
                    .map(sanitize)
                    .map_err(invocation)
            }
        }
    }

    fn create(&mut self) -> Result<Value, RemoteError> {
        let EngineState::Ready(engine) = &mut self.state else {
            return Err(RemoteError::initialization("engine is not ready"));
        };
        let instance = engine.create_instance().map_err(invocation)?;
        let handle = self.registry.insert(instance);
        info!("Created instance {handle}");
        Ok(Value::from(handle))
    }

    fn delete(&mut self, handle: Handle) -> Result<Value, RemoteError> {
        let retired = self.registry.remove(handle)?;
        if let Some(region) = retired.buffer {
            self.free(region.offset);
        }
        drop(retired.instance);
        info!("Deleted instance {handle}");
        Ok(Value::NULL)
    }

    fn pdf_buffer(&self, handle: Handle) -> Result<Value, RemoteError> {
        let region = self
            .registry
            .buffer(handle)?
            .ok_or_else(|| RemoteError::invocation("No document loaded."))?;
        self.heap
            .slice(region)
            .map(Value::Binary)
            .map_err(|e| RemoteError::invocation(e.to_string()))
    }

    /// Move the document bytes into engine memory and rewrite the params to
    /// `[handle, offset, len, ...rest]`
    fn stage_document(
        &mut self,
        handle: Handle,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, RemoteError> {
        // validate the handle before taking ownership of the bytes
        self.registry.buffer(handle)?;

        let mut rest = params.into_iter().skip(1);
        let bytes = rest
            .next()
            .and_then(Value::into_binary)
            .ok_or_else(|| RemoteError::invocation("loadPdf expects the document bytes"))?;

        let region = self.heap.alloc(bytes);
        if let Some(previous) = self.registry.attach_buffer(handle, region)? {
            self.free(previous.offset);
        }

        let mut staged = vec![
            Value::from(handle),
            Value::from(region.offset),
            Value::from(region.len),
        ];
        staged.extend(rest);
        Ok(staged)
    }

    fn free(&mut self, offset: usize) {
        if let Err(e) = self.heap.free(offset) {
            warn!("Engine buffer release failed: {e}");
        }
    }

    /// Destroy every live instance and release its buffer
    pub fn shutdown(&mut self) {
        let live = self.registry.drain();
        if !live.is_empty() {
            info!("Releasing {} live instances on shutdown", live.len());
        }
        for (_, retired) in live {
            if let Some(region) = retired.buffer {
                self.free(region.offset);
            }
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn heap(&self) -> &EngineHeap {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::error::RemoteErrorKind;
    use crate::bridge::protocol::CallId;
    use crate::engine::{LayoutConfigs, LoadError, PageSize};
    use crate::test_utils::{FixtureEngine, fixture_pdf_bytes};

    struct Harness {
        dispatcher: Dispatcher,
        next: u64,
    }

    impl Harness {
        fn ready() -> Self {
            let mut dispatcher = Dispatcher::new();
            let engine = FixtureEngine::with_sizes(&[(600.0, 800.0), (600.0, 400.0)]);
            dispatcher.engine_ready(Ok(Box::new(engine)));
            Self { dispatcher, next: 0 }
        }

        fn envelope(
            &mut self,
            method: &str,
            params: Vec<Value>,
            is_property: bool,
        ) -> CallEnvelope {
            self.next += 1;
            CallEnvelope {
                method: method.to_string(),
                params,
                is_property,
                call_id: CallId(self.next),
            }
        }

        fn call(
            &mut self,
            method: &str,
            params: Vec<Value>,
            is_property: bool,
        ) -> Result<Value, RemoteError> {
            let envelope = self.envelope(method, params, is_property);
            match self.dispatcher.dispatch(envelope) {
                Some(WorkerMessage::CallResult { result, .. }) => Ok(result),
                Some(WorkerMessage::CallError { error, .. }) => Err(error),
                other => panic!("unexpected reply {other:?}"),
            }
        }

        fn create(&mut self) -> Handle {
            let v = self.call(METHOD_NEW, vec![], false).unwrap();
            Handle::from_value(&v).unwrap()
        }

        fn load(&mut self, h: Handle, bytes: Vec<u8>) -> Value {
            let configs = Value::encode(&LayoutConfigs::default()).unwrap();
            self.call(METHOD_LOAD_PDF, vec![h.into(), Value::Binary(bytes), configs], false)
                .unwrap()
        }
    }

    #[test]
    fn create_delete_then_invoke_is_rejected() {
        let mut h = Harness::ready();
        let handle = h.create();
        assert_eq!(h.call(METHOD_DELETE, vec![handle.into()], false), Ok(Value::NULL));

        let err = h.call("pageSize", vec![handle.into(), 0_i64.into()], false).unwrap_err();
        assert!(err.message.contains("instance does not exist"));
        assert_eq!(err.kind, RemoteErrorKind::ResourceConflict);

        let again = h.call(METHOD_DELETE, vec![handle.into()], false).unwrap_err();
        assert!(again.message.contains("instance does not exist"));
    }

    #[test]
    fn unknown_handle_and_unknown_method_differ() {
        let mut h = Harness::ready();
        let never = h.call("pageSize", vec![Value::from(77_u32)], false).unwrap_err();
        assert_eq!(never.message, INSTANCE_DOES_NOT_EXIST);
        assert_eq!(never.kind, RemoteErrorKind::Invocation);

        let handle = h.create();
        let missing = h.call("frobnicate", vec![handle.into()], false).unwrap_err();
        assert_eq!(missing.message, "Method does not exist: frobnicate");
    }

    #[test]
    fn property_with_params_is_a_usage_error() {
        let mut h = Harness::ready();
        let handle = h.create();
        let err = h
            .call("PageCount", vec![handle.into(), 1_i64.into()], true)
            .unwrap_err();
        assert_eq!(err.message, "Properties can't have params.");
    }

    #[test]
    fn property_on_deleted_instance_reports_the_instance_first() {
        let mut h = Harness::ready();
        let handle = h.create();
        h.call(METHOD_DELETE, vec![handle.into()], false).unwrap();

        let err = h
            .call("PageCount", vec![handle.into(), 1_i64.into()], true)
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::ResourceConflict);
        assert!(err.message.contains("instance does not exist"));
    }

    #[test]
    fn load_moves_bytes_into_engine_memory() {
        let mut h = Harness::ready();
        let handle = h.create();
        let bytes = fixture_pdf_bytes();
        let code = h.load(handle, bytes.clone());
        assert_eq!(code.as_i64(), Some(LoadError::None.code()));
        assert_eq!(h.dispatcher.heap().allocated_bytes(), bytes.len());

        let count = h.call("PageCount", vec![handle.into()], true).unwrap();
        assert_eq!(count.as_i64(), Some(2));

        let buffer = h.call(METHOD_GET_PDF_BUFFER, vec![handle.into()], false).unwrap();
        assert_eq!(buffer.as_binary(), Some(bytes.as_slice()));

        let size: PageSize = h
            .call("pageSize", vec![handle.into(), 1_i64.into()], false)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(size, PageSize::new(600.0, 400.0));
    }

    #[test]
    fn buffers_are_freed_on_reload_and_delete() {
        let mut h = Harness::ready();
        let handle = h.create();
        h.load(handle, fixture_pdf_bytes());
        h.load(handle, fixture_pdf_bytes());
        assert_eq!(h.dispatcher.heap().block_count(), 1);

        h.call(METHOD_DELETE, vec![handle.into()], false).unwrap();
        assert_eq!(h.dispatcher.heap().block_count(), 0);
    }

    #[test]
    fn bad_document_reports_load_error_code() {
        let mut h = Harness::ready();
        let handle = h.create();
        let code = h.load(handle, b"not a pdf".to_vec());
        assert_eq!(code.as_i64(), Some(LoadError::Format.code()));
    }

    #[test]
    fn calls_before_readiness_are_replayed() {
        let mut dispatcher = Dispatcher::new();
        let envelope = CallEnvelope {
            method: METHOD_NEW.into(),
            params: vec![],
            is_property: false,
            call_id: CallId(1),
        };
        assert!(dispatcher.dispatch(envelope).is_none());
        assert_eq!(dispatcher.deferred_count(), 1);

        let engine = FixtureEngine::with_sizes(&[(10.0, 10.0)]);
        let out = dispatcher.engine_ready(Ok(Box::new(engine)));
        assert!(matches!(out[0], WorkerMessage::Initialized { .. }));
        assert!(matches!(out[1], WorkerMessage::CallResult { call_id: CallId(1), .. }));
        assert_eq!(dispatcher.live_instances(), 1);
    }

    #[test]
    fn failed_initialization_rejects_parked_and_later_calls() {
        let mut dispatcher = Dispatcher::new();
        let parked = CallEnvelope {
            method: METHOD_NEW.into(),
            params: vec![],
            is_property: false,
            call_id: CallId(1),
        };
        dispatcher.dispatch(parked.clone());
        let out = dispatcher.engine_ready(Err("no engine".into()));
        assert_eq!(out.len(), 2);
        let Some(WorkerMessage::CallError { error, .. }) =
            dispatcher.dispatch(CallEnvelope { call_id: CallId(2), ..parked })
        else {
            panic!("expected a call error");
        };
        assert_eq!(error.kind, RemoteErrorKind::InitializationFailure);
    }

    #[test]
    fn markables_arrive_as_plain_records() {
        let mut h = Harness::ready();
        let handle = h.create();
        h.load(handle, fixture_pdf_bytes());
        let markables = h
            .call("getMarkables", vec![handle.into(), 0_i64.into()], false)
            .unwrap();
        let items = markables.as_sequence().unwrap();
        // header paragraph is discarded by the default layout configs
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].field("Location").and_then(Value::as_i64), Some(0));
        assert_eq!(
            items[0]
                .field("InnerSegments")
                .and_then(Value::as_sequence)
                .map(<[Value]>::len),
            Some(2)
        );
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut h = Harness::ready();
        let a = h.create();
        let b = h.create();
        h.load(a, fixture_pdf_bytes());
        h.load(b, fixture_pdf_bytes());
        h.dispatcher.shutdown();
        assert_eq!(h.dispatcher.live_instances(), 0);
        assert_eq!(h.dispatcher.heap().block_count(), 0);
    }
}
