//! Client-side call channel
//!
//! Allocates call identifiers, keeps the pending-call table, applies the
//! per-call timeout and routes worker replies back to their callers. The
//! channel is owned by a single client loop; nothing here is shared across
//! threads, the only cross-boundary traffic goes through the [`Transport`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;

use super::error::{BridgeError, RemoteError};
use super::protocol::{CallEnvelope, CallId, ClientMessage, EnumTable, WorkerMessage};
use super::transport::Transport;
use super::value::Value;

/// Reference timeout for a single call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

type ReplySlot = Result<Value, BridgeError>;

/// Entry of the pending-call table. Lives from send until exactly one of:
/// matching reply, timeout, or transport loss.
#[derive(Debug)]
struct PendingCall {
    method: String,
    deadline: Instant,
    reply: Sender<ReplySlot>,
}

impl PendingCall {
    fn settle(self, outcome: ReplySlot) {
        // The caller may have dropped its PendingReply; that is not an error.
        let _ = self.reply.send(outcome);
    }
}

/// Receiving end of one call
#[derive(Debug)]
pub struct PendingReply {
    call_id: CallId,
    slot: Receiver<ReplySlot>,
}

impl PendingReply {
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Take the outcome if the call has settled
    #[must_use]
    pub fn try_take(&self) -> Option<ReplySlot> {
        match self.slot.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::Disconnected)),
        }
    }
}

/// Engine readiness as observed by the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// RPC stub for the engine worker
pub struct CallChannel<T: Transport> {
    transport: T,
    pending: HashMap<CallId, PendingCall>,
    next_call_id: u64,
    call_timeout: Duration,
    readiness: Readiness,
    enums: EnumTable,
}

impl<T: Transport> CallChannel<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_timeout(transport, DEFAULT_CALL_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(transport: T, call_timeout: Duration) -> Self {
        Self {
            transport,
            pending: HashMap::new(),
            next_call_id: 0,
            call_timeout,
            readiness: Readiness::Pending,
            enums: EnumTable::new(),
        }
    }

    /// Issue a call. Binary params are moved into the message and belong to
    /// the worker from here on.
    pub fn call(&mut self, method: &str, params: Vec<Value>, is_property: bool) -> PendingReply {
        let call_id = self.next_id();
        let (reply, slot) = flume::bounded(1);

        self.pending.insert(
            call_id,
            PendingCall {
                method: method.to_string(),
                deadline: Instant::now() + self.call_timeout,
                reply,
            },
        );

        debug!("call {call_id} {method} (property: {is_property})");
        let envelope = CallEnvelope {
            method: method.to_string(),
            params,
            is_property,
            call_id,
        };
        if let Err(e) = self.transport.post(ClientMessage::Call(envelope)) {
            warn!("Failed to post call {call_id} {method}: {e}");
            if let Some(call) = self.pending.remove(&call_id) {
                call.settle(Err(e));
            }
        }

        PendingReply { call_id, slot }
    }

    /// Invoke a method
    pub fn invoke(&mut self, method: &str, params: Vec<Value>) -> PendingReply {
        self.call(method, params, false)
    }

    /// Read a property of the instance identified by the first param
    pub fn property(&mut self, name: &str, params: Vec<Value>) -> PendingReply {
        self.call(name, params, true)
    }

    /// Drain worker messages, waiting up to `wait` (bounded by the earliest
    /// call deadline) for the first one, then expire overdue calls.
    pub fn pump(&mut self, wait: Duration) -> Result<usize, BridgeError> {
        let now = Instant::now();
        let wait = self
            .next_deadline()
            .map_or(wait, |deadline| wait.min(deadline.saturating_duration_since(now)));

        let first = if wait.is_zero() {
            self.transport.try_recv()
        } else {
            self.transport.recv_timeout(wait)
        };

        let mut handled = 0;
        let mut next = first;
        loop {
            match next {
                Ok(Some(msg)) => {
                    self.handle_message(msg);
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.fail_all(&e);
                    return Err(e);
                }
            }
            next = self.transport.try_recv();
        }

        self.expire(Instant::now());
        Ok(handled)
    }

    /// Route one worker message
    pub fn handle_message(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Initialized { enums } => {
                info!("Engine ready ({} enums)", enums.len());
                self.enums = enums;
                self.readiness = Readiness::Ready;
            }
            WorkerMessage::InitializationError { error } => {
                error!("Engine failed to initialize: {error}");
                self.readiness = Readiness::Failed(error);
            }
            WorkerMessage::CallResult { result, call_id } => {
                self.settle(call_id, Ok(result));
            }
            WorkerMessage::CallError { error, call_id } => {
                self.settle_error(call_id, error);
            }
        }
    }

    fn settle(&mut self, call_id: CallId, outcome: ReplySlot) {
        match self.pending.remove(&call_id) {
            Some(call) => {
                debug!("call {call_id} {} settled", call.method);
                call.settle(outcome);
            }
            None => debug!("Dropping reply for unknown call {call_id}"),
        }
    }

    fn settle_error(&mut self, call_id: CallId, error: RemoteError) {
        self.settle(call_id, Err(BridgeError::from_remote(error)));
    }

    /// Reject every call whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> usize {
        let overdue: Vec<CallId> = self
            .pending
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for call_id in &overdue {
            if let Some(call) = self.pending.remove(call_id) {
                warn!("call {call_id} {} timed out", call.method);
                let method = call.method.clone();
                call.settle(Err(BridgeError::ChannelTimeout {
                    call_id: *call_id,
                    method,
                }));
            }
        }

        overdue.len()
    }

    fn fail_all(&mut self, error: &BridgeError) {
        if self.readiness == Readiness::Pending {
            self.readiness = Readiness::Failed(error.to_string());
        }
        for (_, call) in self.pending.drain() {
            call.settle(Err(error.clone()));
        }
    }

    /// Block this loop until `reply` settles
    pub fn wait(&mut self, reply: PendingReply) -> Result<Value, BridgeError> {
        loop {
            if let Some(outcome) = reply.try_take() {
                return outcome;
            }
            if !self.pending.contains_key(&reply.call_id) {
                return Err(BridgeError::Disconnected);
            }
            // Transport loss settles every pending call, including this one.
            let _ = self.pump(self.call_timeout);
        }
    }

    /// Block until `reply` settles and decode it
    pub fn wait_as<D: DeserializeOwned>(&mut self, reply: PendingReply) -> Result<D, BridgeError> {
        self.wait(reply)?.decode()
    }

    /// Block until the engine reports readiness (or failure). Any number of
    /// callers may ask; the first answer sticks.
    pub fn ready(&mut self) -> Result<(), BridgeError> {
        let deadline = Instant::now() + self.call_timeout;
        loop {
            match &self.readiness {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(e) => return Err(BridgeError::InitializationFailure(e.clone())),
                Readiness::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::InitializationFailure(
                    "engine did not report readiness in time".to_string(),
                ));
            }
            self.pump(deadline - now)?;
        }
    }

    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Enum table broadcast by the engine at initialization
    #[must_use]
    pub fn enums(&self) -> &EnumTable {
        &self.enums
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, call_id: CallId) -> bool {
        self.pending.contains_key(&call_id)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|call| call.deadline).min()
    }

    fn next_id(&mut self) -> CallId {
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::bridge::error::RemoteError;
    use crate::test_utils::LoopbackTransport;

    fn channel() -> (CallChannel<LoopbackTransport>, crate::test_utils::LoopbackPeer) {
        let (transport, peer) = LoopbackTransport::new();
        (CallChannel::new(transport), peer)
    }

    #[test]
    fn call_ids_are_monotonic() {
        let (mut channel, peer) = channel();
        let a = channel.invoke("pageSize", vec![Value::from(0_u32)]);
        let b = channel.invoke("pageSize", vec![Value::from(0_u32)]);
        let c = channel.property("PageCount", vec![Value::from(0_u32)]);

        assert!(a.call_id() < b.call_id());
        assert!(b.call_id() < c.call_id());

        let posted = peer.posted();
        assert_eq!(posted.len(), 3);
        assert!(posted[2].is_property);
        assert_eq!(posted[2].call_id, c.call_id());
    }

    #[test]
    fn reply_resolves_matching_call_only() {
        let (mut channel, peer) = channel();
        let reply = channel.invoke("getSentenceContent", vec![Value::from(0_u32)]);

        peer.reply_ok(CallId(99), Value::from("stray"));
        peer.reply_ok(reply.call_id(), Value::from("hello"));
        channel.pump(Duration::ZERO).unwrap();

        assert_eq!(reply.try_take(), Some(Ok(Value::from("hello"))));
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let (mut channel, peer) = channel();
        let reply = channel.invoke("delete", vec![Value::from(0_u32)]);
        peer.reply_err(
            reply.call_id(),
            RemoteError::conflict("Class instance does not exist."),
        );

        let err = channel.wait(reply).unwrap_err();
        assert!(matches!(err, BridgeError::ResourceConflict(_)));
    }

    #[test]
    fn out_of_order_replies_settle_each_call_once() {
        let (mut channel, peer) = channel();
        let replies: Vec<_> = (0..16)
            .map(|i| channel.invoke("pageSize", vec![Value::from(0_u32), Value::from(i as u32)]))
            .collect();

        for reply in replies.iter().rev() {
            peer.reply_ok(reply.call_id(), Value::from(reply.call_id().0));
            // Duplicates must be ignored.
            peer.reply_ok(reply.call_id(), Value::from(-1_i64));
        }
        channel.pump(Duration::ZERO).unwrap();

        let mut seen = HashSet::new();
        for reply in &replies {
            let value = reply.try_take().unwrap().unwrap();
            assert_eq!(value.as_i64(), Some(reply.call_id().0 as i64));
            assert!(seen.insert(reply.call_id()));
            assert_eq!(reply.try_take(), Some(Err(BridgeError::Disconnected)));
        }
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn unanswered_call_times_out_and_late_reply_is_ignored() {
        let (mut channel, peer) = channel();
        let reply = channel.invoke("getPageImage", vec![Value::from(0_u32)]);
        let id = reply.call_id();

        assert_eq!(channel.expire(Instant::now()), 0);
        assert_eq!(
            channel.expire(Instant::now() + DEFAULT_CALL_TIMEOUT + Duration::from_secs(1)),
            1
        );
        assert!(!channel.is_pending(id));

        match reply.try_take() {
            Some(Err(BridgeError::ChannelTimeout { call_id, method })) => {
                assert_eq!(call_id, id);
                assert_eq!(method, "getPageImage");
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        peer.reply_ok(id, Value::from(true));
        assert_eq!(channel.pump(Duration::ZERO).unwrap(), 1);
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn wait_gives_up_after_short_timeout() {
        let (transport, _peer) = LoopbackTransport::new();
        let mut channel = CallChannel::with_timeout(transport, Duration::from_millis(20));
        let reply = channel.invoke("gotoNextSentence", vec![Value::from(0_u32)]);
        let id = reply.call_id();

        let err = channel.wait(reply).unwrap_err();
        assert!(err.is_timeout());
        assert!(!channel.is_pending(id));
    }

    #[test]
    fn readiness_is_sticky() {
        let (mut channel, peer) = channel();
        assert_eq!(channel.readiness(), &Readiness::Pending);

        let mut enums = EnumTable::new();
        enums.insert(
            "enuLocation".into(),
            [("Main".to_string(), 1_i64)].into_iter().collect(),
        );
        peer.send(WorkerMessage::Initialized { enums });

        channel.ready().unwrap();
        channel.ready().unwrap();
        assert_eq!(channel.enums()["enuLocation"]["Main"], 1);
    }

    #[test]
    fn initialization_failure_is_observed_by_every_waiter() {
        let (mut channel, peer) = channel();
        peer.send(WorkerMessage::InitializationError {
            error: "no fonts".into(),
        });

        for _ in 0..2 {
            let err = channel.ready().unwrap_err();
            assert_eq!(err, BridgeError::InitializationFailure("no fonts".into()));
        }
    }

    #[test]
    fn transport_loss_rejects_pending_calls() {
        let (mut channel, peer) = channel();
        let reply = channel.invoke("pageSize", vec![Value::from(0_u32)]);
        peer.close();

        assert_eq!(channel.pump(Duration::ZERO), Err(BridgeError::Disconnected));
        assert_eq!(reply.try_take(), Some(Err(BridgeError::Disconnected)));
        assert_eq!(channel.pending_count(), 0);
    }
}
