//! Engine host thread
//!
//! The worker side of the bridge: one thread owning the dispatcher (and with
//! it the engine, the handle registry and the engine heap). Engine start-up
//! runs on its own thread and reports through the host's inbox, so client
//! calls that arrive first are parked rather than blocked.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use log::{debug, error, info};

use crate::engine::DocumentEngine;

use super::dispatcher::Dispatcher;
use super::error::BridgeError;
use super::protocol::{ClientMessage, WorkerMessage};
use super::transport::InProcessTransport;

pub(crate) enum HostEvent {
    Client(ClientMessage),
    EngineReady(Result<Box<dyn DocumentEngine + Send>, String>),
    Shutdown,
}

/// Owner of the host thread. Dropping it shuts the worker down.
pub struct EngineHost {
    events: Sender<HostEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Start an engine host. `init` builds the engine on a start-up thread;
/// an `Err` (or a panic) becomes the initialization failure every caller sees.
pub fn spawn_engine_host<E, F>(init: F) -> Result<(InProcessTransport, EngineHost), BridgeError>
where
    E: DocumentEngine + Send + 'static,
    F: FnOnce() -> Result<E, String> + Send + 'static,
{
    let (event_tx, event_rx) = flume::unbounded();
    let (reply_tx, reply_rx) = flume::unbounded();

    let thread = thread::Builder::new()
        .name("engine-host".to_string())
        .spawn(move || run_host(&event_rx, &reply_tx))
        .map_err(|e| BridgeError::InitializationFailure(e.to_string()))?;

    let init_tx = event_tx.clone();
    thread::Builder::new()
        .name("engine-init".to_string())
        .spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(init)) {
                Ok(Ok(engine)) => Ok(Box::new(engine) as Box<dyn DocumentEngine + Send>),
                Ok(Err(reason)) => Err(reason),
                Err(_) => Err("engine initialization panicked".to_string()),
            };
            let _ = init_tx.send(HostEvent::EngineReady(outcome));
        })
        .map_err(|e| BridgeError::InitializationFailure(e.to_string()))?;

    Ok((
        InProcessTransport::new(event_tx.clone(), reply_rx),
        EngineHost {
            events: event_tx,
            thread: Some(thread),
        },
    ))
}

fn run_host(events: &Receiver<HostEvent>, replies: &Sender<WorkerMessage>) {
    let mut dispatcher = Dispatcher::new();
    debug!("Engine host started");

    for event in events {
        let outgoing: Vec<WorkerMessage> = match event {
            HostEvent::Client(ClientMessage::Call(envelope)) => {
                dispatcher.dispatch(envelope).into_iter().collect()
            }
            HostEvent::EngineReady(outcome) => {
                dispatcher.engine_ready(outcome.map(|engine| engine as Box<dyn DocumentEngine>))
            }
            HostEvent::Shutdown => break,
        };
        if outgoing.into_iter().any(|msg| replies.send(msg).is_err()) {
            error!("Client side of the bridge is gone, stopping engine host");
            break;
        }
    }

    dispatcher.shutdown();
    info!("Engine host stopped");
}

impl EngineHost {
    /// Stop the host thread and wait for it
    pub fn shutdown(&mut self) {
        let _ = self.events.send(HostEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Engine host thread panicked");
            }
        }
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
