//! Test doubles for the bridge and the engine
//!
//! `LoopbackTransport` lets a test play the worker side by hand;
//! `FixtureEngine` is a deterministic in-memory document engine.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::bridge::error::{BridgeError, RemoteError};
use crate::bridge::protocol::{CallEnvelope, CallId, ClientMessage, WorkerMessage};
use crate::bridge::transport::Transport;
use crate::bridge::value::Value;
use crate::engine::instance::{PageBackend, PdfInstance};
use crate::engine::{
    BoundingBox, ContentType, DocumentEngine, EngineInstance, EnumDescriptor, InvokeError,
    LoadError, Location, Markable, PageSize, PdfInfo, standard_enums,
};

/// Client side of a hand-driven worker
pub struct LoopbackTransport {
    inbox: Receiver<WorkerMessage>,
    posted: Rc<RefCell<Vec<CallEnvelope>>>,
}

/// Worker side of a [`LoopbackTransport`]
pub struct LoopbackPeer {
    outbox: Sender<WorkerMessage>,
    posted: Rc<RefCell<Vec<CallEnvelope>>>,
}

impl LoopbackTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (LoopbackTransport, LoopbackPeer) {
        let (outbox, inbox) = flume::unbounded();
        let posted = Rc::new(RefCell::new(Vec::new()));
        (
            LoopbackTransport {
                inbox,
                posted: Rc::clone(&posted),
            },
            LoopbackPeer { outbox, posted },
        )
    }
}

impl Transport for LoopbackTransport {
    fn post(&self, message: ClientMessage) -> Result<(), BridgeError> {
        let ClientMessage::Call(envelope) = message;
        self.posted.borrow_mut().push(envelope);
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>, BridgeError> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }

    fn try_recv(&self) -> Result<Option<WorkerMessage>, BridgeError> {
        match self.inbox.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BridgeError::Disconnected),
        }
    }
}

impl LoopbackPeer {
    /// Every envelope posted so far
    pub fn posted(&self) -> Vec<CallEnvelope> {
        self.posted.borrow().clone()
    }

    /// Remove and return the envelopes posted so far
    pub fn take_posted(&self) -> Vec<CallEnvelope> {
        std::mem::take(&mut *self.posted.borrow_mut())
    }

    pub fn send(&self, msg: WorkerMessage) {
        let _ = self.outbox.send(msg);
    }

    pub fn reply_ok(&self, call_id: CallId, result: Value) {
        self.send(WorkerMessage::CallResult { result, call_id });
    }

    pub fn reply_err(&self, call_id: CallId, error: RemoteError) {
        self.send(WorkerMessage::CallError { error, call_id });
    }

    /// Drop the worker side; the transport reports disconnection
    pub fn close(self) {
        drop(self.outbox);
    }
}

/// One page of a fixture document
#[derive(Clone, Debug)]
pub struct FixturePage {
    pub size: PageSize,
    pub label: String,
    pub paragraphs: Vec<Markable>,
}

impl FixturePage {
    /// A header line followed by `paragraphs` main-text paragraphs of
    /// `sentences` lines each, stacked from the top of the page
    pub fn text(page: usize, size: PageSize, paragraphs: usize, sentences: usize) -> Self {
        let page_index = page as i32;
        let line = |par: i32, snt: i32, y: f32, location: Location| Markable {
            page_index,
            par_index: par,
            snt_index: snt,
            bounding_box: BoundingBox::new(20.0, y, size.width - 20.0, y + 16.0),
            location,
            content_type: ContentType::Text,
            inner_segments: vec![],
        };

        let mut out = vec![Markable {
            snt_index: -1,
            inner_segments: vec![line(0, 0, 10.0, Location::Header)],
            ..line(0, -1, 10.0, Location::Header)
        }];
        let mut y = 40.0;
        for par in 1..=paragraphs as i32 {
            let inner: Vec<Markable> = (0..sentences as i32)
                .map(|snt| line(par, snt, y + snt as f32 * 20.0, Location::Main))
                .collect();
            let bottom = y + sentences as f32 * 20.0;
            out.push(Markable {
                bounding_box: BoundingBox::new(20.0, y, size.width - 20.0, bottom),
                inner_segments: inner,
                ..line(par, -1, y, Location::Main)
            });
            y = bottom + 10.0;
        }

        Self {
            size,
            label: (page + 1).to_string(),
            paragraphs: out,
        }
    }

    /// A full-page figure without any text
    pub fn figure(page: usize, size: PageSize) -> Self {
        Self {
            size,
            label: (page + 1).to_string(),
            paragraphs: vec![Markable {
                page_index: page as i32,
                par_index: 0,
                snt_index: -1,
                bounding_box: BoundingBox::new(0.0, 0.0, size.width, size.height),
                location: Location::Main,
                content_type: ContentType::Image,
                inner_segments: vec![],
            }],
        }
    }
}

/// Deterministic in-memory document engine
#[derive(Clone, Debug, Default)]
pub struct FixtureEngine {
    pages: Vec<FixturePage>,
    failing_renders: HashSet<usize>,
    title: String,
}

impl FixtureEngine {
    pub fn new(pages: Vec<FixturePage>) -> Self {
        Self {
            pages,
            failing_renders: HashSet::new(),
            title: "Fixture".to_string(),
        }
    }

    /// Text pages of the given sizes, two paragraphs of two sentences each
    pub fn with_sizes(sizes: &[(f32, f32)]) -> Self {
        Self::new(
            sizes
                .iter()
                .enumerate()
                .map(|(i, &(w, h))| FixturePage::text(i, PageSize::new(w, h), 2, 2))
                .collect(),
        )
    }

    /// Make rasterization of `page` fail
    pub fn failing_render(mut self, page: usize) -> Self {
        self.failing_renders.insert(page);
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        for (page, label) in self.pages.iter_mut().zip(labels) {
            page.label = (*label).to_string();
        }
        self
    }
}

/// Bytes the fixture backend accepts as a document
pub fn fixture_pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n% fixture\n".to_vec()
}

impl DocumentEngine for FixtureEngine {
    fn enums(&self) -> Vec<EnumDescriptor> {
        standard_enums()
    }

    fn create_instance(&mut self) -> Result<Box<dyn EngineInstance>, InvokeError> {
        Ok(Box::new(PdfInstance::new(FixtureBackend {
            engine: self.clone(),
            open: false,
        })))
    }
}

pub struct FixtureBackend {
    engine: FixtureEngine,
    open: bool,
}

impl FixtureBackend {
    fn page(&self, page: usize) -> Result<&FixturePage, InvokeError> {
        self.engine
            .pages
            .get(page)
            .filter(|_| self.open)
            .ok_or_else(|| InvokeError::Engine(format!("no page {page}")))
    }
}

impl PageBackend for FixtureBackend {
    fn load(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        self.open = bytes.starts_with(b"%PDF");
        if self.open {
            Ok(())
        } else {
            Err(LoadError::Format)
        }
    }

    fn page_count(&self) -> usize {
        if self.open { self.engine.pages.len() } else { 0 }
    }

    fn page_size(&self, page: usize) -> Result<PageSize, InvokeError> {
        self.page(page).map(|p| p.size)
    }

    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        _background: i64,
    ) -> Result<Vec<u8>, InvokeError> {
        self.page(page)?;
        if self.engine.failing_renders.contains(&page) {
            return Err(InvokeError::Engine(format!("render of page {page} failed")));
        }
        Ok(vec![page as u8; width as usize * height as usize * 4])
    }

    fn paragraphs(&mut self, page: usize) -> Result<Vec<Markable>, InvokeError> {
        self.page(page).map(|p| p.paragraphs.clone())
    }

    fn sentence_text(&mut self, page: usize, par: i32, snt: i32) -> String {
        format!("Page {page} paragraph {par} sentence {snt}.")
    }

    fn info(&self) -> PdfInfo {
        PdfInfo {
            title: self.engine.title.clone(),
            author: "Fixture Author".to_string(),
            pdf_version: "1.7".to_string(),
            ..PdfInfo::default()
        }
    }

    fn page_label(&self, page: usize) -> String {
        self.engine
            .pages
            .get(page)
            .map(|p| p.label.clone())
            .unwrap_or_default()
    }
}

/// Group posted envelopes by method name
pub fn count_methods(envelopes: &[CallEnvelope]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for e in envelopes {
        *counts.entry(e.method.clone()).or_insert(0) += 1;
    }
    counts
}
