//! Document viewer
//!
//! Ties the call channel, the viewport, the render scheduler and a drawing
//! surface together. Everything runs on the caller's loop: input and
//! navigation mutate the viewport and request sweeps, [`DocumentViewer::tick`]
//! advances the scheduler, issues remote fetches and applies their replies.

pub mod input;
pub mod overlay;
pub mod scheduler;
pub mod surface;
pub mod viewport;

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::bridge::{BridgeError, CallChannel, CallId, PendingReply, Transport, Value};
use crate::document::RemoteDocument;
use crate::engine::{
    ActiveSentence, LayoutConfigs, LoadError, Location, Markable, PageSize, PdfInfo,
};
use crate::settings::ViewerConfig;

use input::{Debouncer, InputEvent, PinchTracker};
use overlay::{MarkerOptions, PageOverlay};
use scheduler::{Effect, RenderScheduler};
use surface::{PageBitmap, Surface};
use viewport::{ContainerSize, PageLayout, ScaleMode, ViewportController};

pub use input::{TouchPoint, WheelEvent};

/// Background value asking the engine to keep the page's own background
const PAGE_BACKGROUND: i64 = -1;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("No document is open")]
    NoDocument,
    #[error("Document failed to load: {}", .0.name())]
    Load(LoadError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ViewerEvent {
    PdfOpened { file_name: String },
    ActivePageChanged(usize),
    ActiveSentenceChanged(ActiveSentence),
}

#[derive(Debug)]
enum PendingFetch {
    Image { page: usize, scale: f32, width: u32, height: u32 },
    Overlays { page: usize },
    Prefetch { page: usize },
}

#[derive(Debug)]
struct InFlight {
    fetch: PendingFetch,
    reply: PendingReply,
}

#[derive(Debug)]
struct OpenDocument {
    remote: RemoteDocument,
    file_name: String,
}

pub struct DocumentViewer<T: Transport, S: Surface> {
    channel: CallChannel<T>,
    surface: S,
    config: ViewerConfig,
    document: Option<OpenDocument>,
    viewport: ViewportController,
    scheduler: RenderScheduler,
    debounce: Debouncer,
    pinch: PinchTracker,
    in_flight: HashMap<CallId, InFlight>,
    markables: HashMap<usize, Vec<Markable>>,
    selected: ActiveSentence,
    events: VecDeque<ViewerEvent>,
}

impl<T: Transport, S: Surface> DocumentViewer<T, S> {
    #[must_use]
    pub fn new(
        channel: CallChannel<T>,
        surface: S,
        container: ContainerSize,
        config: ViewerConfig,
    ) -> Self {
        let layout = PageLayout::new(
            vec![],
            config.vertical_page_margin,
            config.horizontal_page_margin,
        );
        Self {
            channel,
            surface,
            viewport: ViewportController::new(layout, container),
            scheduler: RenderScheduler::new(0, config.max_texture_size),
            debounce: Debouncer::new(config.scroll_debounce()),
            pinch: PinchTracker::new(config.pinch_min_samples),
            config,
            document: None,
            in_flight: HashMap::new(),
            markables: HashMap::new(),
            selected: ActiveSentence::NONE,
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.document.as_ref().map(|d| d.file_name.as_str())
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.viewport.layout().page_count()
    }

    #[must_use]
    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[must_use]
    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    #[must_use]
    pub fn selected_sentence(&self) -> ActiveSentence {
        self.selected
    }

    /// Pages found visible by the last completed sweep
    #[must_use]
    pub fn visible_pages(&self) -> Option<Range<usize>> {
        self.scheduler.last_visible()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// No sweep running or requested, no fetch outstanding
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.scheduler.is_idle() && !self.debounce.is_armed() && self.in_flight.is_empty()
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        self.events.drain(..).collect()
    }

    fn remote(&self) -> Result<RemoteDocument, ViewerError> {
        self.document
            .as_ref()
            .map(|d| d.remote)
            .ok_or(ViewerError::NoDocument)
    }

    /// Open a document, replacing the current one
    pub fn open(&mut self, bytes: Vec<u8>, file_name: &str) -> Result<(), ViewerError> {
        self.close()?;
        self.channel.ready()?;

        let remote = RemoteDocument::create(&mut self.channel)?;
        let reply = remote.load_pdf(&mut self.channel, bytes, &self.config.layout)?;
        let status: LoadError = self.channel.wait_as(reply)?;
        if status != LoadError::None {
            warn!("Loading {file_name} failed: {}", status.name());
            let deleted = remote.delete(&mut self.channel);
            if let Err(e) = self.channel.wait(deleted) {
                warn!("Failed to delete instance {}: {e}", remote.handle());
            }
            return Err(ViewerError::Load(status));
        }

        let reply = remote.all_page_sizes(&mut self.channel);
        let sizes: Vec<PageSize> = self.channel.wait_as(reply)?;
        info!("Opened {file_name} ({} pages)", sizes.len());

        self.document = Some(OpenDocument {
            remote,
            file_name: file_name.to_string(),
        });
        self.scheduler.reset(sizes.len());
        self.viewport.set_layout(PageLayout::new(
            sizes,
            self.config.vertical_page_margin,
            self.config.horizontal_page_margin,
        ));
        self.viewport.set_absolute_scale(ScaleMode::Auto);
        self.content_resized();
        self.schedule_sweep(Instant::now());

        self.events.push_back(ViewerEvent::PdfOpened {
            file_name: file_name.to_string(),
        });
        self.set_active_sentence(0, -1, -1, Location::Main)?;
        Ok(())
    }

    /// Delete the open document's engine instance, if any
    pub fn close(&mut self) -> Result<(), ViewerError> {
        let Some(previous) = self.document.take() else {
            return Ok(());
        };
        debug!("Closing {}", previous.file_name);
        self.in_flight.clear();
        self.markables.clear();
        self.selected = ActiveSentence::NONE;
        self.debounce.cancel();
        self.scheduler.reset(0);
        self.surface.clear();

        let deleted = previous.remote.delete(&mut self.channel);
        self.channel.wait(deleted)?;
        Ok(())
    }

    /// Apply settled replies, fire a due debounced sweep and advance the
    /// scheduler by at most `sweep_steps_per_tick` pages
    pub fn tick(&mut self, now: Instant) -> Result<usize, ViewerError> {
        let handled = self.poll()?;
        if self.debounce.fire(now) {
            self.scheduler.trigger_sweep();
        }
        self.run_sweep(self.config.sweep_steps_per_tick)?;
        Ok(handled)
    }

    /// Drain the channel without blocking and apply settled replies
    pub fn poll(&mut self) -> Result<usize, ViewerError> {
        self.channel.pump(Duration::ZERO)?;
        Ok(self.collect_settled())
    }

    /// Run pending sweeps and wait for every fetch they issue
    pub fn settle(&mut self) -> Result<(), ViewerError> {
        if self.debounce.is_armed() {
            self.debounce.cancel();
            self.scheduler.trigger_sweep();
        }
        loop {
            self.run_sweep(usize::MAX)?;
            if self.in_flight.is_empty() && self.scheduler.is_idle() {
                return Ok(());
            }
            let wait = self.channel.call_timeout();
            self.channel.pump(wait)?;
            self.collect_settled();
        }
    }

    fn run_sweep(&mut self, max_steps: usize) -> Result<(), ViewerError> {
        for _ in 0..max_steps {
            if self.scheduler.is_idle() {
                break;
            }
            let effects = self.scheduler.step(&self.viewport);
            self.execute_effects(effects)?;
        }
        Ok(())
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) -> Result<(), ViewerError> {
        for effect in effects {
            match effect {
                Effect::FetchImage {
                    page,
                    width,
                    height,
                    scale,
                } => {
                    let remote = self.remote()?;
                    let size = PageSize::new(width as f32, height as f32);
                    let reply = remote.page_image(&mut self.channel, page, PAGE_BACKGROUND, size)?;
                    self.track(reply, PendingFetch::Image {
                        page,
                        scale,
                        width,
                        height,
                    });
                }
                Effect::FetchOverlays { page } => {
                    let remote = self.remote()?;
                    let reply = remote.markables(&mut self.channel, page);
                    self.track(reply, PendingFetch::Overlays { page });
                }
                Effect::ActivePageChanged(page) => {
                    debug!("Active page is now {page}");
                    self.viewport.set_active_page(page);
                    self.events.push_back(ViewerEvent::ActivePageChanged(page));
                }
            }
        }
        Ok(())
    }

    fn track(&mut self, reply: PendingReply, fetch: PendingFetch) {
        self.in_flight
            .insert(reply.call_id(), InFlight { fetch, reply });
    }

    fn collect_settled(&mut self) -> usize {
        let settled: Vec<(CallId, Result<Value, BridgeError>)> = self
            .in_flight
            .iter()
            .filter_map(|(id, call)| call.reply.try_take().map(|outcome| (*id, outcome)))
            .collect();

        let count = settled.len();
        for (id, outcome) in settled {
            if let Some(call) = self.in_flight.remove(&id) {
                self.apply_reply(call.fetch, outcome);
            }
        }
        count
    }

    fn apply_reply(&mut self, fetch: PendingFetch, outcome: Result<Value, BridgeError>) {
        match fetch {
            PendingFetch::Image {
                page,
                scale,
                width,
                height,
            } => {
                let bitmap = outcome.and_then(|value| {
                    value
                        .into_binary()
                        .ok_or_else(|| BridgeError::Decode("page image is not binary".to_string()))
                });
                match bitmap {
                    Ok(_) if self.is_superseded(page, scale) => {
                        debug!("Dropping page {page} image for superseded scale {scale}");
                        self.scheduler.image_failed(page, scale);
                    }
                    Ok(rgba) => {
                        let bitmap = PageBitmap {
                            page,
                            width,
                            height,
                            scale,
                            rgba,
                        };
                        if !bitmap.is_complete() {
                            warn!(
                                "Page {page} image has {} bytes for {width}x{height}",
                                bitmap.rgba.len()
                            );
                        }
                        self.surface.draw_page_image(bitmap);
                        self.scheduler.image_rendered(page, scale);
                    }
                    Err(e) => {
                        warn!("Rendering page {page} failed: {e}");
                        self.scheduler.image_failed(page, scale);
                    }
                }
            }
            PendingFetch::Overlays { page } => {
                match outcome.and_then(Value::decode::<Vec<Markable>>) {
                    Ok(markables) => {
                        let overlay = PageOverlay::build(
                            page,
                            &markables,
                            &self.selected,
                            &self.config.markers,
                        );
                        self.markables.insert(page, markables);
                        self.surface.replace_overlay(overlay);
                    }
                    Err(e) => warn!("Fetching overlays of page {page} failed: {e}"),
                }
                self.scheduler.overlays_settled(page);
            }
            PendingFetch::Prefetch { page } => {
                match outcome.and_then(Value::decode::<Vec<Markable>>) {
                    Ok(markables) => {
                        self.markables.insert(page, markables);
                    }
                    Err(e) => debug!("Prefetching markables of page {page} failed: {e}"),
                }
            }
        }
    }

    /// A newer bitmap at the current scale is already on screen
    fn is_superseded(&self, page: usize, scale: f32) -> bool {
        let current = self.viewport.scale();
        scale != current
            && self
                .scheduler
                .page_state(page)
                .and_then(|s| s.last_rendered_scale)
                == Some(current)
    }

    /// Debounced sweep request
    fn schedule_sweep(&mut self, now: Instant) {
        if self.document.is_some() {
            self.debounce.poke(now);
        }
    }

    fn render_now(&mut self) {
        if self.document.is_some() {
            self.debounce.cancel();
            self.scheduler.trigger_sweep();
        }
    }

    fn content_resized(&mut self) {
        let (width, height) = self.viewport.content_size();
        self.surface.resize_content(width, height);
    }

    pub fn handle_input(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::Scroll { top, left } => {
                let state = self.viewport.state();
                let (dx, dy) = (left - state.scroll_left, top - state.scroll_top);
                self.viewport.scroll_by(dx, dy);
                self.schedule_sweep(now);
            }
            InputEvent::Wheel(wheel) if wheel.ctrl => {
                if self.document.is_none() {
                    return;
                }
                let scale = self.viewport.stepped_scale(wheel.delta_y < 0.0);
                if self.viewport.set_scale(scale, wheel.x, wheel.y) {
                    self.content_resized();
                    self.schedule_sweep(now);
                }
            }
            InputEvent::Wheel(wheel) => {
                self.viewport.scroll_by(wheel.delta_x, wheel.delta_y);
                self.schedule_sweep(now);
            }
            InputEvent::TouchStart(points) => {
                self.pinch.begin(&points, self.viewport.scale());
            }
            InputEvent::TouchMove(points) => {
                if let Some(zoom) = self.pinch.update(&points) {
                    if self.viewport.set_scale(zoom.scale, zoom.anchor.x, zoom.anchor.y) {
                        self.content_resized();
                        self.schedule_sweep(now);
                    }
                }
            }
            InputEvent::TouchEnd => self.pinch.end(),
            InputEvent::Resize(container) => {
                self.viewport.resize_container(container);
                self.content_resized();
                self.schedule_sweep(now);
            }
        }
    }

    /// Zoom by mode; out-of-range results are ignored
    pub fn set_scale_mode(&mut self, mode: ScaleMode) -> bool {
        let changed = self.viewport.set_absolute_scale(mode);
        if changed {
            self.content_resized();
            self.schedule_sweep(Instant::now());
        }
        changed
    }

    pub fn set_active_page(&mut self, page: usize) -> bool {
        let moved = self.viewport.set_active_page_index(page);
        if moved {
            self.schedule_sweep(Instant::now());
        }
        moved
    }

    #[must_use]
    pub fn active_page(&self) -> usize {
        self.viewport.state().active_page_index
    }

    pub fn next_page(&mut self) -> bool {
        self.set_active_page(self.active_page() + 1)
    }

    pub fn prev_page(&mut self) -> bool {
        self.active_page()
            .checked_sub(1)
            .is_some_and(|page| self.set_active_page(page))
    }

    pub fn first_page(&mut self) -> bool {
        self.set_active_page(0)
    }

    pub fn last_page(&mut self) -> bool {
        self.page_count()
            .checked_sub(1)
            .is_some_and(|page| self.set_active_page(page))
    }

    pub fn page_label(&mut self, page: usize) -> Result<String, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.page_label(&mut self.channel, page);
        Ok(self.channel.wait_as(reply)?)
    }

    /// Jump to the page carrying `label`; false when no page has it
    pub fn goto_page_label(&mut self, label: &str) -> Result<bool, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.page_no_by_label(&mut self.channel, label);
        let page_no: i64 = self.channel.wait_as(reply)?;
        if page_no <= 0 {
            debug!("No page labelled {label}");
            return Ok(false);
        }
        Ok(self.set_active_page(page_no as usize - 1))
    }

    pub fn set_active_sentence(
        &mut self,
        page: i32,
        par: i32,
        snt: i32,
        location: Location,
    ) -> Result<ActiveSentence, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.set_current_sentence(&mut self.channel, page, par, snt, location);
        let sentence: ActiveSentence = self.channel.wait_as(reply)?;
        if sentence.is_valid() {
            self.update_selected_sentence(sentence)?;
        }
        Ok(sentence)
    }

    pub fn next_sentence(&mut self) -> Result<ActiveSentence, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.next_sentence(&mut self.channel);
        let sentence: ActiveSentence = self.channel.wait_as(reply)?;
        if sentence.is_valid() {
            self.update_selected_sentence(sentence)?;
            self.prefetch_markables(sentence.real_page_index + 1)?;
        }
        Ok(sentence)
    }

    pub fn prev_sentence(&mut self) -> Result<ActiveSentence, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.prev_sentence(&mut self.channel);
        let sentence: ActiveSentence = self.channel.wait_as(reply)?;
        if sentence.is_valid() {
            self.update_selected_sentence(sentence)?;
            self.prefetch_markables(sentence.real_page_index - 1)?;
        }
        Ok(sentence)
    }

    pub fn active_sentence_content(&mut self) -> Result<String, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.sentence_content(&mut self.channel);
        Ok(self.channel.wait_as(reply)?)
    }

    fn prefetch_markables(&mut self, page: i32) -> Result<(), ViewerError> {
        let Ok(page) = usize::try_from(page) else {
            return Ok(());
        };
        if page >= self.page_count() || self.markables.contains_key(&page) {
            return Ok(());
        }
        let remote = self.remote()?;
        let reply = remote.markables(&mut self.channel, page);
        self.track(reply, PendingFetch::Prefetch { page });
        Ok(())
    }

    fn page_markables(&mut self, page: usize) -> Result<&[Markable], ViewerError> {
        if !self.markables.contains_key(&page) {
            let remote = self.remote()?;
            let reply = remote.markables(&mut self.channel, page);
            let markables: Vec<Markable> = self.channel.wait_as(reply)?;
            self.markables.insert(page, markables);
        }
        Ok(self.markables.get(&page).map_or(&[], Vec::as_slice))
    }

    /// Select `sentence`, bring it into view and redraw
    fn update_selected_sentence(&mut self, sentence: ActiveSentence) -> Result<(), ViewerError> {
        self.selected = sentence;
        let real_page = usize::try_from(sentence.real_page_index).unwrap_or_default();

        let top = self
            .page_markables(real_page)?
            .iter()
            .filter(|par| {
                par.page_index == sentence.page_index
                    && par.par_index == sentence.par_index
                    && par.location == sentence.location
            })
            .find_map(|par| {
                par.inner_segments
                    .iter()
                    .find(|snt| snt.snt_index == sentence.snt_index)
                    .map(|snt| snt.bounding_box.y0)
            });

        match top {
            Some(y0) => {
                let node_top = self.viewport.page_offset(real_page) + self.viewport.scale() * y0;
                self.viewport.scroll_into_view(node_top);
            }
            None => debug!("Sentence {sentence:?} not found on page {real_page}"),
        }

        self.render_now();
        self.events
            .push_back(ViewerEvent::ActiveSentenceChanged(sentence));
        Ok(())
    }

    /// Push new layout configs to the engine; overlays are rebuilt, images kept
    pub fn update_layout(&mut self, configs: LayoutConfigs) -> Result<(), ViewerError> {
        let remote = self.remote()?;
        let reply = remote.set_configs(&mut self.channel, &configs)?;
        self.channel.wait(reply)?;
        self.config.layout = configs;
        self.markables.clear();
        self.render_now();
        Ok(())
    }

    pub fn update_markers(&mut self, markers: MarkerOptions) {
        self.config.markers = markers;
        self.render_now();
    }

    /// The document bytes as held by the engine
    pub fn pdf_buffer(&mut self) -> Result<Vec<u8>, ViewerError> {
        let remote = self.remote()?;
        let reply = remote.pdf_buffer(&mut self.channel);
        let value = self.channel.wait(reply)?;
        value
            .into_binary()
            .ok_or_else(|| BridgeError::Decode("document buffer is not binary".to_string()).into())
    }

    pub fn doc_info(&mut self, page: usize) -> Result<PdfInfo, ViewerError> {
        let remote = self.remote()?;
        let file_name = self.file_name().unwrap_or_default().to_string();
        let reply = remote.doc_info(&mut self.channel, page);
        let mut info: PdfInfo = self.channel.wait_as(reply)?;
        info.file_name = file_name;
        Ok(info)
    }
}
