//! Page render scheduler
//!
//! Decides which pages need image or overlay work. A sweep walks the page
//! stack from the top, skips pages above the viewport, renders the
//! contiguous visible run and stops at the first page below it. The scheduler
//! is a pure state machine: it returns [`Effect`]s and the caller issues the
//! remote calls and reports back.
//!
//! One sweep runs at a time. Triggers during a sweep raise the cancellation
//! flag, observed at the next page boundary, and collapse into a single
//! follow-up sweep.

use std::ops::Range;

use log::debug;

use super::viewport::ViewportController;

/// Coverage share above which a page becomes the active page
const ACTIVE_PAGE_COVERAGE: f32 = 0.5;

/// Per-page render bookkeeping
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageRenderState {
    /// Scale of the bitmap currently painted for the page
    pub last_rendered_scale: Option<f32>,
    /// Scale of an image fetch still in flight
    pub pending_scale: Option<f32>,
    /// Overlay elements were requested and not rebuilt yet
    pub overlay_dirty: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Rasterize `page` to `width` x `height` pixels for viewport `scale`
    FetchImage {
        page: usize,
        width: u32,
        height: u32,
        scale: f32,
    },
    /// Fetch semantic regions and rebuild every overlay element of `page`
    FetchOverlays { page: usize },
    ActivePageChanged(usize),
}

#[derive(Clone, Debug, PartialEq)]
struct Sweep {
    cursor: usize,
    first_visible: Option<usize>,
    best: Option<(usize, f32)>,
}

#[derive(Clone, Debug, PartialEq)]
enum Phase {
    Idle,
    Sweeping(Sweep),
}

#[derive(Debug)]
pub struct RenderScheduler {
    phase: Phase,
    cancel_requested: bool,
    follow_up: bool,
    pages: Vec<PageRenderState>,
    max_texture_size: f32,
    sweeps_started: usize,
    last_visible: Option<Range<usize>>,
}

impl RenderScheduler {
    #[must_use]
    pub fn new(page_count: usize, max_texture_size: u32) -> Self {
        Self {
            phase: Phase::Idle,
            cancel_requested: false,
            follow_up: false,
            pages: vec![PageRenderState::default(); page_count],
            max_texture_size: max_texture_size.max(1) as f32,
            sweeps_started: 0,
            last_visible: None,
        }
    }

    /// Forget all per-page state, e.g. for a new document
    pub fn reset(&mut self, page_count: usize) {
        self.phase = Phase::Idle;
        self.cancel_requested = false;
        self.follow_up = false;
        self.pages = vec![PageRenderState::default(); page_count];
        self.last_visible = None;
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Number of sweeps started since creation
    #[must_use]
    pub fn sweeps_started(&self) -> usize {
        self.sweeps_started
    }

    /// Visible page range found by the last completed sweep
    #[must_use]
    pub fn last_visible(&self) -> Option<Range<usize>> {
        self.last_visible.clone()
    }

    #[must_use]
    pub fn page_state(&self, page: usize) -> Option<&PageRenderState> {
        self.pages.get(page)
    }

    /// Request a sweep. While one is running this only flags it for
    /// cancellation and books one follow-up sweep.
    pub fn trigger_sweep(&mut self) {
        match self.phase {
            Phase::Idle => self.start(),
            Phase::Sweeping(_) => {
                self.cancel_requested = true;
                self.follow_up = true;
            }
        }
    }

    fn start(&mut self) {
        self.sweeps_started += 1;
        debug!("Starting sweep #{}", self.sweeps_started);
        self.phase = Phase::Sweeping(Sweep {
            cursor: 0,
            first_visible: None,
            best: None,
        });
    }

    /// Advance the current sweep by one visible page (or to its end)
    pub fn step(&mut self, viewport: &ViewportController) -> Vec<Effect> {
        let Phase::Sweeping(mut sweep) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return vec![];
        };
        let view = viewport.viewport_rect();
        let page_count = self.pages.len().min(viewport.layout().page_count());

        loop {
            if self.cancel_requested {
                debug!("Sweep cancelled at page {}", sweep.cursor);
                return self.finish(None, viewport);
            }
            let Some(rect) = viewport
                .page_rect(sweep.cursor)
                .filter(|_| sweep.cursor < page_count)
            else {
                return self.finish(Some(sweep), viewport);
            };

            if !rect.intersects(&view) {
                if sweep.first_visible.is_some() {
                    return self.finish(Some(sweep), viewport);
                }
                sweep.cursor += 1;
                continue;
            }

            let page = sweep.cursor;
            sweep.first_visible.get_or_insert(page);
            let coverage = rect.vertical_coverage(&view);
            if coverage > ACTIVE_PAGE_COVERAGE && sweep.best.is_none_or(|(_, c)| coverage > c) {
                sweep.best = Some((page, coverage));
            }
            sweep.cursor += 1;

            let effects = self.render_page(page, viewport);
            self.phase = Phase::Sweeping(sweep);
            return effects;
        }
    }

    /// Step until the scheduler is idle again, follow-up sweeps included
    pub fn run_to_idle(&mut self, viewport: &ViewportController) -> Vec<Effect> {
        let mut effects = Vec::new();
        while !self.is_idle() {
            effects.extend(self.step(viewport));
        }
        effects
    }

    fn finish(&mut self, completed: Option<Sweep>, viewport: &ViewportController) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(sweep) = completed {
            if let Some(first) = sweep.first_visible {
                self.last_visible = Some(first..sweep.cursor);
                let active = sweep.best.map_or(first, |(page, _)| page);
                if active != viewport.state().active_page_index {
                    effects.push(Effect::ActivePageChanged(active));
                }
            }
        }

        self.phase = Phase::Idle;
        self.cancel_requested = false;
        if self.follow_up {
            self.follow_up = false;
            self.start();
        }
        effects
    }

    fn render_page(&mut self, page: usize, viewport: &ViewportController) -> Vec<Effect> {
        let scale = viewport.scale();
        let mut effects = Vec::with_capacity(2);
        let Some(size) = viewport.layout().sizes.get(page).copied() else {
            return effects;
        };
        let max = self.max_texture_size;
        let Some(state) = self.pages.get_mut(page) else {
            return effects;
        };

        if state.last_rendered_scale != Some(scale) && state.pending_scale != Some(scale) {
            let mut effective = scale;
            if size.width > 0.0 && effective > max / size.width {
                effective = max / size.width;
            }
            if size.height > 0.0 && effective > max / size.height {
                effective = max / size.height;
            }
            state.pending_scale = Some(scale);
            effects.push(Effect::FetchImage {
                page,
                width: (size.width * effective).round().max(1.0) as u32,
                height: (size.height * effective).round().max(1.0) as u32,
                scale,
            });
        }

        state.overlay_dirty = true;
        effects.push(Effect::FetchOverlays { page });
        effects
    }

    /// A page bitmap for `scale` was painted
    pub fn image_rendered(&mut self, page: usize, scale: f32) {
        if let Some(state) = self.pages.get_mut(page) {
            state.last_rendered_scale = Some(scale);
            if state.pending_scale == Some(scale) {
                state.pending_scale = None;
            }
        }
    }

    /// A page bitmap fetch failed or was dropped; the next sweep asks again
    pub fn image_failed(&mut self, page: usize, scale: f32) {
        if let Some(state) = self.pages.get_mut(page) {
            if state.pending_scale == Some(scale) {
                state.pending_scale = None;
            }
        }
    }

    /// Overlay elements of `page` were rebuilt (or their fetch failed)
    pub fn overlays_settled(&mut self, page: usize) {
        if let Some(state) = self.pages.get_mut(page) {
            state.overlay_dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PageSize;
    use crate::viewer::viewport::{ContainerSize, PageLayout};

    fn viewport(sizes: &[(f32, f32)], height: f32) -> ViewportController {
        ViewportController::new(
            PageLayout::new(
                sizes.iter().map(|&(w, h)| PageSize::new(w, h)).collect(),
                10.0,
                20.0,
            ),
            ContainerSize::new(800.0, height),
        )
    }

    fn image_pages(effects: &[Effect]) -> Vec<usize> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::FetchImage { page, .. } => Some(*page),
                _ => None,
            })
            .collect()
    }

    fn overlay_pages(effects: &[Effect]) -> Vec<usize> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::FetchOverlays { page } => Some(*page),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sweep_renders_the_visible_run_only() {
        let vp = viewport(&[(600.0, 800.0), (600.0, 800.0), (600.0, 400.0)], 900.0);
        let mut scheduler = RenderScheduler::new(3, 2048);
        scheduler.trigger_sweep();
        let effects = scheduler.run_to_idle(&vp);

        assert_eq!(image_pages(&effects), vec![0, 1]);
        assert_eq!(overlay_pages(&effects), vec![0, 1]);
        assert_eq!(scheduler.last_visible(), Some(0..2));
        // page 0 stays active, so no change is announced
        assert!(!effects.iter().any(|e| matches!(e, Effect::ActivePageChanged(_))));
    }

    #[test]
    fn leading_invisible_pages_are_skipped_and_active_page_follows_coverage() {
        let mut vp = viewport(&[(600.0, 800.0); 6], 900.0);
        vp.scroll_to(2430.0 + 100.0);
        let mut scheduler = RenderScheduler::new(6, 2048);
        scheduler.trigger_sweep();
        let effects = scheduler.run_to_idle(&vp);

        assert_eq!(image_pages(&effects), vec![3, 4]);
        assert!(effects.contains(&Effect::ActivePageChanged(3)));
    }

    #[test]
    fn triggers_during_a_sweep_collapse_into_one_follow_up() {
        let vp = viewport(&[(600.0, 800.0); 4], 900.0);
        let mut scheduler = RenderScheduler::new(4, 2048);
        scheduler.trigger_sweep();
        scheduler.step(&vp);
        for _ in 0..5 {
            scheduler.trigger_sweep();
        }
        scheduler.run_to_idle(&vp);
        assert_eq!(scheduler.sweeps_started(), 2);
        assert!(scheduler.is_idle());
        assert!(!scheduler.is_cancel_requested());
    }

    #[test]
    fn cancellation_stops_before_the_next_page() {
        let vp = viewport(&[(600.0, 200.0); 6], 900.0);
        let mut scheduler = RenderScheduler::new(6, 2048);
        scheduler.trigger_sweep();
        let first = scheduler.step(&vp);
        assert_eq!(image_pages(&first), vec![0]);

        scheduler.trigger_sweep();
        // the cancelling step renders nothing and hands over to the follow-up
        assert!(scheduler.step(&vp).is_empty());
        assert!(!scheduler.is_idle());
        assert!(!scheduler.is_cancel_requested());
        assert_eq!(scheduler.sweeps_started(), 2);

        // page 0 is already in flight at this scale, only its overlays are redone
        let follow_up = scheduler.step(&vp);
        assert!(image_pages(&follow_up).is_empty());
        assert_eq!(overlay_pages(&follow_up), vec![0]);
        let rest = scheduler.run_to_idle(&vp);
        assert_eq!(image_pages(&rest), vec![1, 2, 3, 4]);
    }

    #[test]
    fn images_are_not_refetched_at_the_same_scale() {
        let mut vp = viewport(&[(600.0, 800.0)], 900.0);
        let mut scheduler = RenderScheduler::new(1, 2048);
        scheduler.trigger_sweep();
        scheduler.run_to_idle(&vp);
        scheduler.image_rendered(0, 1.0);

        scheduler.trigger_sweep();
        let again = scheduler.run_to_idle(&vp);
        assert!(image_pages(&again).is_empty());
        assert_eq!(overlay_pages(&again), vec![0]);

        vp.set_scale(1.5, 0.0, 0.0);
        scheduler.trigger_sweep();
        assert_eq!(image_pages(&scheduler.run_to_idle(&vp)), vec![0]);
    }

    #[test]
    fn bitmap_size_is_capped_by_texture_limit() {
        let mut vp = viewport(&[(600.0, 800.0)], 900.0);
        vp.set_scale(4.0, 0.0, 0.0);
        let mut scheduler = RenderScheduler::new(1, 2048);
        scheduler.trigger_sweep();
        let effects = scheduler.run_to_idle(&vp);
        let Some(Effect::FetchImage { width, height, scale, .. }) = effects.first() else {
            panic!("expected an image fetch");
        };
        assert_eq!((*width, *height), (1536, 2048));
        assert_eq!(*scale, 4.0);
    }

    #[test]
    fn failed_images_are_retried() {
        let vp = viewport(&[(600.0, 800.0)], 900.0);
        let mut scheduler = RenderScheduler::new(1, 2048);
        scheduler.trigger_sweep();
        scheduler.run_to_idle(&vp);
        scheduler.image_failed(0, 1.0);

        scheduler.trigger_sweep();
        assert_eq!(image_pages(&scheduler.run_to_idle(&vp)), vec![0]);
    }
}
