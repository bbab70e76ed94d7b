//! Viewport and scale controller
//!
//! Content space is the unscaled page stack: pages laid out top to bottom,
//! each followed by the vertical margin. Screen space is the container,
//! scrolled by `scroll_top`/`scroll_left` over the content scaled by `scale`.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::engine::PageSize;

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 5.0;
/// Virtual width narrow documents are fitted to on wide containers
pub const REFERENCE_WIDTH: f32 = 1024.0;
/// Zoom step per in/out request, in percent
pub const ZOOM_STEP_PERCENT: f32 = 5.0;

/// Sentence scrolled below this share of the viewport height gets pulled up
const SCROLL_INTO_VIEW_LOWER: f32 = 0.66;
/// Sentence closer than this to the viewport top gets pushed down
const SCROLL_INTO_VIEW_TOP_GAP: f32 = 42.0;

#[must_use]
pub fn is_valid_scale(scale: f32) -> bool {
    scale.is_finite() && (MIN_SCALE..=MAX_SCALE).contains(&scale)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Screen-space rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Coarse bounding-box test; touching edges do not count
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Share of `viewport`'s height covered by this rectangle
    #[must_use]
    pub fn vertical_coverage(&self, viewport: &Rect) -> f32 {
        if viewport.height <= 0.0 {
            return 0.0;
        }
        let overlap = self.bottom().min(viewport.bottom()) - self.y.max(viewport.y);
        (overlap / viewport.height).max(0.0)
    }
}

/// Unscaled geometry of the page stack
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageLayout {
    pub sizes: Vec<PageSize>,
    pub vertical_margin: f32,
    pub horizontal_margin: f32,
}

impl PageLayout {
    #[must_use]
    pub fn new(sizes: Vec<PageSize>, vertical_margin: f32, horizontal_margin: f32) -> Self {
        Self {
            sizes,
            vertical_margin,
            horizontal_margin,
        }
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.sizes.len()
    }

    #[must_use]
    pub fn max_width(&self) -> f32 {
        self.sizes.iter().map(|s| s.width).fold(0.0, f32::max)
    }

    #[must_use]
    pub fn total_height(&self) -> f32 {
        self.sizes
            .iter()
            .map(|s| s.height + self.vertical_margin)
            .sum()
    }
}

/// Scroll offsets are logical: right after a zoom they may lie outside the
/// scrollable range until the next scroll or resize.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub scale: f32,
    pub scroll_top: f32,
    pub scroll_left: f32,
    pub active_page_index: usize,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            scroll_top: 0.0,
            scroll_left: 0.0,
            active_page_index: 0,
        }
    }
}

/// How the scale was last chosen
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScaleMode {
    ZoomIn,
    ZoomOut,
    Auto,
    Actual,
    Fixed(f32),
}

impl FromStr for ScaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+1" => Ok(Self::ZoomIn),
            "-1" => Ok(Self::ZoomOut),
            "auto" => Ok(Self::Auto),
            "actual" => Ok(Self::Actual),
            other => other
                .parse::<f32>()
                .map(Self::Fixed)
                .map_err(|_| {
                    format!("invalid zoom '{other}': expected +1, -1, auto, actual or a factor")
                }),
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZoomIn => write!(f, "+1"),
            Self::ZoomOut => write!(f, "-1"),
            Self::Auto => write!(f, "auto"),
            Self::Actual => write!(f, "actual"),
            Self::Fixed(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug)]
pub struct ViewportController {
    state: ViewportState,
    layout: PageLayout,
    container: ContainerSize,
    mode: ScaleMode,
}

impl ViewportController {
    #[must_use]
    pub fn new(layout: PageLayout, container: ContainerSize) -> Self {
        Self {
            state: ViewportState::default(),
            layout,
            container,
            mode: ScaleMode::Actual,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.state.scale
    }

    #[must_use]
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    #[must_use]
    pub fn container(&self) -> ContainerSize {
        self.container
    }

    #[must_use]
    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    pub fn set_layout(&mut self, layout: PageLayout) {
        self.layout = layout;
        self.state = ViewportState {
            scale: self.state.scale,
            ..ViewportState::default()
        };
    }

    /// Scaled size of the whole page stack
    #[must_use]
    pub fn content_size(&self) -> (f32, f32) {
        let scale = self.state.scale;
        (
            (self.layout.max_width() + self.layout.horizontal_margin) * scale,
            self.layout.total_height() * scale,
        )
    }

    fn max_scroll(&self) -> (f32, f32) {
        let (width, height) = self.content_size();
        (
            (width - self.container.width).max(0.0),
            (height - self.container.height).max(0.0),
        )
    }

    fn clamp_scroll(&mut self) {
        let (max_left, max_top) = self.max_scroll();
        self.state.scroll_left = self.state.scroll_left.clamp(0.0, max_left);
        self.state.scroll_top = self.state.scroll_top.clamp(0.0, max_top);
    }

    /// Zoom keeping the content point under `(anchor_x, anchor_y)` (container
    /// coordinates) fixed on screen. Out-of-range scales are ignored.
    ///
    /// The scroll offsets are left unclamped so zooming back restores the
    /// anchor exactly; [`Self::effective_scroll`] gives what is displayed.
    pub fn set_scale(&mut self, scale: f32, anchor_x: f32, anchor_y: f32) -> bool {
        if !is_valid_scale(scale) {
            debug!("Ignoring out-of-range scale {scale}");
            return false;
        }
        let old = self.state.scale;
        let content_x = (anchor_x + self.state.scroll_left) / old;
        let content_y = (anchor_y + self.state.scroll_top) / old;

        self.state.scale = scale;
        self.state.scroll_left += content_x * (scale - old);
        self.state.scroll_top += content_y * (scale - old);
        true
    }

    /// Scroll offsets `(left, top)` limited to the scrollable range
    #[must_use]
    pub fn effective_scroll(&self) -> (f32, f32) {
        let (max_left, max_top) = self.max_scroll();
        (
            self.state.scroll_left.clamp(0.0, max_left),
            self.state.scroll_top.clamp(0.0, max_top),
        )
    }

    /// Content point currently under a container point
    #[must_use]
    pub fn content_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x + self.state.scroll_left) / self.state.scale,
            (y + self.state.scroll_top) / self.state.scale,
        )
    }

    #[must_use]
    pub fn compute_best_fit_scale(&self) -> f32 {
        let max_width = self.layout.max_width();
        let screen = self.container.width;
        let margin = self.layout.horizontal_margin;
        if max_width <= 0.0 {
            1.0
        } else if max_width > screen - margin {
            (screen - margin) / max_width
        } else if screen > REFERENCE_WIDTH && max_width < REFERENCE_WIDTH {
            REFERENCE_WIDTH / max_width
        } else {
            1.0
        }
    }

    /// Scale one zoom step away from the current one
    #[must_use]
    pub fn stepped_scale(&self, zoom_in: bool) -> f32 {
        let factor = if zoom_in {
            1.0 + ZOOM_STEP_PERCENT / 100.0
        } else {
            1.0 - ZOOM_STEP_PERCENT / 100.0
        };
        self.state.scale * factor
    }

    /// Apply a scale mode anchored at the container's top center. The mode is
    /// remembered even when the resulting scale is out of range.
    pub fn set_absolute_scale(&mut self, mode: ScaleMode) -> bool {
        self.mode = mode;
        let scale = match mode {
            ScaleMode::ZoomIn => self.stepped_scale(true),
            ScaleMode::ZoomOut => self.stepped_scale(false),
            ScaleMode::Auto => self.compute_best_fit_scale(),
            ScaleMode::Actual => 1.0,
            ScaleMode::Fixed(v) => v,
        };
        self.set_scale(scale, self.container.width / 2.0, 0.0)
    }

    /// Resize the container; auto mode refits
    pub fn resize_container(&mut self, container: ContainerSize) -> bool {
        if self.container == container {
            return false;
        }
        self.container = container;
        let refit = self.mode == ScaleMode::Auto && self.set_absolute_scale(ScaleMode::Auto);
        self.clamp_scroll();
        refit
    }

    /// Scaled offset of page `page` from the top of the content
    #[must_use]
    pub fn page_offset(&self, page: usize) -> f32 {
        self.layout
            .sizes
            .iter()
            .take(page)
            .map(|s| (s.height + self.layout.vertical_margin) * self.state.scale)
            .sum()
    }

    /// Screen rectangle of a page box, margins included
    #[must_use]
    pub fn page_rect(&self, page: usize) -> Option<Rect> {
        let size = self.layout.sizes.get(page)?;
        let scale = self.state.scale;
        let (scroll_left, scroll_top) = self.effective_scroll();
        Some(Rect {
            x: -scroll_left,
            y: self.page_offset(page) - scroll_top,
            width: (size.width + self.layout.horizontal_margin) * scale,
            height: (size.height + self.layout.vertical_margin) * scale,
        })
    }

    /// The container in screen coordinates
    #[must_use]
    pub fn viewport_rect(&self) -> Rect {
        Rect {
            x: 0.0,
            y: 0.0,
            width: self.container.width,
            height: self.container.height,
        }
    }

    pub fn scroll_to(&mut self, top: f32) {
        self.state.scroll_top = top;
        self.clamp_scroll();
    }

    pub fn scroll_by(&mut self, dx: f32, dy: f32) {
        self.state.scroll_left += dx;
        self.state.scroll_top += dy;
        self.clamp_scroll();
    }

    /// Jump to the top of `page`. Out-of-range and current pages are ignored.
    pub fn set_active_page_index(&mut self, page: usize) -> bool {
        if page >= self.layout.page_count() || page == self.state.active_page_index {
            return false;
        }
        self.scroll_to(self.page_offset(page));
        true
    }

    /// Record the page the scheduler found to dominate the viewport
    pub fn set_active_page(&mut self, page: usize) {
        self.state.active_page_index = page;
    }

    /// Scroll so a node at content offset `node_top` (scaled) sits between
    /// the top gap and the lower threshold of the viewport
    pub fn scroll_into_view(&mut self, node_top: f32) -> bool {
        let (_, scroll_top) = self.effective_scroll();
        let vh = self.container.height;
        let target = if node_top > scroll_top + vh * SCROLL_INTO_VIEW_LOWER {
            node_top - vh * SCROLL_INTO_VIEW_LOWER
        } else if node_top < scroll_top + SCROLL_INTO_VIEW_TOP_GAP {
            node_top - SCROLL_INTO_VIEW_TOP_GAP
        } else {
            return false;
        };
        self.scroll_to(target);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(sizes: &[(f32, f32)]) -> PageLayout {
        PageLayout::new(
            sizes.iter().map(|&(w, h)| PageSize::new(w, h)).collect(),
            10.0,
            20.0,
        )
    }

    fn tall_controller() -> ViewportController {
        ViewportController::new(
            layout(&[(600.0, 800.0); 10]),
            ContainerSize::new(800.0, 900.0),
        )
    }

    #[test]
    fn scale_roundtrip_keeps_anchor_point() {
        let mut vp = tall_controller();
        vp.scroll_to(1500.0);
        let before = vp.content_point(300.0, 400.0);

        assert!(vp.set_scale(2.0, 300.0, 400.0));
        let zoomed = vp.content_point(300.0, 400.0);
        assert!((zoomed.0 - before.0).abs() < 1e-3);
        assert!((zoomed.1 - before.1).abs() < 1e-3);

        assert!(vp.set_scale(1.0, 300.0, 400.0));
        let after = vp.content_point(300.0, 400.0);
        assert!((after.0 - before.0).abs() < 1e-3);
        assert!((after.1 - before.1).abs() < 1e-3);
    }

    #[test]
    fn scale_roundtrip_at_the_top_edge_keeps_anchor_point() {
        let mut vp = tall_controller();
        let before = vp.content_point(300.0, 400.0);

        assert!(vp.set_scale(0.5, 300.0, 400.0));
        assert_eq!(vp.effective_scroll(), (0.0, 0.0));
        assert_eq!(vp.page_rect(0).map(|r| (r.x, r.y)), Some((0.0, 0.0)));

        assert!(vp.set_scale(1.0, 300.0, 400.0));
        let after = vp.content_point(300.0, 400.0);
        assert!((after.0 - before.0).abs() < 1e-3);
        assert!((after.1 - before.1).abs() < 1e-3);
    }

    #[test]
    fn scrolling_after_zoom_clamps_the_offsets() {
        let mut vp = tall_controller();
        vp.set_scale(0.5, 300.0, 400.0);
        assert!(vp.state().scroll_top < 0.0);
        vp.scroll_by(0.0, 10.0);
        assert_eq!(vp.state().scroll_top, 0.0);
        assert_eq!(vp.state().scroll_left, 0.0);
    }

    #[test]
    fn out_of_range_scale_is_a_no_op() {
        let mut vp = tall_controller();
        vp.scroll_to(200.0);
        let state = *vp.state();
        assert!(!vp.set_scale(5.5, 10.0, 10.0));
        assert!(!vp.set_scale(0.2, 10.0, 10.0));
        assert!(!vp.set_scale(f32::NAN, 10.0, 10.0));
        assert_eq!(*vp.state(), state);
    }

    #[test]
    fn best_fit_shrinks_wide_content() {
        let vp = ViewportController::new(
            layout(&[(1200.0, 800.0)]),
            ContainerSize::new(620.0, 900.0),
        );
        assert!((vp.compute_best_fit_scale() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn best_fit_widens_narrow_content_on_wide_screens() {
        let vp = ViewportController::new(
            layout(&[(512.0, 800.0)]),
            ContainerSize::new(1600.0, 900.0),
        );
        assert!((vp.compute_best_fit_scale() - 2.0).abs() < 1e-6);

        let small = ViewportController::new(
            layout(&[(512.0, 800.0)]),
            ContainerSize::new(900.0, 900.0),
        );
        assert_eq!(small.compute_best_fit_scale(), 1.0);
    }

    #[test]
    fn page_offsets_are_prefix_sums() {
        let mut vp = ViewportController::new(
            layout(&[(600.0, 800.0), (600.0, 800.0), (600.0, 400.0)]),
            ContainerSize::new(800.0, 900.0),
        );
        assert_eq!(vp.page_offset(0), 0.0);
        assert_eq!(vp.page_offset(2), 1620.0);
        vp.set_scale(2.0, 0.0, 0.0);
        assert_eq!(vp.page_offset(1), 1620.0);
    }

    #[test]
    fn zoom_steps_are_five_percent() {
        let mut vp = tall_controller();
        assert!(vp.set_absolute_scale(ScaleMode::ZoomIn));
        assert!((vp.scale() - 1.05).abs() < 1e-6);
        assert!(vp.set_absolute_scale(ScaleMode::ZoomOut));
        assert!((vp.scale() - 0.9975).abs() < 1e-6);
    }

    #[test]
    fn auto_mode_refits_on_resize() {
        let mut vp = ViewportController::new(
            layout(&[(1200.0, 800.0)]),
            ContainerSize::new(620.0, 900.0),
        );
        vp.set_absolute_scale(ScaleMode::Auto);
        assert!(vp.resize_container(ContainerSize::new(320.0, 900.0)));
        assert!((vp.scale() - 0.25).abs() < 1e-6);

        vp.set_absolute_scale(ScaleMode::Actual);
        assert!(!vp.resize_container(ContainerSize::new(620.0, 900.0)));
        assert_eq!(vp.scale(), 1.0);
    }

    #[test]
    fn active_page_jump_ignores_current_and_out_of_range() {
        let mut vp = tall_controller();
        assert!(!vp.set_active_page_index(0));
        assert!(!vp.set_active_page_index(10));
        assert!(vp.set_active_page_index(3));
        assert_eq!(vp.state().scroll_top, 2430.0);
    }

    #[test]
    fn scroll_into_view_uses_both_thresholds() {
        let mut vp = tall_controller();
        vp.scroll_to(1000.0);
        assert!(vp.scroll_into_view(2000.0));
        assert!((vp.state().scroll_top - (2000.0 - 900.0 * 0.66)).abs() < 1e-3);

        vp.scroll_to(1000.0);
        assert!(vp.scroll_into_view(1010.0));
        assert_eq!(vp.state().scroll_top, 968.0);

        vp.scroll_to(1000.0);
        assert!(!vp.scroll_into_view(1300.0));
    }

    #[test]
    fn scale_modes_parse() {
        assert_eq!("auto".parse::<ScaleMode>(), Ok(ScaleMode::Auto));
        assert_eq!("+1".parse::<ScaleMode>(), Ok(ScaleMode::ZoomIn));
        assert_eq!("1.5".parse::<ScaleMode>(), Ok(ScaleMode::Fixed(1.5)));
        assert!("huge".parse::<ScaleMode>().is_err());
    }
}
