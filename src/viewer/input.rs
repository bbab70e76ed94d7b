//! Input coalescing
//!
//! Scroll and wheel bursts collapse into one sweep after a quiet period.
//! Pinch gestures only change the scale once enough move samples have
//! arrived, which filters single-sample jitter.

use std::time::{Duration, Instant};

use super::viewport::ContainerSize;

pub const DEFAULT_SCROLL_DEBOUNCE: Duration = Duration::from_millis(100);
pub const DEFAULT_PINCH_MIN_SAMPLES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchPoint {
    pub x: f32,
    pub y: f32,
}

impl TouchPoint {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance(&self, other: &Self) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn midpoint(&self, other: &Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Wheel event in container coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WheelEvent {
    pub delta_x: f32,
    pub delta_y: f32,
    pub ctrl: bool,
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    /// The container was scrolled to an absolute position
    Scroll { top: f32, left: f32 },
    Wheel(WheelEvent),
    TouchStart(Vec<TouchPoint>),
    TouchMove(Vec<TouchPoint>),
    TouchEnd,
    Resize(ContainerSize),
}

/// Trailing-edge debouncer: fires once `window` has passed since the last poke
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn poke(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once per burst, when the quiet period has elapsed
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_DEBOUNCE)
    }
}

/// Scale change produced by a pinch, anchored at the finger midpoint
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinchZoom {
    pub scale: f32,
    pub anchor: TouchPoint,
}

#[derive(Debug)]
pub struct PinchTracker {
    min_samples: usize,
    samples: usize,
    // scale per unit of finger distance at gesture start
    start_ratio: Option<f32>,
}

impl PinchTracker {
    #[must_use]
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples,
            samples: 0,
            start_ratio: None,
        }
    }

    /// Start tracking when exactly two fingers touch
    pub fn begin(&mut self, points: &[TouchPoint], scale: f32) {
        self.samples = 0;
        self.start_ratio = match points {
            [a, b] => {
                let distance = a.distance(b);
                (distance > 0.0).then(|| scale / distance)
            }
            _ => None,
        };
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.start_ratio.is_some()
    }

    /// Feed one move sample; yields a zoom once enough samples arrived
    pub fn update(&mut self, points: &[TouchPoint]) -> Option<PinchZoom> {
        let ratio = self.start_ratio?;
        let [a, b] = points else {
            return None;
        };
        self.samples += 1;
        if self.samples < self.min_samples {
            return None;
        }
        Some(PinchZoom {
            scale: ratio * a.distance(b),
            anchor: a.midpoint(b),
        })
    }

    pub fn end(&mut self) {
        self.samples = 0;
        self.start_ratio = None;
    }
}

impl Default for PinchTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PINCH_MIN_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debouncer_fires_once_after_the_quiet_period() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        for i in 0..5 {
            debouncer.poke(start + Duration::from_millis(i * 20));
        }
        assert!(!debouncer.fire(start + Duration::from_millis(150)));
        assert!(debouncer.fire(start + Duration::from_millis(180)));
        assert!(!debouncer.fire(start + Duration::from_millis(400)));
    }

    #[test]
    fn pinch_needs_enough_samples() {
        let mut pinch = PinchTracker::new(4);
        pinch.begin(&[TouchPoint::new(100.0, 100.0), TouchPoint::new(200.0, 100.0)], 1.0);
        let spread = [TouchPoint::new(50.0, 100.0), TouchPoint::new(250.0, 100.0)];

        for _ in 0..3 {
            assert_eq!(pinch.update(&spread), None);
        }
        let zoom = pinch.update(&spread).unwrap();
        assert!((zoom.scale - 2.0).abs() < 1e-5);
        assert_eq!(zoom.anchor, TouchPoint::new(150.0, 100.0));
    }

    #[test]
    fn single_finger_is_not_a_pinch() {
        let mut pinch = PinchTracker::default();
        pinch.begin(&[TouchPoint::new(1.0, 1.0)], 1.0);
        assert!(!pinch.is_active());
        assert_eq!(pinch.update(&[TouchPoint::new(1.0, 1.0), TouchPoint::new(5.0, 5.0)]), None);
    }

    #[test]
    fn ending_resets_the_sample_count() {
        let mut pinch = PinchTracker::new(2);
        let pair = [TouchPoint::new(0.0, 0.0), TouchPoint::new(10.0, 0.0)];
        pinch.begin(&pair, 1.0);
        assert_eq!(pinch.update(&pair), None);
        pinch.end();
        pinch.begin(&pair, 1.0);
        assert_eq!(pinch.update(&pair), None);
        assert!(pinch.update(&pair).is_some());
    }
}
