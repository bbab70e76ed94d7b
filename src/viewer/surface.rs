//! Drawing sink for the viewer
//!
//! The viewer never paints directly. It hands page bitmaps and overlay
//! element lists to a [`Surface`], which a frontend implements.

use std::collections::BTreeMap;

use super::overlay::PageOverlay;

/// RGBA page bitmap as produced by `getPageImage`
#[derive(Clone, Debug, PartialEq)]
pub struct PageBitmap {
    pub page: usize,
    pub width: u32,
    pub height: u32,
    /// Viewport scale the bitmap was requested for
    pub scale: f32,
    pub rgba: Vec<u8>,
}

impl PageBitmap {
    /// Whether the pixel buffer matches the announced dimensions
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rgba.len() == self.width as usize * self.height as usize * 4
    }
}

pub trait Surface {
    /// Replace the page canvas with a new bitmap
    fn draw_page_image(&mut self, bitmap: PageBitmap);

    /// Drop every overlay element of `overlay.page` and draw the new ones
    fn replace_overlay(&mut self, overlay: PageOverlay);

    /// The scrollable content changed size (scaled, margins included)
    fn resize_content(&mut self, width: f32, height: f32);

    /// A new document replaces the old one
    fn clear(&mut self);
}

/// Surface keeping the latest bitmap and overlay of each page in memory
#[derive(Debug, Default)]
pub struct MemorySurface {
    pub images: BTreeMap<usize, PageBitmap>,
    pub overlays: BTreeMap<usize, PageOverlay>,
    pub content_size: (f32, f32),
    pub image_draws: usize,
    pub overlay_draws: usize,
}

impl MemorySurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn image(&self, page: usize) -> Option<&PageBitmap> {
        self.images.get(&page)
    }

    #[must_use]
    pub fn overlay(&self, page: usize) -> Option<&PageOverlay> {
        self.overlays.get(&page)
    }
}

impl Surface for MemorySurface {
    fn draw_page_image(&mut self, bitmap: PageBitmap) {
        self.image_draws += 1;
        self.images.insert(bitmap.page, bitmap);
    }

    fn replace_overlay(&mut self, overlay: PageOverlay) {
        self.overlay_draws += 1;
        self.overlays.insert(overlay.page, overlay);
    }

    fn resize_content(&mut self, width: f32, height: f32) {
        self.content_size = (width, height);
    }

    fn clear(&mut self) {
        self.images.clear();
        self.overlays.clear();
        self.content_size = (0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_surface_keeps_the_latest_bitmap() {
        let mut surface = MemorySurface::new();
        for scale in [1.0, 2.0] {
            surface.draw_page_image(PageBitmap {
                page: 0,
                width: 1,
                height: 1,
                scale,
                rgba: vec![0; 4],
            });
        }
        assert_eq!(surface.image_draws, 2);
        assert_eq!(surface.image(0).map(|b| b.scale), Some(2.0));
        assert!(surface.image(0).unwrap().is_complete());

        surface.clear();
        assert!(surface.image(0).is_none());
    }
}
