//! MuPDF-backed engine
//!
//! Text blocks become paragraphs and their lines become sentences. Image
//! blocks are reported as image paragraphs. A one-line block hugging the top
//! or bottom edge of the page is treated as a running header or footer.

use ::mupdf::text_page::TextBlockType;
use ::mupdf::{Colorspace, Document, Matrix, MetadataName, Page, Pixmap, TextPageFlags};
use log::{debug, warn};

use super::instance::{PageBackend, PdfInstance};
use super::types::{BoundingBox, ContentType, LoadError, Location, Markable, PageSize, PdfInfo};
use super::{DocumentEngine, EngineInstance, EnumDescriptor, InvokeError, standard_enums};

/// Share of the page height treated as header or footer band
const EDGE_BAND: f32 = 0.08;

/// Engine producing MuPDF document instances
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfEngine;

impl MupdfEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for MupdfEngine {
    fn enums(&self) -> Vec<EnumDescriptor> {
        standard_enums()
    }

    fn create_instance(&mut self) -> Result<Box<dyn EngineInstance>, InvokeError> {
        Ok(Box::new(PdfInstance::new(MupdfBackend::default())))
    }
}

fn engine_error(e: ::mupdf::error::Error) -> InvokeError {
    InvokeError::Engine(e.to_string())
}

#[derive(Default)]
pub struct MupdfBackend {
    doc: Option<Document>,
    page_count: usize,
}

impl MupdfBackend {
    fn doc(&self) -> Result<&Document, InvokeError> {
        self.doc
            .as_ref()
            .ok_or_else(|| InvokeError::Engine("No document loaded.".to_string()))
    }

    fn load_page(&self, page: usize) -> Result<Page, InvokeError> {
        if page >= self.page_count {
            return Err(InvokeError::Engine(format!("page {page} out of range")));
        }
        self.doc()?.load_page(page as i32).map_err(engine_error)
    }

    fn metadata(&self, name: MetadataName) -> String {
        self.doc
            .as_ref()
            .and_then(|doc| doc.metadata(name).ok())
            .unwrap_or_default()
    }
}

impl PageBackend for MupdfBackend {
    fn load(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        self.doc = None;
        self.page_count = 0;
        if bytes.is_empty() {
            return Err(LoadError::File);
        }

        let doc = Document::from_bytes(bytes, "application/pdf").map_err(|e| {
            warn!("MuPDF rejected the document: {e}");
            LoadError::Format
        })?;
        if doc.needs_password().unwrap_or(false) {
            return Err(LoadError::Password);
        }
        let page_count = doc.page_count().map_err(|e| {
            warn!("Failed to count pages: {e}");
            LoadError::Format
        })?;

        self.page_count = usize::try_from(page_count).unwrap_or_default();
        self.doc = Some(doc);
        debug!("MuPDF document opened with {} pages", self.page_count);
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_size(&self, page: usize) -> Result<PageSize, InvokeError> {
        let bounds = self.load_page(page)?.bounds().map_err(engine_error)?;
        Ok(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        background: i64,
    ) -> Result<Vec<u8>, InvokeError> {
        let loaded = self.load_page(page)?;
        let bounds = loaded.bounds().map_err(engine_error)?;
        let page_width = (bounds.x1 - bounds.x0).max(1.0);
        let page_height = (bounds.y1 - bounds.y0).max(1.0);

        let transform = Matrix::new_scale(width as f32 / page_width, height as f32 / page_height);
        let alpha = background >= 0;
        let pixmap = loaded
            .to_pixmap(&transform, &Colorspace::device_rgb(), alpha, false)
            .map_err(engine_error)?;
        Ok(pixmap_to_rgba(&pixmap, width, height, background))
    }

    fn paragraphs(&mut self, page: usize) -> Result<Vec<Markable>, InvokeError> {
        let loaded = self.load_page(page)?;
        let bounds = loaded.bounds().map_err(engine_error)?;
        let page_height = bounds.y1 - bounds.y0;
        let text_page = loaded
            .to_text_page(TextPageFlags::PRESERVE_IMAGES)
            .map_err(engine_error)?;

        let page_index = page as i32;
        let mut paragraphs = Vec::new();
        for block in text_page.blocks() {
            let par_index = paragraphs.len() as i32;
            let b = block.bounds();
            let bbox = BoundingBox::new(b.x0, b.y0 - bounds.y0, b.x1, b.y1 - bounds.y0);

            let (content_type, inner_segments) = match block.r#type() {
                TextBlockType::Text => {
                    let lines: Vec<Markable> = block
                        .lines()
                        .enumerate()
                        .map(|(snt, line)| {
                            let l = line.bounds();
                            Markable {
                                page_index,
                                par_index,
                                snt_index: snt as i32,
                                bounding_box: BoundingBox::new(
                                    l.x0,
                                    l.y0 - bounds.y0,
                                    l.x1,
                                    l.y1 - bounds.y0,
                                ),
                                location: Location::Main,
                                content_type: ContentType::Text,
                                inner_segments: vec![],
                            }
                        })
                        .collect();
                    (ContentType::Text, lines)
                }
                TextBlockType::Image => (ContentType::Image, vec![]),
                _ => continue,
            };

            let location = edge_location(&bbox, inner_segments.len(), page_height);
            let inner_segments = inner_segments
                .into_iter()
                .map(|s| Markable { location, ..s })
                .collect();
            paragraphs.push(Markable {
                page_index,
                par_index,
                snt_index: -1,
                bounding_box: bbox,
                location,
                content_type,
                inner_segments,
            });
        }
        Ok(paragraphs)
    }

    fn sentence_text(&mut self, page: usize, par: i32, snt: i32) -> String {
        let Ok(loaded) = self.load_page(page) else {
            return String::new();
        };
        let Ok(text_page) = loaded.to_text_page(TextPageFlags::PRESERVE_IMAGES) else {
            return String::new();
        };
        text_page
            .blocks()
            .nth(par.max(0) as usize)
            .and_then(|block| block.lines().nth(snt.max(0) as usize))
            .map(|line| line.chars().filter_map(|c| c.char()).collect::<String>())
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    fn info(&self) -> PdfInfo {
        PdfInfo {
            title: self.metadata(MetadataName::Title),
            author: self.metadata(MetadataName::Author),
            subject: self.metadata(MetadataName::Subject),
            keywords: self.metadata(MetadataName::Keywords),
            creation_date: self.metadata(MetadataName::CreationDate),
            modification_date: self.metadata(MetadataName::ModDate),
            creator: self.metadata(MetadataName::Creator),
            pdf_producer: self.metadata(MetadataName::Producer),
            pdf_version: self.metadata(MetadataName::Format),
            ..PdfInfo::default()
        }
    }
}

fn edge_location(bbox: &BoundingBox, lines: usize, page_height: f32) -> Location {
    if lines != 1 || page_height <= 0.0 {
        Location::Main
    } else if bbox.y1 <= page_height * EDGE_BAND {
        Location::Header
    } else if bbox.y0 >= page_height * (1.0 - EDGE_BAND) {
        Location::Footer
    } else {
        Location::Main
    }
}

/// Copy a pixmap into an RGBA buffer of exactly `width` x `height`. Pixels
/// the pixmap does not cover stay white. With a background color
/// (`0xRRGGBB`) the premultiplied page is composited over it.
fn pixmap_to_rgba(pixmap: &Pixmap, width: u32, height: u32, background: i64) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    let mut out = vec![255u8; width * height * 4];

    let n = pixmap.n() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let copy_width = (pixmap.width() as usize).min(width);
    let copy_height = (pixmap.height() as usize).min(height);
    if n < 3 {
        warn!("Unsupported pixmap format: {n} channels");
        return out;
    }

    let bg = if background >= 0 {
        Some([
            ((background >> 16) & 0xFF) as u16,
            ((background >> 8) & 0xFF) as u16,
            (background & 0xFF) as u16,
        ])
    } else {
        None
    };

    for y in 0..copy_height {
        let row_start = y * stride;
        let Some(row) = samples.get(row_start..row_start + copy_width * n) else {
            break;
        };
        for (x, px) in row.chunks_exact(n).enumerate() {
            let dst = (y * width + x) * 4;
            match bg {
                Some(bg) if n >= 4 => {
                    let a = u16::from(px[3]);
                    for c in 0..3 {
                        out[dst + c] = (u16::from(px[c]) + (255 - a) * bg[c] / 255).min(255) as u8;
                    }
                }
                _ => out[dst..dst + 3].copy_from_slice(&px[..3]),
            }
            out[dst + 3] = 255;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_a_format_error() {
        let mut backend = MupdfBackend::default();
        assert_eq!(backend.load(b"definitely not a pdf"), Err(LoadError::Format));
        assert_eq!(backend.page_count(), 0);
    }

    #[test]
    fn empty_input_is_a_file_error() {
        let mut backend = MupdfBackend::default();
        assert_eq!(backend.load(&[]), Err(LoadError::File));
    }

    #[test]
    fn single_line_edge_blocks_are_headers_and_footers() {
        let header = BoundingBox::new(0.0, 5.0, 100.0, 20.0);
        let footer = BoundingBox::new(0.0, 770.0, 100.0, 790.0);
        let body = BoundingBox::new(0.0, 300.0, 100.0, 320.0);
        assert_eq!(edge_location(&header, 1, 800.0), Location::Header);
        assert_eq!(edge_location(&footer, 1, 800.0), Location::Footer);
        assert_eq!(edge_location(&body, 1, 800.0), Location::Main);
        assert_eq!(edge_location(&header, 3, 800.0), Location::Main);
    }
}
