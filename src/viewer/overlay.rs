//! Semantic overlays drawn over page bitmaps
//!
//! Every overlay fetch rebuilds the whole element list of a page from its
//! markables: one padded box per paragraph, one box per sentence.

use serde::{Deserialize, Serialize};

use crate::engine::{ActiveSentence, BoundingBox, Location, Markable};

/// Extra room around paragraph boxes, in page units
const PARAGRAPH_PADDING: f32 = 2.0;

/// Which overlay marks are drawn and in what colors (`#RRGGBBAA`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkerOptions {
    #[serde(alias = "markAllPragarpahs")]
    pub mark_all_paragraphs: bool,
    pub mark_all_non_texts: bool,
    pub mark_selected_sentence: bool,
    pub mark_selected_paragraph: bool,
    #[serde(alias = "markSenetenceOnHover")]
    pub mark_sentence_on_hover: bool,
    pub non_main_texts_can_be_selected: bool,
    pub active_paragraph_highlight: String,
    pub active_sentence_highlight: String,
    pub sentence_hover_color: String,
    pub all_paragraphs_highlight: String,
    pub non_text_marks_highlight: String,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            mark_all_paragraphs: true,
            mark_all_non_texts: true,
            mark_selected_sentence: true,
            mark_selected_paragraph: true,
            mark_sentence_on_hover: true,
            non_main_texts_can_be_selected: false,
            active_paragraph_highlight: "#FFFFFFFF".to_string(),
            active_sentence_highlight: "#FFFF00AA".to_string(),
            sentence_hover_color: "#FF220022".to_string(),
            all_paragraphs_highlight: "#FFFFFF55".to_string(),
            non_text_marks_highlight: "#00007777".to_string(),
        }
    }
}

/// Rounded box in unscaled page coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl OverlayRect {
    fn from_box(b: &BoundingBox, pad: f32) -> Self {
        Self {
            left: (b.x0 - pad).round() as i32,
            top: (b.y0 - pad).round() as i32,
            width: (b.width() + 2.0 * pad).round() as i32,
            height: (b.height() + 2.0 * pad).round() as i32,
        }
    }

    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left as f32
            && x < (self.left + self.width) as f32
            && y >= self.top as f32
            && y < (self.top + self.height) as f32
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParagraphKind {
    Active,
    /// Non-main location or non-text content, labelled by what it is
    NonText { label: &'static str },
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParagraphBox {
    pub rect: OverlayRect,
    pub kind: ParagraphKind,
    pub background: Option<String>,
}

/// Identity of a sentence as it is passed back to `setCurrentSentence`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentenceRef {
    pub location: Location,
    pub page_index: i32,
    /// Page the box is drawn on; differs from `page_index` for paragraphs
    /// continued from a previous page
    pub real_page_index: i32,
    pub par_index: i32,
    pub snt_index: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SentenceBox {
    pub rect: OverlayRect,
    pub sentence: SentenceRef,
    pub paragraph: usize,
    pub hoverable: bool,
    pub selected: bool,
    pub background: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageOverlay {
    pub page: usize,
    pub paragraphs: Vec<ParagraphBox>,
    pub sentences: Vec<SentenceBox>,
}

impl PageOverlay {
    /// Build the overlay of `page` from its markables
    #[must_use]
    pub fn build(
        page: usize,
        markables: &[Markable],
        selected: &ActiveSentence,
        markers: &MarkerOptions,
    ) -> Self {
        let mut overlay = Self {
            page,
            ..Self::default()
        };

        for par in markables {
            let (kind, background) = classify(par, selected, markers);
            let paragraph = overlay.paragraphs.len();
            overlay.paragraphs.push(ParagraphBox {
                rect: OverlayRect::from_box(&par.bounding_box, PARAGRAPH_PADDING),
                kind,
                background,
            });

            for (index, line) in par.inner_segments.iter().enumerate() {
                let sentence = SentenceRef {
                    location: line.location,
                    page_index: line.page_index,
                    real_page_index: if index > 0 {
                        page as i32
                    } else {
                        line.page_index
                    },
                    par_index: line.par_index,
                    snt_index: line.snt_index,
                };
                let hoverable = markers.mark_sentence_on_hover
                    && line.content_type.is_text()
                    && (markers.non_main_texts_can_be_selected || line.location == Location::Main);
                let is_selected = markers.mark_selected_sentence
                    && line.location == selected.location
                    && line.page_index == selected.page_index
                    && line.par_index == selected.par_index
                    && line.snt_index == selected.snt_index;
                overlay.sentences.push(SentenceBox {
                    rect: OverlayRect::from_box(&line.bounding_box, 0.0),
                    sentence,
                    paragraph,
                    hoverable,
                    selected: is_selected,
                    background: is_selected.then(|| markers.active_sentence_highlight.clone()),
                });
            }
        }
        overlay
    }

    /// Topmost sentence box under a page point
    #[must_use]
    pub fn sentence_at(&self, x: f32, y: f32) -> Option<&SentenceBox> {
        self.sentences.iter().rev().find(|s| s.rect.contains(x, y))
    }

    /// Indices of the sentence boxes painted with the hover color while
    /// `hovered` is under the pointer. Selected boxes keep their color.
    #[must_use]
    pub fn hover_targets(&self, hovered: &SentenceRef) -> Vec<usize> {
        self.sentences
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                !s.selected
                    && s.sentence.location == hovered.location
                    && s.sentence.page_index == hovered.page_index
                    && s.sentence.par_index == hovered.par_index
                    && s.sentence.snt_index == hovered.snt_index
            })
            .map(|(i, _)| i)
            .collect()
    }

    #[must_use]
    pub fn selected_sentence(&self) -> Option<&SentenceBox> {
        self.sentences.iter().find(|s| s.selected)
    }
}

fn classify(
    par: &Markable,
    selected: &ActiveSentence,
    markers: &MarkerOptions,
) -> (ParagraphKind, Option<String>) {
    if markers.mark_selected_paragraph
        && par.page_index == selected.page_index
        && par.par_index == selected.par_index
    {
        return (
            ParagraphKind::Active,
            Some(markers.active_paragraph_highlight.clone()),
        );
    }

    let label = if par.location != Location::Main {
        Some(par.location.name())
    } else if !par.content_type.is_text() {
        Some(par.content_type.name())
    } else {
        None
    };

    match label {
        Some(label) if markers.mark_all_non_texts => (
            ParagraphKind::NonText { label },
            Some(markers.non_text_marks_highlight.clone()),
        ),
        Some(_) => (ParagraphKind::Other, None),
        None if markers.mark_all_paragraphs => (
            ParagraphKind::Other,
            Some(markers.all_paragraphs_highlight.clone()),
        ),
        None => (ParagraphKind::Other, None),
    }
}
