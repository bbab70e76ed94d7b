//! Sentence navigation shared by engine implementations
//!
//! Paragraphs are the outer markables of a page, sentences their inner
//! segments. Navigation only visits text paragraphs and never leaves the
//! location (main text, footnotes, ...) the cursor currently sits in.

use super::types::{ActiveSentence, Location, Markable};

/// Per-page paragraph data backing a [`SentenceCursor`]
pub trait ParagraphSource {
    fn page_count(&self) -> usize;
    fn paragraphs(&mut self, page: usize) -> Vec<Markable>;
    fn sentence_text(&mut self, page: usize, par: i32, snt: i32) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Stop {
    par: i32,
    snt: i32,
}

fn stops(paragraphs: &[Markable], location: Location) -> Vec<Stop> {
    paragraphs
        .iter()
        .filter(|p| p.location == location && p.content_type.is_text())
        .flat_map(|p| {
            p.inner_segments.iter().map(move |s| Stop {
                par: p.par_index,
                snt: s.snt_index,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct SentenceCursor {
    current: ActiveSentence,
}

impl SentenceCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> ActiveSentence {
        self.current
    }

    fn at(page: usize, stop: Stop, location: Location) -> ActiveSentence {
        let page = page as i32;
        ActiveSentence {
            page_index: page,
            real_page_index: page,
            par_index: stop.par,
            snt_index: stop.snt,
            location,
        }
    }

    /// Select the first sentence at or after `(page, par, snt)` in `location`.
    /// `-1` for `par`/`snt` means "from the first one".
    pub fn set(
        &mut self,
        source: &mut dyn ParagraphSource,
        page: i32,
        par: i32,
        snt: i32,
        location: Location,
    ) -> ActiveSentence {
        let found = usize::try_from(page)
            .ok()
            .filter(|_| location != Location::None)
            .and_then(|start| {
                (start..source.page_count()).find_map(|p| {
                    let candidates = stops(&source.paragraphs(p), location);
                    let stop = if p == start {
                        candidates
                            .into_iter()
                            .find(|s| s.par > par || (s.par == par && s.snt >= snt))
                    } else {
                        candidates.into_iter().next()
                    };
                    stop.map(|stop| Self::at(p, stop, location))
                })
            });

        match found {
            Some(sentence) => {
                self.current = sentence;
                sentence
            }
            None => ActiveSentence::NONE,
        }
    }

    /// Step to the following sentence. Past the end the cursor stays put and
    /// an invalid sentence is returned.
    pub fn next(&mut self, source: &mut dyn ParagraphSource) -> ActiveSentence {
        let cur = self.current;
        if !cur.is_valid() {
            return self.set(source, 0, -1, -1, Location::Main);
        }
        let here = Stop {
            par: cur.par_index,
            snt: cur.snt_index,
        };
        let start = cur.page_index as usize;
        for p in start..source.page_count() {
            let candidates = stops(&source.paragraphs(p), cur.location);
            let next = if p == start {
                candidates
                    .iter()
                    .position(|s| *s == here)
                    .and_then(|i| candidates.get(i + 1).copied())
            } else {
                candidates.first().copied()
            };
            if let Some(stop) = next {
                self.current = Self::at(p, stop, cur.location);
                return self.current;
            }
        }
        ActiveSentence::NONE
    }

    /// Step to the preceding sentence. Before the start the cursor stays put and
    /// an invalid sentence is returned.
    pub fn prev(&mut self, source: &mut dyn ParagraphSource) -> ActiveSentence {
        let cur = self.current;
        if !cur.is_valid() {
            return ActiveSentence::NONE;
        }
        let here = Stop {
            par: cur.par_index,
            snt: cur.snt_index,
        };
        let start = cur.page_index as usize;
        for p in (0..=start.min(source.page_count().saturating_sub(1))).rev() {
            let candidates = stops(&source.paragraphs(p), cur.location);
            let prev = if p == start {
                candidates
                    .iter()
                    .position(|s| *s == here)
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| candidates.get(i).copied())
            } else {
                candidates.last().copied()
            };
            if let Some(stop) = prev {
                self.current = Self::at(p, stop, cur.location);
                return self.current;
            }
        }
        ActiveSentence::NONE
    }

    /// Text of the current sentence, selecting the first main-text sentence
    /// when nothing is selected yet
    pub fn content(&mut self, source: &mut dyn ParagraphSource) -> String {
        if !self.current.is_valid() {
            self.set(source, 0, -1, -1, Location::Main);
        }
        let cur = self.current;
        if !cur.is_valid() {
            return String::new();
        }
        source.sentence_text(cur.page_index as usize, cur.par_index, cur.snt_index)
    }
}
