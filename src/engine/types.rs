//! Typed records exchanged with the document engine
//!
//! Field names follow the engine's wire names (PascalCase), enum values travel
//! as their integer codes.

use serde::{Deserialize, Serialize};

use super::EnumDescriptor;

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $wire:literal {
            $($variant:ident = $code:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "i64", try_from = "i64")]
        pub enum $name {
            #[default]
            $($variant = $code),*
        }

        impl $name {
            /// Name of the enum class as registered with the engine
            pub const WIRE_NAME: &'static str = $wire;
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            #[must_use]
            pub fn code(self) -> i64 {
                self as i64
            }

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),*
                }
            }

            #[must_use]
            pub fn descriptor() -> EnumDescriptor {
                EnumDescriptor {
                    name: Self::WIRE_NAME,
                    variants: Self::ALL.iter().map(|v| (v.name(), v.code())).collect(),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> i64 {
                v.code()
            }
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.code() == code)
                    .ok_or_else(|| format!("invalid {} code {code}", $wire))
            }
        }
    };
}

// first variant listed is the default
coded_enum!(
    /// Region of the page a paragraph belongs to
    Location, "enuLocation" {
        None = 7,
        Main = 0,
        Header = 1,
        Footer = 2,
        SidebarLeft = 3,
        SidebarRight = 4,
        Footnote = 5,
        Watermark = 6,
    }
);

coded_enum!(
    ContentType, "enuContentType" {
        None = 0,
        Image = 1,
        Table = 2,
        TableCaption = 3,
        ImageCaption = 4,
        ImageText = 5,
        List = 6,
        Text = 7,
    }
);

coded_enum!(
    /// Outcome of `loadPdf`
    LoadError, "enuLoadError" {
        None = 0,
        File = 1,
        Format = 2,
        Password = 3,
        Handler = 4,
        Cert = 5,
    }
);

impl ContentType {
    /// Readable text, as opposed to figures and tables
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text | Self::List)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in unscaled page coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(rename = "X0")]
    pub x0: f32,
    #[serde(rename = "Y0")]
    pub y0: f32,
    #[serde(rename = "X1")]
    pub x1: f32,
    #[serde(rename = "Y1")]
    pub y1: f32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// A paragraph (outer) or sentence (inner) region of a page
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Markable {
    pub page_index: i32,
    pub par_index: i32,
    pub snt_index: i32,
    pub bounding_box: BoundingBox,
    pub location: Location,
    #[serde(rename = "Type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub inner_segments: Vec<Markable>,
}

/// Layout analysis switches of the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LayoutConfigs {
    pub remove_watermarks: bool,
    pub discard_tables_and_captions: bool,
    pub discard_images_and_captions: bool,
    pub discard_headers: bool,
    pub discard_footers: bool,
    pub discard_sidebars: bool,
    pub discard_footnotes: bool,
    pub assume_last_alone_line_as_footer: bool,
    pub assume_first_alone_line_as_header: bool,
    pub discard_items_in_2_percent_of_page_margin: bool,
    pub mark_subcripts: bool,
    pub mark_super_scripts: bool,
    pub mark_bullets: bool,
    pub mark_numberings: bool,
    #[serde(rename = "ASCIIOffset")]
    pub ascii_offset: i32,
}

impl LayoutConfigs {
    /// Whether a paragraph survives the discard switches
    #[must_use]
    pub fn keeps(&self, m: &Markable) -> bool {
        let location_dropped = match m.location {
            Location::Header => self.discard_headers,
            Location::Footer => self.discard_footers,
            Location::SidebarLeft | Location::SidebarRight => self.discard_sidebars,
            Location::Footnote => self.discard_footnotes,
            Location::Watermark => self.remove_watermarks,
            Location::Main | Location::None => false,
        };
        let content_dropped = match m.content_type {
            ContentType::Table | ContentType::TableCaption => self.discard_tables_and_captions,
            ContentType::Image | ContentType::ImageCaption | ContentType::ImageText => {
                self.discard_images_and_captions
            }
            _ => false,
        };
        !location_dropped && !content_dropped
    }
}

impl Default for LayoutConfigs {
    fn default() -> Self {
        Self {
            remove_watermarks: true,
            discard_tables_and_captions: true,
            discard_images_and_captions: true,
            discard_headers: true,
            discard_footers: true,
            discard_sidebars: true,
            discard_footnotes: true,
            assume_last_alone_line_as_footer: true,
            assume_first_alone_line_as_header: true,
            discard_items_in_2_percent_of_page_margin: true,
            mark_subcripts: true,
            mark_super_scripts: true,
            mark_bullets: true,
            mark_numberings: true,
            ascii_offset: 0,
        }
    }
}

/// Document metadata as reported by `getPDFDocInfo`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PdfInfo {
    pub file_name: String,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
    pub creation_date: String,
    pub modification_date: String,
    pub creator: String,
    #[serde(rename = "PDFProducer")]
    pub pdf_producer: String,
    #[serde(rename = "PDFVersion")]
    pub pdf_version: String,
    pub page_count: i32,
    pub page_size: PageSize,
    pub file_size: u64,
}

/// Sentence cursor position. `location == None` means no sentence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActiveSentence {
    pub page_index: i32,
    pub real_page_index: i32,
    pub par_index: i32,
    pub snt_index: i32,
    pub location: Location,
}

impl Default for ActiveSentence {
    fn default() -> Self {
        Self::NONE
    }
}

impl ActiveSentence {
    pub const NONE: Self = Self {
        page_index: -1,
        real_page_index: -1,
        par_index: -1,
        snt_index: -1,
        location: Location::None,
    };

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.location != Location::None && self.page_index >= 0
    }

    /// Whether `markable` is the sentence this cursor points at
    #[must_use]
    pub fn selects(&self, markable: &Markable) -> bool {
        self.is_valid()
            && markable.page_index == self.page_index
            && markable.par_index == self.par_index
            && markable.snt_index == self.snt_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::value::Value;

    #[test]
    fn enums_travel_as_codes() {
        let value = Value::encode(&Location::Footnote).unwrap();
        assert_eq!(value.as_i64(), Some(5));
        assert_eq!(Value::from(7_i64).decode::<ContentType>().unwrap(), ContentType::Text);
        assert!(Value::from(42_i64).decode::<LoadError>().is_err());
    }

    #[test]
    fn defaults_match_the_engine() {
        assert_eq!(Location::default(), Location::None);
        assert_eq!(Location::None.code(), 7);
        let configs = Value::encode(&LayoutConfigs::default()).unwrap();
        assert_eq!(configs.field("ASCIIOffset").and_then(Value::as_i64), Some(0));
        assert_eq!(configs.field("MarkBullets").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn markable_uses_wire_names() {
        let markable = Markable {
            page_index: 1,
            par_index: 2,
            snt_index: -1,
            bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 5.0),
            location: Location::Main,
            content_type: ContentType::Text,
            inner_segments: vec![],
        };
        let value = Value::encode(&markable).unwrap();
        assert_eq!(value.field("Type").and_then(Value::as_i64), Some(7));
        assert_eq!(
            value
                .field("BoundingBox")
                .and_then(|b| b.field("X1"))
                .and_then(Value::as_f64),
            Some(10.0)
        );
        assert_eq!(value.decode::<Markable>().unwrap(), markable);
    }

    #[test]
    fn unset_sentence_selects_nothing() {
        let markable = Markable {
            page_index: -1,
            par_index: -1,
            snt_index: -1,
            ..Markable::default()
        };
        assert!(!ActiveSentence::NONE.selects(&markable));
    }
}
