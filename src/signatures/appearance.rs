//! Visible appearance of approval signatures.
//!
//! Four lines of Helvetica stacked bottom-up inside the widget box:
//!
//! ```text
//! SIGNER NAME                 (12 pt)
//! Date: 18/10/2026            (10 pt)
//! Time: 14:05 GMT +5:30       (10 pt)
//! Location: Chennai           (10 pt)
//! ```

use super::types::SignatureRect;
use crate::config::AppearanceConfig;
use crate::object::Object;
use crate::writer::object_serializer::ObjectSerializer;
use crate::writer::pdf_writer::escape_text;
use chrono::{DateTime, FixedOffset};

/// Resource name of the appearance font.
pub const APPEARANCE_FONT: &str = "Helv";

/// A Form XObject body and its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureAppearance {
    /// Content stream operators
    pub content: Vec<u8>,
    /// `/BBox`, in form space (origin at the widget's lower-left corner)
    pub bbox: [f64; 4],
}

impl SignatureAppearance {
    /// Form XObject stream using `font` as `/Helv`.
    pub fn to_xobject(&self, font: Object) -> Object {
        let resources = ObjectSerializer::dict(vec![(
            "Font",
            ObjectSerializer::dict(vec![(APPEARANCE_FONT, font)]),
        )]);
        let dict = ObjectSerializer::dict_map(vec![
            ("Type", ObjectSerializer::name("XObject")),
            ("Subtype", ObjectSerializer::name("Form")),
            ("FormType", ObjectSerializer::integer(1)),
            ("BBox", ObjectSerializer::rect(self.bbox[0], self.bbox[1], self.bbox[2], self.bbox[3])),
            ("Resources", resources),
        ]);
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.content.clone()),
        }
    }
}

/// `GMT +5:30` style label for a UTC offset.
pub fn gmt_label(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("GMT {}{}:{:02}", sign, minutes / 60, minutes % 60)
}

/// Appearance with the default layout.
pub fn build(signer_name: &str, timestamp: &DateTime<FixedOffset>, location: &str, rect: SignatureRect) -> SignatureAppearance {
    build_with_layout(signer_name, timestamp, location, rect, &AppearanceConfig::default())
}

/// Appearance with an explicit layout.
pub fn build_with_layout(
    signer_name: &str,
    timestamp: &DateTime<FixedOffset>,
    location: &str,
    rect: SignatureRect,
    layout: &AppearanceConfig,
) -> SignatureAppearance {
    let lines = [
        (format!("Location: {}", location), layout.font_size),
        (
            format!("Time: {} {}", timestamp.format("%H:%M"), gmt_label(*timestamp.offset())),
            layout.font_size,
        ),
        (format!("Date: {}", timestamp.format("%d/%m/%Y")), layout.font_size),
        (signer_name.to_uppercase(), layout.name_font_size),
    ];

    let mut content = Vec::new();
    content.extend_from_slice(b"q\n");
    for (i, (text, size)) in lines.iter().enumerate() {
        let y = layout.first_baseline + layout.line_spacing * i as f64;
        content.extend_from_slice(
            format!(
                "BT /{} {} Tf {} {} Td ({}) Tj ET\n",
                APPEARANCE_FONT,
                size,
                layout.x_offset,
                y,
                escape_text(text)
            )
            .as_bytes(),
        );
    }
    content.extend_from_slice(b"Q\n");

    SignatureAppearance {
        content,
        bbox: [0.0, 0.0, rect.width(), rect.height()],
    }
}
