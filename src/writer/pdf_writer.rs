//! Single-revision PDF writer.
//!
//! Assembles small documents (header, body, xref table, trailer) with
//! Helvetica text. Used for unsigned fixtures and the `blank` command; signed
//! revisions are appended by [`super::incremental`].

use super::object_serializer::ObjectSerializer;
use crate::error::Result;
use crate::object::{Object, ObjectRef};
use std::io::Write;

/// Configuration for PDF generation.
#[derive(Debug, Clone)]
pub struct PdfWriterConfig {
    /// PDF version written in the header (e.g. "1.7")
    pub version: String,
    /// Document title
    pub title: Option<String>,
    /// Creator application
    pub creator: Option<String>,
    /// Whether to Flate-compress page content streams
    pub compress: bool,
}

impl Default for PdfWriterConfig {
    fn default() -> Self {
        Self {
            version: "1.7".to_string(),
            title: None,
            creator: Some("pdf_certsign".to_string()),
            compress: false,
        }
    }
}

impl PdfWriterConfig {
    /// Set document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Enable or disable content stream compression.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

fn compress_data(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Escape text for a literal string operand.
pub(crate) fn escape_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '(' | ')' | '\\' => format!("\\{}", c),
            c if c.is_ascii() && !c.is_ascii_control() => c.to_string(),
            _ => "?".to_string(),
        })
        .collect()
}

/// A page being built.
pub struct PageBuilder<'a> {
    page: &'a mut PageData,
}

impl PageBuilder<'_> {
    /// Show `text` at `(x, y)` in Helvetica of the given size.
    pub fn add_text(&mut self, text: &str, x: f32, y: f32, font_size: f32) -> &mut Self {
        self.page.content.extend_from_slice(
            format!("BT /Helv {} Tf {} {} Td ({}) Tj ET\n", font_size, x, y, escape_text(text)).as_bytes(),
        );
        self
    }
}

struct PageData {
    width: f32,
    height: f32,
    content: Vec<u8>,
}

/// PDF document writer.
pub struct PdfWriter {
    config: PdfWriterConfig,
    pages: Vec<PageData>,
}

impl PdfWriter {
    /// Create a new PDF writer with default config.
    pub fn new() -> Self {
        Self::with_config(PdfWriterConfig::default())
    }

    /// Create a PDF writer with custom config.
    pub fn with_config(config: PdfWriterConfig) -> Self {
        Self {
            config,
            pages: Vec::new(),
        }
    }

    /// Add a page with the given dimensions.
    pub fn add_page(&mut self, width: f32, height: f32) -> PageBuilder<'_> {
        self.pages.push(PageData {
            width,
            height,
            content: Vec::new(),
        });
        let last = self.pages.len() - 1;
        PageBuilder {
            page: &mut self.pages[last],
        }
    }

    /// Add an A4 sized page (210mm x 297mm).
    pub fn add_a4_page(&mut self) -> PageBuilder<'_> {
        self.add_page(595.0, 842.0)
    }

    /// Build the complete PDF document.
    ///
    /// Object layout: 1 catalog, 2 page tree, 3 font, then a page and its
    /// content stream per page, and the info dictionary last.
    pub fn finish(self) -> Result<Vec<u8>> {
        let serializer = ObjectSerializer::compact();
        let catalog_id = ObjectRef::new(1, 0);
        let pages_id = ObjectRef::new(2, 0);
        let font_id = ObjectRef::new(3, 0);
        let info_id = ObjectRef::new(4 + 2 * self.pages.len() as u32, 0);

        let mut objects: Vec<(ObjectRef, Object)> = Vec::new();
        let mut kids = Vec::with_capacity(self.pages.len());

        for (i, page) in self.pages.iter().enumerate() {
            let page_ref = ObjectRef::new(4 + 2 * i as u32, 0);
            let content_ref = ObjectRef::new(page_ref.id + 1, 0);

            let (data, compressed) = if self.config.compress {
                match compress_data(&page.content) {
                    Ok(c) => (c, true),
                    Err(e) => {
                        log::warn!("content compression failed, writing raw: {}", e);
                        (page.content.clone(), false)
                    },
                }
            } else {
                (page.content.clone(), false)
            };
            let mut content_dict = ObjectSerializer::dict_map(Vec::new());
            if compressed {
                content_dict.insert("Filter".to_string(), ObjectSerializer::name("FlateDecode"));
            }

            let page_obj = ObjectSerializer::dict(vec![
                ("Type", ObjectSerializer::name("Page")),
                ("Parent", ObjectSerializer::reference(pages_id)),
                (
                    "MediaBox",
                    ObjectSerializer::rect(0.0, 0.0, page.width as f64, page.height as f64),
                ),
                ("Contents", ObjectSerializer::reference(content_ref)),
                (
                    "Resources",
                    ObjectSerializer::dict(vec![(
                        "Font",
                        ObjectSerializer::dict(vec![("Helv", ObjectSerializer::reference(font_id))]),
                    )]),
                ),
            ]);
            kids.push(ObjectSerializer::reference(page_ref));
            objects.push((page_ref, page_obj));
            objects.push((
                content_ref,
                Object::Stream {
                    dict: content_dict,
                    data: bytes::Bytes::from(data),
                },
            ));
        }

        let page_count = kids.len() as i64;
        objects.push((
            catalog_id,
            ObjectSerializer::dict(vec![
                ("Type", ObjectSerializer::name("Catalog")),
                ("Pages", ObjectSerializer::reference(pages_id)),
            ]),
        ));
        objects.push((
            pages_id,
            ObjectSerializer::dict(vec![
                ("Type", ObjectSerializer::name("Pages")),
                ("Kids", Object::Array(kids)),
                ("Count", ObjectSerializer::integer(page_count)),
            ]),
        ));
        objects.push((font_id, helvetica_font()));

        let mut info = Vec::new();
        if let Some(title) = &self.config.title {
            info.push(("Title", ObjectSerializer::string(title)));
        }
        if let Some(creator) = &self.config.creator {
            info.push(("Creator", ObjectSerializer::string(creator)));
        }
        objects.push((info_id, ObjectSerializer::dict(info)));
        objects.sort_by_key(|(r, _)| r.id);

        let mut output = Vec::new();
        writeln!(output, "%PDF-{}", self.config.version)?;
        output.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        let mut offsets = Vec::with_capacity(objects.len());
        for (r, obj) in &objects {
            offsets.push(output.len());
            output.extend_from_slice(&serializer.serialize_indirect(r.id, r.gen, obj));
        }

        let size = info_id.id + 1;
        let xref_start = output.len();
        writeln!(output, "xref")?;
        writeln!(output, "0 {}", size)?;
        writeln!(output, "0000000000 65535 f ")?;
        for offset in &offsets {
            writeln!(output, "{:010} 00000 n ", offset)?;
        }

        let trailer = ObjectSerializer::dict(vec![
            ("Size", ObjectSerializer::integer(size as i64)),
            ("Root", ObjectSerializer::reference(catalog_id)),
            ("Info", ObjectSerializer::reference(info_id)),
        ]);
        writeln!(output, "trailer")?;
        output.extend_from_slice(&serializer.serialize(&trailer));
        write!(output, "\nstartxref\n{}\n%%EOF\n", xref_start)?;

        log::debug!("wrote {}-page PDF ({} bytes)", page_count, output.len());
        Ok(output)
    }
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard Helvetica font dictionary.
pub(crate) fn helvetica_font() -> Object {
    ObjectSerializer::dict(vec![
        ("Type", ObjectSerializer::name("Font")),
        ("Subtype", ObjectSerializer::name("Type1")),
        ("BaseFont", ObjectSerializer::name("Helvetica")),
        ("Encoding", ObjectSerializer::name("WinAnsiEncoding")),
    ])
}

/// An unsigned A4 document of `pages` pages, each labelled with its number.
pub fn blank_document(pages: usize) -> Result<Vec<u8>> {
    let mut writer = PdfWriter::with_config(PdfWriterConfig::default().with_title("Blank document"));
    for n in 1..=pages {
        writer
            .add_a4_page()
            .add_text(&format!("Page {} of {}", n, pages), 72.0, 770.0, 14.0);
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pdf_with_text() {
        let mut writer = PdfWriter::new();
        writer.add_a4_page().add_text("Hello (World)", 72.0, 720.0, 12.0);
        let bytes = writer.finish().unwrap();
        let content = String::from_utf8_lossy(&bytes);

        assert!(content.starts_with("%PDF-1.7"));
        assert!(content.contains("/Type /Catalog"));
        assert!(content.contains("/BaseFont /Helvetica"));
        assert!(content.contains("(Hello \\(World\\)) Tj"));
        assert!(content.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_blank_document_pages() {
        let bytes = blank_document(3).unwrap();
        let content = String::from_utf8_lossy(&bytes);
        assert!(content.contains("/Count 3"));
        assert!(content.contains("(Page 2 of 3) Tj"));
        assert!(content.contains("/Title (Blank document)"));
    }

    #[test]
    fn test_compressed_content_is_readable() {
        let mut writer = PdfWriter::with_config(PdfWriterConfig::default().with_compress(true));
        writer.add_a4_page().add_text("zipped", 10.0, 10.0, 10.0);
        let bytes = writer.finish().unwrap();
        let doc = crate::document::PdfDocument::from_bytes(bytes).unwrap();
        let content = doc.object(5).unwrap();
        assert_eq!(content.get("Filter").and_then(Object::as_name), Some("FlateDecode"));
        let decoded = content.decode_stream_data().unwrap();
        assert!(String::from_utf8_lossy(&decoded).contains("(zipped) Tj"));
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a(b)\\"), "a\\(b\\)\\\\");
        assert_eq!(escape_text("é"), "?");
    }
}
