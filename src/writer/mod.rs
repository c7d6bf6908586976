//! PDF writing.
//!
//! ```text
//! [PdfWriter]          fresh single-revision documents (fixtures, `blank`)
//! [IncrementalUpdate]  appended revisions (signatures)
//!     ↓
//! [ObjectSerializer]   object syntax
//!     ↓
//! PDF bytes
//! ```

pub mod incremental;
pub mod object_serializer;
pub mod pdf_writer;

pub use incremental::{AppendedRevision, IncrementalUpdate};
pub use object_serializer::ObjectSerializer;
pub use pdf_writer::{blank_document, PdfWriter, PdfWriterConfig};
