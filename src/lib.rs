//! Byte-level engine for reading, patching, and rewriting PDF documents
//! that carry AcroForm interactive fields.
//!
//! This crate never builds a parsed object tree: every operation here
//! reads and splices raw byte ranges. It resolves indirect objects
//! across classic cross-reference tables, cross-reference streams, and
//! object streams ([`resolver`]), scans and edits dictionary syntax
//! in place ([`dictscan`]), and serializes changes either as an
//! incremental update or a full single-generation rewrite ([`writer`]).
//! Field semantics, appearance rendering, and the user-facing
//! `Document`/`Field`/`Page` API are left to collaborators built on
//! top of this core.

pub mod config;
pub mod decode;
pub mod dictscan;
pub mod editor;
pub mod error;
pub mod objstm;
pub mod patch;
pub mod reference;
pub mod resolver;
pub mod writer;

pub use config::ResolverConfig;
pub use editor::Editor;
pub use error::{PdfError, PdfResult};
pub use patch::{Patch, PatchQueue};
pub use reference::{ObjRef, XrefEntry};
pub use resolver::ObjectResolver;
