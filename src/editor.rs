//! Orchestrates reads, patch enqueueing, and rendering over a single
//! document.

use std::collections::HashSet;
use std::rc::Rc;

use crate::config::ResolverConfig;
use crate::dictscan;
use crate::error::PdfResult;
use crate::patch::PatchQueue;
use crate::reference::ObjRef;
use crate::resolver::ObjectResolver;
use crate::writer;

/// A single PDF document: owns the source bytes (via its resolver) and
/// the pending patch queue. Not `Send`/`Sync` — a document is a
/// single-owner value edited by one caller at a time.
pub struct Editor {
    resolver: ObjectResolver,
    patches: PatchQueue,
}

impl Editor {
    pub fn open(bytes: Vec<u8>) -> PdfResult<Self> {
        Self::open_with_config(bytes, ResolverConfig::default())
    }

    pub fn open_with_config(bytes: Vec<u8>, config: ResolverConfig) -> PdfResult<Self> {
        Ok(Editor {
            resolver: ObjectResolver::open_with_config(bytes, config)?,
            patches: PatchQueue::new(),
        })
    }

    /// Every live `(ref, body)` pair, ignoring any unflushed patches.
    pub fn list_objects(&mut self) -> PdfResult<Vec<(ObjRef, Rc<Vec<u8>>)>> {
        self.resolver.each_object()
    }

    /// The body `obj_ref` would read as right now: a pending patch if
    /// one is queued, otherwise the resolver's stored body.
    pub fn read(&mut self, obj_ref: ObjRef) -> Option<Vec<u8>> {
        if let Some(patched) = self.patches.get(obj_ref) {
            return Some(patched.to_vec());
        }
        self.resolver.object_body(obj_ref).ok().map(|rc| rc.as_ref().clone())
    }

    /// Queues a replacement body for `obj_ref`. Takes effect on the
    /// next `write_incremental`/`write_full`.
    pub fn enqueue(&mut self, obj_ref: ObjRef, new_body: Vec<u8>) {
        self.patches.enqueue(obj_ref, new_body);
    }

    /// Renders an incremental update and rebuilds the resolver index
    /// from the resulting bytes.
    pub fn write_incremental(&mut self) -> PdfResult<Vec<u8>> {
        let out = writer::write_incremental(&self.resolver, &self.patches)?;
        self.resolver = ObjectResolver::open(out.clone())?;
        self.patches.clear();
        Ok(out)
    }

    /// Renders a full, single-generation rewrite and rebuilds the
    /// resolver index from the resulting bytes.
    pub fn write_full(&mut self) -> PdfResult<Vec<u8>> {
        let out = writer::write_full(&mut self.resolver, &self.patches)?;
        self.resolver = ObjectResolver::open(out.clone())?;
        self.patches.clear();
        Ok(out)
    }

    /// A full rewrite that also drops `drop_fields`/`drop_widgets` and
    /// repairs the AcroForm `/Fields` and page `/Annots` arrays that
    /// referenced them.
    pub fn clear(
        &mut self,
        acroform_ref: ObjRef,
        drop_fields: &HashSet<ObjRef>,
        drop_widgets: &HashSet<ObjRef>,
    ) -> PdfResult<Vec<u8>> {
        let out = writer::full::write_full_clearing(&mut self.resolver, &self.patches, acroform_ref, drop_fields, drop_widgets)?;
        self.resolver = ObjectResolver::open(out.clone())?;
        self.patches.clear();
        Ok(out)
    }

    pub fn root_ref(&self) -> Option<ObjRef> {
        self.resolver.root_ref()
    }

    pub fn trailer_dict(&self) -> &[u8] {
        self.resolver.trailer_dict()
    }

    /// The catalog's `/AcroForm` entry, a convenience for the field
    /// layer built on top of this core.
    pub fn acroform_ref(&mut self) -> PdfResult<Option<ObjRef>> {
        self.resolver.acroform_ref()
    }

    /// True iff `obj_ref`'s current body (patched or stored) carries
    /// `/Subtype /Widget`.
    pub fn is_widget(&mut self, obj_ref: ObjRef) -> bool {
        match self.read(obj_ref) {
            Some(body) => dictscan::is_widget(&body),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_pdf() -> Vec<u8> {
        let mut pdf = Vec::new();
        pdf.extend_from_slice(b"%PDF-1.4\n");
        let mut offsets = Vec::new();

        offsets.push(pdf.len());
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        offsets.push(pdf.len());
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        offsets.push(pdf.len());
        pdf.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n");

        let xref_offset = pdf.len();
        pdf.extend_from_slice(b"xref\n0 4\n");
        pdf.extend_from_slice(b"0000000000 65535 f \n");
        for off in &offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(b"trailer\n<< /Size 4 /Root 1 0 R >>\n");
        pdf.extend_from_slice(format!("startxref\n{}\n%%EOF", xref_offset).as_bytes());
        pdf
    }

    #[test]
    fn read_before_enqueue_returns_stored_body() {
        let mut editor = Editor::open(simple_pdf()).unwrap();
        let body = editor.read(ObjRef::new(3, 0)).unwrap();
        assert_eq!(body, b"<< /Type /Page /Parent 2 0 R >>");
    }

    #[test]
    fn read_after_enqueue_returns_pending_patch() {
        let mut editor = Editor::open(simple_pdf()).unwrap();
        editor.enqueue(ObjRef::new(3, 0), b"<< /Type /Page /Rotate 90 >>".to_vec());
        let body = editor.read(ObjRef::new(3, 0)).unwrap();
        assert_eq!(body, b"<< /Type /Page /Rotate 90 >>");
    }

    #[test]
    fn write_incremental_rebuilds_index_and_clears_queue() {
        let mut editor = Editor::open(simple_pdf()).unwrap();
        editor.enqueue(ObjRef::new(3, 0), b"<< /Type /Page /Rotate 90 >>".to_vec());
        editor.write_incremental().unwrap();

        let body = editor.read(ObjRef::new(3, 0)).unwrap();
        assert_eq!(body, b"<< /Type /Page /Rotate 90 >>");
    }

    #[test]
    fn root_ref_available_before_and_after_write() {
        let mut editor = Editor::open(simple_pdf()).unwrap();
        assert_eq!(editor.root_ref(), Some(ObjRef::new(1, 0)));
        editor.write_full().unwrap();
        assert_eq!(editor.root_ref(), Some(ObjRef::new(1, 0)));
    }
}
