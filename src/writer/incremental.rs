//! Appends one PDF update section without disturbing prior bytes.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::debug;

use crate::error::{PdfError, PdfResult};
use crate::objstm;
use crate::patch::PatchQueue;
use crate::reference::ObjRef;
use crate::resolver::ObjectResolver;

const FIELD_WIDTHS: (usize, usize, usize) = (1, 4, 2);

/// Renders `queue` as an incremental update appended to `resolver`'s
/// source bytes. The original bytes always appear unchanged as a
/// prefix of the result.
pub fn write_incremental(resolver: &ObjectResolver, queue: &PatchQueue) -> PdfResult<Vec<u8>> {
    let rendered = queue.render();
    if rendered.is_empty() {
        return Err(PdfError::EmptyXref);
    }

    let mut out = resolver.source_bytes().to_vec();
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }

    let root_text = root_ref_text(resolver)?;
    let prev = resolver.start_xref_offset();

    let encoded = objstm::encode(&rendered);
    let result = match encoded {
        Some(encoded_objstm) => write_with_object_stream(&mut out, resolver, &rendered, encoded_objstm, &root_text, prev),
        None => write_classic_fallback(&mut out, resolver, &rendered, &root_text, prev),
    };

    validate_output(&out)?;
    debug!(bytes = out.len(), patches = rendered.len(), "wrote incremental update");
    result.map(|()| out)
}

fn root_ref_text(resolver: &ObjectResolver) -> PdfResult<String> {
    resolver
        .root_ref()
        .map(|r| format!("{} {} R", r.num, r.generation))
        .ok_or_else(|| PdfError::malformed_xref("original trailer has no /Root"))
}

fn write_with_object_stream(
    out: &mut Vec<u8>,
    resolver: &ObjectResolver,
    rendered: &[(ObjRef, Vec<u8>)],
    encoded: objstm::EncodedObjStm,
    root_text: &str,
    prev: u64,
) -> PdfResult<()> {
    let existing_max = resolver.max_object_num();
    let max_patched = rendered.iter().map(|(r, _)| r.num).max().unwrap_or(existing_max);
    let objstm_num = existing_max.max(max_patched) + 1;
    let xref_num = objstm_num + 1;

    let packed_set: std::collections::HashSet<ObjRef> = encoded.packed.iter().copied().collect();
    let direct_patches: Vec<&(ObjRef, Vec<u8>)> = rendered.iter().filter(|(r, _)| !packed_set.contains(r)).collect();

    let mut direct_offsets: Vec<(i64, u64, u16)> = Vec::with_capacity(direct_patches.len());
    for (obj_ref, body) in &direct_patches {
        let offset = out.len() as u64;
        out.extend_from_slice(format!("{} {} obj\n", obj_ref.num, obj_ref.generation).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
        direct_offsets.push((obj_ref.num, offset, obj_ref.generation));
    }

    let objstm_offset = out.len() as u64;
    out.extend_from_slice(format!("{} 0 obj\n<< {} >>\nstream\n", objstm_num, String::from_utf8_lossy(&encoded.dict_fragment)).as_bytes());
    out.extend_from_slice(&encoded.body);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let packed_index: std::collections::HashMap<i64, u32> = encoded
        .packed
        .iter()
        .enumerate()
        .map(|(i, r)| (r.num, i as u32))
        .collect();

    let mut all_nums: Vec<i64> = direct_offsets.iter().map(|(n, _, _)| *n).collect();
    all_nums.extend(encoded.packed.iter().map(|r| r.num));
    all_nums.push(objstm_num);
    all_nums.push(xref_num);
    let min_num = *all_nums.iter().min().unwrap();
    let max_num = *all_nums.iter().max().unwrap();

    let xref_offset = out.len() as u64;

    let direct_by_num: std::collections::HashMap<i64, (u64, u16)> =
        direct_offsets.iter().map(|(n, off, gen)| (*n, (*off, *gen))).collect();

    let mut packed_bytes = Vec::new();
    for num in min_num..=max_num {
        if num == xref_num {
            push_entry(&mut packed_bytes, 1, xref_offset, 0);
        } else if num == objstm_num {
            push_entry(&mut packed_bytes, 1, objstm_offset, 0);
        } else if let Some(&(off, gen)) = direct_by_num.get(&num) {
            push_entry(&mut packed_bytes, 1, off, gen);
        } else if let Some(&index) = packed_index.get(&num) {
            push_entry(&mut packed_bytes, 2, objstm_num as u64, index as u16);
        } else {
            push_entry(&mut packed_bytes, 0, 0, 0);
        }
    }

    let compressed = deflate(&packed_bytes);
    let size = xref_num + 1;
    let count = max_num - min_num + 1;

    out.extend_from_slice(
        format!(
            "{} 0 obj\n<< /Type /XRef /W [{} {} {}] /Size {} /Index [{} {}] /Prev {} /Root {} /Filter /FlateDecode /Length {} >>\nstream\n",
            xref_num,
            FIELD_WIDTHS.0,
            FIELD_WIDTHS.1,
            FIELD_WIDTHS.2,
            size,
            min_num,
            count,
            prev,
            root_text,
            compressed.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&compressed);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Prev {} /Root {} /XRefStm {} >>\nstartxref\n{}\n%%EOF\n",
            size, prev, root_text, xref_offset, xref_offset
        )
        .as_bytes(),
    );

    Ok(())
}

fn write_classic_fallback(
    out: &mut Vec<u8>,
    resolver: &ObjectResolver,
    rendered: &[(ObjRef, Vec<u8>)],
    root_text: &str,
    prev: u64,
) -> PdfResult<()> {
    let existing_max = resolver.max_object_num();
    let max_patched = rendered.iter().map(|(r, _)| r.num).max().unwrap_or(existing_max);
    let size = existing_max.max(max_patched) + 1;

    let mut offsets: Vec<(i64, u64, u16)> = Vec::with_capacity(rendered.len());
    for (obj_ref, body) in rendered {
        let offset = out.len() as u64;
        out.extend_from_slice(format!("{} {} obj\n", obj_ref.num, obj_ref.generation).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
        offsets.push((obj_ref.num, offset, obj_ref.generation));
    }
    offsets.sort_by_key(|(n, _, _)| *n);

    let xref_offset = out.len() as u64;
    out.extend_from_slice(b"xref\n");

    let mut i = 0;
    while i < offsets.len() {
        let run_start = i;
        while i + 1 < offsets.len() && offsets[i + 1].0 == offsets[i].0 + 1 {
            i += 1;
        }
        let run = &offsets[run_start..=i];
        out.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
        for (_, off, gen) in run {
            out.extend_from_slice(format!("{:010} {:05} n \n", off, gen).as_bytes());
        }
        i += 1;
    }

    out.extend_from_slice(format!("trailer\n<< /Size {} /Prev {} /Root {} >>\nstartxref\n{}\n%%EOF\n", size, prev, root_text, xref_offset).as_bytes());

    Ok(())
}

fn push_entry(out: &mut Vec<u8>, field_type: u8, field2: u64, field3: u16) {
    out.push(field_type);
    out.extend_from_slice(&field2.to_be_bytes()[4..]);
    out.extend_from_slice(&field3.to_be_bytes());
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writing to an in-memory Vec cannot fail");
    encoder.finish().expect("finishing an in-memory zlib stream cannot fail")
}

fn validate_output(out: &[u8]) -> PdfResult<()> {
    let has_xref_marker = contains(out, b"xref") || contains(out, b"/Type /XRef");
    if !has_xref_marker || !contains(out, b"trailer") || !contains(out, b"startxref") || !contains(out, b"%%EOF") {
        return Err(PdfError::malformed_xref("incremental output missing a required marker"));
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ObjRef;

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
    fn incremental_update_preserves_original_bytes_as_prefix() {
        let original = simple_pdf();
        let resolver = ObjectResolver::open(original.clone()).unwrap();
        let mut queue = PatchQueue::new();
        queue.enqueue(ObjRef::new(3, 0), b"<< /Type /Page /Parent 2 0 R /Rotate 90 >>".to_vec());

        let out = write_incremental(&resolver, &queue).unwrap();
        assert!(out.starts_with(&original));
    }

    #[test]
    fn incremental_update_resolves_with_patched_body() {
        let original = simple_pdf();
        let resolver = ObjectResolver::open(original).unwrap();
        let mut queue = PatchQueue::new();
        queue.enqueue(ObjRef::new(3, 0), b"<< /Type /Page /Parent 2 0 R /Rotate 90 >>".to_vec());

        let out = write_incremental(&resolver, &queue).unwrap();
        let mut reopened = ObjectResolver::open(out).unwrap();
        let body = reopened.object_body(ObjRef::new(3, 0)).unwrap();
        assert!(String::from_utf8_lossy(&body).contains("/Rotate 90"));
    }

    #[test]
    fn empty_queue_is_rejected() {
        let resolver = ObjectResolver::open(simple_pdf()).unwrap();
        let queue = PatchQueue::new();
        let err = write_incremental(&resolver, &queue).unwrap_err();
        assert!(matches!(err, PdfError::EmptyXref));
    }

    #[test]
    fn patches_with_stream_bodies_fall_back_to_direct_objects() {
        let original = simple_pdf();
        let resolver = ObjectResolver::open(original).unwrap();
        let mut queue = PatchQueue::new();
        queue.enqueue(
            ObjRef::new(3, 0),
            b"<< /Length 3 >>\nstream\nabc\nendstream".to_vec(),
        );

        let out = write_incremental(&resolver, &queue).unwrap();
        let mut reopened = ObjectResolver::open(out).unwrap();
        let body = reopened.object_body(ObjRef::new(3, 0)).unwrap();
        assert!(body.starts_with(b"<< /Length 3 >>"));
    }
}
