//! Object-stream (`/ObjStm`) decode/encode.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::debug;

use crate::error::{PdfError, PdfResult};
use crate::reference::ObjRef;

/// One object packed inside a decoded `/ObjStm` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub obj_ref: ObjRef,
    pub body: Vec<u8>,
}

/// Decodes a (already Flate-decompressed) `/ObjStm` container body into
/// its packed objects.
///
/// `raw` is the decompressed container; `n` is `/N` (object count) and
/// `first` is `/First` (byte offset of the first object body).
pub fn decode(raw: &[u8], n: u32, first: usize) -> PdfResult<Vec<PackedObject>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if first > raw.len() {
        return Err(PdfError::corrupt_stream(
            "ObjStm /First past end of decompressed container",
        ));
    }

    let header = &raw[..first];
    let pairs = parse_header_pairs(header, n as usize)?;

    let mut out = Vec::with_capacity(pairs.len());
    for (i, (obj_num, offset)) in pairs.iter().enumerate() {
        let body_start = first + offset;
        let body_end = if i + 1 < pairs.len() {
            first + pairs[i + 1].1
        } else {
            raw.len()
        };
        if body_start > body_end || body_end > raw.len() {
            return Err(PdfError::corrupt_stream(format!(
                "ObjStm member {} has an out-of-range body range",
                obj_num
            )));
        }
        out.push(PackedObject {
            obj_ref: ObjRef::new(*obj_num as i64, 0),
            body: raw[body_start..body_end].to_vec(),
        });
    }

    Ok(out)
}

fn parse_header_pairs(header: &[u8], n: usize) -> PdfResult<Vec<(u32, usize)>> {
    let text = std::str::from_utf8(header)
        .map_err(|_| PdfError::corrupt_stream("ObjStm header is not ASCII"))?;
    let mut numbers = text.split_ascii_whitespace();

    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let obj_num: u32 = numbers
            .next()
            .ok_or_else(|| PdfError::corrupt_stream("ObjStm header truncated (object number)"))?
            .parse()
            .map_err(|_| PdfError::corrupt_stream("ObjStm header has a non-numeric object number"))?;
        let offset: usize = numbers
            .next()
            .ok_or_else(|| PdfError::corrupt_stream("ObjStm header truncated (offset)"))?
            .parse()
            .map_err(|_| PdfError::corrupt_stream("ObjStm header has a non-numeric offset"))?;
        pairs.push((obj_num, offset));
    }

    Ok(pairs)
}

/// Result of packing a set of patches into an object stream.
pub struct EncodedObjStm {
    /// The `/Type /ObjStm /N … /First … /Filter /FlateDecode /Length …`
    /// fragment, without the wrapping `<< >>`.
    pub dict_fragment: Vec<u8>,
    /// The deflated stream body.
    pub body: Vec<u8>,
    /// Refs actually packed, in the order they were written.
    pub packed: Vec<ObjRef>,
}

/// A patch body may not be packed into an object stream if it is itself
/// a stream object (object streams, xref streams, or any object
/// containing literal `stream`/`endstream` bytes) — ISO 32000-1 forbids
/// streams inside object streams, and the incremental writer's own xref
/// stream can never be self-referential this way either.
fn is_packable(body: &[u8]) -> bool {
    !body.windows(6).any(|w| w == b"stream") && !body.windows(9).any(|w| w == b"endstream")
}

/// Packs `patches` into a single `/ObjStm` container. Returns `None` if
/// every patch was excluded — callers fall back to direct object
/// emission in that case.
pub fn encode(patches: &[(ObjRef, Vec<u8>)]) -> Option<EncodedObjStm> {
    let packable: Vec<&(ObjRef, Vec<u8>)> = patches.iter().filter(|(_, body)| is_packable(body)).collect();
    if packable.is_empty() {
        return None;
    }

    let mut header = String::new();
    let mut bodies = Vec::new();
    let mut offset = 0usize;
    let mut packed = Vec::with_capacity(packable.len());

    for (obj_ref, body) in &packable {
        header.push_str(&format!("{} {} ", obj_ref.num, offset));
        offset += body.len();
        bodies.push(body.as_slice());
        packed.push(*obj_ref);
    }

    let first = header.len();
    let mut raw = Vec::with_capacity(first + offset);
    raw.extend_from_slice(header.as_bytes());
    for body in &bodies {
        raw.extend_from_slice(body);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).expect("writing to an in-memory Vec cannot fail");
    let compressed = encoder.finish().expect("finishing an in-memory zlib stream cannot fail");

    let dict_fragment = format!(
        "/Type /ObjStm /N {} /First {} /Filter /FlateDecode /Length {}",
        packed.len(),
        first,
        compressed.len()
    )
    .into_bytes();

    debug!(packed = packed.len(), skipped = patches.len() - packed.len(), "encoded ObjStm");

    Some(EncodedObjStm {
        dict_fragment,
        body: compressed,
        packed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_flate;

    #[test]
    fn decode_empty_container_yields_no_objects() {
        assert_eq!(decode(b"", 0, 0).unwrap(), Vec::new());
    }

    #[test]
    fn decode_splits_three_packed_objects() {
        // header "1 0 2 20 3 45 " padded to first = 20
        let mut header = b"1 0 2 20 3 45 ".to_vec();
        while header.len() < 20 {
            header.push(b' ');
        }
        assert_eq!(header.len(), 20);

        let bodies = [b"<< /A 1 >>".as_slice(), b"<< /B (hi) >>".as_slice(), b"<< /C [1 2 3] >>".as_slice()];
        let mut raw = header.clone();
        for b in &bodies {
            raw.extend_from_slice(b);
        }

        let decoded = decode(&raw, 3, 20).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].obj_ref, ObjRef::new(1, 0));
        assert_eq!(decoded[0].body, bodies[0]);
        assert_eq!(decoded[1].obj_ref, ObjRef::new(2, 0));
        assert_eq!(decoded[1].body, bodies[1]);
        assert_eq!(decoded[2].obj_ref, ObjRef::new(3, 0));
        assert_eq!(decoded[2].body, bodies[2]);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let patches = vec![
            (ObjRef::new(4, 0), b"<< /T (Alpha) /FT /Tx /V (A) >>".to_vec()),
            (ObjRef::new(5, 0), b"<< /T (Beta) /FT /Tx /V (B) >>".to_vec()),
        ];
        let encoded = encode(&patches).unwrap();
        assert_eq!(encoded.packed, vec![ObjRef::new(4, 0), ObjRef::new(5, 0)]);

        let decompressed = decode_flate(&encoded.body).unwrap();
        let first: usize = {
            let frag = String::from_utf8(encoded.dict_fragment.clone()).unwrap();
            let idx = frag.find("/First ").unwrap() + "/First ".len();
            frag[idx..].split_whitespace().next().unwrap().parse().unwrap()
        };
        let decoded = decode(&decompressed, 2, first).unwrap();
        assert_eq!(decoded[0].body, patches[0].1);
        assert_eq!(decoded[1].body, patches[1].1);
    }

    #[test]
    fn encode_excludes_bodies_containing_stream_keyword() {
        let patches = vec![
            (ObjRef::new(1, 0), b"<< /Length 3 >>\nstream\nabc\nendstream".to_vec()),
            (ObjRef::new(2, 0), b"<< /T (Ok) >>".to_vec()),
        ];
        let encoded = encode(&patches).unwrap();
        assert_eq!(encoded.packed, vec![ObjRef::new(2, 0)]);
    }

    #[test]
    fn encode_returns_none_when_nothing_packable() {
        let patches = vec![(ObjRef::new(1, 0), b"<< /Length 3 >>\nstream\nabc\nendstream".to_vec())];
        assert!(encode(&patches).is_none());
    }
}
