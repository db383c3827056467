//! Cross-reference parsing and object access.
//!
//! Builds the effective map from reference to xref entry by walking the
//! xref chain (classic tables, xref streams, and `/Prev` links), then
//! exposes object bodies — resolved lazily and cached — plus the
//! trailer and `/Root`.

use std::hash::BuildHasherDefault;
use std::rc::Rc;

use lru::LruCache;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::config::ResolverConfig;
use crate::decode;
use crate::dictscan;
use crate::error::{PdfError, PdfResult};
use crate::objstm;
use crate::reference::{ObjRef, XrefEntry};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

pub struct ObjectResolver {
    bytes: Vec<u8>,
    entries: FxHashMap<ObjRef, XrefEntry>,
    trailer: Vec<u8>,
    start_xref_offset: u64,
    body_cache: LruCache<ObjRef, Rc<Vec<u8>>, FxBuildHasher>,
    objstm_cache: FxHashMap<ObjRef, Rc<Vec<objstm::PackedObject>>>,
}

impl ObjectResolver {
    /// Parses `bytes` and builds the effective xref index.
    pub fn open(bytes: Vec<u8>) -> PdfResult<Self> {
        Self::open_with_config(bytes, ResolverConfig::default())
    }

    pub fn open_with_config(bytes: Vec<u8>, config: ResolverConfig) -> PdfResult<Self> {
        let mut entries = FxHashMap::default();
        let mut trailer: Option<Vec<u8>> = None;
        let mut visited = std::collections::HashSet::new();

        let start_xref_offset = find_startxref(&bytes)? as u64;
        let mut current = Some(start_xref_offset as usize);
        while let Some(pos) = current {
            if pos >= bytes.len() || !visited.insert(pos) {
                break;
            }
            trace!(pos, "walking xref section");
            let section = parse_xref_section(&bytes, pos, &mut entries)?;

            if trailer.is_none() {
                trailer = Some(section.trailer.clone());
            }

            if let Some(xrefstm_pos) = uint_after(&section.trailer, "XRefStm") {
                if visited.insert(xrefstm_pos) {
                    debug!(xrefstm_pos, "merging hybrid-reference /XRefStm");
                    parse_xref_section(&bytes, xrefstm_pos, &mut entries)?;
                }
            }

            current = ref_prev(&section.trailer);
        }

        let trailer = trailer.ok_or_else(|| PdfError::malformed_xref("no trailer found"))?;
        debug!(objects = entries.len(), "xref walk complete");

        Ok(ObjectResolver {
            bytes,
            entries,
            trailer,
            start_xref_offset,
            body_cache: LruCache::with_hasher(config.body_cache_capacity, FxBuildHasher::default()),
            objstm_cache: FxHashMap::default(),
        })
    }

    /// The original bytes this resolver was opened with.
    pub fn source_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The file offset `startxref` pointed at when this resolver was
    /// opened — becomes `/Prev` in an incremental update built on top.
    pub fn start_xref_offset(&self) -> u64 {
        self.start_xref_offset
    }

    pub fn trailer_dict(&self) -> &[u8] {
        &self.trailer
    }

    pub fn root_ref(&self) -> Option<ObjRef> {
        ref_after(&self.trailer, "Root")
    }

    pub fn info_ref(&self) -> Option<ObjRef> {
        ref_after(&self.trailer, "Info")
    }

    pub fn acroform_ref(&mut self) -> PdfResult<Option<ObjRef>> {
        let Some(root) = self.root_ref() else {
            return Ok(None);
        };
        let catalog = self.object_body(root)?;
        Ok(ref_after(&catalog, "AcroForm"))
    }

    /// The highest object number referenced by any xref entry, or `-1`
    /// if the index is empty.
    pub fn max_object_num(&self) -> i64 {
        self.entries.keys().map(|r| r.num).max().unwrap_or(-1)
    }

    pub fn entry(&self, obj_ref: ObjRef) -> Option<XrefEntry> {
        self.entries.get(&obj_ref).copied()
    }

    pub fn refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.entries.keys().copied()
    }

    /// Returns the byte body of `obj_ref`, loading and caching it lazily.
    pub fn object_body(&mut self, obj_ref: ObjRef) -> PdfResult<Rc<Vec<u8>>> {
        if let Some(cached) = self.body_cache.get(&obj_ref) {
            return Ok(Rc::clone(cached));
        }

        let entry = self
            .entries
            .get(&obj_ref)
            .copied()
            .ok_or_else(|| PdfError::missing_object(obj_ref))?;

        let body = match entry {
            XrefEntry::Free => return Err(PdfError::missing_object(obj_ref)),
            XrefEntry::InFile { offset } => Rc::new(read_object_body_at(&self.bytes, offset as usize)?),
            XrefEntry::InObjStm { container, index } => {
                let packed = self.load_objstm_container(container)?;
                let member = packed
                    .get(index as usize)
                    .ok_or_else(|| PdfError::missing_object(obj_ref))?;
                Rc::new(member.body.clone())
            }
        };

        self.body_cache.put(obj_ref, Rc::clone(&body));
        Ok(body)
    }

    /// Yields every live `(ref, body)` pair in the effective index.
    pub fn each_object(&mut self) -> PdfResult<Vec<(ObjRef, Rc<Vec<u8>>)>> {
        let refs: Vec<ObjRef> = self.refs().collect();
        let mut out = Vec::with_capacity(refs.len());
        for obj_ref in refs {
            out.push((obj_ref, self.object_body(obj_ref)?));
        }
        Ok(out)
    }

    fn load_objstm_container(&mut self, container: ObjRef) -> PdfResult<Rc<Vec<objstm::PackedObject>>> {
        if let Some(cached) = self.objstm_cache.get(&container) {
            return Ok(Rc::clone(cached));
        }

        let entry = self
            .entries
            .get(&container)
            .copied()
            .ok_or_else(|| PdfError::missing_object(container))?;
        let offset = match entry {
            XrefEntry::InFile { offset } => offset as usize,
            _ => {
                return Err(PdfError::malformed_xref(
                    "object stream container must be a direct in-file object",
                ))
            }
        };

        let (dict, stream_data) = read_object_stream_at(&self.bytes, offset)?;
        let filter_name = name_value(&dict, "Filter");
        let decompressed = decode::decode_stream(&stream_data, filter_name.as_deref())?;

        let n = uint_value(&dict, "N")
            .ok_or_else(|| PdfError::corrupt_stream("ObjStm missing /N"))? as u32;
        let first = uint_value(&dict, "First")
            .ok_or_else(|| PdfError::corrupt_stream("ObjStm missing /First"))?;

        let packed = Rc::new(objstm::decode(&decompressed, n, first)?);
        self.objstm_cache.insert(container, Rc::clone(&packed));
        Ok(packed)
    }
}

struct XrefSection {
    trailer: Vec<u8>,
}

fn parse_xref_section(
    bytes: &[u8],
    pos: usize,
    entries: &mut FxHashMap<ObjRef, XrefEntry>,
) -> PdfResult<XrefSection> {
    let pos = dictscan::skip_whitespace(bytes, pos);
    if bytes[pos..].starts_with(b"xref") {
        parse_classic_table(bytes, pos + 4, entries)
    } else {
        parse_xref_stream(bytes, pos, entries)
    }
}

fn parse_classic_table(
    bytes: &[u8],
    mut pos: usize,
    entries: &mut FxHashMap<ObjRef, XrefEntry>,
) -> PdfResult<XrefSection> {
    loop {
        pos = dictscan::skip_whitespace(bytes, pos);
        if bytes[pos..].starts_with(b"trailer") {
            pos += "trailer".len();
            break;
        }

        let (first, p) = read_uint(bytes, pos)?;
        let (count, p) = read_uint(bytes, p)?;
        pos = p;

        for i in 0..count {
            pos = dictscan::skip_whitespace(bytes, pos);
            if pos + 20 > bytes.len() {
                return Err(PdfError::malformed_xref("truncated xref table record"));
            }
            let record = &bytes[pos..pos + 20];
            let offset = parse_ascii_digits(&record[0..10])
                .ok_or_else(|| PdfError::malformed_xref("xref record has a non-numeric offset"))?;
            let generation = parse_ascii_digits(&record[11..16])
                .ok_or_else(|| PdfError::malformed_xref("xref record has a non-numeric generation"))?;
            let kind = record[17];

            if kind == b'n' {
                let obj_ref = ObjRef::new((first + i) as i64, generation as u16);
                entries
                    .entry(obj_ref)
                    .or_insert(XrefEntry::InFile { offset });
            } else if kind != b'f' {
                return Err(PdfError::malformed_xref(format!(
                    "xref record type must be 'n' or 'f', got {:?}",
                    kind as char
                )));
            }

            pos += 20;
        }
    }

    pos = dictscan::skip_whitespace(bytes, pos);
    let span = dictscan::dictionary_at(bytes, pos)
        .ok_or_else(|| PdfError::malformed_xref("expected trailer dictionary"))?;

    Ok(XrefSection {
        trailer: bytes[span].to_vec(),
    })
}

fn parse_xref_stream(
    bytes: &[u8],
    pos: usize,
    entries: &mut FxHashMap<ObjRef, XrefEntry>,
) -> PdfResult<XrefSection> {
    let (num, generation, after_header) = parse_indirect_object_header(bytes, pos)?;
    let header_pos = pos;
    let dict_start = dictscan::skip_whitespace(bytes, after_header);
    let dict_span = dictscan::dictionary_at(bytes, dict_start)
        .ok_or_else(|| PdfError::malformed_xref("expected xref stream dictionary"))?;
    let dict = bytes[dict_span.clone()].to_vec();

    let stream_data = read_stream_body(bytes, dict_span.end, &dict)?;

    let filter_name = name_value(&dict, "Filter");
    let mut decoded = decode::decode_stream(&stream_data, filter_name.as_deref())?;

    if let Some(parms_span) = dictscan::dict_value_after(&dict, "DecodeParms") {
        let parms = &dict[parms_span];
        if let Some(predictor) = uint_value(parms, "Predictor") {
            if (10..=15).contains(&predictor) {
                let columns = uint_value(parms, "Columns").unwrap_or(1);
                decoded = decode::decode_png_predictor(&decoded, columns)?;
            }
        }
    }

    let widths = w_array(&dict)?;
    let size = uint_value(&dict, "Size").ok_or_else(|| PdfError::malformed_xref("xref stream missing /Size"))?;
    let index = index_array(&dict, size);

    walk_xref_stream_entries(&decoded, widths, &index, entries)?;

    entries
        .entry(ObjRef::new(num, generation))
        .or_insert(XrefEntry::InFile { offset: header_pos as u64 });

    Ok(XrefSection { trailer: dict })
}

fn walk_xref_stream_entries(
    decoded: &[u8],
    widths: (usize, usize, usize),
    index: &[(u32, u32)],
    entries: &mut FxHashMap<ObjRef, XrefEntry>,
) -> PdfResult<()> {
    let (w0, w1, w2) = widths;
    let entry_size = w0 + w1 + w2;
    let mut pos = 0usize;

    for &(first, count) in index {
        for j in 0..count {
            if pos + entry_size > decoded.len() {
                return Err(PdfError::malformed_xref("xref stream data truncated"));
            }
            let field_type = read_be_field(decoded, pos, w0);
            pos += w0;
            let field2 = read_be_field(decoded, pos, w1);
            pos += w1;
            let field3 = read_be_field(decoded, pos, w2);
            pos += w2;

            let obj_num = (first + j) as i64;
            match field_type {
                0 => { /* free: ignored at lookup time */ }
                1 => {
                    entries
                        .entry(ObjRef::new(obj_num, field3 as u16))
                        .or_insert(XrefEntry::InFile { offset: field2 });
                }
                2 => {
                    entries
                        .entry(ObjRef::new(obj_num, 0))
                        .or_insert(XrefEntry::InObjStm {
                            container: ObjRef::new(field2 as i64, 0),
                            index: field3 as u32,
                        });
                }
                other => {
                    warn!(obj_num, entry_type = other, "ignoring unknown xref stream entry type");
                }
            }
        }
    }

    Ok(())
}

/// Reads a big-endian unsigned field of `width` bytes. A zero-width
/// column always reads as the constant 0 — no bytes are consumed and
/// no type-specific default is substituted.
fn read_be_field(bytes: &[u8], pos: usize, width: usize) -> u64 {
    if width == 0 {
        return 0;
    }
    let mut value = 0u64;
    for &b in &bytes[pos..pos + width] {
        value = (value << 8) | b as u64;
    }
    value
}

fn w_array(dict: &[u8]) -> PdfResult<(usize, usize, usize)> {
    let token = dictscan::value_token_after(dict, "W")
        .ok_or_else(|| PdfError::malformed_xref("xref stream missing /W"))?;
    let values = parse_int_array(token);
    if values.len() != 3 {
        return Err(PdfError::malformed_xref("/W must have exactly 3 elements"));
    }
    Ok((values[0] as usize, values[1] as usize, values[2] as usize))
}

/// `/Index` almost always names one or two subsections, so a handful
/// of inline slots cover the common case without heap allocation.
fn index_array(dict: &[u8], size: usize) -> SmallVec<[(u32, u32); 4]> {
    let values = match dictscan::value_token_after(dict, "Index") {
        Some(token) => parse_int_array(token),
        None => SmallVec::from_slice(&[0, size as i64]),
    };
    values
        .chunks(2)
        .filter(|c| c.len() == 2)
        .map(|c| (c[0] as u32, c[1] as u32))
        .collect()
}

fn parse_int_array(token: &[u8]) -> SmallVec<[i64; 4]> {
    let inner = if token.len() >= 2 && token[0] == b'[' {
        &token[1..token.len() - 1]
    } else {
        token
    };
    inner
        .split(|b| b.is_ascii_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| std::str::from_utf8(s).ok()?.parse().ok())
        .collect()
}

fn name_value(dict: &[u8], key: &str) -> Option<String> {
    let token = dictscan::value_token_after(dict, key)?;
    if token.first() == Some(&b'/') {
        Some(String::from_utf8_lossy(&token[1..]).into_owned())
    } else {
        None
    }
}

fn uint_value(dict: &[u8], key: &str) -> Option<usize> {
    let token = dictscan::value_token_after(dict, key)?;
    std::str::from_utf8(token).ok()?.trim().parse().ok()
}

/// Parses `key`'s value as an indirect reference (`num gen R`), a shape
/// `value_token_after`'s single-token grammar does not model.
fn ref_after(dict: &[u8], key: &str) -> Option<ObjRef> {
    let pos = dictscan::find_key_end(dict, key)?;
    let pos = dictscan::skip_whitespace(dict, pos);
    let (num, pos) = read_int_atom(dict, pos)?;
    let pos = dictscan::skip_whitespace(dict, pos);
    let (generation, pos) = read_int_atom(dict, pos)?;
    let pos = dictscan::skip_whitespace(dict, pos);
    if dict[pos..].starts_with(b"R") {
        Some(ObjRef::new(num, generation as u16))
    } else {
        None
    }
}

fn uint_after(dict: &[u8], key: &str) -> Option<usize> {
    uint_value(dict, key)
}

fn ref_prev(trailer: &[u8]) -> Option<usize> {
    uint_value(trailer, "Prev")
}

fn read_int_atom(bytes: &[u8], pos: usize) -> Option<(i64, usize)> {
    let mut end = pos;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    std::str::from_utf8(&bytes[pos..end]).ok()?.parse().ok().map(|v| (v, end))
}

fn read_uint(bytes: &[u8], pos: usize) -> PdfResult<(u64, usize)> {
    let pos = dictscan::skip_whitespace(bytes, pos);
    let start = pos;
    let mut end = pos;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return Err(PdfError::malformed_xref("expected a decimal integer"));
    }
    let value = parse_ascii_digits(&bytes[start..end])
        .ok_or_else(|| PdfError::malformed_xref("integer overflow in xref table"))?;
    Ok((value, end))
}

fn parse_ascii_digits(bytes: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    text.parse().ok()
}

fn parse_indirect_object_header(bytes: &[u8], pos: usize) -> PdfResult<(i64, u16, usize)> {
    let pos = dictscan::skip_whitespace(bytes, pos);
    let (num, pos) = read_int_atom(bytes, pos)
        .ok_or_else(|| PdfError::malformed_xref("expected object number"))?;
    let pos = dictscan::skip_whitespace(bytes, pos);
    let (generation, pos) = read_int_atom(bytes, pos)
        .ok_or_else(|| PdfError::malformed_xref("expected generation number"))?;
    let pos = dictscan::skip_whitespace(bytes, pos);
    if !bytes[pos..].starts_with(b"obj") {
        return Err(PdfError::malformed_xref("expected 'obj' keyword"));
    }
    Ok((num, generation as u16, pos + 3))
}

/// Reads the body of the object at `offset`: `num gen obj <body> endobj`.
fn read_object_body_at(bytes: &[u8], offset: usize) -> PdfResult<Vec<u8>> {
    let (_, _, after_obj) = parse_indirect_object_header(bytes, offset)?;
    let body_start = dictscan::skip_whitespace(bytes, after_obj);
    let body_end = find_from(bytes, b"endobj", body_start)
        .ok_or_else(|| PdfError::malformed_xref("missing endobj"))?;
    Ok(bytes[body_start..body_end].to_vec())
}

fn read_stream_body(bytes: &[u8], dict_end: usize, dict: &[u8]) -> PdfResult<Vec<u8>> {
    let mut pos = dictscan::skip_whitespace(bytes, dict_end);
    if !bytes[pos..].starts_with(b"stream") {
        return Err(PdfError::malformed_xref("expected 'stream' keyword"));
    }
    pos += "stream".len();
    if bytes.get(pos) == Some(&b'\r') {
        pos += 1;
    }
    if bytes.get(pos) == Some(&b'\n') {
        pos += 1;
    }

    let declared_len = uint_value(dict, "Length");
    let end = match declared_len {
        Some(len) if pos + len <= bytes.len() => pos + len,
        _ => find_from(bytes, b"endstream", pos)
            .ok_or_else(|| PdfError::malformed_xref("missing endstream"))?,
    };

    Ok(bytes[pos..end].to_vec())
}

/// Reads an object-stream container's dictionary and raw (still
/// compressed) stream body, given the container's own file offset.
fn read_object_stream_at(bytes: &[u8], offset: usize) -> PdfResult<(Vec<u8>, Vec<u8>)> {
    let (_, _, after_obj) = parse_indirect_object_header(bytes, offset)?;
    let dict_start = dictscan::skip_whitespace(bytes, after_obj);
    let dict_span = dictscan::dictionary_at(bytes, dict_start)
        .ok_or_else(|| PdfError::malformed_xref("object stream missing dictionary"))?;
    let dict = bytes[dict_span.clone()].to_vec();
    let stream = read_stream_body(bytes, dict_span.end, &dict)?;
    Ok((dict, stream))
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|rel| rel + from)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn parse_number_after(bytes: &[u8], pos: usize) -> Option<usize> {
    let pos = dictscan::skip_whitespace(bytes, pos);
    let start = pos;
    let mut end = pos;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..end]).ok()?.parse().ok()
}

/// Locates `startxref`: the one right before a terminal `%%EOF` if
/// present, otherwise the last `startxref` anywhere in the file.
fn find_startxref(bytes: &[u8]) -> PdfResult<usize> {
    if let Some(eof_pos) = rfind(bytes, b"%%EOF") {
        if let Some(sx_pos) = rfind(&bytes[..eof_pos], b"startxref") {
            if let Some(n) = parse_number_after(bytes, sx_pos + "startxref".len()) {
                return Ok(n);
            }
        }
    }
    if let Some(sx_pos) = rfind(bytes, b"startxref") {
        if let Some(n) = parse_number_after(bytes, sx_pos + "startxref".len()) {
            return Ok(n);
        }
    }
    Err(PdfError::malformed_xref("no startxref keyword found"))
}
