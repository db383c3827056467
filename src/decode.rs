//! FlateDecode decompression and PNG-predictor reversal, used for xref
//! streams and object streams only. Arbitrary content streams pass
//! through verbatim and are never touched here.

use flate2::read::ZlibDecoder;
use std::io::Read;
use tracing::trace;

use crate::error::{PdfError, PdfResult};

/// Decodes a FlateDecode (zlib) compressed stream.
pub fn decode_flate(compressed: &[u8]) -> PdfResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PdfError::corrupt_stream(format!("FlateDecode failed: {}", e)))?;
    trace!(compressed_len = compressed.len(), decoded_len = out.len(), "flate decode");
    Ok(out)
}

/// Decodes `data` per `/Filter`, rejecting anything other than
/// `FlateDecode` or no filter at all.
pub fn decode_stream(data: &[u8], filter_name: Option<&str>) -> PdfResult<Vec<u8>> {
    match filter_name {
        Some("FlateDecode") => decode_flate(data),
        Some(other) => Err(PdfError::unsupported_filter(other)),
        None => Ok(data.to_vec()),
    }
}

/// Reverses PNG-predictor encoding (predictor types 10–15 in PDF terms,
/// i.e. PNG filter bytes 0–4 per row) applied on top of Flate
/// decompression.
///
/// `columns` is the byte width of one row's data (pre-predictor); PDF
/// xref/object streams always use 1 color component at 8 bits/component,
/// so a row is `1 (filter byte) + columns` bytes.
pub fn decode_png_predictor(data: &[u8], columns: usize) -> PdfResult<Vec<u8>> {
    let row_bytes = columns;
    let stride = 1 + row_bytes;

    if row_bytes == 0 || data.len() % stride != 0 {
        return Err(PdfError::corrupt_stream(format!(
            "PNG predictor data ({} bytes) does not divide evenly by stride {}",
            data.len(),
            stride
        )));
    }

    let num_rows = data.len() / stride;
    let mut out = Vec::with_capacity(num_rows * row_bytes);
    let mut prev_row = vec![0u8; row_bytes];

    for row_idx in 0..num_rows {
        let row_start = row_idx * stride;
        let filter_byte = data[row_start];
        let raw = &data[row_start + 1..row_start + 1 + row_bytes];
        let mut cur_row = vec![0u8; row_bytes];

        match filter_byte {
            0 => cur_row.copy_from_slice(raw),
            1 => {
                // Sub: pixel-to-the-left, pix width 1 byte for our use case.
                for i in 0..row_bytes {
                    let a = if i == 0 { 0 } else { cur_row[i - 1] };
                    cur_row[i] = raw[i].wrapping_add(a);
                }
            }
            2 => {
                // Up: pixel above.
                for i in 0..row_bytes {
                    cur_row[i] = raw[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                // Average of left and up.
                for i in 0..row_bytes {
                    let a = if i == 0 { 0 } else { cur_row[i - 1] } as u16;
                    let b = prev_row[i] as u16;
                    let avg = ((a + b) / 2) as u8;
                    cur_row[i] = raw[i].wrapping_add(avg);
                }
            }
            4 => {
                // Paeth: nearest of left (a), up (b), upper-left (c).
                for i in 0..row_bytes {
                    let a = if i == 0 { 0 } else { cur_row[i - 1] } as i32;
                    let b = prev_row[i] as i32;
                    let c = if i == 0 { 0 } else { prev_row[i - 1] } as i32;
                    cur_row[i] = raw[i].wrapping_add(paeth_predictor(a, b, c));
                }
            }
            other => {
                return Err(PdfError::corrupt_stream(format!(
                    "unsupported PNG predictor filter byte {}",
                    other
                )))
            }
        }

        out.extend_from_slice(&cur_row);
        prev_row = cur_row;
    }

    Ok(out)
}

/// Paeth predictor per PNG spec: pick whichever of a, b, c is nearest to
/// `p = a + b - c`, ties breaking toward a then b.
fn paeth_predictor(a: i32, b: i32, c: i32) -> u8 {
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();
    let chosen = if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    };
    (chosen & 0xFF) as u8
}
