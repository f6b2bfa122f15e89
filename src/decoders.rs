//! Stream filters.
//!
//! Only the filters that signing and verification actually meet are
//! supported: FlateDecode (page content, cross-reference and object streams)
//! and ASCIIHexDecode, plus the TIFF and PNG predictors that cross-reference
//! streams are usually written with.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Upper bound on the decoded size of a single stream.
const MAX_DECODED_SIZE: usize = 256 * 1024 * 1024;

/// Largest `/Colors` value accepted for a predictor.
const MAX_COLORS: i64 = 32;

/// Largest `/Columns` value accepted for a predictor.
const MAX_COLUMNS: i64 = 1 << 24;

/// Predictor parameters taken from a stream's `/DecodeParms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Colour components per sample
    pub colors: usize,
    /// Bits per colour component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Build predictor parameters from raw `/DecodeParms` integers.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] if `/Columns` or `/Colors` is not positive or out of
    /// range, or `/BitsPerComponent` is not 1, 2, 4, 8 or 16.
    pub fn from_raw(predictor: i64, columns: i64, colors: i64, bits_per_component: i64) -> Result<Self> {
        if !(1..=MAX_COLUMNS).contains(&columns) {
            return Err(Error::Decode(format!("predictor: invalid /Columns {}", columns)));
        }
        if !(1..=MAX_COLORS).contains(&colors) {
            return Err(Error::Decode(format!("predictor: invalid /Colors {}", colors)));
        }
        if ![1, 2, 4, 8, 16].contains(&bits_per_component) {
            return Err(Error::Decode(format!(
                "predictor: invalid /BitsPerComponent {}",
                bits_per_component
            )));
        }
        Ok(Self {
            predictor,
            columns: columns as usize,
            colors: colors as usize,
            bits_per_component: bits_per_component as usize,
        })
    }

    fn row_len(&self) -> Result<usize> {
        self.columns
            .checked_mul(self.colors)
            .and_then(|n| n.checked_mul(self.bits_per_component))
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| Error::Decode("predictor: row length overflows".to_string()))
    }

    fn pixel_len(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Filters this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Flate,
    AsciiHex,
}

impl Filter {
    fn from_name(name: &str) -> Result<Self> {
        match name {
            "FlateDecode" | "Fl" => Ok(Filter::Flate),
            "ASCIIHexDecode" | "AHx" => Ok(Filter::AsciiHex),
            other => Err(Error::UnsupportedFilter(other.to_string())),
        }
    }
}

/// Decode `data` through the filter chain `filters`, in order.
///
/// Predictor parameters apply to the output of the Flate stage.
pub fn decode_stream(data: &[u8], filters: &[String], params: Option<&DecodeParams>) -> Result<Vec<u8>> {
    let chain = filters
        .iter()
        .map(|name| Filter::from_name(name))
        .collect::<Result<Vec<_>>>()?;

    let mut current = data.to_vec();
    for filter in chain {
        current = match filter {
            Filter::Flate => {
                let inflated = inflate(&current)?;
                match params {
                    Some(p) if p.predictor > 1 => unpredict(&inflated, p)?,
                    _ => inflated,
                }
            },
            Filter::AsciiHex => decode_ascii_hex(&current)?,
        };
    }
    Ok(current)
}

/// Compress with zlib at the default level.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let zlib = ZlibDecoder::new(data)
        .take(MAX_DECODED_SIZE as u64 + 1)
        .read_to_end(&mut out);

    if let Err(e) = zlib {
        if out.is_empty() {
            // Some producers omit the zlib wrapper.
            log::debug!("zlib inflate failed ({}), retrying as raw deflate", e);
            DeflateDecoder::new(data)
                .take(MAX_DECODED_SIZE as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| Error::Decode(format!("FlateDecode: {}", e)))?;
        } else {
            log::warn!("FlateDecode recovered {} bytes before error: {}", out.len(), e);
        }
    }

    if out.len() > MAX_DECODED_SIZE {
        return Err(Error::Decode(format!(
            "FlateDecode: output exceeds {} bytes",
            MAX_DECODED_SIZE
        )));
    }
    Ok(out)
}

fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = data
        .iter()
        .copied()
        .take_while(|&c| c != b'>')
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = pair.get(1).map_or(Ok(0), |&c| hex_value(c))?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_value(c: u8) -> Result<u8> {
    (c as char)
        .to_digit(16)
        .map(|d| d as u8)
        .ok_or_else(|| Error::Decode(format!("ASCIIHexDecode: invalid digit '{}'", c as char)))
}

/// Reverse a TIFF (2) or PNG (10-15) predictor.
fn unpredict(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.row_len()?;
    let bpp = params.pixel_len();
    if row_len == 0 || row_len > MAX_DECODED_SIZE {
        return Err(Error::Decode("predictor: zero-length rows".to_string()));
    }

    match params.predictor {
        2 => {
            let mut out = data.to_vec();
            for row in out.chunks_mut(row_len) {
                for i in bpp..row.len() {
                    row[i] = row[i].wrapping_add(row[i - bpp]);
                }
            }
            Ok(out)
        },
        10..=15 => {
            let stride = row_len + 1;
            let rows = data.len().div_ceil(stride);
            let capacity = rows
                .checked_mul(row_len)
                .filter(|&n| n <= MAX_DECODED_SIZE)
                .ok_or_else(|| Error::Decode(format!("predictor: output exceeds {} bytes", MAX_DECODED_SIZE)))?;
            let mut out = Vec::with_capacity(capacity);
            let mut prev = vec![0u8; row_len];

            for encoded in data.chunks(stride) {
                let (tag, body) = match encoded.split_first() {
                    Some(split) => split,
                    None => break,
                };
                let mut row = body.to_vec();
                row.resize(row_len, 0);

                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] } else { 0 };
                    let up = prev[i];
                    let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
                    let base = match tag {
                        0 => 0,
                        1 => left,
                        2 => up,
                        3 => ((left as u16 + up as u16) / 2) as u8,
                        4 => paeth(left, up, up_left),
                        other => {
                            return Err(Error::Decode(format!("invalid PNG row filter {}", other)))
                        },
                    };
                    row[i] = row[i].wrapping_add(base);
                }

                out.extend_from_slice(&row);
                prev = row;
            }
            Ok(out)
        },
        other => Err(Error::Decode(format!("unsupported predictor {}", other))),
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flate_roundtrip() {
        let data = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET".repeat(10);
        let compressed = deflate(&data).unwrap();
        assert!(compressed.len() < data.len());
        let decoded = decode_stream(&compressed, &names(&["FlateDecode"]), None).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_ascii_hex_odd_length_and_whitespace() {
        let decoded = decode_stream(b"48 65 6C 6C 6F 7>", &names(&["ASCIIHexDecode"]), None).unwrap();
        assert_eq!(decoded, b"Hellop");
    }

    #[test]
    fn test_ascii_hex_invalid_digit() {
        assert!(matches!(
            decode_stream(b"4G>", &names(&["ASCIIHexDecode"]), None),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_predictor_params_out_of_range() {
        for (columns, colors, bpc) in [(-1, 1, 8), (0, 1, 8), (1 << 40, 1, 8), (4, -3, 8), (4, 1, 3), (4, 1, 0)] {
            assert!(
                matches!(DecodeParams::from_raw(12, columns, colors, bpc), Err(Error::Decode(_))),
                "accepted /Columns {} /Colors {} /BitsPerComponent {}",
                columns,
                colors,
                bpc
            );
        }
        let params = DecodeParams::from_raw(12, 4, 1, 8).unwrap();
        assert_eq!(params.row_len().unwrap(), 4);
    }

    #[test]
    fn test_unsupported_filter() {
        match decode_stream(b"", &names(&["DCTDecode"]), None) {
            Err(Error::UnsupportedFilter(name)) => assert_eq!(name, "DCTDecode"),
            other => panic!("expected UnsupportedFilter, got {:?}", other),
        }
    }

    #[test]
    fn test_png_up_predictor() {
        let params = DecodeParams {
            predictor: 12,
            columns: 3,
            ..Default::default()
        };
        // Row 0: tag 2, [1,2,3]; row 1: tag 2, deltas [1,1,1]
        let raw = [2u8, 1, 2, 3, 2, 1, 1, 1];
        let compressed = deflate(&raw).unwrap();
        let decoded = decode_stream(&compressed, &names(&["FlateDecode"]), Some(&params)).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_and_paeth_rows() {
        let params = DecodeParams {
            predictor: 15,
            columns: 3,
            ..Default::default()
        };
        let raw = [1u8, 5, 1, 1, 4, 0, 0, 0];
        let decoded = unpredict(&raw, &params).unwrap();
        assert_eq!(decoded, vec![5, 6, 7, 5, 6, 7]);
    }

    #[test]
    fn test_tiff_predictor() {
        let params = DecodeParams {
            predictor: 2,
            columns: 4,
            ..Default::default()
        };
        let decoded = unpredict(&[10, 1, 1, 1], &params).unwrap();
        assert_eq!(decoded, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_paeth_function() {
        assert_eq!(paeth(10, 20, 10), 20);
        assert_eq!(paeth(20, 10, 10), 20);
        assert_eq!(paeth(0, 0, 0), 0);
    }
}
