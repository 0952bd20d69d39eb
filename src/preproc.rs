//! Chunk preprocessing: LZP prediction and Delta2 stride deltas, applied
//! before the backend and inverted after it.
//!
//! The payload of a preprocessed chunk starts with a type byte recording
//! which transforms were applied, followed by the preprocessed length (only
//! when the backend actually compressed) and the body. A buffer may end up
//! preprocessed but not backend-compressed: if the backend fails or does
//! not shrink the data after a transform succeeded, the payload keeps the
//! transform with the compressed bit clear and the decoder skips the
//! backend. The decoder inverts transforms in reverse order, gated per bit.

use std::fmt;

use crate::codec::Codec;
use crate::constants::preproc_flags::{
    PREPROC_COMPRESSED, PREPROC_TYPE_DELTA2, PREPROC_TYPE_LZP,
};

/// LZP needs some context to be worth anything.
const LZP_MIN_LEN: usize = 16;

#[derive(Debug)]
pub enum PreprocError {
    /// Type byte carries bits no decoder stage understands.
    BadType { ty: u8 },
    /// Truncated or inconsistent preprocessed stream.
    Corrupt(&'static str),
    /// Decompressed length does not match the recorded length.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for PreprocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreprocError::BadType { ty } => write!(f, "invalid preprocessing flags: {}", ty),
            PreprocError::Corrupt(what) => write!(f, "corrupt preprocessed stream: {}", what),
            PreprocError::LengthMismatch { expected, actual } => {
                write!(f, "preprocessed length mismatch: {} != {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for PreprocError {}

/// Outcome of the compress-side cascade.
pub struct PreprocResult {
    pub type_byte: u8,
    pub adapt_sub: u8,
}

/// Per-worker preprocessor with reusable stage buffers.
pub struct Preprocessor {
    lzp: bool,
    delta2_span: usize,
    hash_bits: u32,
    buf_a: Vec<u8>,
    buf_b: Vec<u8>,
}

impl Preprocessor {
    pub fn new(lzp: bool, delta2_span: usize, level: u32) -> Self {
        Self {
            lzp,
            delta2_span,
            hash_bits: lzp_hash_bits(level),
            buf_a: Vec::new(),
            buf_b: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.lzp || self.delta2_span > 0
    }

    /// Run the preprocess + compress cascade, appending the framed payload
    /// to `out`. Returns `None` when no transform applied and the payload
    /// should be stored verbatim by the caller.
    pub fn compress(
        &mut self,
        codec: &mut dyn Codec,
        src: &[u8],
        out: &mut Vec<u8>,
    ) -> Option<PreprocResult> {
        let mut ty = 0u8;
        let mut cur: &[u8] = src;

        if self.lzp {
            if lzp_compress(cur, &mut self.buf_a, self.hash_bits) {
                ty |= PREPROC_TYPE_LZP;
                cur = &self.buf_a;
            } else if self.delta2_span == 0 {
                return None;
            }
        }

        if self.delta2_span > 0 {
            delta2_encode(cur, &mut self.buf_b, self.delta2_span);
            ty |= PREPROC_TYPE_DELTA2;
            cur = &self.buf_b;
        }

        let base = out.len();
        out.push(ty);
        out.extend_from_slice(&(cur.len() as u64).to_be_bytes());
        let body = out.len();

        let mut adapt_sub = 0u8;
        let compressed = match codec.compress(cur, out) {
            Ok(sub) if out.len() - body < cur.len() => {
                adapt_sub = sub;
                true
            }
            _ => {
                // Keep the preprocessed bytes raw; the type byte with the
                // compressed bit clear tells the decoder to skip the backend.
                out.truncate(base + 1);
                out.extend_from_slice(cur);
                false
            }
        };

        if compressed {
            ty |= PREPROC_COMPRESSED;
            out[base] = ty;
        } else if ty == 0 {
            out.truncate(base);
            return None;
        }

        Some(PreprocResult {
            type_byte: ty,
            adapt_sub,
        })
    }

    /// Invert the cascade: backend, then Delta2, then LZP, appending the
    /// recovered bytes to `out`.
    pub fn decompress(
        &mut self,
        codec: &mut dyn Codec,
        src: &[u8],
        out: &mut Vec<u8>,
        flags: u8,
    ) -> Result<(), PreprocError> {
        if src.is_empty() {
            return Err(PreprocError::Corrupt("empty payload"));
        }
        let ty = src[0];
        if ty & !(PREPROC_COMPRESSED | PREPROC_TYPE_DELTA2 | PREPROC_TYPE_LZP) != 0 || ty == 0 {
            return Err(PreprocError::BadType { ty });
        }

        self.buf_a.clear();
        let mut cur: &[u8] = if ty & PREPROC_COMPRESSED != 0 {
            if src.len() < 9 {
                return Err(PreprocError::Corrupt("truncated length field"));
            }
            let srclen = u64::from_be_bytes(src[1..9].try_into().unwrap()) as usize;
            codec
                .decompress(&src[9..], &mut self.buf_a, srclen, flags)
                .map_err(|_| PreprocError::Corrupt("backend decompression failed"))?;
            if self.buf_a.len() != srclen {
                return Err(PreprocError::LengthMismatch {
                    expected: srclen,
                    actual: self.buf_a.len(),
                });
            }
            &self.buf_a
        } else {
            &src[1..]
        };

        if ty & PREPROC_TYPE_DELTA2 != 0 {
            self.buf_b.clear();
            delta2_decode(cur, &mut self.buf_b)?;
            cur = &self.buf_b;
        }

        if ty & PREPROC_TYPE_LZP != 0 {
            lzp_decompress(cur, out, self.hash_bits)?;
        } else {
            out.extend_from_slice(cur);
        }
        Ok(())
    }
}

fn lzp_hash_bits(level: u32) -> u32 {
    16 + level.min(4)
}

#[inline]
fn lzp_hash(b0: u8, b1: u8, b2: u8, bits: u32) -> usize {
    let v = (b0 as u32) << 16 | (b1 as u32) << 8 | b2 as u32;
    (v.wrapping_mul(2654435761) >> (32 - bits)) as usize
}

/// LZP: a context table predicts the next byte from the previous three.
/// Output groups eight predictions behind a control byte; hits cost one
/// bit, misses a literal. Returns false when the result did not shrink.
///
/// Layout: `[orig_len u64][first 3 bytes raw][groups...]`
pub(crate) fn lzp_compress(src: &[u8], dst: &mut Vec<u8>, bits: u32) -> bool {
    if src.len() < LZP_MIN_LEN {
        return false;
    }
    dst.clear();
    dst.extend_from_slice(&(src.len() as u64).to_be_bytes());
    dst.extend_from_slice(&src[..3]);

    let mut table = vec![0u8; 1 << bits];
    let mut i = 3usize;
    while i < src.len() {
        let ctrl_pos = dst.len();
        dst.push(0);
        let mut ctrl = 0u8;
        for bit in 0..8 {
            if i >= src.len() {
                break;
            }
            let h = lzp_hash(src[i - 3], src[i - 2], src[i - 1], bits);
            let pred = table[h];
            table[h] = src[i];
            if pred == src[i] {
                ctrl |= 1 << bit;
            } else {
                dst.push(src[i]);
            }
            i += 1;
        }
        dst[ctrl_pos] = ctrl;
        if dst.len() >= src.len() {
            return false;
        }
    }
    dst.len() < src.len()
}

/// The decoder rebuilds the same context table from the decoded history;
/// `bits` must match the encoder's (both derive it from the archive level).
pub(crate) fn lzp_decompress(src: &[u8], dst: &mut Vec<u8>, bits: u32) -> Result<(), PreprocError> {
    if src.len() < 8 {
        return Err(PreprocError::Corrupt("lzp stream too short"));
    }
    let orig_len = u64::from_be_bytes(src[..8].try_into().unwrap()) as usize;
    let base = dst.len();
    let head = 3.min(orig_len);
    if src.len() < 8 + head {
        return Err(PreprocError::Corrupt("lzp head truncated"));
    }
    dst.extend_from_slice(&src[8..8 + head]);

    let mut table = vec![0u8; 1 << bits];
    let mut i = 8 + head;
    while dst.len() - base < orig_len {
        if i >= src.len() {
            return Err(PreprocError::Corrupt("lzp groups truncated"));
        }
        let ctrl = src[i];
        i += 1;
        for bit in 0..8 {
            if dst.len() - base == orig_len {
                break;
            }
            let n = dst.len();
            let h = lzp_hash(dst[n - 3], dst[n - 2], dst[n - 1], bits);
            let b = if ctrl & (1 << bit) != 0 {
                table[h]
            } else {
                if i >= src.len() {
                    return Err(PreprocError::Corrupt("lzp literal truncated"));
                }
                let b = src[i];
                i += 1;
                b
            };
            table[h] = b;
            dst.push(b);
        }
    }
    Ok(())
}

/// Delta2: subtract the byte `span` positions back, leaving arithmetic
/// progressions as near-constant streams for the backend.
/// Layout: `[span u8][deltas...]` (length preserved plus the span byte).
pub(crate) fn delta2_encode(src: &[u8], dst: &mut Vec<u8>, span: usize) {
    debug_assert!(span > 0 && span < 256);
    dst.clear();
    dst.reserve(src.len() + 1);
    dst.push(span as u8);
    for i in 0..src.len() {
        if i >= span {
            dst.push(src[i].wrapping_sub(src[i - span]));
        } else {
            dst.push(src[i]);
        }
    }
}

pub(crate) fn delta2_decode(src: &[u8], dst: &mut Vec<u8>) -> Result<(), PreprocError> {
    if src.is_empty() {
        return Err(PreprocError::Corrupt("delta2 stream empty"));
    }
    let span = src[0] as usize;
    if span == 0 {
        return Err(PreprocError::Corrupt("delta2 span zero"));
    }
    let body = &src[1..];
    dst.clear();
    dst.reserve(body.len());
    for i in 0..body.len() {
        if i >= span {
            let prev = dst[i - span];
            dst.push(body[i].wrapping_add(prev));
        } else {
            dst.push(body[i]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, CodecId};

    #[test]
    fn lzp_round_trip_on_redundant_text() {
        let data = b"the quick brown fox jumps over the lazy dog. ".repeat(100);
        let mut cmp = Vec::new();
        assert!(lzp_compress(&data, &mut cmp, 18));
        assert!(cmp.len() < data.len());

        let mut out = Vec::new();
        lzp_decompress(&cmp, &mut out, 18).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn lzp_refuses_tiny_and_incompressible_input() {
        let mut cmp = Vec::new();
        assert!(!lzp_compress(b"short", &mut cmp, 16));

        let mut x = 1u32;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                x = x.wrapping_mul(1103515245).wrapping_add(12345);
                (x >> 16) as u8
            })
            .collect();
        assert!(!lzp_compress(&noise, &mut cmp, 16));
    }

    #[test]
    fn delta2_round_trip() {
        // Arithmetic sequence with stride 4, the shape delta2 targets.
        let mut data = Vec::new();
        for i in 0u32..2000 {
            data.extend_from_slice(&(i * 3).to_be_bytes());
        }
        let mut enc = Vec::new();
        delta2_encode(&data, &mut enc, 4);
        assert_eq!(enc.len(), data.len() + 1);

        let mut out = Vec::new();
        delta2_decode(&enc, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn cascade_round_trips_with_backend() {
        let data = b"preprocessing cascade sample data ".repeat(200);
        let mut codec = codec::create(CodecId::Zlib, 6, 1 << 20).unwrap();
        let mut pre = Preprocessor::new(true, 50, 6);

        let mut payload = Vec::new();
        let res = pre.compress(codec.as_mut(), &data, &mut payload).unwrap();
        assert!(res.type_byte & PREPROC_TYPE_LZP != 0);
        assert!(res.type_byte & PREPROC_COMPRESSED != 0);

        let mut out = Vec::new();
        pre.decompress(codec.as_mut(), &payload, &mut out, 0).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn cascade_keeps_preproc_when_backend_gains_nothing() {
        // The none backend never shrinks anything; a successful transform
        // must still round-trip with the compressed bit clear.
        let data = b"abcabcabcabc".repeat(64);
        let mut codec = codec::create(CodecId::None, 6, 1 << 20).unwrap();
        let mut pre = Preprocessor::new(true, 0, 6);

        let mut payload = Vec::new();
        let res = pre.compress(codec.as_mut(), &data, &mut payload).unwrap();
        assert_eq!(res.type_byte & PREPROC_COMPRESSED, 0);
        assert!(res.type_byte & PREPROC_TYPE_LZP != 0);

        let mut out = Vec::new();
        pre.decompress(codec.as_mut(), &payload, &mut out, 0).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn bad_type_byte_is_rejected() {
        let mut codec = codec::create(CodecId::Zlib, 6, 1 << 20).unwrap();
        let mut pre = Preprocessor::new(true, 0, 6);
        let mut out = Vec::new();
        assert!(matches!(
            pre.decompress(codec.as_mut(), &[0x40, 1, 2, 3], &mut out, 0),
            Err(PreprocError::BadType { ty: 0x40 })
        ));
    }
}

