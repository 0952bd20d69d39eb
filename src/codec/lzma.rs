//! LZMA backend.
//!
//! Serves both the lzma and lzmaMt tags; the encoder has no internal
//! threading, so the pipeline keeps the full thread budget.

use crate::codec::{Codec, CodecError};

pub struct LzmaCodec;

impl LzmaCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for LzmaCodec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        lzma_rs::lzma_compress(&mut &src[..], dst).map_err(|e| CodecError::ProcessFailed {
            codec: "lzma",
            msg: e.to_string(),
        })?;
        Ok(0)
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        dst_hint: usize,
        _flags: u8,
    ) -> Result<(), CodecError> {
        dst.reserve(dst_hint);
        lzma_rs::lzma_decompress(&mut &src[..], dst)
            .map_err(|_| CodecError::Corrupt { codec: "lzma" })?;
        Ok(())
    }
}

/// LZMA for the dedup index region. The index is only worth compressing
/// once it reaches a minimum size, and only kept when it actually shrank.
pub const INDEX_CMP_MIN: usize = 90;

pub fn compress_index(src: &[u8]) -> Option<Vec<u8>> {
    if src.len() < INDEX_CMP_MIN {
        return None;
    }
    let mut out = Vec::with_capacity(src.len());
    lzma_rs::lzma_compress(&mut &src[..], &mut out).ok()?;
    if out.len() >= src.len() {
        return None;
    }
    Some(out)
}

pub fn decompress_index(src: &[u8], index_sz: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(index_sz);
    lzma_rs::lzma_decompress(&mut &src[..], &mut out)
        .map_err(|_| CodecError::Corrupt { codec: "lzma" })?;
    Ok(out)
}
