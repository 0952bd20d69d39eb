//! LZ4 block backend.
//!
//! The block API prepends the plaintext size so decompression does not
//! depend on the caller's hint.

use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};

use crate::codec::{Codec, CodecError};

pub struct Lz4Codec;

impl Lz4Codec {
    pub fn new() -> Self {
        // lz4 block mode has no levels.
        Self
    }
}

impl Codec for Lz4Codec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        dst.extend_from_slice(&compress_prepend_size(src));
        Ok(0)
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        _dst_hint: usize,
        _flags: u8,
    ) -> Result<(), CodecError> {
        let out = decompress_size_prepended(src)
            .map_err(|_| CodecError::Corrupt { codec: "lz4" })?;
        dst.extend_from_slice(&out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = b"aaaaabbbbbccccc".repeat(500);
        let mut codec = Lz4Codec::new();
        let mut cmp = Vec::new();
        codec.compress(&data, &mut cmp).unwrap();
        let mut out = Vec::new();
        codec.decompress(&cmp, &mut out, data.len(), 0).unwrap();
        assert_eq!(out, data);
    }
}
