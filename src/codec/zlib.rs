//! Zlib backend (raw zlib format, not gzip).

use std::io::Read;

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::codec::{Codec, CodecError};

pub struct ZlibCodec {
    level: u32,
}

impl ZlibCodec {
    pub fn new(level: u32) -> Self {
        // zlib levels stop at 9.
        Self {
            level: level.min(9),
        }
    }
}

impl Codec for ZlibCodec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        let mut enc = ZlibEncoder::new(src, Compression::new(self.level));
        enc.read_to_end(dst).map_err(|e| CodecError::ProcessFailed {
            codec: "zlib",
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
        let mut dec = ZlibDecoder::new(src);
        dec.read_to_end(dst)
            .map_err(|_| CodecError::Corrupt { codec: "zlib" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = b"the quick brown fox ".repeat(200);
        let mut codec = ZlibCodec::new(6);
        let mut cmp = Vec::new();
        codec.compress(&data, &mut cmp).unwrap();
        assert!(cmp.len() < data.len());

        let mut out = Vec::new();
        codec.decompress(&cmp, &mut out, data.len(), 0).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn corrupt_input_is_rejected() {
        let mut codec = ZlibCodec::new(6);
        let mut out = Vec::new();
        assert!(codec
            .decompress(b"\xff\xfe\xfd\xfc", &mut out, 64, 0)
            .is_err());
    }
}
