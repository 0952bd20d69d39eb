//! Bzip2 backend.

use std::io::Read;

use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression;

use crate::codec::{Codec, CodecError};

pub struct Bzip2Codec {
    level: u32,
}

impl Bzip2Codec {
    pub fn new(level: u32) -> Self {
        // bzip2 block sizes run 1..=9.
        Self {
            level: level.clamp(1, 9),
        }
    }
}

impl Codec for Bzip2Codec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        let mut enc = BzEncoder::new(src, Compression::new(self.level));
        enc.read_to_end(dst).map_err(|e| CodecError::ProcessFailed {
            codec: "bzip2",
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
        let mut dec = BzDecoder::new(src);
        dec.read_to_end(dst)
            .map_err(|_| CodecError::Corrupt { codec: "bzip2" })?;
        Ok(())
    }
}
