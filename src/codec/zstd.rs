//! Zstd backend using the bulk block API so each chunk is a standalone
//! compressed block.

use crate::codec::{Codec, CodecError};

pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: u32) -> Self {
        // Map the 0..=14 archive scale onto zstd's 1..=19.
        let level = ((level as i32 * 19) / 14).max(1);
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        let out = zstd::bulk::compress(src, self.level).map_err(|e| CodecError::ProcessFailed {
            codec: "zstd",
            msg: e.to_string(),
        })?;
        dst.extend_from_slice(&out);
        Ok(0)
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        dst_hint: usize,
        _flags: u8,
    ) -> Result<(), CodecError> {
        let out = zstd::bulk::decompress(src, dst_hint)
            .map_err(|_| CodecError::Corrupt { codec: "zstd" })?;
        dst.extend_from_slice(&out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = b"zstd test payload ".repeat(300);
        let mut codec = ZstdCodec::new(6);
        let mut cmp = Vec::new();
        codec.compress(&data, &mut cmp).unwrap();
        assert!(cmp.len() < data.len());
        let mut out = Vec::new();
        codec.decompress(&cmp, &mut out, data.len(), 0).unwrap();
        assert_eq!(out, data);
    }
}
