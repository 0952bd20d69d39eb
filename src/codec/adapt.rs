//! Adaptive meta-codec.
//!
//! Tries every sub-codec on each chunk and keeps the smallest result. The
//! winning sub-codec id lands in bits 6-4 of the chunk flag byte so the
//! decoder can dispatch without trial decompression. adapt runs zlib and
//! bzip2; adapt2 adds lzma for a better ratio at a substantial speed cost.

use crate::codec::{bzip2::Bzip2Codec, lzma::LzmaCodec, zlib::ZlibCodec, Codec, CodecError};

pub const SUB_ZLIB: u8 = 1;
pub const SUB_BZIP2: u8 = 2;
pub const SUB_LZMA: u8 = 3;

pub struct AdaptCodec {
    subs: Vec<(u8, Box<dyn Codec>)>,
    best_buf: Vec<u8>,
    try_buf: Vec<u8>,
}

impl AdaptCodec {
    pub fn new(level: u32, _chunksize: u64, extended: bool) -> Result<Self, CodecError> {
        let mut subs: Vec<(u8, Box<dyn Codec>)> = vec![
            (SUB_ZLIB, Box::new(ZlibCodec::new(level))),
            (SUB_BZIP2, Box::new(Bzip2Codec::new(level))),
        ];
        if extended {
            subs.push((SUB_LZMA, Box::new(LzmaCodec::new())));
        }
        Ok(Self {
            subs,
            best_buf: Vec::new(),
            try_buf: Vec::new(),
        })
    }
}

impl Codec for AdaptCodec {
    fn compress(&mut self, src: &[u8], dst: &mut Vec<u8>) -> Result<u8, CodecError> {
        let mut best: Option<u8> = None;

        for (id, sub) in &mut self.subs {
            self.try_buf.clear();
            if sub.compress(src, &mut self.try_buf).is_err() {
                continue;
            }
            if best.is_none() || self.try_buf.len() < self.best_buf.len() {
                std::mem::swap(&mut self.best_buf, &mut self.try_buf);
                best = Some(*id);
            }
        }

        let id = best.ok_or(CodecError::ProcessFailed {
            codec: "adapt",
            msg: "all sub-codecs failed".to_string(),
        })?;
        dst.extend_from_slice(&self.best_buf);
        self.best_buf.clear();
        Ok(id)
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        dst_hint: usize,
        flags: u8,
    ) -> Result<(), CodecError> {
        use crate::constants::chunk_flags::{ADAPT_MASK, ADAPT_SHIFT};

        let id = (flags & ADAPT_MASK) >> ADAPT_SHIFT;
        let sub = self
            .subs
            .iter_mut()
            .find(|(sid, _)| *sid == id)
            .ok_or(CodecError::UnknownSubCodec { id })?;
        sub.1.decompress(src, dst, dst_hint, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::chunk_flags::ADAPT_SHIFT;

    #[test]
    fn picks_a_sub_codec_and_round_trips() {
        let data = b"adaptive mode sample text, quite compressible ".repeat(200);
        let mut codec = AdaptCodec::new(6, 1 << 20, true).unwrap();
        let mut cmp = Vec::new();
        let sub = codec.compress(&data, &mut cmp).unwrap();
        assert!((SUB_ZLIB..=SUB_LZMA).contains(&sub));
        assert!(cmp.len() < data.len());

        let flags = sub << ADAPT_SHIFT;
        let mut out = Vec::new();
        codec.decompress(&cmp, &mut out, data.len(), flags).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unknown_sub_codec_is_rejected() {
        let mut codec = AdaptCodec::new(6, 1 << 20, false).unwrap();
        let mut out = Vec::new();
        let flags = 7u8 << ADAPT_SHIFT;
        assert!(matches!(
            codec.decompress(b"xx", &mut out, 16, flags),
            Err(CodecError::UnknownSubCodec { id: 7 })
        ));
    }
}
