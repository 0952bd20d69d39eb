//! End-to-end compress/decompress round trips across codecs, chunk sizes
//! and thread counts.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use pcompress::codec::CodecId;
use pcompress::config::PipelineConfig;
use pcompress::constants::flags::FLAG_SINGLE_CHUNK;
use pcompress::constants::chunk_flags::{CHSIZE_MASK, COMPRESSED};
use pcompress::container::read_header;
use pcompress::{start_compress, start_decompress};

fn base_cfg(codec: CodecId, chunksize: u64, threads: usize) -> PipelineConfig {
    PipelineConfig {
        codec,
        chunksize,
        nthreads: threads,
        ..Default::default()
    }
}

fn compress_to(dir: &Path, name: &str, data: &[u8], cfg: PipelineConfig) -> PathBuf {
    let input = dir.join(name);
    fs::write(&input, data).unwrap();
    start_compress(cfg, Some(&input)).unwrap();
    let mut pz = input.into_os_string();
    pz.push(".pz");
    PathBuf::from(pz)
}

fn decompress_to(dir: &Path, pz: &Path, cfg: PipelineConfig) -> Vec<u8> {
    let out = dir.join("restored");
    start_decompress(cfg, Some(pz), Some(&out)).unwrap();
    fs::read(&out).unwrap()
}

fn round_trip(data: &[u8], cfg: PipelineConfig) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let pz = compress_to(dir.path(), "input", data, cfg);
    decompress_to(dir.path(), &pz, PipelineConfig::default())
}

/// Walk the archive's chunk headers and collect the flag bytes.
fn chunk_flags(pz: &Path) -> Vec<u8> {
    let mut f = fs::File::open(pz).unwrap();
    let raw = read_header(&mut f).unwrap();
    let cksum_bytes = if raw.header.crypto.is_some() {
        0
    } else {
        raw.cksum.cksum_bytes()
    };
    let mut flags = Vec::new();
    loop {
        let mut len_be = [0u8; 8];
        f.read_exact(&mut len_be).unwrap();
        let len = u64::from_be_bytes(len_be);
        if len == 0 {
            break;
        }
        let mut body = vec![0u8; len as usize + cksum_bytes + raw.mac_bytes + 1];
        f.read_exact(&mut body).unwrap();
        flags.push(body[cksum_bytes + raw.mac_bytes]);
    }
    flags
}

fn repetitive(n: usize) -> Vec<u8> {
    b"Hello, world!\n".iter().copied().cycle().take(n).collect()
}

fn noise(n: usize) -> Vec<u8> {
    let mut x = 0x9E3779B97F4A7C15u64;
    (0..n)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

#[test]
fn lz4_multi_chunk_all_compressed() {
    // "Hello, world!\n" x 100000 with 1 MB chunks and 4 threads.
    let data = repetitive(14 * 100_000);
    let dir = tempfile::tempdir().unwrap();
    let pz = compress_to(
        dir.path(),
        "hello",
        &data,
        base_cfg(CodecId::Lz4, 1024 * 1024, 4),
    );

    let flags = chunk_flags(&pz);
    assert!(!flags.is_empty());
    for f in &flags {
        assert_eq!(f & COMPRESSED, COMPRESSED);
    }

    let restored = decompress_to(dir.path(), &pz, PipelineConfig::default());
    assert_eq!(restored, data);
}

#[test]
fn random_data_falls_back_to_uncompressed() {
    // 7 MB of noise with 5 MB chunks: two chunks, neither compressible.
    let data = noise(7 * 1024 * 1024);
    let dir = tempfile::tempdir().unwrap();
    let pz = compress_to(
        dir.path(),
        "noise",
        &data,
        base_cfg(CodecId::Zlib, 5 * 1024 * 1024, 2),
    );

    let flags = chunk_flags(&pz);
    assert_eq!(flags.len(), 2);
    assert!(flags.iter().any(|f| f & COMPRESSED == 0));

    let restored = decompress_to(dir.path(), &pz, PipelineConfig::default());
    assert_eq!(restored, data);
}

#[test]
fn output_is_identical_for_any_worker_count() {
    let data = repetitive(3 * 256 * 1024 + 1234);
    let mut archives = Vec::new();
    for threads in [1, 4] {
        let dir = tempfile::tempdir().unwrap();
        let pz = compress_to(
            dir.path(),
            "inv",
            &data,
            base_cfg(CodecId::Lz4, 256 * 1024, threads),
        );
        archives.push(fs::read(&pz).unwrap());
    }
    assert_eq!(archives[0], archives[1]);
}

#[test]
fn small_file_is_a_single_chunk_with_original_size() {
    let data = b"a file much smaller than the chunk size".to_vec();
    let dir = tempfile::tempdir().unwrap();
    let pz = compress_to(dir.path(), "small", &data, base_cfg(CodecId::Zlib, 1 << 20, 4));

    let mut f = fs::File::open(&pz).unwrap();
    let raw = read_header(&mut f).unwrap();
    assert!(raw.header.flags & FLAG_SINGLE_CHUNK != 0);

    let flags = chunk_flags(&pz);
    assert_eq!(flags.len(), 1);
    assert!(flags[0] & CHSIZE_MASK != 0);

    let restored = decompress_to(dir.path(), &pz, PipelineConfig::default());
    assert_eq!(restored, data);
}

#[test]
fn every_backend_round_trips() {
    let data = {
        let mut d = repetitive(200_000);
        d.extend_from_slice(&noise(50_000));
        d
    };
    for codec in [
        CodecId::Lzfx,
        CodecId::Lz4,
        CodecId::Zlib,
        CodecId::Lzma,
        CodecId::Bzip2,
        CodecId::Zstd,
        CodecId::Adapt,
        CodecId::Adapt2,
        CodecId::None,
    ] {
        let restored = round_trip(&data, base_cfg(codec, 64 * 1024, 2));
        assert_eq!(restored, data, "codec {:?}", codec);
    }
}

#[test]
fn preprocessing_round_trips() {
    let mut data = Vec::new();
    for i in 0u32..100_000 {
        data.extend_from_slice(&(i * 7).to_be_bytes());
    }
    let mut cfg = base_cfg(CodecId::Zlib, 128 * 1024, 3);
    cfg.lzp = true;
    cfg.delta2 = true;
    let restored = round_trip(&data, cfg);
    assert_eq!(restored, data);
}

#[test]
fn empty_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty");
    fs::write(&input, b"").unwrap();
    assert!(start_compress(PipelineConfig::default(), Some(&input)).is_err());
}

#[test]
fn existing_target_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("file");
    fs::write(&input, b"some data to compress").unwrap();
    fs::write(dir.path().join("file.pz"), b"already here").unwrap();
    assert!(start_compress(PipelineConfig::default(), Some(&input)).is_err());
}

#[test]
fn adaptive_chunks_record_their_sub_codec() {
    use pcompress::constants::chunk_flags::ADAPT_MASK;
    let data = repetitive(300_000);
    let dir = tempfile::tempdir().unwrap();
    let pz = compress_to(
        dir.path(),
        "adapt",
        &data,
        base_cfg(CodecId::Adapt, 64 * 1024, 2),
    );
    for f in chunk_flags(&pz) {
        if f & COMPRESSED != 0 {
            assert_ne!(f & ADAPT_MASK, 0);
        }
    }
    let restored = decompress_to(dir.path(), &pz, PipelineConfig::default());
    assert_eq!(restored, data);
}
