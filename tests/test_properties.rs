//! Property tests: arbitrary inputs must round-trip bit-exactly through
//! the full pipeline, whatever the backend decides to do with them.

use std::fs;

use proptest::prelude::*;

use pcompress::codec::CodecId;
use pcompress::config::{DedupMode, PipelineConfig};
use pcompress::{start_compress, start_decompress};

fn round_trip(data: &[u8], codec: CodecId, dedup: bool, threads: usize) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::write(&input, data).unwrap();

    let cfg = PipelineConfig {
        codec,
        chunksize: 8 * 1024,
        nthreads: threads,
        dedup: if dedup {
            DedupMode::Segmented
        } else {
            DedupMode::None
        },
        rabin_split: dedup,
        rab_blk_index: 1,
        ..Default::default()
    };
    start_compress(cfg, Some(&input)).unwrap();

    let mut pz = input.into_os_string();
    pz.push(".pz");
    let out = dir.path().join("restored");
    start_decompress(
        PipelineConfig::default(),
        Some(std::path::Path::new(&pz)),
        Some(&out),
    )
    .unwrap();
    fs::read(&out).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn lz4_round_trips_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 1..40_000)) {
        prop_assert_eq!(round_trip(&data, CodecId::Lz4, false, 2), data);
    }

    #[test]
    fn zlib_round_trips_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 1..40_000)) {
        prop_assert_eq!(round_trip(&data, CodecId::Zlib, false, 3), data);
    }

    #[test]
    fn lzfx_round_trips_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 1..40_000)) {
        prop_assert_eq!(round_trip(&data, CodecId::Lzfx, false, 2), data);
    }

    #[test]
    fn dedup_round_trips_repetitive_bytes(
        block in proptest::collection::vec(any::<u8>(), 256..2048),
        reps in 2usize..24,
    ) {
        let data: Vec<u8> = block.iter().copied().cycle().take(block.len() * reps).collect();
        prop_assert_eq!(round_trip(&data, CodecId::Lz4, true, 2), data);
    }

    #[test]
    fn single_byte_files_round_trip(b in any::<u8>()) {
        let data = vec![b];
        prop_assert_eq!(round_trip(&data, CodecId::Zstd, false, 1), data);
    }
}
