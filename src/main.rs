//! pcompress command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pcompress::checksum::ChecksumKind;
use pcompress::codec::CodecId;
use pcompress::config::{DedupMode, PipelineConfig};
use pcompress::crypto::CryptoAlg;
use pcompress::dedup::DeltaSim;
use pcompress::{start_compress, start_decompress, PcError};

/// Chunked parallel multi-algorithm lossless compression.
#[derive(Parser)]
#[command(name = "pcompress", version)]
struct Args {
    /// Compress with the given algorithm (lzfx, lz4, zlib, lzma, lzmaMt,
    /// bzip2, zstd, adapt, adapt2, none)
    #[arg(short = 'c', value_name = "ALGO")]
    compress: Option<String>,

    /// Decompress
    #[arg(short = 'd')]
    decompress: bool,

    /// Chunk size; bytes or with g/m/k suffix
    #[arg(short = 's', value_name = "SIZE")]
    chunk_size: Option<String>,

    /// Compression level, 0 (minimum) to 14 (maximum)
    #[arg(short = 'l', value_name = "LEVEL", default_value_t = 6)]
    level: u32,

    /// Pipe mode: read stdin, write stdout
    #[arg(short = 'p')]
    pipe: bool,

    /// Thread count (1 - 256); defaults to online cores
    #[arg(short = 't', value_name = "COUNT")]
    threads: Option<usize>,

    /// Rabin fingerprinting based deduplication
    #[arg(short = 'D')]
    dedup: bool,

    /// Global (file-wide) deduplication
    #[arg(short = 'G')]
    global_dedup: bool,

    /// Fixed-block deduplication
    #[arg(short = 'F')]
    fixed_dedup: bool,

    /// Delta encoding at 60% similarity; repeat (-EE) for 40%. Implies -D
    #[arg(short = 'E', action = ArgAction::Count)]
    delta: u8,

    /// Do not split chunks at rabin boundaries
    #[arg(short = 'r')]
    no_rabin_split: bool,

    /// LZP pre-compression
    #[arg(short = 'L')]
    lzp: bool,

    /// Adaptive delta encoding of numeric sequences
    #[arg(short = 'P')]
    delta2: bool,

    /// Chunk checksum kind (CRC32, SHA256, SHA512, SHA3-256, SHA3-512, BLAKE3)
    #[arg(short = 'S', value_name = "CHECKSUM")]
    checksum: Option<String>,

    /// Average dedupe block size index: 1 (4k) - 5 (64k)
    #[arg(short = 'B', value_name = "1..5")]
    blk_size: Option<u32>,

    /// Encrypt chunks (AES or SALSA20)
    #[arg(short = 'e', value_name = "ALGO")]
    encrypt: Option<String>,

    /// Password file; zeroed out after reading
    #[arg(short = 'w', value_name = "PATH")]
    pwd_file: Option<PathBuf>,

    /// Encryption key length: 16 or 32 bytes
    #[arg(short = 'k', value_name = "LEN", default_value_t = 32)]
    keylen: usize,

    /// Display memory statistics
    #[arg(short = 'M')]
    mem_stats: bool,

    /// Display compression statistics
    #[arg(short = 'C')]
    cmp_stats: bool,

    /// Input file, and target file for decompression
    files: Vec<PathBuf>,
}

fn build_config(args: &Args) -> Result<PipelineConfig, PcError> {
    let mut cfg = PipelineConfig::default();
    let bad = |msg: &str| Err(PcError::Config(msg.to_string()));

    if let Some(algo) = &args.compress {
        cfg.codec = CodecId::resolve(algo)
            .map_err(|_| PcError::Config(format!("invalid algorithm {}", algo)))?;
    }
    if let Some(size) = &args.chunk_size {
        cfg.chunksize = parse_chunk_size(size)?;
    }
    cfg.level = args.level;
    cfg.pipe_mode = args.pipe;
    if let Some(t) = args.threads {
        if !(1..=256).contains(&t) {
            return bad("thread count should be in range 1 - 256");
        }
        cfg.nthreads = t;
    }

    // Delta encoding implies rabin dedup; global dedup defaults to rabin
    // chunking when neither -D nor -F was given.
    let mut rabin = args.dedup || args.delta > 0;
    if args.global_dedup && !rabin && !args.fixed_dedup {
        rabin = true;
    }
    cfg.dedup = match (args.global_dedup, rabin, args.fixed_dedup) {
        (true, _, _) => DedupMode::Global,
        (false, true, false) => DedupMode::Segmented,
        (false, false, true) => DedupMode::Fixed,
        (false, true, true) => {
            return bad("rabin deduplication and fixed-block deduplication are mutually exclusive")
        }
        (false, false, false) => DedupMode::None,
    };
    cfg.delta_sim = match args.delta {
        0 => None,
        1 => Some(DeltaSim::Normal),
        _ => Some(DeltaSim::Extra),
    };
    cfg.rabin_split = matches!(cfg.dedup, DedupMode::Segmented | DedupMode::Global)
        && !args.no_rabin_split
        && !args.fixed_dedup;

    cfg.lzp = args.lzp;
    cfg.delta2 = args.delta2;

    if let Some(name) = &args.checksum {
        cfg.cksum = ChecksumKind::from_name(name)
            .map_err(|e| PcError::Config(e.to_string()))?;
    }
    if let Some(b) = args.blk_size {
        cfg.rab_blk_index = b;
    }
    if let Some(alg) = &args.encrypt {
        cfg.encrypt = Some(CryptoAlg::from_name(alg).map_err(PcError::Crypto)?);
    }
    cfg.pwd_file = args.pwd_file.clone();
    cfg.keylen = args.keylen;
    cfg.show_mem_stats = args.mem_stats;
    cfg.show_cmp_stats = args.cmp_stats;
    cfg.finish();
    Ok(cfg)
}

fn run(args: Args) -> Result<(), PcError> {
    let compressing = args.compress.is_some();
    if compressing == args.decompress {
        return Err(PcError::Config(
            "exactly one of -c <algorithm> or -d must be given".to_string(),
        ));
    }
    if args.pipe && !args.files.is_empty() {
        return Err(PcError::Config(
            "filename(s) unexpected for pipe mode".to_string(),
        ));
    }
    if !compressing && (args.dedup || args.fixed_dedup || args.global_dedup || args.delta > 0) {
        return Err(PcError::Config(
            "deduplication is only used during compression".to_string(),
        ));
    }
    if !compressing && args.encrypt.is_some() {
        return Err(PcError::Config(
            "encryption only makes sense when compressing".to_string(),
        ));
    }

    let cfg = build_config(&args)?;

    if args.pipe {
        return if compressing {
            start_compress(cfg, None)
        } else {
            start_decompress(cfg, None, None)
        };
    }

    match (compressing, args.files.len()) {
        (true, 1) => start_compress(cfg, Some(&args.files[0])),
        (false, 2) => {
            if args.files[1].exists() {
                return Err(PcError::Config(format!(
                    "file {} exists",
                    args.files[1].display()
                )));
            }
            start_decompress(cfg, Some(&args.files[0]), Some(&args.files[1]))
        }
        (true, _) => Err(PcError::Config(
            "compression takes exactly one filename".to_string(),
        )),
        (false, _) => Err(PcError::Config(
            "decompression takes a source and a target filename".to_string(),
        )),
    }
}

fn parse_chunk_size(s: &str) -> Result<u64, PcError> {
    pcompress::utils::parse_size(s)
        .ok_or_else(|| PcError::Config(format!("invalid chunk size {}", s)))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).without_time())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
