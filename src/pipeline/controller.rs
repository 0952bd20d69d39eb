//! Orchestration: setup, steady state, shutdown.
//!
//! Compression writes into a dot-prefixed temporary file beside the target
//! and renames it into place only after the trailer is out; an interrupted
//! or failed run leaves nothing behind (the temp file unlinks on drop).
//! Decompression leaves partial output in place for diagnosis, but a wrong
//! password fails header verification before the target is even created.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use crate::config::{DedupMode, PipelineConfig};
use crate::constants::COMP_EXTN;
use crate::container::{
    encode, read_header, verify_header_crc, verify_header_hmac, CryptoHeader, FileHeader,
};
use crate::crypto::{password, ChunkMac, CryptoCtx};
use crate::dedup::{DedupCtx, GlobalIndex};
use crate::pipeline::{
    build_links, producer, worker::Worker, writer, ErrSlot, Stats,
};
use crate::types::PcError;

fn announce_scaling(cfg: &PipelineConfig) {
    let props = crate::codec::props(cfg.codec, cfg.level, cfg.chunksize);
    let total = cfg.nthreads * props.backend_threads;
    eprintln!("Scaling to {} thread{}", total, if total > 1 { "s" } else { "" });
}

fn take_result(errs: &ErrSlot, cancel: &AtomicBool) -> Result<(), PcError> {
    if let Some(e) = errs.lock().unwrap().take() {
        return Err(e);
    }
    if cancel.load(Ordering::SeqCst) {
        return Err(PcError::Cancelled);
    }
    Ok(())
}

fn show_mem_stats(cfg: &PipelineConfig) {
    let props = crate::codec::props(cfg.codec, cfg.level, cfg.chunksize);
    let per_worker = cfg.chunksize + cfg.compressed_chunksize(props.buf_extra);
    eprintln!("\nMemory Statistics");
    eprintln!("=================");
    eprintln!("Worker slots           : {}", cfg.nthreads);
    eprintln!(
        "Buffer bytes per slot  : {}",
        crate::utils::bytes_to_size(per_worker)
    );
    eprintln!(
        "Total buffer budget    : {}\n",
        crate::utils::bytes_to_size(per_worker * cfg.nthreads as u64 + cfg.chunksize)
    );
}

fn build_workers(
    cfg: &Arc<PipelineConfig>,
    crypto: &Option<Arc<CryptoCtx>>,
    gindex: &Option<Arc<GlobalIndex>>,
    out_files: Vec<Option<File>>,
    cancel: &Arc<AtomicBool>,
    errs: &ErrSlot,
) -> Result<Vec<Worker>, PcError> {
    let mut workers = Vec::with_capacity(cfg.nthreads);
    for out_file in out_files {
        let dedup = if cfg.dedup.enabled() {
            let mut ctx = DedupCtx::new(
                cfg.dedup,
                cfg.rab_blk_index,
                cfg.delta_sim,
                gindex.clone(),
            );
            if let Some(f) = out_file {
                ctx.set_out_file(f);
            }
            Some(ctx)
        } else {
            None
        };
        workers.push(Worker::new(
            Arc::clone(cfg),
            crypto.clone(),
            dedup,
            Arc::clone(cancel),
            Arc::clone(errs),
        )?);
    }
    Ok(workers)
}

/// Run the compression pipeline over open streams.
fn compress_stream<R, W>(
    cfg: Arc<PipelineConfig>,
    reader: &mut R,
    out: &mut W,
    crypto: Option<Arc<CryptoCtx>>,
) -> Result<Stats, PcError>
where
    R: Read,
    W: Write + Send,
{
    announce_scaling(&cfg);
    let gindex = if cfg.dedup == DedupMode::Global {
        Some(GlobalIndex::new())
    } else {
        None
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let errs: ErrSlot = Arc::new(Mutex::new(None));

    let ring = cfg.dedup == DedupMode::Global;
    let (producer_links, writer_links, ports, _) = build_links(cfg.nthreads, ring, false);
    let out_files = (0..cfg.nthreads).map(|_| None).collect();
    let workers = build_workers(&cfg, &crypto, &gindex, out_files, &cancel, &errs)?;

    let mut stats = Stats::default();
    thread::scope(|s| {
        for (w, port) in workers.into_iter().zip(ports) {
            s.spawn(move || w.run_compress(port));
        }
        let wh = {
            let cancel = &cancel;
            let errs = &errs;
            s.spawn(move || {
                writer::run_writer(
                    out,
                    writer_links,
                    cancel,
                    errs,
                    writer::WriterCfg {
                        collect_stats: true,
                        ring_next: Vec::new(),
                    },
                )
            })
        };

        let chunks = producer::run_compress_producer(reader, producer_links, &cfg, &cancel, &errs);
        debug!(chunks, "producer finished");

        stats = wh.join().unwrap();
    });

    take_result(&errs, &cancel)?;
    Ok(stats)
}

/// Run the decompression pipeline over open streams. `out_files` supplies
/// per-worker read handles on the target for global dedup recovery.
fn decompress_stream<R, W>(
    cfg: Arc<PipelineConfig>,
    reader: &mut R,
    out: &mut W,
    crypto: Option<Arc<CryptoCtx>>,
    out_files: Vec<Option<File>>,
) -> Result<Stats, PcError>
where
    R: Read,
    W: Write + Send,
{
    announce_scaling(&cfg);
    let cancel = Arc::new(AtomicBool::new(false));
    let errs: ErrSlot = Arc::new(Mutex::new(None));

    let ring = cfg.dedup == DedupMode::Global;
    let (producer_links, writer_links, ports, ring_next) =
        build_links(cfg.nthreads, ring, true);
    let workers = build_workers(&cfg, &crypto, &None, out_files, &cancel, &errs)?;

    let mut stats = Stats::default();
    thread::scope(|s| {
        for (w, port) in workers.into_iter().zip(ports) {
            s.spawn(move || w.run_decompress(port));
        }
        let wh = {
            let cancel = &cancel;
            let errs = &errs;
            s.spawn(move || {
                writer::run_writer(
                    out,
                    writer_links,
                    cancel,
                    errs,
                    writer::WriterCfg {
                        collect_stats: false,
                        ring_next,
                    },
                )
            })
        };

        let chunks = producer::run_decompress_producer(
            reader,
            producer_links,
            &cfg,
            &cancel,
            &errs,
            &mut stats,
        );
        debug!(chunks, "producer finished");

        wh.join().unwrap();
    });

    take_result(&errs, &cancel)?;
    Ok(stats)
}

/// Compress `filename` into `filename.pz` (or stdin to stdout in pipe
/// mode). The config must carry the CLI options; thread count and
/// single-chunk detection are resolved here.
pub fn start_compress(mut cfg: PipelineConfig, filename: Option<&Path>) -> Result<(), PcError> {
    let crypto_init = |cfg: &PipelineConfig| -> Result<Option<Arc<CryptoCtx>>, PcError> {
        match cfg.encrypt {
            Some(alg) => {
                let pw = password::get_password(
                    cfg.pwd_file.as_deref(),
                    "Please enter encryption password",
                )?;
                Ok(Some(Arc::new(CryptoCtx::new_encrypt(alg, &pw, cfg.keylen)?)))
            }
            None => Ok(None),
        }
    };

    if cfg.pipe_mode || filename.is_none() {
        cfg.pipe_mode = true;
        cfg.resolve_threads(None);
        cfg.finish();
        cfg.validate(true)?;
        if cfg.dedup.enabled() {
            debug!("pipe mode scratch directory: {}", cfg.scratch_dir.display());
        }
        let crypto = crypto_init(&cfg)?;
        let cfg = Arc::new(cfg);

        let stdin = std::io::stdin();
        let mut reader = stdin.lock();
        let mut out = std::io::stdout();
        write_archive_header(&cfg, &crypto, &mut out)?;
        let stats = compress_stream(Arc::clone(&cfg), &mut reader, &mut out, crypto)?;
        encode::write_trailer(&mut out)?;
        out.flush()?;
        finish_stats(&cfg, &stats);
        return Ok(());
    }

    let filename = filename.unwrap();
    let mut input = File::open(filename)?;
    let meta = input.metadata()?;
    if !meta.is_file() {
        return Err(PcError::Config(format!(
            "file {} is not a regular file",
            filename.display()
        )));
    }
    if meta.len() == 0 {
        return Err(PcError::Config(format!(
            "file {} is empty",
            filename.display()
        )));
    }

    cfg.resolve_threads(Some(meta.len()));
    cfg.finish();
    cfg.validate(true)?;
    let crypto = crypto_init(&cfg)?;
    let cfg = Arc::new(cfg);

    let mut to_filename = filename.as_os_str().to_os_string();
    to_filename.push(COMP_EXTN);
    let to_filename = PathBuf::from(to_filename);
    if to_filename.exists() {
        return Err(PcError::Config(format!(
            "compressed file {} exists",
            to_filename.display()
        )));
    }

    // Compress into a hidden temp file beside the target; rename on
    // success, auto-unlink on any failure path.
    let dir = filename.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".pcomp")
        .tempfile_in(dir)?;
    let mut out = temp.as_file().try_clone()?;

    write_archive_header(&cfg, &crypto, &mut out)?;
    let stats = compress_stream(Arc::clone(&cfg), &mut input, &mut out, crypto)?;
    encode::write_trailer(&mut out)?;
    out.flush()?;

    // Ownership and mode of the target should match the original.
    temp.as_file().set_permissions(meta.permissions())?;
    if let Err(e) = std::os::unix::fs::chown(temp.path(), Some(meta.uid()), Some(meta.gid())) {
        warn!("chown: {}", e);
    }
    temp.persist(&to_filename)
        .map_err(|e| PcError::Io(e.error))?;

    finish_stats(&cfg, &stats);
    Ok(())
}

fn write_archive_header<W: Write>(
    cfg: &PipelineConfig,
    crypto: &Option<Arc<CryptoCtx>>,
    out: &mut W,
) -> Result<(), PcError> {
    let crypto_hdr = crypto.as_ref().map(|c| CryptoHeader {
        alg: c.alg(),
        salt: c.salt().to_vec(),
        nonce: c.nonce().to_vec(),
        keylen: c.keylen() as u32,
    });
    let header = FileHeader::from_config(cfg, crypto_hdr);
    let mut hdr_mac = match crypto {
        Some(c) => Some(ChunkMac::new_hmac(cfg.cksum, c)?),
        None => None,
    };
    encode::write_header(out, &header, hdr_mac.as_mut())?;
    Ok(())
}

fn finish_stats(cfg: &PipelineConfig, stats: &Stats) {
    if cfg.show_cmp_stats {
        stats.display(cfg.chunksize);
    }
    if cfg.show_mem_stats {
        show_mem_stats(cfg);
    }
}

/// Decompress `filename` into `to_filename` (or stdin to stdout in pipe
/// mode). Most of the configuration comes from the archive header; the CLI
/// config contributes thread count, password source and stats flags.
pub fn start_decompress(
    cli_cfg: PipelineConfig,
    filename: Option<&Path>,
    to_filename: Option<&Path>,
) -> Result<(), PcError> {
    let pipe = cli_cfg.pipe_mode || filename.is_none();

    if pipe {
        let stdin = std::io::stdin();
        let mut reader = stdin.lock();
        let mut out = std::io::stdout();
        let (cfg, crypto) = read_and_verify_header(&cli_cfg, &mut reader, true)?;
        let cfg = Arc::new(cfg);
        let out_files = (0..cfg.nthreads).map(|_| None).collect();
        let stats = decompress_stream(Arc::clone(&cfg), &mut reader, &mut out, crypto, out_files)?;
        out.flush()?;
        finish_stats(&cfg, &stats);
        return Ok(());
    }

    let filename = filename.unwrap();
    let to_filename =
        to_filename.ok_or_else(|| PcError::Config("target file name required".to_string()))?;

    let mut input = File::open(filename)?;
    let src_meta = input.metadata()?;
    if src_meta.len() == 0 {
        return Err(PcError::Config(format!(
            "file {} is empty",
            filename.display()
        )));
    }

    // Header verification happens before the target file is created, so a
    // tampered archive or wrong password writes no plaintext at all.
    let (cfg, crypto) = read_and_verify_header(&cli_cfg, &mut input, false)?;
    let cfg = Arc::new(cfg);

    let mut out = File::create(to_filename)?;
    let out_files: Vec<Option<File>> = if cfg.dedup == DedupMode::Global {
        (0..cfg.nthreads)
            .map(|_| File::open(to_filename).map(Some))
            .collect::<Result<_, _>>()?
    } else {
        (0..cfg.nthreads).map(|_| None).collect()
    };

    let stats = decompress_stream(Arc::clone(&cfg), &mut input, &mut out, crypto, out_files)?;
    out.flush()?;

    // Ownership and mode of the target should match the original archive.
    out.set_permissions(src_meta.permissions())?;
    if let Err(e) = std::os::unix::fs::chown(to_filename, Some(src_meta.uid()), Some(src_meta.gid()))
    {
        warn!("chown: {}", e);
    }

    finish_stats(&cfg, &stats);
    Ok(())
}

/// Parse the file header, derive the runtime config from it and verify the
/// header authenticator (HMAC with the password-derived key under crypto,
/// CRC32 otherwise).
fn read_and_verify_header<R: Read>(
    cli_cfg: &PipelineConfig,
    reader: &mut R,
    pipe: bool,
) -> Result<(PipelineConfig, Option<Arc<CryptoCtx>>), PcError> {
    let raw = read_header(reader)?;

    let mut cfg = cli_cfg.clone();
    cfg.pipe_mode = pipe;
    cfg.codec = raw.header.codec;
    cfg.level = raw.header.level;
    cfg.chunksize = raw.header.chunksize;
    cfg.cksum = raw.cksum;
    cfg.dedup = raw.header.dedup_mode()?;
    cfg.single_chunk = raw.header.single_chunk();
    cfg.encrypt = raw.header.crypto_alg()?;
    cfg.finish();

    if cfg.dedup == DedupMode::Global && pipe {
        return Err(PcError::Config(
            "global deduplication is not supported with pipe mode".to_string(),
        ));
    }
    if !cfg.codec.is_available() {
        return Err(PcError::Config(format!(
            "{} is not built into this configuration",
            cfg.codec.tag()
        )));
    }

    cfg.resolve_threads(None);
    if cfg.single_chunk {
        cfg.nthreads = 1;
    }

    let crypto = match &raw.header.crypto {
        Some(ch) => {
            let pw = password::get_password(
                cfg.pwd_file.as_deref(),
                "Please enter decryption password",
            )?;
            cfg.keylen = ch.keylen as usize;
            let ctx = CryptoCtx::new_decrypt(
                ch.alg,
                &pw,
                ch.keylen as usize,
                ch.salt.clone(),
                ch.nonce.clone(),
            )?;
            let mut mac = ChunkMac::new_hmac(cfg.cksum, &ctx)?;
            verify_header_hmac(&raw, &mut mac)?;
            Some(Arc::new(ctx))
        }
        None => {
            verify_header_crc(&raw)?;
            None
        }
    };

    Ok((cfg, crypto))
}
