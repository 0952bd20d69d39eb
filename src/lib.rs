//! pcompress
//!
//! Chunked parallel multi-algorithm lossless compression and decompression.
//! An input stream is split into large fixed-size chunks, each chunk runs
//! through an independent worker pipeline (dedup, preprocessing, backend
//! compression, encryption, authentication) and the results are written as
//! a framed container in strict input order.

#![forbid(unsafe_code)]

// Shared and top level
pub mod constants;
pub mod types;
pub mod utils;

pub mod checksum;
pub mod config;

// Transform stages
pub mod codec;
pub mod crypto;
pub mod dedup;
pub mod preproc;

// Container and the parallel pipeline
pub mod container;
pub mod pipeline;

pub use config::{DedupMode, PipelineConfig};
pub use pipeline::controller::{start_compress, start_decompress};
pub use types::PcError;
