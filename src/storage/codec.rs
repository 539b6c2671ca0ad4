//! Shard payload codec: none / gzip / lz4 / lzfse.
//!
//! `compress`/`decompress` are the only entry points other modules use.
//! Empty input is returned unchanged for every method, matching the
//! round-trip law `decompress(compress(x, m), m) == x` for all non-empty
//! `x` and all `m`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::NyaruError;

/// Compression method applied to a shard's on-disk payload and to
/// persisted B-tree indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    None,
    #[default]
    Gzip,
    Lzfse,
    Lz4,
}

pub fn compress(bytes: &[u8], method: CompressionMethod) -> Result<Vec<u8>, NyaruError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match method {
        CompressionMethod::None => Ok(bytes.to_vec()),
        CompressionMethod::Gzip => gzip_compress(bytes, method),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress_prepend_size(bytes)),
        CompressionMethod::Lzfse => lzfse_compress(bytes),
    }
}

pub fn decompress(bytes: &[u8], method: CompressionMethod) -> Result<Vec<u8>, NyaruError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match method {
        CompressionMethod::None => Ok(bytes.to_vec()),
        CompressionMethod::Gzip => gzip_decompress(bytes, method),
        CompressionMethod::Lz4 => {
            lz4_flex::decompress_size_prepended(bytes).map_err(|e| NyaruError::CodecError {
                method,
                source: e.to_string(),
            })
        }
        CompressionMethod::Lzfse => lzfse_decompress(bytes),
    }
}

/// `flate2` streams through an internal buffer, so arbitrarily large
/// payloads never need to fit in memory as a single contiguous read.
fn gzip_compress(bytes: &[u8], method: CompressionMethod) -> Result<Vec<u8>, NyaruError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| NyaruError::CodecError {
            method,
            source: e.to_string(),
        })?;
    encoder.finish().map_err(|e| NyaruError::CodecError {
        method,
        source: e.to_string(),
    })
}

fn gzip_decompress(bytes: &[u8], method: CompressionMethod) -> Result<Vec<u8>, NyaruError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| NyaruError::CodecError {
            method,
            source: e.to_string(),
        })?;
    Ok(out)
}

/// Apple's LZFSE, via the pure-Rust `lzfse` crate. Chosen because the
/// implementation this spec was distilled from targets Apple platforms and
/// reaches LZFSE through the system Compression framework; no repo in the
/// retrieval pack exercises it, so this one dependency is not pack-grounded
/// — see DESIGN.md.
fn lzfse_compress(bytes: &[u8]) -> Result<Vec<u8>, NyaruError> {
    Ok(lzfse::encode_buffer(bytes))
}

fn lzfse_decompress(bytes: &[u8]) -> Result<Vec<u8>, NyaruError> {
    lzfse::decode_buffer(bytes).map_err(|e| NyaruError::CodecError {
        method: CompressionMethod::Lzfse,
        source: format!("{:?}", e),
    })
}
