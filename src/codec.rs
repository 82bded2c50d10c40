//! Cold-Tier Envelope Codec
//!
//! Values bound for Tier 2/3 are serialized to JSON and wrapped in a small
//! binary envelope carrying the compression algorithm and the entry's
//! timestamps, so the cold tiers can enforce expiry without deserializing
//! the payload:
//!
//! ```text
//! [magic u8][version u8][algorithm u8][created_at u64 LE][expires_at u64 LE][payload]
//! ```
//!
//! Compression is LZ4 block mode. Small payloads are stored uncompressed,
//! and a failed or unprofitable compression falls back to the raw bytes
//! rather than failing the write.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, Result};

const MAGIC: u8 = 0xC5;
const VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 1 + 8 + 8;

/// Compression applied to an envelope payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No compression
    None,
    /// LZ4 block compression
    Lz4,
}

impl Compression {
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lz4 => "lz4",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            other => Err(Error::CorruptPayload(format!(
                "unknown compression tag {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded cold-tier record
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Creation timestamp (epoch seconds)
    pub created_at: u64,
    /// Expiry timestamp (epoch seconds)
    pub expires_at: u64,
    /// The cached value
    pub value: Value,
}

impl Envelope {
    pub fn is_expired(&self) -> bool {
        crate::entry::epoch_secs() >= self.expires_at
    }
}

/// Codec configuration
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Compression for payloads at or above `min_compress_bytes`
    pub compression: Compression,
    /// Payloads smaller than this are never compressed
    pub min_compress_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
            min_compress_bytes: crate::MIN_COMPRESS_BYTES,
        }
    }
}

impl CodecConfig {
    /// Codec that never compresses (Tier 3)
    pub fn uncompressed() -> Self {
        Self {
            compression: Compression::None,
            min_compress_bytes: 0,
        }
    }
}

/// Serialize an envelope to wire bytes.
///
/// Compression is best-effort: on failure, or when the compressed form is
/// not smaller, the payload is stored uncompressed.
pub fn encode(envelope: &Envelope, config: &CodecConfig) -> Result<Bytes> {
    let raw = serde_json::to_vec(&envelope.value)?;

    let (payload, algorithm) = match config.compression {
        Compression::Lz4 if raw.len() >= config.min_compress_bytes => {
            match lz4::block::compress(&raw, None, true) {
                Ok(compressed) if compressed.len() < raw.len() => {
                    (compressed, Compression::Lz4)
                }
                Ok(_) => (raw, Compression::None),
                Err(e) => {
                    tracing::warn!(error = %e, "lz4 compression failed, storing uncompressed");
                    (raw, Compression::None)
                }
            }
        }
        _ => (raw, Compression::None),
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(MAGIC);
    out.push(VERSION);
    out.push(algorithm.tag());
    out.extend_from_slice(&envelope.created_at.to_le_bytes());
    out.extend_from_slice(&envelope.expires_at.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(Bytes::from(out))
}

/// Decode wire bytes back into an envelope
pub fn decode(data: &[u8]) -> Result<Envelope> {
    if data.len() < HEADER_LEN {
        return Err(Error::CorruptPayload(format!(
            "envelope too short: {} bytes",
            data.len()
        )));
    }
    if data[0] != MAGIC {
        return Err(Error::CorruptPayload("bad magic byte".into()));
    }
    if data[1] != VERSION {
        return Err(Error::CorruptPayload(format!(
            "unsupported envelope version {}",
            data[1]
        )));
    }

    let algorithm = Compression::from_tag(data[2])?;
    let created_at = u64::from_le_bytes(data[3..11].try_into().expect("sized slice"));
    let expires_at = u64::from_le_bytes(data[11..19].try_into().expect("sized slice"));
    let payload = &data[HEADER_LEN..];

    let raw = match algorithm {
        Compression::None => payload.to_vec(),
        Compression::Lz4 => {
            lz4::block::decompress(payload, None).map_err(|e| Error::DecompressionFailed {
                algorithm: "lz4".into(),
                reason: e.to_string(),
            })?
        }
    };

    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| Error::CorruptPayload(format!("payload is not valid JSON: {}", e)))?;

    Ok(Envelope {
        created_at,
        expires_at,
        value,
    })
}

/// Peek at the expiry timestamp without decoding the payload
pub fn peek_expires_at(data: &[u8]) -> Option<u64> {
    if data.len() < HEADER_LEN || data[0] != MAGIC || data[1] != VERSION {
        return None;
    }
    Some(u64::from_le_bytes(data[11..19].try_into().ok()?))
}

// =============================================================================
// Tests
// =============================================================================
