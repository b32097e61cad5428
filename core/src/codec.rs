//! Byte-stream compression codecs for snapshot payloads
//!
//! Codecs are opaque: the snapshot layer only needs compress/decompress and
//! a stable id to tag blobs with.

/// Codec identifier stored in the snapshot header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    /// Payload stored uncompressed
    Stored = 0,
    /// LZ4 block format
    Lz4 = 1,
}

impl CodecId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stored),
            1 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Malformed compressed input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed compressed data: {0}")]
    Malformed(String),
}

/// A generic byte-stream codec
pub trait StreamCodec: Send + Sync {
    fn id(&self) -> CodecId;

    fn compress(&self, input: &[u8]) -> Vec<u8>;

    /// Decompress `input`, which is expected to expand to `expected_len` bytes
    ///
    /// The returned buffer may still differ in length from `expected_len`;
    /// callers that need an exact size must check it.
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

/// LZ4 block compression (fast, modest ratio)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl StreamCodec for Lz4Codec {
    fn id(&self) -> CodecId {
        CodecId::Lz4
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        lz4_flex::compress(input)
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress(input, expected_len).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Identity codec
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredCodec;

impl StreamCodec for StoredCodec {
    fn id(&self) -> CodecId {
        CodecId::Stored
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }

    fn decompress(&self, input: &[u8], _expected_len: usize) -> Result<Vec<u8>, CodecError> {
        Ok(input.to_vec())
    }
}

/// Codec instance for a header id
pub fn codec_for(id: CodecId) -> &'static dyn StreamCodec {
    match id {
        CodecId::Stored => &StoredCodec,
        CodecId::Lz4 => &Lz4Codec,
    }
}
