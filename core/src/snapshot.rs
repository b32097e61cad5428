//! Save-state snapshot blobs
//!
//! A snapshot is the emulation core's serialized state, compressed with a
//! [`StreamCodec`] and wrapped in a small versioned header:
//!
//! ```text
//! offset  size  field
//!      0     4  magic "EBSS"
//!      4     4  format version (u32 LE)
//!      8     1  codec id
//!      9     3  reserved (zero)
//!     12     8  uncompressed length (u64 LE)
//!     20     8  xxh3-64 of the uncompressed state (u64 LE)
//!     28     4  payload length (u32 LE)
//!     32     n  compressed payload
//! ```
//!
//! Decoding validates everything before handing bytes back, so a caller can
//! rely on "decode succeeded" meaning "this is exactly what was captured".

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::{CodecError, CodecId, Lz4Codec, StreamCodec, codec_for};
use crate::emulator::CoreFault;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"EBSS";
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const SNAPSHOT_HEADER_LEN: usize = 32;

/// Default cap on uncompressed state (16MB)
pub const MAX_STATE_SIZE: usize = 16 * 1024 * 1024;

/// Error decoding or applying a snapshot
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("not a snapshot (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("unsupported snapshot codec id {0}")]
    UnsupportedCodec(u8),

    #[error("snapshot state of {size} bytes exceeds limit of {max}")]
    TooLarge { size: u64, max: usize },

    #[error("snapshot truncated")]
    Truncated,

    #[error("snapshot has {0} trailing bytes")]
    TrailingData(usize),

    #[error("decompressed length {actual} does not match stored length {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("snapshot checksum mismatch (stored {expected:#018x}, computed {actual:#018x})")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("snapshot payload corrupt: {0}")]
    Corrupt(#[from] CodecError),

    #[error("core rejected snapshot state: {0}")]
    Rejected(CoreFault),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    /// Damaged data, as opposed to a well-formed blob we cannot use
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::BadMagic
                | Self::Truncated
                | Self::TrailingData(_)
                | Self::LengthMismatch { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Corrupt(_)
        )
    }

    /// Blob written by a format or codec this build does not understand
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. } | Self::UnsupportedCodec(_)
        )
    }
}

fn map_eof(e: io::Error) -> SnapshotError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SnapshotError::Truncated
    } else {
        SnapshotError::Io(e)
    }
}

/// Point-in-time serialization of the emulation core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBlob {
    pub format_version: u32,
    pub codec: CodecId,
    pub uncompressed_len: u64,
    pub checksum: u64,
    pub payload: Vec<u8>,
}

impl SnapshotBlob {
    /// Size of the compressed payload
    pub fn compressed_len(&self) -> usize {
        self.payload.len()
    }

    /// Serialized size including header
    pub fn encoded_len(&self) -> usize {
        SNAPSHOT_HEADER_LEN + self.payload.len()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let payload_len = u32::try_from(self.payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "snapshot payload over 4GB"))?;
        writer.write_all(&SNAPSHOT_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.format_version)?;
        writer.write_u8(self.codec as u8)?;
        writer.write_all(&[0u8; 3])?;
        writer.write_u64::<LittleEndian>(self.uncompressed_len)?;
        writer.write_u64::<LittleEndian>(self.checksum)?;
        writer.write_u32::<LittleEndian>(payload_len)?;
        writer.write_all(&self.payload)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Parse one blob from a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(map_eof)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        let format_version = reader.read_u32::<LittleEndian>().map_err(map_eof)?;
        if format_version != SNAPSHOT_FORMAT_VERSION {
            // Later versions may lay the header out differently; stop here
            return Err(SnapshotError::UnsupportedVersion {
                found: format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let codec_byte = reader.read_u8().map_err(map_eof)?;
        let codec = CodecId::from_u8(codec_byte).ok_or(SnapshotError::UnsupportedCodec(codec_byte))?;

        let mut reserved = [0u8; 3];
        reader.read_exact(&mut reserved).map_err(map_eof)?;

        let uncompressed_len = reader.read_u64::<LittleEndian>().map_err(map_eof)?;
        let checksum = reader.read_u64::<LittleEndian>().map_err(map_eof)?;
        let payload_len = reader.read_u32::<LittleEndian>().map_err(map_eof)? as usize;

        // Read through `take` so a corrupt length cannot force a huge allocation
        let mut payload = Vec::new();
        reader
            .take(payload_len as u64)
            .read_to_end(&mut payload)
            .map_err(map_eof)?;
        if payload.len() != payload_len {
            return Err(SnapshotError::Truncated);
        }

        Ok(Self {
            format_version,
            codec,
            uncompressed_len,
            checksum,
            payload,
        })
    }

    /// Parse a blob that must occupy `bytes` exactly
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut cursor = io::Cursor::new(bytes);
        let blob = Self::read_from(&mut cursor)?;
        let trailing = bytes.len() - cursor.position() as usize;
        if trailing != 0 {
            return Err(SnapshotError::TrailingData(trailing));
        }
        Ok(blob)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let bytes = {
            let mut reader = BufReader::new(File::open(path)?);
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            bytes
        };
        Self::from_bytes(&bytes)
    }
}

/// Encodes core state into blobs and validates blobs back into state
pub struct SnapshotCodec<K: StreamCodec = Lz4Codec> {
    codec: K,
    max_state_size: usize,
}

impl SnapshotCodec<Lz4Codec> {
    pub fn new(max_state_size: usize) -> Self {
        Self::with_codec(Lz4Codec, max_state_size)
    }
}

impl Default for SnapshotCodec<Lz4Codec> {
    fn default() -> Self {
        Self::new(MAX_STATE_SIZE)
    }
}

impl<K: StreamCodec> SnapshotCodec<K> {
    pub fn with_codec(codec: K, max_state_size: usize) -> Self {
        Self {
            codec,
            max_state_size,
        }
    }

    pub fn max_state_size(&self) -> usize {
        self.max_state_size
    }

    /// Compress serialized core state into a tagged blob
    pub fn encode(&self, state: &[u8]) -> Result<SnapshotBlob, SnapshotError> {
        if state.len() > self.max_state_size {
            return Err(SnapshotError::TooLarge {
                size: state.len() as u64,
                max: self.max_state_size,
            });
        }
        Ok(SnapshotBlob {
            format_version: SNAPSHOT_FORMAT_VERSION,
            codec: self.codec.id(),
            uncompressed_len: state.len() as u64,
            checksum: xxh3_64(state),
            payload: self.codec.compress(state),
        })
    }

    /// Validate and decompress a blob
    ///
    /// Accepts blobs from any known codec, not only the one this instance
    /// encodes with.
    pub fn decode(&self, blob: &SnapshotBlob) -> Result<Vec<u8>, SnapshotError> {
        if blob.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: blob.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        if blob.uncompressed_len > self.max_state_size as u64 {
            return Err(SnapshotError::TooLarge {
                size: blob.uncompressed_len,
                max: self.max_state_size,
            });
        }

        let expected = blob.uncompressed_len as usize;
        let state = if blob.codec == self.codec.id() {
            self.codec.decompress(&blob.payload, expected)?
        } else {
            codec_for(blob.codec).decompress(&blob.payload, expected)?
        };

        if state.len() as u64 != blob.uncompressed_len {
            return Err(SnapshotError::LengthMismatch {
                expected: blob.uncompressed_len,
                actual: state.len() as u64,
            });
        }

        let actual = xxh3_64(&state);
        if actual != blob.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                expected: blob.checksum,
                actual,
            });
        }
        Ok(state)
    }
}
