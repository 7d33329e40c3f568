use std::io;
use thiserror::Error;

use crate::block::{BlockId, RawBlock};

/// Structural problems with the byte stream itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormattingError {
    #[error("Invalid file magic {0:02x?}")]
    BadMagic([u8; 8]),
    #[error("Byte order mark {0:#06x} requires byte swapping, which is not supported")]
    UnsupportedByteOrder(u16),
    #[error("Unknown byte order mark {0:#06x}")]
    UnknownByteOrder(u16),
    #[error("Truncated file header")]
    TruncatedHeader,
    #[error("Block at offset {offset} ends inside its {field}")]
    TruncatedFrame { offset: u64, field: &'static str },
}

/// A block whose stored CRC does not match its identifier and payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "CRC mismatch at offset {offset}: class {} v{}.{} data {} length {length} \
     (expected {expected:#010x}, found {found:#010x})",
    .id.class_id(), .id.major_version(), .id.minor_version(), .id.data_id()
)]
pub struct CrcError {
    pub id:       BlockId,
    pub length:   u32,
    pub expected: u32,
    pub found:    u32,
    pub offset:   u64,
}

impl CrcError {
    pub fn for_block(raw: &RawBlock, offset: u64) -> Self {
        Self {
            id:       raw.header.id,
            length:   raw.header.length,
            expected: raw.expected_crc(),
            found:    raw.crc,
            offset,
        }
    }
}

#[derive(Error, Debug)]
pub enum BlockFileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Formatting error: {0}")]
    Formatting(#[from] FormattingError),
    #[error("{0}")]
    Crc(#[from] CrcError),
    #[error("Block file is not open")]
    NotOpen,
}

pub type Result<T> = std::result::Result<T, BlockFileError>;
