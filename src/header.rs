use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{BlockFileError, FormattingError};

pub const MAGIC: [u8; 8] = [137, 83, 80, 68, 82, 67, 77, 3];
/// Byte order mark as written by a little-endian producer.
pub const BYTE_ORDER_MARK: u16 = 0x55AA;
pub const FILE_HEADER_SIZE: usize = MAGIC.len() + 2;

/// Byte order announced by the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Same order as the reader; no swapping needed.
    Native,
    /// Produced on a machine of the opposite byte order.
    Swapped,
}

impl ByteOrder {
    pub fn from_mark(mark: u16) -> Option<Self> {
        match mark {
            BYTE_ORDER_MARK            => Some(ByteOrder::Native),
            m if m == BYTE_ORDER_MARK.swap_bytes() => Some(ByteOrder::Swapped),
            _                          => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic:      [u8; 8],
    pub byte_order: ByteOrder,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self { magic: MAGIC, byte_order: ByteOrder::Native }
    }
}

impl FileHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u16::<LittleEndian>(BYTE_ORDER_MARK)?;
        Ok(())
    }

    /// Read and validate the magic and byte order mark.
    ///
    /// Files whose mark asks for byte swapping are rejected: payload
    /// handlers decode little-endian only.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, BlockFileError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(truncated)?;
        if magic != MAGIC {
            return Err(FormattingError::BadMagic(magic).into());
        }
        let mark = reader.read_u16::<LittleEndian>().map_err(truncated)?;
        match ByteOrder::from_mark(mark) {
            Some(ByteOrder::Native)  => Ok(Self { magic, byte_order: ByteOrder::Native }),
            Some(ByteOrder::Swapped) => Err(FormattingError::UnsupportedByteOrder(mark).into()),
            None                     => Err(FormattingError::UnknownByteOrder(mark).into()),
        }
    }
}

fn truncated(e: io::Error) -> BlockFileError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FormattingError::TruncatedHeader.into()
    } else {
        e.into()
    }
}
