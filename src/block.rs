//! Block identifiers and on-disk framing.
//!
//! Every block is laid out as
//!
//! ```text
//! u32 length | u16 class_id | u8 major | u8 minor | u16 data_id | payload[length] | u32 crc
//! ```
//!
//! `length` counts the payload only.  All integers are little-endian.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

use crate::crc::Crc32;

/// Size of the packed identifier.
pub const BLOCK_ID_SIZE: usize = 6;
/// Length field plus identifier.
pub const FRAME_HEADER_SIZE: usize = 4 + BLOCK_ID_SIZE;
/// Trailing checksum.
pub const CRC_SIZE: usize = 4;
/// Framing bytes around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + CRC_SIZE;

pub const SYSTEM_CLASS_RANGE:     std::ops::RangeInclusive<u16> = 1..=1024;
pub const CONTROLLER_CLASS_RANGE: std::ops::RangeInclusive<u16> = 1025..=2048;
pub const SENSOR_CLASS_RANGE:     std::ops::RangeInclusive<u16> = 2049..=65534;

/// Which reserved range a class ID falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// `0` and `65535`.
    Reserved,
    System,
    Controller,
    Sensor,
}

impl ClassKind {
    pub fn of(class_id: u16) -> Self {
        if SYSTEM_CLASS_RANGE.contains(&class_id) {
            ClassKind::System
        } else if CONTROLLER_CLASS_RANGE.contains(&class_id) {
            ClassKind::Controller
        } else if SENSOR_CLASS_RANGE.contains(&class_id) {
            ClassKind::Sensor
        } else {
            ClassKind::Reserved
        }
    }
}

// ── BlockId ───────────────────────────────────────────────────────────────────

/// Packed 48-bit block tag.  Ordering compares class, major, minor, then
/// data ID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    class_id:      u16,
    major_version: u8,
    minor_version: u8,
    data_id:       u16,
}

impl BlockId {
    pub const fn new(class_id: u16, major_version: u8, minor_version: u8, data_id: u16) -> Self {
        Self { class_id, major_version, minor_version, data_id }
    }

    #[inline] pub fn class_id(&self) -> u16 { self.class_id }
    #[inline] pub fn major_version(&self) -> u8 { self.major_version }
    #[inline] pub fn minor_version(&self) -> u8 { self.minor_version }
    #[inline] pub fn data_id(&self) -> u16 { self.data_id }

    pub fn set_class_id(&mut self, class_id: u16) { self.class_id = class_id; }
    pub fn set_major_version(&mut self, major: u8) { self.major_version = major; }
    pub fn set_minor_version(&mut self, minor: u8) { self.minor_version = minor; }
    pub fn set_data_id(&mut self, data_id: u16) { self.data_id = data_id; }

    pub fn set_version(&mut self, major: u8, minor: u8) {
        self.major_version = major;
        self.minor_version = minor;
    }

    pub fn class_kind(&self) -> ClassKind {
        ClassKind::of(self.class_id)
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_ID_SIZE] {
        let mut out = [0u8; BLOCK_ID_SIZE];
        LittleEndian::write_u16(&mut out[0..2], self.class_id);
        out[2] = self.major_version;
        out[3] = self.minor_version;
        LittleEndian::write_u16(&mut out[4..6], self.data_id);
        out
    }

    pub fn from_bytes(bytes: &[u8; BLOCK_ID_SIZE]) -> Self {
        Self {
            class_id:      LittleEndian::read_u16(&bytes[0..2]),
            major_version: bytes[2],
            minor_version: bytes[3],
            data_id:       LittleEndian::read_u16(&bytes[4..6]),
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}:{}",
            self.class_id, self.major_version, self.minor_version, self.data_id
        )
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub id:     BlockId,
}

impl FrameHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.length)?;
        writer.write_all(&self.id.to_bytes())?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let length = reader.read_u32::<LittleEndian>()?;
        let mut id = [0u8; BLOCK_ID_SIZE];
        reader.read_exact(&mut id)?;
        Ok(Self { length, id: BlockId::from_bytes(&id) })
    }

    /// Bytes the whole frame occupies on disk, as declared by `length`.
    pub fn frame_size(&self) -> u64 {
        FRAME_OVERHEAD as u64 + self.length as u64
    }

    /// Decode from the first [`FRAME_HEADER_SIZE`] bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = bytes.get(..FRAME_HEADER_SIZE)?;
        let mut id = [0u8; BLOCK_ID_SIZE];
        id.copy_from_slice(&raw[4..]);
        Some(Self {
            length: LittleEndian::read_u32(&raw[..4]),
            id:     BlockId::from_bytes(&id),
        })
    }
}

/// Encode one complete frame into a single buffer.
pub fn encode_frame(id: &BlockId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&id.to_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&Crc32::of_block(id, payload).to_le_bytes());
    out
}

// ── Frame decoding ────────────────────────────────────────────────────────────

/// A block exactly as read from the stream, checksum not yet verified.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub header:  FrameHeader,
    pub payload: Vec<u8>,
    pub crc:     u32,
}

impl RawBlock {
    #[inline]
    pub fn expected_crc(&self) -> u32 {
        Crc32::of_block(&self.header.id, &self.payload)
    }

    #[inline]
    pub fn crc_ok(&self) -> bool {
        self.expected_crc() == self.crc
    }

    /// Bytes this frame occupied on disk.
    pub fn wire_size(&self) -> u64 {
        (FRAME_OVERHEAD + self.payload.len()) as u64
    }
}

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum Frame {
    /// EOF before the first byte of a new frame.
    End,
    Block(RawBlock),
    /// EOF part way through a frame.  `header` is present when the length
    /// and identifier were read in full.
    Truncated { header: Option<FrameHeader>, field: &'static str },
}

/// Read until `buf` is full or EOF; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Outcome of reading the length and identifier of the next frame.
#[derive(Debug)]
pub enum FrameStart {
    /// EOF before the first byte of a new frame.
    End,
    Header(FrameHeader),
    /// EOF inside the named field.
    Truncated(&'static str),
}

pub fn read_frame_header<R: Read>(reader: &mut R) -> io::Result<FrameStart> {
    let mut head = [0u8; FRAME_HEADER_SIZE];
    let got = read_full(reader, &mut head)?;
    if got == 0 {
        return Ok(FrameStart::End);
    }
    if got < 4 {
        return Ok(FrameStart::Truncated("length"));
    }
    if got < FRAME_HEADER_SIZE {
        return Ok(FrameStart::Truncated("identifier"));
    }
    Ok(FrameStart::Header(FrameHeader::read(&head[..])?))
}

/// Read the payload and CRC that follow `header`.  Never returns
/// [`Frame::End`].
pub fn read_frame_body<R: Read>(reader: &mut R, header: FrameHeader) -> io::Result<Frame> {
    // `take` caps the read at what the stream actually holds instead of
    // preallocating a corrupted length.
    let mut payload = Vec::new();
    reader.by_ref().take(header.length as u64).read_to_end(&mut payload)?;
    if payload.len() < header.length as usize {
        return Ok(Frame::Truncated { header: Some(header), field: "payload" });
    }

    let mut crc = [0u8; CRC_SIZE];
    if read_full(reader, &mut crc)? < CRC_SIZE {
        return Ok(Frame::Truncated { header: Some(header), field: "crc" });
    }

    Ok(Frame::Block(RawBlock { header, payload, crc: LittleEndian::read_u32(&crc) }))
}

pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    match read_frame_header(reader)? {
        FrameStart::End => Ok(Frame::End),
        FrameStart::Truncated(field) => Ok(Frame::Truncated { header: None, field }),
        FrameStart::Header(header) => read_frame_body(reader, header),
    }
}

// ── System markers ────────────────────────────────────────────────────────────

/// Class of the zero-length structural markers every file may carry.
pub const SYSTEM_CLASS_ID: u16 = 1;
pub const SYSTEM_MAJOR_VERSION: u8 = 1;
pub const SYSTEM_MINOR_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SystemMarker {
    BeginHeader = 1,
    EndHeader   = 2,
    BeginData   = 3,
    EndData     = 4,
}

impl SystemMarker {
    pub const ALL: [SystemMarker; 4] = [
        SystemMarker::BeginHeader,
        SystemMarker::EndHeader,
        SystemMarker::BeginData,
        SystemMarker::EndData,
    ];

    pub fn id(self) -> BlockId {
        BlockId::new(SYSTEM_CLASS_ID, SYSTEM_MAJOR_VERSION, SYSTEM_MINOR_VERSION, self as u16)
    }

    pub fn from_id(id: &BlockId) -> Option<Self> {
        if id.class_id() != SYSTEM_CLASS_ID {
            return None;
        }
        Self::ALL.into_iter().find(|m| *m as u16 == id.data_id())
    }
}
