//! Recovering block reader.
//!
//! [`RecoveryReader`] reads exactly like [`BlockFileReader`] until a block
//! fails its CRC check (or runs past end of file).  It then loads a bounded
//! window of bytes starting at the failed frame and asks the schema whether
//! the identifier it read is plausible:
//!
//! | Diagnosis | Repair tried |
//! |-----------|--------------|
//! | class, version or data ID rejected | identifier repair |
//! | length rejected | identifier repair, then the boundary repairs |
//! | identifier accepted | splice search, then length repair |
//!
//! A successful repair dispatches every block it recovered (the original
//! first) and leaves the stream positioned after the last CRC word the
//! repair used.  When every hypothesis fails the original error is returned
//! and the reader is closed; there is no skip-ahead resynchronization.
//!
//! Frames declaring more than `max_window` bytes are never buffered before
//! their CRC is known: a length running past end of stream goes straight to
//! recovery, and an in-stream payload is verified in fixed-size chunks first.
//!
//! [`BlockFileReader`]: crate::io_stream::BlockFileReader

mod search;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::block::{
    read_frame_body, read_frame_header, BlockId, Frame, FrameHeader, FrameStart, RawBlock,
    FRAME_HEADER_SIZE,
};
use crate::crc::Crc32;
use crate::error::{BlockFileError, CrcError, FormattingError, Result};
use crate::handler::{BlockHandler, Dispatcher};
use crate::header::{FileHeader, FILE_HEADER_SIZE};
use crate::schema::{SchemaValidator, Status};

use search::{Repair, RepairKind, Window};

/// Default upper bound on the bytes loaded for one recovery attempt.
pub const DEFAULT_MAX_WINDOW: usize = 16 * 1024 * 1024;

// ── RecoveryOptions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryOptions {
    /// Re-read a schema-invalid identifier at shifted offsets.
    pub field_recovery:    bool,
    /// Search for a neighboring block interleaved with the failed one.
    pub boundary_recovery: bool,
    /// Search for the real payload length when the length field is wrong.
    pub length_repair:     bool,
    /// Bytes loaded from the failed frame onward; no hypothesis looks
    /// further.
    pub max_window:        usize,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            field_recovery:    true,
            boundary_recovery: true,
            length_repair:     true,
            max_window:        DEFAULT_MAX_WINDOW,
        }
    }
}

// ── RecoveryStats ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Blocks dispatched, recovered ones included.
    pub blocks_read:      u64,
    pub field_repairs:    u64,
    pub boundary_repairs: u64,
    pub length_repairs:   u64,
    /// Blocks delivered by any repair.
    pub recovered_blocks: u64,
    /// Stray bytes dropped by identifier repairs.
    pub bytes_discarded:  u64,
    /// Failures no hypothesis could explain.
    pub failed_repairs:   u64,
}

// ── RecoveryReader ────────────────────────────────────────────────────────────

pub struct RecoveryReader<R: Read + Seek = BufReader<File>> {
    stream:     Option<R>,
    position:   u64,
    dispatcher: Dispatcher,
    schema:     &'static SchemaValidator,
    options:    RecoveryOptions,
    stats:      RecoveryStats,
}

impl<R: Read + Seek> Default for RecoveryReader<R> {
    fn default() -> Self {
        Self::with_options(RecoveryOptions::default())
    }
}

impl RecoveryReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.close();
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::debug!(path = %path.display(), "opening block file with recovery");
        self.open_stream(BufReader::new(file))
    }
}

impl<R: Read + Seek> RecoveryReader<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RecoveryOptions) -> Self {
        Self {
            stream:     None,
            position:   0,
            dispatcher: Dispatcher::new(),
            schema:     SchemaValidator::global(),
            options,
            stats:      RecoveryStats::default(),
        }
    }

    /// Validate against `schema` instead of the process-wide table.
    pub fn with_schema(mut self, schema: &'static SchemaValidator) -> Self {
        self.schema = schema;
        self
    }

    pub fn open_stream(&mut self, mut stream: R) -> Result<()> {
        self.close();
        FileHeader::read(&mut stream)?;
        self.stream = Some(stream);
        self.position = FILE_HEADER_SIZE as u64;
        self.stats = RecoveryStats::default();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn options(&self) -> &RecoveryOptions {
        &self.options
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    pub fn attach<H: BlockHandler + 'static>(&mut self, handler: H) {
        self.dispatcher.attach(handler);
    }

    pub fn detach(&mut self, class_id: u16) -> Option<Box<dyn BlockHandler>> {
        self.dispatcher.detach(class_id)
    }

    pub fn on_unknown_class<F: FnMut(u16) + 'static>(&mut self, f: F) {
        self.dispatcher.set_unknown_class(f);
    }

    /// Called for every resolved zero-length block.
    pub fn on_empty_block<F: FnMut(&BlockId) + 'static>(&mut self, f: F) {
        self.dispatcher.set_on_empty_block(f);
    }

    /// Called for every resolved block with a payload.
    pub fn on_data_block<F: FnMut(&BlockId, &[u8]) + 'static>(&mut self, f: F) {
        self.dispatcher.set_on_data_block(f);
    }

    /// Read and dispatch the next block, repairing the stream if needed.
    ///
    /// Returns `Ok(false)` at a clean end of file.  Any error closes the
    /// reader.
    pub fn process_block(&mut self) -> Result<bool> {
        let result = self.next_block();
        if result.is_err() {
            self.close();
        }
        result
    }

    pub fn process_all(&mut self) -> Result<u64> {
        let start = self.stats.blocks_read;
        while self.process_block()? {}
        Ok(self.stats.blocks_read - start)
    }

    fn next_block(&mut self) -> Result<bool> {
        let max_window = self.options.max_window as u64;
        let stream = self.stream.as_mut().ok_or(BlockFileError::NotOpen)?;
        let start = self.position;

        let header = match read_frame_header(stream)? {
            FrameStart::End => return Ok(false),
            FrameStart::Header(header) => header,
            FrameStart::Truncated(field) => {
                return Err(FormattingError::TruncatedFrame { offset: start, field }.into());
            }
        };
        let checked = if header.frame_size() > max_window {
            check_oversized(stream, start, header)?
        } else {
            check_frame(stream, start, header)?
        };

        let error = match checked {
            Ok(raw) => {
                self.position += raw.wire_size();
                self.stats.blocks_read += 1;
                self.dispatcher.dispatch(&raw.header.id, raw.payload);
                return Ok(true);
            }
            Err(error) => error,
        };
        tracing::warn!(%error, block = %header.id, "damaged block, attempting recovery");

        match self.recover(start, header)? {
            Some(repair) => {
                self.apply(start, repair)?;
                Ok(true)
            }
            None => {
                self.stats.failed_repairs += 1;
                tracing::warn!(offset = start, block = %header.id, "recovery exhausted");
                Err(error)
            }
        }
    }

    /// Diagnose the failed frame at `start` and run the matching repairs.
    fn recover(&mut self, start: u64, header: FrameHeader) -> Result<Option<Repair>> {
        let stream = self.stream.as_mut().ok_or(BlockFileError::NotOpen)?;
        stream.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::new();
        stream.by_ref().take(self.options.max_window as u64).read_to_end(&mut bytes)?;
        let at_eof = bytes.len() < self.options.max_window;
        let window = Window::new(&bytes);

        let status = self.schema.check(&header.id, header.length);
        tracing::debug!(offset = start, block = %header.id, ?status, window = bytes.len(), "diagnosed failed block");

        if !status.is_ok() && self.options.field_recovery {
            if let Some(repair) = search::repair_identifier(window, self.schema, header, status) {
                return Ok(Some(repair));
            }
        }
        if matches!(status, Status::Ok | Status::BadPayloadLength) && self.options.boundary_recovery {
            if let Some(repair) = search::splice_search(window, self.schema, header) {
                return Ok(Some(repair));
            }
            if self.options.length_repair {
                if let Some(repair) = search::repair_length(window, self.schema, header, at_eof) {
                    return Ok(Some(repair));
                }
            }
        }
        Ok(None)
    }

    fn apply(&mut self, start: u64, repair: Repair) -> Result<()> {
        let end = start + repair.consumed as u64;
        let stream = self.stream.as_mut().ok_or(BlockFileError::NotOpen)?;
        stream.seek(SeekFrom::Start(end))?;
        self.position = end;

        match repair.kind {
            RepairKind::Identifier => self.stats.field_repairs += 1,
            RepairKind::Splice     => self.stats.boundary_repairs += 1,
            RepairKind::Length     => self.stats.length_repairs += 1,
        }
        self.stats.bytes_discarded += repair.discarded as u64;
        self.stats.recovered_blocks += repair.blocks.len() as u64;
        tracing::info!(
            offset = start,
            kind = ?repair.kind,
            blocks = repair.blocks.len(),
            resume = end,
            "recovered damaged blocks"
        );

        for (id, payload) in repair.blocks {
            self.stats.blocks_read += 1;
            self.dispatcher.dispatch(&id, payload);
        }
        Ok(())
    }
}

/// Chunk size used to verify frames larger than the recovery window.
const SCAN_CHUNK: usize = 64 * 1024;

/// A CRC-clean block, or the error describing why the frame needs recovery.
type Checked = std::result::Result<RawBlock, BlockFileError>;

/// Read the rest of the frame after `header` into memory.
fn check_frame<R: Read>(stream: &mut R, start: u64, header: FrameHeader) -> io::Result<Checked> {
    Ok(match read_frame_body(stream, header)? {
        Frame::Block(raw) if raw.crc_ok() => Ok(raw),
        Frame::Block(raw) => Err(CrcError::for_block(&raw, start).into()),
        Frame::Truncated { field, .. } => Err(FormattingError::TruncatedFrame { offset: start, field }.into()),
        Frame::End => Err(FormattingError::TruncatedFrame { offset: start, field: "payload" }.into()),
    })
}

/// Check a frame that declares more bytes than the recovery window.
///
/// A length that runs past end of stream is reported as truncated without
/// reading the payload.  Otherwise the payload is hashed in chunks and only
/// loaded into memory once its CRC matches, so a corrupted length never
/// costs more than [`SCAN_CHUNK`] bytes of buffer.
fn check_oversized<R: Read + Seek>(stream: &mut R, start: u64, header: FrameHeader) -> io::Result<Checked> {
    let body = start + FRAME_HEADER_SIZE as u64;
    let end = stream.seek(SeekFrom::End(0))?;
    if start + header.frame_size() > end {
        let field = if body + header.length as u64 > end { "payload" } else { "crc" };
        return Ok(Err(FormattingError::TruncatedFrame { offset: start, field }.into()));
    }

    stream.seek(SeekFrom::Start(body))?;
    let mut hasher = Crc32::seeded(&header.id);
    let mut left = header.length as usize;
    let mut chunk = vec![0u8; left.min(SCAN_CHUNK)];
    while left > 0 {
        let n = left.min(chunk.len());
        stream.read_exact(&mut chunk[..n])?;
        hasher.update(&chunk[..n]);
        left -= n;
    }
    let found = stream.read_u32::<LittleEndian>()?;
    let expected = hasher.finalize();
    if expected != found {
        let err = CrcError { id: header.id, length: header.length, expected, found, offset: start };
        return Ok(Err(err.into()));
    }

    stream.seek(SeekFrom::Start(body))?;
    check_frame(stream, start, header)
}
