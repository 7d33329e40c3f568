//! Block file writer and reader.
//!
//! # Writer
//! [`BlockFileWriter`] writes the file header once and then appends framed,
//! CRC-sealed blocks.  Each block is encoded into one buffer and written
//! with a single `write_all` while the writer's lock is held, so blocks from
//! concurrent callers never interleave.  No ordering between callers is
//! promised beyond that.
//!
//! # Reader
//! [`BlockFileReader`] validates the header and then parses one block per
//! [`process_block`](BlockFileReader::process_block) call, verifying its CRC
//! and handing the payload to the handler registered for its class ID.  Any
//! error closes the reader; already dispatched blocks are unaffected.
//!
//! # Endianness
//! All binary I/O is little-endian.  Files announcing the opposite byte
//! order are rejected when opened.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::block::{encode_frame, read_frame, BlockId, Frame, SystemMarker};
use crate::buffer::DataBuffer;
use crate::error::{BlockFileError, CrcError, FormattingError, Result};
use crate::handler::{BlockHandler, Dispatcher};
use crate::header::{FileHeader, FILE_HEADER_SIZE};

// ── Writer ───────────────────────────────────────────────────────────────────

struct WriterState<W> {
    writer:         W,
    blocks_written: u64,
    bytes_written:  u64,
}

pub struct BlockFileWriter<W: Write> {
    state: Mutex<WriterState<W>>,
}

impl BlockFileWriter<BufWriter<File>> {
    /// Create or truncate `path` and write the file header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "created block file");
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> BlockFileWriter<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        FileHeader::default().write(&mut writer)?;
        Ok(Self {
            state: Mutex::new(WriterState {
                writer,
                blocks_written: 0,
                bytes_written:  FILE_HEADER_SIZE as u64,
            }),
        })
    }

    /// Write a zero-length block: `{0u32, id, crc(id)}`.
    pub fn write_empty_block(&self, id: &BlockId) -> Result<()> {
        self.write_frame(id, &[])
    }

    /// Write `payload` under `id`.  An empty payload produces a zero-length
    /// block.
    pub fn write_block(&self, id: &BlockId, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return self.write_empty_block(id);
        }
        if payload.len() > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block payload exceeds u32::MAX bytes",
            )
            .into());
        }
        self.write_frame(id, payload)
    }

    /// Write the written region of `buffer` as one block.
    pub fn write_buffer(&self, id: &BlockId, buffer: &DataBuffer) -> Result<()> {
        self.write_block(id, buffer.as_slice())
    }

    pub fn write_marker(&self, marker: SystemMarker) -> Result<()> {
        self.write_empty_block(&marker.id())
    }

    fn write_frame(&self, id: &BlockId, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(id, payload);
        let mut state = self.state.lock();
        state.writer.write_all(&frame)?;
        state.blocks_written += 1;
        state.bytes_written += frame.len() as u64;
        tracing::trace!(block = %id, len = payload.len(), "wrote block");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.state.lock().writer.flush()?;
        Ok(())
    }

    pub fn blocks_written(&self) -> u64 {
        self.state.lock().blocks_written
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Flush and hand back the underlying stream.
    pub fn finish(self) -> Result<W> {
        let mut state = self.state.into_inner();
        state.writer.flush()?;
        tracing::debug!(blocks = state.blocks_written, bytes = state.bytes_written, "closed block file");
        Ok(state.writer)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct BlockFileReader<R: Read = BufReader<File>> {
    stream:      Option<R>,
    position:    u64,
    blocks_read: u64,
    dispatcher:  Dispatcher,
}

impl<R: Read> Default for BlockFileReader<R> {
    fn default() -> Self {
        Self {
            stream:      None,
            position:    0,
            blocks_read: 0,
            dispatcher:  Dispatcher::new(),
        }
    }
}

impl BlockFileReader<BufReader<File>> {
    /// Open `path` and validate its header.  On failure the reader stays
    /// closed.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.close();
        let path = path.as_ref();
        let file = File::open(path)?;
        tracing::debug!(path = %path.display(), "opening block file");
        self.open_stream(BufReader::new(file))
    }
}

impl<R: Read> BlockFileReader<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `stream` and validate its header.
    pub fn open_stream(&mut self, mut stream: R) -> Result<()> {
        self.close();
        FileHeader::read(&mut stream)?;
        self.stream = Some(stream);
        self.position = FILE_HEADER_SIZE as u64;
        self.blocks_read = 0;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    /// Byte offset of the next frame.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn attach<H: BlockHandler + 'static>(&mut self, handler: H) {
        self.dispatcher.attach(handler);
    }

    pub fn detach(&mut self, class_id: u16) -> Option<Box<dyn BlockHandler>> {
        self.dispatcher.detach(class_id)
    }

    /// Hook for blocks whose class has no handler.
    pub fn on_unknown_class<F: FnMut(u16) + 'static>(&mut self, f: F) {
        self.dispatcher.set_unknown_class(f);
    }

    /// Read, verify and dispatch one block.
    ///
    /// Returns `Ok(false)` at a clean end of file.  EOF inside a frame is a
    /// [`FormattingError::TruncatedFrame`]; a checksum mismatch is a
    /// [`CrcError`].  Either closes the reader.
    pub fn process_block(&mut self) -> Result<bool> {
        let result = self.next_block();
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Process blocks until end of file; returns the number dispatched.
    pub fn process_all(&mut self) -> Result<u64> {
        let start = self.blocks_read;
        while self.process_block()? {}
        Ok(self.blocks_read - start)
    }

    fn next_block(&mut self) -> Result<bool> {
        let stream = self.stream.as_mut().ok_or(BlockFileError::NotOpen)?;
        let raw = match read_frame(stream)? {
            Frame::End => return Ok(false),
            Frame::Truncated { field, .. } => {
                return Err(FormattingError::TruncatedFrame { offset: self.position, field }.into());
            }
            Frame::Block(raw) => raw,
        };

        if !raw.crc_ok() {
            let err = CrcError::for_block(&raw, self.position);
            tracing::warn!(%err, "block failed CRC check");
            return Err(err.into());
        }

        self.position += raw.wire_size();
        self.blocks_read += 1;
        self.dispatcher.dispatch(&raw.header.id, raw.payload);
        Ok(true)
    }
}
