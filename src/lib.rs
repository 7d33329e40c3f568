//! Reader, writer and corruption-recovery engine for block data files.
//!
//! A block data file is an 8-byte magic and a byte order mark followed by
//! CRC-sealed blocks, each tagged with a [`BlockId`].  Payload parsers
//! register as [`BlockHandler`]s keyed by class ID and receive each payload
//! in a [`DataBuffer`].
//!
//! ```no_run
//! use blockdata::{BlockFileWriter, BlockFileReader, BlockId};
//!
//! let writer = BlockFileWriter::create("run.bdf")?;
//! writer.write_block(&BlockId::new(2049, 2, 3, 14), &[0, 1, 2, 3])?;
//! writer.finish()?;
//!
//! let mut reader: BlockFileReader = BlockFileReader::new();
//! reader.open("run.bdf")?;
//! while reader.process_block()? {}
//! # Ok::<(), blockdata::BlockFileError>(())
//! ```

pub mod block;
pub mod buffer;
pub mod crc;
pub mod error;
pub mod handler;
pub mod header;
pub mod io_stream;
pub mod recovery;
pub mod schema;

pub use block::{BlockId, ClassKind, SystemMarker};
pub use buffer::DataBuffer;
pub use crc::Crc32;
pub use error::{BlockFileError, CrcError, FormattingError};
pub use handler::BlockHandler;
pub use io_stream::{BlockFileReader, BlockFileWriter};
pub use recovery::{RecoveryOptions, RecoveryReader, RecoveryStats};
pub use schema::{ClassRule, LengthRule, SchemaValidator, Status, VersionRule};
