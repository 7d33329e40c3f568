//! Block checksum.
//!
//! The checksum is the standard reflected CRC-32 (polynomial `0xEDB88320`,
//! initial value `0xFFFFFFFF`, final complement) computed over the six raw
//! identifier bytes followed by the payload.  The length field is never
//! covered.  `crc32fast` owns the lookup tables; they are built once per
//! process and shared read-only.

use crc32fast::Hasher;

use crate::block::BlockId;

pub struct Crc32;

impl Crc32 {
    /// Checksum of `id` followed by `payload`, if any.
    pub fn compute(id: &BlockId, payload: Option<&[u8]>) -> u32 {
        let mut hasher = Self::seeded(id);
        if let Some(bytes) = payload {
            hasher.update(bytes);
        }
        hasher.finalize()
    }

    /// Checksum of a block as it is framed on disk: an empty payload
    /// contributes nothing.
    #[inline]
    pub fn of_block(id: &BlockId, payload: &[u8]) -> u32 {
        if payload.is_empty() {
            Self::compute(id, None)
        } else {
            Self::compute(id, Some(payload))
        }
    }

    /// A hasher that has already absorbed the identifier bytes.
    ///
    /// Cloning it lets the recovery search extend a payload one byte at a
    /// time without rehashing the prefix.
    pub fn seeded(id: &BlockId) -> Hasher {
        let mut hasher = Hasher::new();
        hasher.update(&id.to_bytes());
        hasher
    }
}
