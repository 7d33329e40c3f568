//! Byte buffer with independent read and write cursors.
//!
//! [`DataBuffer`] is the working storage every payload parser decodes from.
//! It never panics and never returns errors from individual reads or writes.
//! Instead two sticky flags record failure:
//!
//! - `underrun`: a read asked for more bytes than remain between the read
//!   and write cursors.
//! - `overrun`: a write asked for more bytes than remain between the write
//!   cursor and the capacity.
//!
//! Callers decode a batch of fields and then check the flags once.  Values
//! returned from a read that underran are unspecified (currently the type's
//! default) and must not be trusted.
//!
//! # Invariant
//! `read_pos <= write_pos <= capacity` holds after every operation.
//!
//! # Strings
//! Strings are stored as a `u16` little-endian length followed by the raw
//! bytes.  Input longer than [`MAX_STRING_LEN`] is truncated.  A string read
//! from a buffer with nothing left decodes as `""` without setting
//! `underrun`: older files omitted the length prefix for trailing empty
//! strings.

/// Longest string [`DataBuffer::put_str`] will store.
pub const MAX_STRING_LEN: usize = 65533;

/// Fixed-width values that can be copied in and out of a [`DataBuffer`].
///
/// All multi-byte values use little-endian order, matching the file format.
pub trait BufferValue: Sized + Default {
    const SIZE: usize;
    fn encode(self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_buffer_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl BufferValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline]
                fn encode(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_buffer_value!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl BufferValue for bool {
    const SIZE: usize = 1;

    fn encode(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataBuffer {
    data:      Vec<u8>,
    read_pos:  usize,
    write_pos: usize,
    underrun:  bool,
    overrun:   bool,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity], ..Self::default() }
    }

    /// Wrap existing bytes; the whole vector is readable.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let write_pos = data.len();
        Self { data, write_pos, ..Self::default() }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Resize the backing storage.
    ///
    /// Growing keeps every byte and both cursors.  Shrinking discards the
    /// content: the storage is zero-filled and both cursors return to 0.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity >= self.data.len() {
            self.data.resize(capacity, 0);
        } else {
            self.data = vec![0u8; capacity];
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Bytes written but not yet read.
    #[inline]
    pub fn read_size(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes that can still be written before the capacity is reached.
    #[inline]
    pub fn write_size(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Total bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn underrun(&self) -> bool {
        self.underrun
    }

    pub fn overrun(&self) -> bool {
        self.overrun
    }

    /// Zero both cursors and clear the error flags.  Content is untouched.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.underrun = false;
        self.overrun = false;
    }

    /// `reset()` plus zero-fill of the storage.
    pub fn clear(&mut self) {
        self.reset();
        self.data.fill(0);
    }

    /// The written region, `[0, write_pos)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    /// The unread region, `[read_pos, write_pos)`.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.write_pos);
        self.data
    }

    // ── Typed access ─────────────────────────────────────────────────────────

    pub fn put<T: BufferValue>(&mut self, value: T) {
        if self.write_size() < T::SIZE {
            self.overrun = true;
            return;
        }
        value.encode(&mut self.data[self.write_pos..self.write_pos + T::SIZE]);
        self.write_pos += T::SIZE;
    }

    pub fn get<T: BufferValue>(&mut self) -> T {
        if self.read_size() < T::SIZE {
            self.underrun = true;
            return T::default();
        }
        let value = T::decode(&self.data[self.read_pos..self.read_pos + T::SIZE]);
        self.read_pos += T::SIZE;
        value
    }

    // ── Raw access ───────────────────────────────────────────────────────────

    /// Append `bytes` verbatim (no length prefix).
    pub fn write(&mut self, bytes: &[u8]) {
        if self.write_size() < bytes.len() {
            self.overrun = true;
            return;
        }
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Fill `out` from the read cursor (no length prefix).
    pub fn read(&mut self, out: &mut [u8]) {
        if self.read_size() < out.len() {
            self.underrun = true;
            return;
        }
        out.copy_from_slice(&self.data[self.read_pos..self.read_pos + out.len()]);
        self.read_pos += out.len();
    }

    /// Read `len` bytes into a new vector; empty on underrun.
    pub fn read_vec(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read(&mut out);
        if self.underrun {
            out.clear();
        }
        out
    }

    /// Advance the read cursor without copying.
    pub fn skip(&mut self, len: usize) {
        if self.read_size() < len {
            self.underrun = true;
            return;
        }
        self.read_pos += len;
    }

    // ── Strings ──────────────────────────────────────────────────────────────

    pub fn put_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(MAX_STRING_LEN);
        if self.write_size() < 2 + len {
            self.overrun = true;
            return;
        }
        self.put(len as u16);
        self.write(&bytes[..len]);
    }

    pub fn get_string(&mut self) -> String {
        // Legacy files dropped the prefix for a trailing empty string.
        if self.read_size() == 0 {
            return String::new();
        }
        let len = self.get::<u16>() as usize;
        if self.underrun {
            return String::new();
        }
        let bytes = self.read_vec(len);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_primitives() {
        let mut buf = DataBuffer::with_capacity(64);
        buf.put(7u8);
        buf.put(-2i16);
        buf.put(0xDEAD_BEEFu32);
        buf.put(1.5f64);
        buf.put(true);
        assert_eq!(buf.len(), 1 + 2 + 4 + 8 + 1);

        assert_eq!(buf.get::<u8>(), 7);
        assert_eq!(buf.get::<i16>(), -2);
        assert_eq!(buf.get::<u32>(), 0xDEAD_BEEF);
        assert_eq!(buf.get::<f64>(), 1.5);
        assert!(buf.get::<bool>());
        assert!(!buf.underrun());
        assert_eq!(buf.read_size(), 0);
    }

    #[test]
    fn values_are_little_endian() {
        let mut buf = DataBuffer::with_capacity(4);
        buf.put(0x0102_0304u32);
        assert_eq!(buf.as_slice(), &[4, 3, 2, 1]);
    }

    #[test]
    fn overrun_is_sticky_and_writes_nothing() {
        let mut buf = DataBuffer::with_capacity(3);
        buf.put(1u16);
        buf.put(2u16);
        assert!(buf.overrun());
        assert_eq!(buf.len(), 2);
        buf.put(3u8);
        assert!(buf.overrun());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn underrun_returns_default_and_keeps_cursor() {
        let mut buf = DataBuffer::from_vec(vec![1, 2, 3]);
        assert_eq!(buf.get::<u32>(), 0);
        assert!(buf.underrun());
        assert_eq!(buf.read_position(), 0);
        assert_eq!(buf.get::<u8>(), 1);
        assert!(buf.underrun());
    }

    #[test]
    fn reset_clears_flags_and_cursors() {
        let mut buf = DataBuffer::with_capacity(2);
        buf.put(1u32);
        buf.get::<u64>();
        assert!(buf.overrun() && buf.underrun());
        buf.reset();
        assert_eq!(buf.read_size(), 0);
        assert!(!buf.underrun());
        assert!(!buf.overrun());
        buf.reset();
        assert_eq!(buf.read_size(), 0);
    }

    #[test]
    fn clear_zero_fills() {
        let mut buf = DataBuffer::from_vec(vec![9, 9, 9]);
        buf.clear();
        assert_eq!(buf.capacity(), 3);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.data, vec![0, 0, 0]);
    }

    #[test]
    fn growing_preserves_content() {
        let mut buf = DataBuffer::with_capacity(2);
        buf.put(0xABCDu16);
        buf.get::<u8>();
        buf.set_capacity(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.read_position(), 1);
        assert_eq!(buf.as_slice(), &[0xCD, 0xAB]);
        buf.put(0x11u8);
        assert_eq!(buf.remaining(), &[0xAB, 0x11]);
    }

    #[test]
    fn shrinking_discards_content() {
        let mut buf = DataBuffer::from_vec(vec![1, 2, 3, 4]);
        buf.get::<u8>();
        buf.set_capacity(2);
        assert_eq!(buf.capacity(), 2);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.read_position(), 0);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = DataBuffer::with_capacity(32);
        buf.put_str("ouster");
        buf.put_str("");
        assert_eq!(&buf.as_slice()[..2], &[6, 0]);
        assert_eq!(buf.get_string(), "ouster");
        assert_eq!(buf.get_string(), "");
        assert!(!buf.underrun());
    }

    #[test]
    fn exhausted_buffer_decodes_empty_string() {
        let mut buf = DataBuffer::from_vec(vec![2, 0, b'o', b'k']);
        assert_eq!(buf.get_string(), "ok");
        assert_eq!(buf.get_string(), "");
        assert!(!buf.underrun());
    }

    #[test]
    fn short_string_body_underruns() {
        let mut buf = DataBuffer::from_vec(vec![5, 0, b'a']);
        assert_eq!(buf.get_string(), "");
        assert!(buf.underrun());
    }

    #[test]
    fn skip_advances_or_underruns() {
        let mut buf = DataBuffer::from_vec(vec![0xFF, 0xFF, 7, 0]);
        buf.skip(2);
        assert_eq!(buf.get::<u16>(), 7);
        buf.skip(1);
        assert!(buf.underrun());
        assert_eq!(buf.read_position(), 4);
    }

    #[test]
    fn long_strings_are_truncated() {
        let long = "x".repeat(MAX_STRING_LEN + 10);
        let mut buf = DataBuffer::with_capacity(MAX_STRING_LEN + 2);
        buf.put_str(&long);
        assert!(!buf.overrun());
        assert_eq!(buf.get_string().len(), MAX_STRING_LEN);
    }
}
