//! Hypothesis search over a window of raw bytes.
//!
//! All positions are relative to the start of the failed frame (offset 0 is
//! the first byte of its length field).  Every read goes through
//! [`Window`], which returns `None` instead of reading past the bytes that
//! were actually loaded, so a hypothesis that needs more data than exists is
//! simply rejected.
//!
//! Three repairs are attempted, depending on the diagnosis:
//!
//! - **Identifier repair**: stray bytes landed inside the identifier.  The
//!   first field the schema rejects, and every field after it, is re-read
//!   one byte later until the identifier validates or the search reaches
//!   the position where the CRC was expected.
//! - **Splice search**: the identifier is plausible, so a neighboring
//!   block's bytes are interleaved with this one.  A second candidate frame
//!   header is read, and each ordering in [`ORDERINGS`] is tested: both
//!   payloads are hashed and the two CRC words found in the stream must match
//!   the two expected checksums in either assignment.
//! - **Length repair**: the length field itself is wrong and the next frame
//!   follows intact.  The true payload length is found with a rolling CRC.

use crc32fast::Hasher;

use crate::block::{BlockId, FrameHeader, CRC_SIZE, FRAME_HEADER_SIZE};
use crate::crc::Crc32;
use crate::schema::{SchemaValidator, Status};

/// Bounds-checked view of the bytes loaded from the failed frame onward.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window<'a> {
    bytes: &'a [u8],
}

impl<'a> Window<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    fn slice(&self, pos: usize, len: usize) -> Option<&'a [u8]> {
        self.bytes.get(pos..pos.checked_add(len)?)
    }

    fn byte(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    fn u16_at(&self, pos: usize) -> Option<u16> {
        let raw = self.slice(pos, 2)?;
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn word_at(&self, pos: usize) -> Option<u32> {
        let raw = self.slice(pos, CRC_SIZE)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn header_at(&self, pos: usize) -> Option<FrameHeader> {
        FrameHeader::parse(self.bytes.get(pos..)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepairKind {
    Identifier,
    Splice,
    Length,
}

/// A successful hypothesis.
#[derive(Debug)]
pub(crate) struct Repair {
    pub kind:      RepairKind,
    /// Blocks in delivery order: the original first.
    pub blocks:    Vec<(BlockId, Vec<u8>)>,
    /// Bytes from the start of the failed frame to the end of the last CRC
    /// word the hypothesis used.
    pub consumed:  usize,
    /// Bytes skipped inside the identifier.
    pub discarded: usize,
}

// ── Identifier repair ─────────────────────────────────────────────────────────

/// Offsets of class, major, minor and data ID for an untouched identifier.
const FIELD_OFFSETS: [usize; 4] = [4, 6, 7, 8];

fn failing_field(status: Status) -> Option<usize> {
    match status {
        Status::Ok                                    => None,
        Status::BadClassId                            => Some(0),
        Status::BadMajorVersion                       => Some(1),
        Status::BadMinorVersion                       => Some(2),
        Status::BadDataId | Status::BadPayloadLength  => Some(3),
    }
}

pub(crate) fn repair_identifier(
    window:   Window<'_>,
    schema:   &SchemaValidator,
    original: FrameHeader,
    status:   Status,
) -> Option<Repair> {
    let length = original.length as usize;
    let crc_limit = FRAME_HEADER_SIZE.checked_add(length)?;
    let mut offsets = FIELD_OFFSETS;
    let mut status = status;
    let mut id = original.id;

    while let Some(field) = failing_field(status) {
        // The accepted prefix stays put; the failing field and everything
        // after it slide one byte to the right.
        for offset in &mut offsets[field..] {
            *offset += 1;
        }
        if offsets[field] >= crc_limit {
            return None;
        }
        id = BlockId::new(
            window.u16_at(offsets[0])?,
            window.byte(offsets[1])?,
            window.byte(offsets[2])?,
            window.u16_at(offsets[3])?,
        );
        status = schema.check(&id, original.length);
    }

    let payload_start = offsets[3] + 2;
    let payload = window.slice(payload_start, length)?;
    let crc = window.word_at(payload_start + length)?;
    if Crc32::of_block(&id, payload) != crc {
        return None;
    }
    Some(Repair {
        kind:      RepairKind::Identifier,
        blocks:    vec![(id, payload.to_vec())],
        consumed:  payload_start + length + CRC_SIZE,
        discarded: payload_start - FRAME_HEADER_SIZE,
    })
}

// ── Splice search ─────────────────────────────────────────────────────────────

/// One region of the stream after the original frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    OriginalPayload,
    OriginalCrc,
    InsertedHeader,
    InsertedPayload,
    InsertedCrc,
}

use Region::*;

/// Layouts tried by the splice search, in order.  The first three place the
/// inserted header right after the original's declared payload; the rest
/// place it right after the original header.  A payload always precedes its
/// own CRC.
pub(crate) const ORDERINGS: [[Region; 5]; 9] = [
    [OriginalPayload, InsertedHeader, OriginalCrc, InsertedPayload, InsertedCrc],
    [OriginalPayload, InsertedHeader, InsertedPayload, OriginalCrc, InsertedCrc],
    [OriginalPayload, InsertedHeader, InsertedPayload, InsertedCrc, OriginalCrc],
    [InsertedHeader, OriginalPayload, OriginalCrc, InsertedPayload, InsertedCrc],
    [InsertedHeader, OriginalPayload, InsertedPayload, OriginalCrc, InsertedCrc],
    [InsertedHeader, OriginalPayload, InsertedPayload, InsertedCrc, OriginalCrc],
    [InsertedHeader, InsertedPayload, InsertedCrc, OriginalPayload, OriginalCrc],
    [InsertedHeader, InsertedPayload, OriginalPayload, InsertedCrc, OriginalCrc],
    [InsertedHeader, InsertedPayload, OriginalPayload, OriginalCrc, InsertedCrc],
];

pub(crate) fn splice_search(
    window:   Window<'_>,
    schema:   &SchemaValidator,
    original: FrameHeader,
) -> Option<Repair> {
    if !schema.check(&original.id, original.length).is_ok() {
        return None;
    }
    ORDERINGS
        .iter()
        .find_map(|layout| test_layout(window, schema, original, layout))
}

fn test_layout(
    window:   Window<'_>,
    schema:   &SchemaValidator,
    original: FrameHeader,
    layout:   &[Region; 5],
) -> Option<Repair> {
    let mut pos = FRAME_HEADER_SIZE;
    let mut inserted: Option<FrameHeader> = None;
    let mut original_payload: &[u8] = &[];
    let mut inserted_payload: &[u8] = &[];
    let mut words = [0u32; 2];
    let mut word_count = 0;

    for region in layout {
        match region {
            OriginalPayload => {
                original_payload = window.slice(pos, original.length as usize)?;
                pos += original_payload.len();
            }
            InsertedHeader => {
                let header = window.header_at(pos)?;
                if !schema.check(&header.id, header.length).is_ok() {
                    return None;
                }
                inserted = Some(header);
                pos += FRAME_HEADER_SIZE;
            }
            InsertedPayload => {
                inserted_payload = window.slice(pos, inserted?.length as usize)?;
                pos += inserted_payload.len();
            }
            OriginalCrc | InsertedCrc => {
                words[word_count] = window.word_at(pos)?;
                word_count += 1;
                pos += CRC_SIZE;
            }
        }
    }

    let inserted = inserted?;
    let original_crc = Crc32::of_block(&original.id, original_payload);
    let inserted_crc = Crc32::of_block(&inserted.id, inserted_payload);
    let matched = (words[0] == original_crc && words[1] == inserted_crc)
        || (words[0] == inserted_crc && words[1] == original_crc);
    if !matched {
        return None;
    }

    Some(Repair {
        kind:      RepairKind::Splice,
        blocks:    vec![
            (original.id, original_payload.to_vec()),
            (inserted.id, inserted_payload.to_vec()),
        ],
        consumed:  pos,
        discarded: 0,
    })
}

// ── Length repair ─────────────────────────────────────────────────────────────

/// Find the real payload length of `original` by extending a running CRC
/// one byte at a time and testing the word that would follow it.
///
/// A candidate length is accepted when that word matches, the identifier is
/// valid for the length, and either a valid, CRC-clean frame follows it or
/// the candidate frame ends exactly at end of stream.
pub(crate) fn repair_length(
    window:   Window<'_>,
    schema:   &SchemaValidator,
    original: FrameHeader,
    at_eof:   bool,
) -> Option<Repair> {
    let mut hasher: Hasher = Crc32::seeded(&original.id);
    let mut payload_len = 0usize;

    loop {
        let crc_pos = FRAME_HEADER_SIZE + payload_len;
        let frame_end = crc_pos + CRC_SIZE;
        if frame_end > window.len() {
            return None;
        }

        let candidate = payload_len != original.length as usize
            && window.word_at(crc_pos)? == hasher.clone().finalize()
            && schema.check(&original.id, payload_len as u32).is_ok();

        if candidate {
            let payload = window.slice(FRAME_HEADER_SIZE, payload_len)?.to_vec();
            if at_eof && frame_end == window.len() {
                return Some(Repair {
                    kind:      RepairKind::Length,
                    blocks:    vec![(original.id, payload)],
                    consumed:  frame_end,
                    discarded: 0,
                });
            }
            if let Some((neighbor, consumed)) = neighbor_at(window, schema, frame_end) {
                return Some(Repair {
                    kind:      RepairKind::Length,
                    blocks:    vec![(original.id, payload), neighbor],
                    consumed,
                    discarded: 0,
                });
            }
        }

        hasher.update(&[window.byte(crc_pos)?]);
        payload_len += 1;
    }
}

/// A schema-valid, CRC-clean frame starting at `pos`.
fn neighbor_at(
    window: Window<'_>,
    schema: &SchemaValidator,
    pos:    usize,
) -> Option<((BlockId, Vec<u8>), usize)> {
    let header = window.header_at(pos)?;
    if !schema.check(&header.id, header.length).is_ok() {
        return None;
    }
    let payload_start = pos + FRAME_HEADER_SIZE;
    let payload = window.slice(payload_start, header.length as usize)?;
    let crc_pos = payload_start + payload.len();
    if window.word_at(crc_pos)? != Crc32::of_block(&header.id, payload) {
        return None;
    }
    Some(((header.id, payload.to_vec()), crc_pos + CRC_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::encode_frame;
    use crate::schema::{ClassRule, LengthRule, VersionRule};

    const SENSOR: u16 = 3000;

    fn schema() -> SchemaValidator {
        SchemaValidator::new().with_class(
            ClassRule::new(SENSOR)
                .major(VersionRule::Exact(1))
                .minor(VersionRule::Range(0..=2))
                .data(1, LengthRule::Any)
                .data(2, LengthRule::Any)
                .data(3, LengthRule::Exact(0)),
        )
    }

    fn split(frame: &[u8]) -> (&[u8], &[u8], &[u8]) {
        let len = frame.len();
        (&frame[..FRAME_HEADER_SIZE], &frame[FRAME_HEADER_SIZE..len - CRC_SIZE], &frame[len - CRC_SIZE..])
    }

    #[test]
    fn window_reads_are_bounded() {
        let bytes = [1u8, 2, 3];
        let w = Window::new(&bytes);
        assert_eq!(w.u16_at(1), Some(0x0302));
        assert_eq!(w.u16_at(2), None);
        assert_eq!(w.word_at(0), None);
        assert_eq!(w.slice(usize::MAX, 2), None);
        assert!(w.header_at(0).is_none());
    }

    #[test]
    fn identifier_repair_skips_inserted_byte() {
        let id = BlockId::new(SENSOR, 1, 2, 1);
        let frame = encode_frame(&id, b"payload!");
        // Stray byte between class ID and major version.
        let mut corrupt = frame[..6].to_vec();
        corrupt.push(0xEE);
        corrupt.extend_from_slice(&frame[6..]);

        let schema = schema();
        let header = FrameHeader::parse(&corrupt).unwrap();
        let status = schema.check(&header.id, header.length);
        assert_eq!(status, Status::BadMajorVersion);

        let repair = repair_identifier(Window::new(&corrupt), &schema, header, status).unwrap();
        assert_eq!(repair.kind, RepairKind::Identifier);
        assert_eq!(repair.blocks, vec![(id, b"payload!".to_vec())]);
        assert_eq!(repair.consumed, corrupt.len());
        assert_eq!(repair.discarded, 1);
    }

    #[test]
    fn identifier_repair_resumes_at_each_failing_field() {
        let id = BlockId::new(SENSOR, 1, 2, 1);
        let frame = encode_frame(&id, b"payload!");
        let schema = schema();
        let cases = [
            (4, Status::BadClassId),
            (6, Status::BadMajorVersion),
            (7, Status::BadMinorVersion),
            (8, Status::BadDataId),
        ];

        for (at, expected) in cases {
            let mut corrupt = frame[..at].to_vec();
            corrupt.push(0xEE);
            corrupt.extend_from_slice(&frame[at..]);

            let header = FrameHeader::parse(&corrupt).unwrap();
            let status = schema.check(&header.id, header.length);
            assert_eq!(status, expected, "stray byte at {at}");

            let repair = repair_identifier(Window::new(&corrupt), &schema, header, status)
                .unwrap_or_else(|| panic!("no repair for stray byte at {at}"));
            assert_eq!(repair.blocks, vec![(id, b"payload!".to_vec())]);
            assert_eq!(repair.consumed, corrupt.len());
            assert_eq!(repair.discarded, 1);
        }
    }

    #[test]
    fn identifier_repair_gives_up_at_crc_position() {
        let bytes = encode_frame(&BlockId::new(9, 9, 9, 9), &[0u8; 4]);
        let header = FrameHeader::parse(&bytes).unwrap();
        let schema = schema();
        assert!(repair_identifier(Window::new(&bytes), &schema, header, Status::BadClassId).is_none());
    }

    #[test]
    fn splice_with_inserted_frame_before_original_crc() {
        let a = BlockId::new(SENSOR, 1, 0, 1);
        let b = BlockId::new(SENSOR, 1, 1, 2);
        let fa = encode_frame(&a, b"alpha-payload");
        let fb = encode_frame(&b, b"beta");
        let (ha, pa, ca) = split(&fa);
        let (hb, pb, cb) = split(&fb);

        // hA pA hB pB cB cA
        let stream = [ha, pa, hb, pb, cb, ca].concat();
        let schema = schema();
        let header = FrameHeader::parse(&stream).unwrap();
        let repair = splice_search(Window::new(&stream), &schema, header).unwrap();
        assert_eq!(repair.kind, RepairKind::Splice);
        assert_eq!(repair.blocks[0], (a, pa.to_vec()));
        assert_eq!(repair.blocks[1], (b, pb.to_vec()));
        assert_eq!(repair.consumed, stream.len());
    }

    #[test]
    fn splice_with_inserted_header_first() {
        let a = BlockId::new(SENSOR, 1, 0, 1);
        let b = BlockId::new(SENSOR, 1, 0, 2);
        let fa = encode_frame(&a, b"first");
        let fb = encode_frame(&b, b"second-block");
        let (ha, pa, ca) = split(&fa);
        let (hb, pb, cb) = split(&fb);

        // hA hB pB pA cA cB, CRC words swapped relative to layout order
        let stream = [ha, hb, pb, pa, ca, cb].concat();
        let schema = schema();
        let header = FrameHeader::parse(&stream).unwrap();
        let repair = splice_search(Window::new(&stream), &schema, header).unwrap();
        assert_eq!(repair.blocks[0].1, pa.to_vec());
        assert_eq!(repair.blocks[1].1, pb.to_vec());
        assert_eq!(repair.consumed, stream.len());
    }

    #[test]
    fn splice_with_zero_length_insert() {
        let a = BlockId::new(SENSOR, 1, 0, 1);
        let b = BlockId::new(SENSOR, 1, 0, 3);
        let fa = encode_frame(&a, b"data");
        let fb = encode_frame(&b, &[]);
        let (ha, pa, ca) = split(&fa);
        let (hb, _, cb) = split(&fb);

        let stream = [ha, pa, hb, ca, cb].concat();
        let schema = schema();
        let header = FrameHeader::parse(&stream).unwrap();
        let repair = splice_search(Window::new(&stream), &schema, header).unwrap();
        assert_eq!(repair.blocks[1], (b, Vec::new()));
    }

    #[test]
    fn length_repair_finds_real_boundary() {
        let a = BlockId::new(SENSOR, 1, 0, 1);
        let b = BlockId::new(SENSOR, 1, 0, 2);
        let mut stream = encode_frame(&a, &[7u8; 16]);
        stream.extend(encode_frame(&b, &[9u8; 5]));
        stream[0] ^= 0x04;

        let schema = schema();
        let header = FrameHeader::parse(&stream).unwrap();
        assert_eq!(header.length, 20);
        let repair = repair_length(Window::new(&stream), &schema, header, true).unwrap();
        assert_eq!(repair.kind, RepairKind::Length);
        assert_eq!(repair.blocks, vec![(a, vec![7u8; 16]), (b, vec![9u8; 5])]);
        assert_eq!(repair.consumed, stream.len());
    }

    #[test]
    fn length_repair_accepts_last_block_at_eof() {
        let a = BlockId::new(SENSOR, 1, 0, 1);
        let mut stream = encode_frame(&a, &[1u8; 8]);
        stream[0] = 200;
        let schema = schema();
        let header = FrameHeader::parse(&stream).unwrap();
        let repair = repair_length(Window::new(&stream), &schema, header, true).unwrap();
        assert_eq!(repair.blocks, vec![(a, vec![1u8; 8])]);
        assert!(repair_length(Window::new(&stream), &schema, header, false).is_none());
    }
}
