#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use blockdata::block::encode_frame;
use blockdata::header::FileHeader;
use blockdata::{BlockHandler, BlockId, DataBuffer};

/// `(major, minor, data_id, payload)` as seen by a handler.
pub type Seen = Rc<RefCell<Vec<(u8, u8, u16, Vec<u8>)>>>;

/// Handler that records every payload it is given.
pub struct Collector {
    pub class_id: u16,
    pub seen:     Seen,
}

impl Collector {
    pub fn new(class_id: u16) -> (Self, Seen) {
        let seen: Seen = Rc::default();
        (Self { class_id, seen: seen.clone() }, seen)
    }
}

impl BlockHandler for Collector {
    fn class_id(&self) -> u16 {
        self.class_id
    }

    fn process_data(&mut self, major: u8, minor: u8, data_id: u16, buffer: &mut DataBuffer) {
        let payload = buffer.remaining().to_vec();
        self.seen.borrow_mut().push((major, minor, data_id, payload));
    }
}

/// Header followed by `frames`, concatenated.
pub fn file_bytes(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    FileHeader::default().write(&mut out).unwrap();
    for frame in frames {
        out.extend_from_slice(frame);
    }
    out
}

pub fn frame(id: BlockId, payload: &[u8]) -> Vec<u8> {
    encode_frame(&id, payload)
}

pub fn payloads(seen: &Seen) -> Vec<Vec<u8>> {
    seen.borrow().iter().map(|(_, _, _, p)| p.clone()).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
