//! Payload handler registry.
//!
//! Sensor parsers consume validated blocks through [`BlockHandler`].  Each
//! handler owns exactly one class ID; attaching a second handler for the
//! same class replaces the first.  Blocks whose class has no handler go to
//! the unknown-class hook, which defaults to a no-op.
//!
//! Two raw hooks, `on_empty_block` and `on_data_block`, see every resolved
//! block before the class dispatch.  Converters use them to re-emit blocks
//! without decoding them.

use std::collections::HashMap;

use crate::block::BlockId;
use crate::buffer::DataBuffer;

pub trait BlockHandler {
    fn class_id(&self) -> u16;

    /// Decode one payload.  `buffer` holds exactly the payload bytes.
    fn process_data(&mut self, major: u8, minor: u8, data_id: u16, buffer: &mut DataBuffer);
}

pub type UnknownClassFn = dyn FnMut(u16);
pub type EmptyBlockFn = dyn FnMut(&BlockId);
pub type DataBlockFn = dyn FnMut(&BlockId, &[u8]);

#[derive(Default)]
pub struct Dispatcher {
    handlers:       HashMap<u16, Box<dyn BlockHandler>>,
    unknown_class:  Option<Box<UnknownClassFn>>,
    on_empty_block: Option<Box<EmptyBlockFn>>,
    on_data_block:  Option<Box<DataBlockFn>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own class ID.  Returns the handler it
    /// replaced, if any.
    pub fn attach<H: BlockHandler + 'static>(&mut self, handler: H) -> Option<Box<dyn BlockHandler>> {
        self.handlers.insert(handler.class_id(), Box::new(handler))
    }

    pub fn detach(&mut self, class_id: u16) -> Option<Box<dyn BlockHandler>> {
        self.handlers.remove(&class_id)
    }

    pub fn has_handler(&self, class_id: u16) -> bool {
        self.handlers.contains_key(&class_id)
    }

    pub fn set_unknown_class<F: FnMut(u16) + 'static>(&mut self, f: F) {
        self.unknown_class = Some(Box::new(f));
    }

    pub fn set_on_empty_block<F: FnMut(&BlockId) + 'static>(&mut self, f: F) {
        self.on_empty_block = Some(Box::new(f));
    }

    pub fn set_on_data_block<F: FnMut(&BlockId, &[u8]) + 'static>(&mut self, f: F) {
        self.on_data_block = Some(Box::new(f));
    }

    pub fn dispatch(&mut self, id: &BlockId, payload: Vec<u8>) {
        if payload.is_empty() {
            if let Some(hook) = self.on_empty_block.as_mut() {
                hook(id);
            }
        } else if let Some(hook) = self.on_data_block.as_mut() {
            hook(id, &payload);
        }

        match self.handlers.get_mut(&id.class_id()) {
            Some(handler) => {
                tracing::trace!(block = %id, len = payload.len(), "dispatching block");
                let mut buffer = DataBuffer::from_vec(payload);
                handler.process_data(id.major_version(), id.minor_version(), id.data_id(), &mut buffer);
            }
            None => {
                tracing::warn!(class_id = id.class_id(), "no handler registered for class");
                if let Some(hook) = self.unknown_class.as_mut() {
                    hook(id.class_id());
                }
            }
        }
    }
}
