//! Serial stream tokenizer
//!
//! The controller interleaves single-byte control codes (ACK, NAK, CAN)
//! with length-prefixed data frames. Serial reads may split a frame or
//! carry a control byte and a frame together, so incoming bytes are
//! buffered until a complete unit is available.

use crate::constants::{ACK, CAN, NAK, SOF};
use crate::frame::MIN_FRAME_SIZE;
use bytes::{Buf, BytesMut};

/// A unit read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Ack,
    Nak,
    Can,
    /// Complete data frame bytes, SOF through checksum (not yet validated)
    Frame(Vec<u8>),
    /// Byte that cannot start a unit, skipped
    Desync(u8),
}

/// Splits a byte stream into control bytes and data frames
pub struct FrameReader {
    buffer: BytesMut,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create a new reader
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Feed bytes into the reader and extract complete units
    ///
    /// Returns every unit completed by this chunk, in wire order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Inbound> {
        self.buffer.extend_from_slice(data);
        let mut units = Vec::new();

        while let Some(&lead) = self.buffer.first() {
            match lead {
                ACK => {
                    self.buffer.advance(1);
                    units.push(Inbound::Ack);
                }
                NAK => {
                    self.buffer.advance(1);
                    units.push(Inbound::Nak);
                }
                CAN => {
                    self.buffer.advance(1);
                    units.push(Inbound::Can);
                }
                SOF => {
                    // Wait for the length byte
                    let Some(&length) = self.buffer.get(1) else {
                        break;
                    };
                    let total = usize::from(length) + 2;
                    if total < MIN_FRAME_SIZE {
                        // Cannot be a frame, resync on the next byte
                        self.buffer.advance(1);
                        units.push(Inbound::Desync(SOF));
                        continue;
                    }
                    if self.buffer.len() < total {
                        break;
                    }
                    let frame = self.buffer.split_to(total);
                    units.push(Inbound::Frame(frame.to_vec()));
                }
                other => {
                    self.buffer.advance(1);
                    units.push(Inbound::Desync(other));
                }
            }
        }

        units
    }

    /// Drop any partially received frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes held back waiting for the rest of a frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
