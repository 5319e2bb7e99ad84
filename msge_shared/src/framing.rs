//! Sentinel framing.
//!
//! Every transport message travels as
//! `[BEGIN_SENTINEL][body][END_SENTINEL]`. The parser pulls complete bodies
//! out of a [`RingBuffer`] one at a time and resynchronizes on its own after
//! garbage or a torn sentinel.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::ring_buffer::RingBuffer;

pub const SENTINEL_LEN: usize = 8;

pub const BEGIN_SENTINEL: [u8; SENTINEL_LEN] = [0xA7, 0x4D, 0x53, 0x47, 0x45, 0x3C, 0x3C, 0x7E];
pub const END_SENTINEL: [u8; SENTINEL_LEN] = [0x7E, 0x3E, 0x3E, 0x45, 0x47, 0x53, 0x4D, 0xA7];

/// Wraps `body` in begin/end sentinels.
pub fn frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 2 * SENTINEL_LEN);
    buf.put_slice(&BEGIN_SENTINEL);
    buf.put_slice(body);
    buf.put_slice(&END_SENTINEL);
    buf.freeze()
}

/// Incremental frame extractor bound to one ring buffer.
#[derive(Debug)]
pub struct FrameParser {
    ring: Arc<RingBuffer>,
    in_message: bool,
}

impl FrameParser {
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self {
            ring,
            in_message: false,
        }
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// True once a begin sentinel was consumed and the end is still pending.
    pub fn in_message(&self) -> bool {
        self.in_message
    }

    /// Extracts at most one complete message body. Never blocks; `None` means
    /// more bytes are needed.
    pub fn parse_message_loop(&mut self) -> Option<Bytes> {
        if !self.in_message && !self.sync_to_begin() {
            return None;
        }

        let end = self.ring.index_of(&END_SENTINEL)?;
        let body = Bytes::from(self.ring.current_contents(end));
        // `end + SENTINEL_LEN` bytes were just observed in the buffer; only
        // this parser consumes from it.
        if self.ring.advance_head(end + SENTINEL_LEN).is_err() {
            self.ring.clear();
        }
        self.in_message = false;
        trace!(len = body.len(), "frame extracted");
        Some(body)
    }

    /// Drains every complete message currently buffered.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.parse_message_loop()).collect()
    }

    /// Forgets any half-read message and empties the buffer.
    pub fn reset(&mut self) {
        self.in_message = false;
        self.ring.clear();
    }

    /// Moves the head onto a begin sentinel and consumes it. Returns false if
    /// more bytes are needed first.
    fn sync_to_begin(&mut self) -> bool {
        loop {
            if self.ring.begins_with(&BEGIN_SENTINEL) {
                // Same single-consumer argument as above.
                let _ = self.ring.advance_head(SENTINEL_LEN);
                self.in_message = true;
                return true;
            }

            let size = self.ring.size();
            if size == 0 {
                return false;
            }
            if size < SENTINEL_LEN && BEGIN_SENTINEL.starts_with(&self.ring.current_contents(size))
            {
                // Partial sentinel; wait for the rest.
                return false;
            }

            match self.ring.index_of_from(&BEGIN_SENTINEL[..1], 1) {
                Some(skip) => {
                    debug!(skip, "resyncing to next begin sentinel candidate");
                    let _ = self.ring.advance_head(skip);
                }
                None => {
                    debug!(discarded = size, "no begin sentinel candidate, clearing");
                    self.ring.clear();
                    return false;
                }
            }
        }
    }
}
