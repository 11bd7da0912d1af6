//! Reply buffer construction.
//!
//! Mirrors the wire-level contract a raw (virtio-style) transport needs:
//! a handler's encoded body is placed at offset 7 and [`ReplyBuffer::build_reply`]
//! backfills the `size[4] type[1] tag[2]` header. The tokio-based transports
//! in [`crate::transport`] go through [`crate::wire::write_msg`] directly and
//! let their framing codec supply the length prefix; this type exists so a
//! lower-level transport (driving a raw byte buffer, as a virtio queue would)
//! has a ready-made primitive, and so [`crate::session::SessionState`] has a
//! concrete type to snapshot.

/// A reusable, fixed-capacity frame buffer sized `2 * msize`.
#[derive(Debug, Clone)]
pub struct ReplyBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl ReplyBuffer {
    pub fn new(msize: u32) -> ReplyBuffer {
        ReplyBuffer { buf: vec![0u8; msize as usize * 2], len: 0 }
    }

    /// Mutable access to the body region (offset 7 onward) for a handler
    /// that wants to encode directly into the buffer.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buf[7..]
    }

    /// Backfills the header for a body of `n` bytes already written at
    /// offset 7, and returns the complete frame `size[4] id[1] tag[2] body`.
    pub fn build_reply(&mut self, id: u8, tag: u16, n: usize) -> &[u8] {
        let total = n + 7;
        self.buf[0..4].copy_from_slice(&(total as u32).to_le_bytes());
        self.buf[4] = id;
        self.buf[5..7].copy_from_slice(&tag.to_le_bytes());
        self.len = total;
        &self.buf[..total]
    }

    /// Copies `body` into the buffer and backfills the header in one step.
    pub fn build_reply_with_body(&mut self, id: u8, tag: u16, body: &[u8]) -> &[u8] {
        self.body_mut()[..body.len()].copy_from_slice(body);
        self.build_reply(id, tag, body.len())
    }

    pub fn occupied_len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn set_occupied_len(&mut self, len: usize) {
        self.len = len;
    }

    pub fn raw_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}
