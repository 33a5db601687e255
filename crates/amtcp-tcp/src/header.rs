//! Active message frame header.
//!
//! ```text
//! 0      1              4                  8
//! +------+--------------+------------------+-------------
//! |  id  |   reserved   | length (u32, LE) | payload ...
//! +------+--------------+------------------+-------------
//! ```
//!
//! There is no version byte and no checksum; integrity is left to the stream.

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the user header a short send places ahead of its payload.
pub const SHORT_HEADER_SIZE: usize = std::mem::size_of::<u64>();

const LENGTH_OFFSET: usize = 4;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AmHeader {
    /// Raw message id, not yet validated against the id range.
    pub(crate) am_id: u8,
    /// Payload length in bytes.
    pub(crate) length: u32,
}

impl AmHeader {
    pub(crate) const fn new(am_id: u8, length: u32) -> Self {
        Self { am_id, length }
    }

    /// Writes the header into the first [`HEADER_SIZE`] bytes of `dst`.
    pub(crate) fn encode(&self, dst: &mut [u8]) {
        let dst = &mut dst[..HEADER_SIZE];
        dst.fill(0);
        dst[0] = self.am_id;
        dst[LENGTH_OFFSET..].copy_from_slice(&self.length.to_le_bytes());
    }

    /// Reads a header from the first [`HEADER_SIZE`] bytes of `src`.
    pub(crate) fn decode(src: &[u8]) -> Self {
        let mut length = [0u8; 4];
        length.copy_from_slice(&src[LENGTH_OFFSET..HEADER_SIZE]);
        Self {
            am_id: src[0],
            length: u32::from_le_bytes(length),
        }
    }

    /// Header plus payload.
    pub(crate) const fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}
