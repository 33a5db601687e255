//! Fixed-capacity frame buffer with transmit and receive cursors.
//!
//! One allocation serves both directions. `offset` is the write cursor while a
//! frame is being transmitted and the parse cursor while received bytes are
//! being framed; `length` is the fill mark. `0 <= offset <= length <= capacity`
//! always holds and `length == 0` (which implies `offset == 0`) means idle.

use amtcp_transport_traits::{TransportError, TransportResult};

use crate::header::{AmHeader, HEADER_SIZE, SHORT_HEADER_SIZE};

#[derive(Debug)]
pub(crate) struct AmBuffer {
    data: Box<[u8]>,
    offset: usize,
    length: usize,
    /// The buffered bytes are an outgoing frame rather than received data.
    transmitting: bool,
}

impl AmBuffer {
    /// Allocates a zeroed buffer, reporting allocation failure instead of aborting.
    pub(crate) fn with_capacity(capacity: usize) -> TransportResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| TransportError::NoMemory { size: capacity })?;
        data.resize(capacity, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            offset: 0,
            length: 0,
            transmitting: false,
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Largest payload a received frame may legally carry.
    pub(crate) fn max_payload(&self) -> usize {
        self.capacity().saturating_sub(HEADER_SIZE)
    }

    pub(crate) fn is_idle(&self) -> bool {
        debug_assert!(self.offset <= self.length && self.length <= self.capacity());
        self.length == 0
    }

    /// Returns `true` while an outgoing frame has unsent bytes.
    pub(crate) fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// Copies a short frame into the buffer: the user header, little-endian,
    /// followed by `payload`. The caller has checked the size.
    pub(crate) fn stage_short(&mut self, am_id: u8, header: u64, payload: &[u8]) -> usize {
        debug_assert!(self.is_idle());
        let body = HEADER_SIZE + SHORT_HEADER_SIZE;
        let end = body + payload.len();
        AmHeader::new(am_id, (end - HEADER_SIZE) as u32).encode(&mut self.data);
        self.data[HEADER_SIZE..body].copy_from_slice(&header.to_le_bytes());
        self.data[body..end].copy_from_slice(payload);
        self.begin_transmit(end);
        end
    }

    /// Lets `pack` produce the payload in place, bounded by `max` bytes.
    ///
    /// Returns the payload length, or `Err(reported)` if `pack` claims more
    /// than `max` bytes; in that case nothing is staged.
    pub(crate) fn stage_bulk(
        &mut self,
        am_id: u8,
        max: usize,
        pack: &mut dyn FnMut(&mut [u8]) -> usize,
    ) -> Result<usize, usize> {
        debug_assert!(self.is_idle());
        let max = max.min(self.max_payload());
        let packed = pack(&mut self.data[HEADER_SIZE..HEADER_SIZE + max]);
        if packed > max {
            return Err(packed);
        }
        AmHeader::new(am_id, packed as u32).encode(&mut self.data);
        self.begin_transmit(HEADER_SIZE + packed);
        Ok(packed)
    }

    fn begin_transmit(&mut self, frame_len: usize) {
        self.offset = 0;
        self.length = frame_len;
        self.transmitting = true;
    }

    /// Bytes of the outgoing frame not yet written.
    pub(crate) fn unsent(&self) -> &[u8] {
        &self.data[self.offset..self.length]
    }

    /// Records `written` bytes as sent. Returns `true` once the frame is done.
    pub(crate) fn advance(&mut self, written: usize) -> bool {
        debug_assert!(self.transmitting);
        self.offset += written;
        debug_assert!(self.offset <= self.length);
        if self.offset == self.length {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Free space after the fill mark, for the next read.
    pub(crate) fn free_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.length..]
    }

    pub(crate) fn free_len(&self) -> usize {
        self.capacity() - self.length
    }

    /// Extends the fill mark over `read` freshly received bytes.
    pub(crate) fn commit(&mut self, read: usize) {
        debug_assert!(!self.transmitting);
        self.length += read;
        debug_assert!(self.length <= self.capacity());
    }

    /// Hands every complete buffered frame to `on_frame` in arrival order, then
    /// moves the trailing partial frame to the start of the buffer.
    ///
    /// Returns the number of frames delivered.
    ///
    /// # Panics
    ///
    /// Panics if a header announces a payload that can never fit the buffer;
    /// the peer's thresholds do not match ours and the stream cannot be framed.
    pub(crate) fn drain_frames<F>(&mut self, mut on_frame: F) -> usize
    where
        F: FnMut(u8, &[u8]),
    {
        let max = self.max_payload();
        let mut frames = 0;

        while self.length - self.offset >= HEADER_SIZE {
            let hdr = AmHeader::decode(&self.data[self.offset..]);
            if hdr.length as usize > max {
                crate::fatal!(
                    "frame of {} bytes exceeds the {} byte receive limit",
                    hdr.length,
                    max
                );
            }
            if self.length - self.offset < hdr.frame_len() {
                break;
            }

            let start = self.offset + HEADER_SIZE;
            self.offset += hdr.frame_len();
            on_frame(hdr.am_id, &self.data[start..self.offset]);
            frames += 1;
        }

        self.compact();
        frames
    }

    /// Moves `length - offset` leftover bytes to the start of the buffer.
    fn compact(&mut self) {
        let leftover = self.length - self.offset;
        self.data.copy_within(self.offset..self.length, 0);
        self.offset = 0;
        self.length = leftover;
    }

    /// Discards everything buffered.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.length = 0;
        self.transmitting = false;
    }

    #[cfg(test)]
    pub(crate) fn cursors(&self) -> (usize, usize) {
        (self.offset, self.length)
    }
}
