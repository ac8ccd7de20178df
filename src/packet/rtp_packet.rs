//! Fixed-capacity RTP packet buffer.
//!
//! Layout of the backing buffer:
//!
//! ```text
//! 0                 headroom - header_size   headroom            headroom + payload_size   capacity
//! |  unused headroom  |        header        |       payload       |        unused         |
//! ```
//!
//! The header is trimmed from the front of the headroom so header and payload
//! are contiguous and can be written to a socket in one call.

use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;

use super::{
    constants::{RTP_FIXED_HEADER_LEN, RTP_VERSION},
    rtp_params::RtpParams,
};

#[derive(Debug, Default)]
pub struct RtpPacket {
    buffer: BytesMut,
    headroom: usize,
    header_size: usize,
    payload_size: usize,
    params: RtpParams,
    is_keyframe: bool,
}

impl RtpPacket {
    /// Allocates a zeroed buffer of `capacity` bytes. Done once per pool slot.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::zeroed(capacity),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn headroom(&self) -> usize {
        self.headroom
    }

    #[must_use]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Header plus payload, i.e. what goes on the wire.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.header_size + self.payload_size
    }

    /// Reserves `headroom` bytes in front of the payload. Must be called before
    /// the payload or header bytes are written, since the payload starts at
    /// this offset.
    ///
    /// # Panics
    /// If the headroom plus the current payload does not fit the buffer.
    pub fn header_headroom_set(&mut self, headroom: usize) {
        assert!(
            headroom + self.payload_size <= self.capacity(),
            "headroom {headroom} + payload {} exceeds packet capacity {}",
            self.payload_size,
            self.capacity()
        );
        self.headroom = headroom;
        self.header_size = self.header_size.min(headroom);
    }

    /// # Panics
    /// If `header_size` exceeds the configured headroom.
    pub fn header_size_set(&mut self, header_size: usize) {
        assert!(
            header_size <= self.headroom,
            "header size {header_size} exceeds headroom {}",
            self.headroom
        );
        self.header_size = header_size;
    }

    /// # Panics
    /// If the payload would run past the end of the buffer.
    pub fn payload_size_set(&mut self, payload_size: usize) {
        assert!(
            self.headroom + payload_size <= self.capacity(),
            "payload {payload_size} + headroom {} exceeds packet capacity {}",
            self.headroom,
            self.capacity()
        );
        self.payload_size = payload_size;
    }

    /// Sets the payload size to `data.len()` and copies `data` in.
    pub fn payload_write(&mut self, data: &[u8]) {
        self.payload_size_set(data.len());
        self.payload_mut().copy_from_slice(data);
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.headroom..self.headroom + self.payload_size]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.headroom;
        &mut self.buffer[start..start + self.payload_size]
    }

    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.buffer[self.headroom - self.header_size..self.headroom]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        let end = self.headroom;
        &mut self.buffer[end - self.header_size..end]
    }

    /// Contiguous header + payload.
    #[must_use]
    pub fn wire_bytes(&self) -> &[u8] {
        &self.buffer[self.headroom - self.header_size..self.headroom + self.payload_size]
    }

    #[must_use]
    pub fn params(&self) -> &RtpParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RtpParams {
        &mut self.params
    }

    #[must_use]
    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    pub fn is_keyframe_set(&mut self, is_keyframe: bool) {
        self.is_keyframe = is_keyframe;
    }

    /// Serializes the 12-byte fixed RTP header from `params` into the header
    /// region and sets the header size accordingly.
    ///
    /// # Panics
    /// If the headroom is smaller than the fixed header.
    pub fn write_rtp_header(&mut self) {
        self.header_size_set(RTP_FIXED_HEADER_LEN);
        let p = self.params;
        let header = self.header_mut();

        header[0] = RTP_VERSION << 6;
        header[1] = (u8::from(p.marker) << 7) | (p.payload_type & 0x7f);
        BigEndian::write_u16(&mut header[2..4], p.sequence_number);
        BigEndian::write_u32(&mut header[4..8], p.timestamp);
        BigEndian::write_u32(&mut header[8..12], p.ssrc);
    }

    /// Returns the packet to its pristine state; the buffer is kept.
    pub(crate) fn reset(&mut self) {
        self.headroom = 0;
        self.header_size = 0;
        self.payload_size = 0;
        self.params = RtpParams::default();
        self.is_keyframe = false;
    }
}
