//! One complete protocol unit: header plus opaque body
//!
//! [`FramedMessage`] is the unit that moves through circular-buffer slots and
//! over the socket. The body is opaque bytes; a slot's message is reused
//! across receive cycles without reallocating when sizes repeat.
//!
//! The split between header packing and body packing exists because the
//! protocol is length-prefixed framing over a byte stream: the receiver reads
//! exactly [`Header::SIZE`] bytes, learns the body length, then reads exactly
//! that many more.

use crate::error::{IgtlError, Result};
use crate::protocol::crc::{calculate_crc, verify_crc};
use crate::protocol::header::{DeviceName, Header, Timestamp, TypeName};

/// Largest body size accepted from a header (the u32 wire limit)
pub const MAX_BODY_SIZE: usize = u32::MAX as usize;

/// A framed wire message with an owned, reusable body buffer
#[derive(Debug, Clone, Default)]
pub struct FramedMessage {
    header: Header,
    body: Vec<u8>,
}

impl FramedMessage {
    /// Create an empty message (used to pre-allocate buffer slots)
    pub fn new() -> Self {
        FramedMessage::default()
    }

    /// Build an outgoing message from its parts
    ///
    /// The CRC and body size fields are finalized by [`pack_header`]
    /// (or [`pack`]) at send time.
    ///
    /// [`pack_header`]: FramedMessage::pack_header
    /// [`pack`]: FramedMessage::pack
    pub fn from_parts(device_name: &str, device_type: &str, body: Vec<u8>) -> Result<Self> {
        if body.len() > MAX_BODY_SIZE {
            return Err(IgtlError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }
        let header = Header {
            version: 2,
            type_name: TypeName::new(device_type)?,
            device_name: DeviceName::new(device_name)?,
            timestamp: Timestamp::now(),
            body_size: body.len() as u64,
            crc: 0,
        };
        Ok(FramedMessage { header, body })
    }

    /// Reset for a fresh receive cycle, keeping the body allocation
    pub fn initialize_for_receive(&mut self) {
        self.header = Header::default();
        self.body.clear();
    }

    /// Size of the fixed wire header
    pub const fn header_size() -> usize {
        Header::SIZE
    }

    /// Body length declared by the current header
    pub fn body_size(&self) -> usize {
        self.header.body_size as usize
    }

    /// Parse a header blob of exactly [`Header::SIZE`] bytes
    pub fn unpack_header(&mut self, buf: &[u8]) -> Result<()> {
        self.header = Header::decode(buf)?;
        Ok(())
    }

    /// Adopt an already-decoded header (receive path: the header is decoded
    /// before the target slot is known)
    pub fn set_header(&mut self, header: Header) {
        self.header = header;
    }

    /// Size the body buffer to exactly `size` bytes
    ///
    /// Keeps the header's declared body size in step with the buffer so the
    /// two can never disagree.
    pub fn allocate_body(&mut self, size: usize) -> Result<()> {
        if size > MAX_BODY_SIZE {
            return Err(IgtlError::BodyTooLarge {
                size,
                max: MAX_BODY_SIZE,
            });
        }
        self.body.clear();
        self.body.resize(size, 0);
        self.header.body_size = size as u64;
        Ok(())
    }

    /// The body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Writable view of the body, used as the direct receive target
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Validate the received body against the header
    ///
    /// With `check_crc` false only the length invariant is checked, so a
    /// corrupt body is accepted. On [`IgtlError::CrcMismatch`] the header
    /// remains valid and usable (e.g. its declared body size was already
    /// honored while reading the stream).
    pub fn unpack_body(&self, check_crc: bool) -> Result<()> {
        if self.body.len() != self.header.body_size as usize {
            return Err(IgtlError::InvalidSize {
                expected: self.header.body_size as usize,
                actual: self.body.len(),
            });
        }
        if check_crc && !verify_crc(&self.body, self.header.crc) {
            return Err(IgtlError::CrcMismatch {
                expected: self.header.crc,
                actual: calculate_crc(&self.body),
            });
        }
        Ok(())
    }

    /// Finalize and encode the header for transmission
    ///
    /// Computes the CRC over the current body and updates the declared size.
    pub fn pack_header(&mut self) -> [u8; Header::SIZE] {
        self.header.body_size = self.body.len() as u64;
        self.header.crc = calculate_crc(&self.body);
        self.header.encode()
    }

    /// The transmit-ready body bytes
    pub fn pack_body(&self) -> &[u8] {
        &self.body
    }

    /// Encode the complete message (header + body) for transmission
    pub fn pack(&mut self) -> Vec<u8> {
        let header = self.pack_header();
        let mut out = Vec::with_capacity(Header::SIZE + self.body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.body);
        out
    }

    /// The current header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Device name from the header
    pub fn device_name(&self) -> Result<&str> {
        self.header.device_name.as_str()
    }

    /// Device type (payload schema name) from the header
    pub fn device_type(&self) -> Result<&str> {
        self.header.type_name.as_str()
    }

    /// Message timestamp
    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Override the timestamp (outgoing path)
    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.header.timestamp = timestamp;
    }
}
