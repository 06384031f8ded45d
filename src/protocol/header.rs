//! Fixed 58-byte message header codec
//!
//! Every OpenIGTLink message starts with the same header layout, all
//! numeric fields big-endian:
//!
//! | field       | size | content                                  |
//! |-------------|------|------------------------------------------|
//! | version     | 2    | protocol version (2 for v2/v3)           |
//! | type name   | 12   | payload schema name, NUL-padded ASCII    |
//! | device name | 20   | logical device name, NUL-padded          |
//! | timestamp   | 8    | seconds (high 32) + fraction (low 32)    |
//! | body size   | 8    | body length in bytes                     |
//! | crc         | 8    | CRC-64 over the body                     |

use bytes::{Buf, BufMut};

use crate::error::{IgtlError, Result};

fn pack_padded<const N: usize>(name: &str, what: &'static str) -> Result<[u8; N]> {
    if name.len() > N {
        return Err(IgtlError::MalformedHeader(format!(
            "{what} too long: {} bytes (max {N})",
            name.len()
        )));
    }
    let mut bytes = [0u8; N];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    Ok(bytes)
}

fn unpack_padded<'a, const N: usize>(bytes: &'a [u8; N], what: &'static str) -> Result<&'a str> {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(N);
    std::str::from_utf8(&bytes[..len])
        .map_err(|_| IgtlError::MalformedHeader(format!("invalid UTF-8 in {what}")))
}

/// Wire device type name (12 bytes, NUL-padded)
///
/// Identifies the payload schema, e.g. `"TRANSFORM"` or `"IMAGE"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName([u8; 12]);

impl TypeName {
    /// Build from a string, rejecting names over 12 bytes
    pub fn new(name: &str) -> Result<Self> {
        pack_padded(name, "type name").map(TypeName)
    }

    /// The name with NUL padding trimmed
    pub fn as_str(&self) -> Result<&str> {
        unpack_padded(&self.0, "type name")
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl From<[u8; 12]> for TypeName {
    fn from(bytes: [u8; 12]) -> Self {
        TypeName(bytes)
    }
}

/// Wire device name (20 bytes, NUL-padded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName([u8; 20]);

impl DeviceName {
    /// Build from a string, rejecting names over 20 bytes
    pub fn new(name: &str) -> Result<Self> {
        pack_padded(name, "device name").map(DeviceName)
    }

    /// The name with NUL padding trimmed
    pub fn as_str(&self) -> Result<&str> {
        unpack_padded(&self.0, "device name")
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for DeviceName {
    fn from(bytes: [u8; 20]) -> Self {
        DeviceName(bytes)
    }
}

/// Message timestamp: seconds since the Unix epoch plus a 32-bit fraction
///
/// The fraction maps the low 32 bits onto [0, 1) second, giving roughly
/// quarter-nanosecond resolution on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Whole seconds since 1970-01-01 00:00:00 UTC
    pub seconds: u32,
    /// Fractional second scaled to the full u32 range
    pub fraction: u32,
}

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Timestamp {
            seconds: now.as_secs() as u32,
            fraction: fraction as u32,
        }
    }

    /// The zero timestamp ("no timestamp")
    pub fn zero() -> Self {
        Timestamp::default()
    }

    /// Wire representation: seconds in the high half, fraction in the low
    pub fn to_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// Parse the wire representation
    pub fn from_u64(value: u64) -> Self {
        Timestamp {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Floating-point seconds since the epoch
    pub fn to_f64(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / (u32::MAX as f64 + 1.0)
    }

    /// Build from floating-point seconds since the epoch
    pub fn from_f64(secs: f64) -> Self {
        let seconds = secs.trunc() as u32;
        let fraction = (secs.fract() * (u32::MAX as f64 + 1.0)) as u32;
        Timestamp { seconds, fraction }
    }
}

/// Decoded message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol version
    pub version: u16,
    /// Payload schema name
    pub type_name: TypeName,
    /// Logical device name
    pub device_name: DeviceName,
    /// Message timestamp
    pub timestamp: Timestamp,
    /// Body length in bytes
    pub body_size: u64,
    /// CRC-64 over the body
    pub crc: u64,
}

impl Header {
    /// Header size in bytes, a wire constant
    pub const SIZE: usize = 58;

    /// Decode a header from exactly [`Header::SIZE`] bytes
    ///
    /// The caller must have read exactly this many bytes off the stream;
    /// any other length is a framing violation.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::SIZE {
            return Err(IgtlError::MalformedHeader(format!(
                "header blob is {} bytes, wire header is {}",
                buf.len(),
                Self::SIZE
            )));
        }

        let mut buf = buf;
        let version = buf.get_u16();

        let mut type_bytes = [0u8; 12];
        buf.copy_to_slice(&mut type_bytes);
        let mut device_bytes = [0u8; 20];
        buf.copy_to_slice(&mut device_bytes);

        let timestamp = Timestamp::from_u64(buf.get_u64());
        let body_size = buf.get_u64();
        let crc = buf.get_u64();

        Ok(Header {
            version,
            type_name: TypeName::from(type_bytes),
            device_name: DeviceName::from(device_bytes),
            timestamp,
            body_size,
            crc,
        })
    }

    /// Encode the header into its 58-byte wire form
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut buf = &mut out[..];
        buf.put_u16(self.version);
        buf.put_slice(self.type_name.as_bytes());
        buf.put_slice(self.device_name.as_bytes());
        buf.put_u64(self.timestamp.to_u64());
        buf.put_u64(self.body_size);
        buf.put_u64(self.crc);
        out
    }
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: 2,
            type_name: TypeName([0u8; 12]),
            device_name: DeviceName([0u8; 20]),
            timestamp: Timestamp::zero(),
            body_size: 0,
            crc: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_limits() {
        assert!(TypeName::new("TRANSFORM").is_ok());
        assert!(TypeName::new("TOO_LONG_TYPE_NAME").is_err());
    }

    #[test]
    fn test_device_name_trims_padding() {
        let name = DeviceName::new("Probe").unwrap();
        assert_eq!(name.as_str().unwrap(), "Probe");
    }

    #[test]
    fn test_timestamp_u64_roundtrip() {
        let ts = Timestamp {
            seconds: 1_234_567_890,
            fraction: 0xABCD_EF12,
        };
        assert_eq!(Timestamp::from_u64(ts.to_u64()), ts);
    }

    #[test]
    fn test_timestamp_f64() {
        let ts = Timestamp {
            seconds: 1000,
            fraction: 0x8000_0000,
        };
        assert!((ts.to_f64() - 1000.5).abs() < 1e-6);
        let back = Timestamp::from_f64(1000.5);
        assert_eq!(back.seconds, 1000);
        assert!((back.fraction as i64 - 0x8000_0000i64).abs() < 16);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            version: 2,
            type_name: TypeName::new("TRANSFORM").unwrap(),
            device_name: DeviceName::new("Tracker").unwrap(),
            timestamp: Timestamp::from_u64(0x0102_0304_0506_0708),
            body_size: 48,
            crc: 0xDEAD_BEEF_CAFE_BABE,
        };
        let encoded = header.encode();
        assert_eq!(encoded.len(), Header::SIZE);
        assert_eq!(Header::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_decode_requires_exact_size() {
        assert!(Header::decode(&[0u8; 30]).is_err());
        assert!(Header::decode(&[0u8; 59]).is_err());
    }

    #[test]
    fn test_big_endian_layout() {
        let header = Header {
            version: 0x0102,
            body_size: 0x1122_3344_5566_7788,
            ..Header::default()
        };
        let encoded = header.encode();
        assert_eq!(&encoded[0..2], &[0x01, 0x02]);
        // body size sits after version + names + timestamp
        assert_eq!(&encoded[42..50], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    }
}
