//! OpenIGTLink wire protocol: framing, header codec, and CRC
//!
//! This module owns the byte-level representation of one protocol unit.
//! Message *content* is opaque here; interpreting a body is the job of a
//! registered [`Converter`](crate::registry::Converter).

pub mod crc;
pub mod frame;
pub mod header;

pub use crc::{calculate_crc, verify_crc};
pub use frame::FramedMessage;
pub use header::{DeviceName, Header, Timestamp, TypeName};
