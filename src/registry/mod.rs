//! Device and converter registries
//!
//! Configuration-rate lookup tables: devices map wire-level (name, type)
//! pairs to stable ids and track their data direction; converters translate
//! between opaque wire payloads and application nodes.

pub mod converter;
pub mod device;

pub use converter::{Converter, ConverterRegistry};
pub use device::{DeviceEntry, DeviceRegistry, DirectionMask};
