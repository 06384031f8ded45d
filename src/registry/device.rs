//! Device registry: wire (name, type) pairs to stable ids
//!
//! Every logical data source/sink observed on a connection (or registered
//! ahead of time) gets one entry keyed by its (name, type) pair. The entry
//! carries a direction mask that unions all registrations; clearing the last
//! direction bit removes the entry.

use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

/// Data direction bits for a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionMask(u8);

impl DirectionMask {
    /// No direction recorded yet
    pub const UNSPECIFIED: DirectionMask = DirectionMask(0);
    /// Device sends data toward the application
    pub const INCOMING: DirectionMask = DirectionMask(1);
    /// Device receives data from the application
    pub const OUTGOING: DirectionMask = DirectionMask(1 << 1);

    /// True if every bit of `other` is set in `self`
    pub fn contains(self, other: DirectionMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no direction bit is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn clear(&mut self, other: DirectionMask) {
        self.0 &= !other.0;
    }
}

impl BitOr for DirectionMask {
    type Output = DirectionMask;

    fn bitor(self, rhs: DirectionMask) -> DirectionMask {
        DirectionMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirectionMask {
    fn bitor_assign(&mut self, rhs: DirectionMask) {
        self.0 |= rhs.0;
    }
}

/// One registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Stable id, unique for the registry's lifetime
    pub id: u64,
    /// Wire device name
    pub name: String,
    /// Wire device type
    pub device_type: String,
    /// Union of all registered directions
    pub direction: DirectionMask,
}

/// Registry of devices seen or pre-registered on a connector
///
/// Lookup is a linear scan: the table holds a handful of entries and mutates
/// at configuration rate, not data rate.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: BTreeMap<u64, DeviceEntry>,
    next_id: u64,
    restrict: bool,
}

impl DeviceRegistry {
    /// Create an empty registry with restriction off
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Find a device id by its wire (name, type) pair
    pub fn lookup(&self, name: &str, device_type: &str) -> Option<u64> {
        self.entries
            .values()
            .find(|e| e.name == name && e.device_type == device_type)
            .map(|e| e.id)
    }

    /// Register a device, or add directions to an existing entry
    ///
    /// Registering the same (name, type) pair again returns the same id and
    /// unions the direction mask.
    pub fn register(&mut self, name: &str, device_type: &str, direction: DirectionMask) -> u64 {
        if let Some(id) = self.lookup(name, device_type) {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.direction |= direction;
            }
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            DeviceEntry {
                id,
                name: name.to_owned(),
                device_type: device_type.to_owned(),
                direction,
            },
        );
        id
    }

    /// Clear direction bits from a device entry
    ///
    /// Passing [`DirectionMask::UNSPECIFIED`] clears every direction. The
    /// entry is removed once its mask is empty. Unknown devices are a no-op.
    /// Returns true when the entry was removed.
    pub fn unregister(&mut self, name: &str, device_type: &str, direction: DirectionMask) -> bool {
        match self.lookup(name, device_type) {
            Some(id) => self.clear_direction(id, direction),
            None => false,
        }
    }

    /// Remove a device entry outright by id
    pub fn unregister_id(&mut self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    fn clear_direction(&mut self, id: u64, direction: DirectionMask) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if direction.is_empty() {
            entry.direction = DirectionMask::UNSPECIFIED;
        } else {
            entry.direction.clear(direction);
        }
        if entry.direction.is_empty() {
            self.entries.remove(&id);
            return true;
        }
        false
    }

    /// Whether inbound messages from unregistered devices are discarded
    pub fn restrict(&self) -> bool {
        self.restrict
    }

    /// Toggle name restriction
    ///
    /// When on, inbound messages whose (name, type) is unknown are consumed
    /// off the stream but never buffered; when off, unknown devices are
    /// auto-registered as they arrive.
    pub fn set_restrict(&mut self, restrict: bool) {
        self.restrict = restrict;
    }

    /// Entry for a given id
    pub fn device(&self, id: u64) -> Option<&DeviceEntry> {
        self.entries.get(&id)
    }

    /// All entries, in id order
    pub fn devices(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.values()
    }

    /// Ids of entries whose mask contains every bit of `direction`
    pub fn ids_with_direction(&self, direction: DirectionMask) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| e.direction.contains(direction) && !e.direction.is_empty())
            .map(|e| e.id)
            .collect()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no device is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register("Probe", "TRANSFORM", DirectionMask::INCOMING);
        let b = reg.register("Probe", "TRANSFORM", DirectionMask::INCOMING);
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_direction_union() {
        let mut reg = DeviceRegistry::new();
        let id = reg.register("Probe", "TRANSFORM", DirectionMask::INCOMING);
        reg.register("Probe", "TRANSFORM", DirectionMask::OUTGOING);
        let entry = reg.device(id).unwrap();
        assert!(entry.direction.contains(DirectionMask::INCOMING));
        assert!(entry.direction.contains(DirectionMask::OUTGOING));
    }

    #[test]
    fn test_distinct_types_are_distinct_devices() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register("Probe", "TRANSFORM", DirectionMask::INCOMING);
        let b = reg.register("Probe", "IMAGE", DirectionMask::INCOMING);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_unregister_clears_bits_then_removes() {
        let mut reg = DeviceRegistry::new();
        let id = reg.register(
            "Probe",
            "TRANSFORM",
            DirectionMask::INCOMING | DirectionMask::OUTGOING,
        );
        assert!(!reg.unregister("Probe", "TRANSFORM", DirectionMask::INCOMING));
        assert!(reg.device(id).is_some());
        assert!(reg.unregister("Probe", "TRANSFORM", DirectionMask::OUTGOING));
        assert!(reg.device(id).is_none());
    }

    #[test]
    fn test_unregister_unspecified_removes_entry() {
        let mut reg = DeviceRegistry::new();
        reg.register("Probe", "TRANSFORM", DirectionMask::INCOMING);
        assert!(reg.unregister("Probe", "TRANSFORM", DirectionMask::UNSPECIFIED));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let mut reg = DeviceRegistry::new();
        assert!(!reg.unregister("Ghost", "TRANSFORM", DirectionMask::INCOMING));
    }

    #[test]
    fn test_ids_monotonic_after_removal() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register("A", "TRANSFORM", DirectionMask::INCOMING);
        reg.unregister_id(a);
        let b = reg.register("B", "TRANSFORM", DirectionMask::INCOMING);
        assert!(b > a);
    }

    #[test]
    fn test_direction_queries() {
        let mut reg = DeviceRegistry::new();
        let a = reg.register("A", "TRANSFORM", DirectionMask::INCOMING);
        let b = reg.register("B", "IMAGE", DirectionMask::OUTGOING);
        assert_eq!(reg.ids_with_direction(DirectionMask::INCOMING), vec![a]);
        assert_eq!(reg.ids_with_direction(DirectionMask::OUTGOING), vec![b]);
    }
}
