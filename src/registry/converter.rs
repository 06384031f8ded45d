//! Converter trait and registry
//!
//! A converter translates between opaque wire payloads and application nodes
//! for one or more wire device types. The registry is a string-keyed dispatch
//! table: wire type name to converter on the inbound side, application tag to
//! converter on the outbound side. Converters are shared with the
//! application; the registry never owns them exclusively.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::{ApplicationNode, NodeEvent};
use crate::error::{IgtlError, Result};
use crate::protocol::frame::FramedMessage;

/// Payload translator for one or more wire device types
///
/// A converter answering to several wire type names simply returns them all
/// from [`wire_types`](Converter::wire_types); callers cannot tell single-
/// and multi-type converters apart.
pub trait Converter: Send + Sync {
    /// Wire type names this converter handles (e.g. `"TRANSFORM"`)
    ///
    /// Must be non-empty; an empty list fails registration.
    fn wire_types(&self) -> Vec<&str>;

    /// Application node kind this converter produces and consumes
    fn application_tag(&self) -> &str;

    /// Node mutation events that should trigger outgoing serialization
    fn interested_events(&self) -> Vec<NodeEvent> {
        vec![NodeEvent::Modified]
    }

    /// Decode a received frame into an application node
    fn wire_to_application(&self, frame: &FramedMessage, node: &mut dyn ApplicationNode)
        -> Result<()>;

    /// Serialize a node into an outgoing frame
    ///
    /// `Ok(None)` means the event produced nothing to send (e.g. the node is
    /// not in a sendable state); that is not an error.
    fn application_to_wire(
        &self,
        event: NodeEvent,
        node: &dyn ApplicationNode,
    ) -> Result<Option<FramedMessage>>;
}

/// Dispatch table from wire type names and application tags to converters
#[derive(Default)]
pub struct ConverterRegistry {
    by_wire_type: HashMap<String, Arc<dyn Converter>>,
    by_tag: HashMap<String, Arc<dyn Converter>>,
    converters: Vec<Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        ConverterRegistry::default()
    }

    /// Register a converter under every wire type name it declares
    ///
    /// Fails without side effects when the converter declares no names
    /// ([`IgtlError::UnnamedConverter`]) or when any declared name is already
    /// taken ([`IgtlError::DuplicateConverter`]); the existing converter
    /// keeps its registration either way.
    ///
    /// Application tags are not required to be unique: the first converter
    /// registered for a tag wins [`by_application_tag`] lookups.
    ///
    /// [`by_application_tag`]: ConverterRegistry::by_application_tag
    pub fn register(&mut self, converter: Arc<dyn Converter>) -> Result<()> {
        let names = converter.wire_types();
        if names.is_empty() {
            return Err(IgtlError::UnnamedConverter);
        }
        for name in &names {
            if self.by_wire_type.contains_key(*name) {
                return Err(IgtlError::DuplicateConverter((*name).to_owned()));
            }
        }

        for name in &names {
            self.by_wire_type
                .insert((*name).to_owned(), Arc::clone(&converter));
        }
        self.by_tag
            .entry(converter.application_tag().to_owned())
            .or_insert_with(|| Arc::clone(&converter));
        self.converters.push(converter);
        Ok(())
    }

    /// Remove a converter and all of its index entries
    pub fn unregister(&mut self, converter: &Arc<dyn Converter>) {
        self.by_wire_type
            .retain(|_, v| !Arc::ptr_eq(v, converter));
        self.by_tag.retain(|_, v| !Arc::ptr_eq(v, converter));
        self.converters.retain(|v| !Arc::ptr_eq(v, converter));
    }

    /// Converter handling a wire type name
    pub fn by_wire_type(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.by_wire_type.get(name).cloned()
    }

    /// Converter producing/consuming an application node kind
    pub fn by_application_tag(&self, tag: &str) -> Option<Arc<dyn Converter>> {
        self.by_tag.get(tag).cloned()
    }

    /// Registered converters in registration order
    pub fn converters(&self) -> &[Arc<dyn Converter>] {
        &self.converters
    }

    /// Number of registered converters
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeConverter {
        types: Vec<&'static str>,
        tag: &'static str,
    }

    impl Converter for FakeConverter {
        fn wire_types(&self) -> Vec<&str> {
            self.types.clone()
        }

        fn application_tag(&self) -> &str {
            self.tag
        }

        fn wire_to_application(
            &self,
            _frame: &FramedMessage,
            _node: &mut dyn ApplicationNode,
        ) -> Result<()> {
            Ok(())
        }

        fn application_to_wire(
            &self,
            _event: NodeEvent,
            _node: &dyn ApplicationNode,
        ) -> Result<Option<FramedMessage>> {
            Ok(None)
        }
    }

    fn converter(types: Vec<&'static str>, tag: &'static str) -> Arc<dyn Converter> {
        Arc::new(FakeConverter { types, tag })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ConverterRegistry::new();
        let c = converter(vec!["TRANSFORM"], "Transform");
        reg.register(Arc::clone(&c)).unwrap();

        assert!(Arc::ptr_eq(&reg.by_wire_type("TRANSFORM").unwrap(), &c));
        assert!(Arc::ptr_eq(&reg.by_application_tag("Transform").unwrap(), &c));
        assert!(reg.by_wire_type("IMAGE").is_none());
    }

    #[test]
    fn test_wire_type_collision_keeps_first() {
        let mut reg = ConverterRegistry::new();
        let first = converter(vec!["TRANSFORM"], "Transform");
        let second = converter(vec!["TRANSFORM"], "LinearTransform");

        reg.register(Arc::clone(&first)).unwrap();
        let err = reg.register(Arc::clone(&second)).unwrap_err();
        assert!(matches!(err, IgtlError::DuplicateConverter(ref n) if n == "TRANSFORM"));

        // the original registration still resolves
        assert!(Arc::ptr_eq(&reg.by_wire_type("TRANSFORM").unwrap(), &first));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_multi_type_converter() {
        let mut reg = ConverterRegistry::new();
        let c = converter(vec!["POSITION", "QTDATA"], "Tracking");
        reg.register(Arc::clone(&c)).unwrap();

        assert!(Arc::ptr_eq(&reg.by_wire_type("POSITION").unwrap(), &c));
        assert!(Arc::ptr_eq(&reg.by_wire_type("QTDATA").unwrap(), &c));
    }

    #[test]
    fn test_multi_type_partial_collision_has_no_effect() {
        let mut reg = ConverterRegistry::new();
        let first = converter(vec!["POSITION"], "Tracking");
        let second = converter(vec!["QTDATA", "POSITION"], "Tracking2");

        reg.register(first).unwrap();
        assert!(reg.register(second).is_err());
        // the colliding registration must not leave partial entries behind
        assert!(reg.by_wire_type("QTDATA").is_none());
    }

    #[test]
    fn test_empty_wire_types_rejected() {
        let mut reg = ConverterRegistry::new();
        let c = converter(vec![], "Nothing");
        assert!(matches!(reg.register(c), Err(IgtlError::UnnamedConverter)));
    }

    #[test]
    fn test_unregister_removes_all_entries() {
        let mut reg = ConverterRegistry::new();
        let c = converter(vec!["POSITION", "QTDATA"], "Tracking");
        reg.register(Arc::clone(&c)).unwrap();
        reg.unregister(&c);

        assert!(reg.by_wire_type("POSITION").is_none());
        assert!(reg.by_wire_type("QTDATA").is_none());
        assert!(reg.by_application_tag("Tracking").is_none());
        assert!(reg.is_empty());
    }
}
