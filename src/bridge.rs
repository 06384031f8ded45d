//! Application bridge contract
//!
//! The connector does not own an application data model. It talks to one
//! through two narrow seams: [`ApplicationNode`], the unit a converter reads
//! from or writes into, and [`ApplicationBridge`], which resolves and creates
//! nodes during a drain. Node handles are shared (`Arc<Mutex<_>>`) because
//! the application and the connector both hold them across thread boundaries.

use std::any::Any;
use std::sync::{Arc, Mutex};

/// Mutation events observable on application nodes
///
/// Converters declare which of these should trigger outgoing serialization;
/// the application reports them via
/// [`Connector::process_node_event`](crate::io::Connector::process_node_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    /// Generic node content change
    Modified,
    /// A transform carried by the node changed
    TransformModified,
    /// Image/pixel data carried by the node changed
    ImageDataModified,
}

/// One application-side data object a converter can read or populate
///
/// `name` maps to the wire device name, `tag` identifies the node kind a
/// converter advertises via
/// [`Converter::application_tag`](crate::registry::Converter::application_tag).
pub trait ApplicationNode: Send {
    /// Node name; doubles as the wire device name
    fn name(&self) -> &str;

    /// Node kind tag used for converter dispatch
    fn tag(&self) -> &str;

    /// Record that this node's content changed (called after a drain writes
    /// into it)
    fn mark_modified(&mut self);

    /// Downcast support for converters
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support for converters
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to an application node
pub type SharedNode = Arc<Mutex<dyn ApplicationNode>>;

/// Node lookup and creation callbacks supplied by the application
///
/// Consulted by [`Connector::drain`](crate::io::Connector::drain) when an
/// inbound message has no matching registered incoming node.
pub trait ApplicationBridge {
    /// Find an existing node by kind tag and name
    fn find_node(&self, tag: &str, name: &str) -> Option<SharedNode>;

    /// Create a node for the given kind tag and name
    ///
    /// The bridge keeps ownership of the created node; the returned handle is
    /// shared with the connector.
    fn create_node(&mut self, tag: &str, name: &str) -> SharedNode;
}
