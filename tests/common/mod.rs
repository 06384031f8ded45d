//! Shared fixtures for integration tests: a transform node/converter pair and
//! a minimal application bridge.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use igtl_connector::bridge::{ApplicationBridge, ApplicationNode, NodeEvent, SharedNode};
use igtl_connector::protocol::FramedMessage;
use igtl_connector::registry::Converter;
use igtl_connector::{IgtlError, Result};

/// Application node carrying a 3x4 tracking matrix
pub struct TransformNode {
    name: String,
    pub matrix: [f32; 12],
    pub modified: usize,
}

impl TransformNode {
    pub fn shared(name: &str, matrix: [f32; 12]) -> SharedNode {
        Arc::new(Mutex::new(TransformNode {
            name: name.to_owned(),
            matrix,
            modified: 0,
        }))
    }
}

impl ApplicationNode for TransformNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        "Transform"
    }

    fn mark_modified(&mut self) {
        self.modified += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Converter between `TRANSFORM` wire bodies (12 big-endian f32, 48 bytes)
/// and [`TransformNode`]s
pub struct TransformConverter;

impl Converter for TransformConverter {
    fn wire_types(&self) -> Vec<&str> {
        vec!["TRANSFORM"]
    }

    fn application_tag(&self) -> &str {
        "Transform"
    }

    fn wire_to_application(
        &self,
        frame: &FramedMessage,
        node: &mut dyn ApplicationNode,
    ) -> Result<()> {
        let node = node
            .as_any_mut()
            .downcast_mut::<TransformNode>()
            .expect("transform node");
        let body = frame.body();
        if body.len() != 48 {
            return Err(IgtlError::InvalidSize {
                expected: 48,
                actual: body.len(),
            });
        }
        for (i, chunk) in body.chunks_exact(4).enumerate() {
            node.matrix[i] = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    fn application_to_wire(
        &self,
        _event: NodeEvent,
        node: &dyn ApplicationNode,
    ) -> Result<Option<FramedMessage>> {
        let node = node
            .as_any()
            .downcast_ref::<TransformNode>()
            .expect("transform node");
        let mut body = Vec::with_capacity(48);
        for value in node.matrix {
            body.extend_from_slice(&value.to_be_bytes());
        }
        Ok(Some(FramedMessage::from_parts(
            node.name(),
            "TRANSFORM",
            body,
        )?))
    }
}

/// Bridge that creates [`TransformNode`]s on demand and remembers them by
/// (tag, name)
#[derive(Default)]
pub struct TestBridge {
    pub nodes: HashMap<(String, String), SharedNode>,
}

impl TestBridge {
    pub fn node(&self, tag: &str, name: &str) -> Option<SharedNode> {
        self.nodes.get(&(tag.to_owned(), name.to_owned())).cloned()
    }
}

impl ApplicationBridge for TestBridge {
    fn find_node(&self, tag: &str, name: &str) -> Option<SharedNode> {
        self.node(tag, name)
    }

    fn create_node(&mut self, tag: &str, name: &str) -> SharedNode {
        let node = TransformNode::shared(name, [0.0; 12]);
        self.nodes
            .insert((tag.to_owned(), name.to_owned()), Arc::clone(&node));
        node
    }
}

/// Install a log subscriber once so `RUST_LOG` works in tests
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `cond` every 10 ms until it holds or `timeout` expires
pub fn poll_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Pack a complete wire frame for a device
pub fn packed_frame(name: &str, device_type: &str, body: Vec<u8>) -> Vec<u8> {
    FramedMessage::from_parts(name, device_type, body)
        .expect("frame parts")
        .pack()
}
