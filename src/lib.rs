//! OpenIGTLink connector for bridging devices and host applications
//!
//! This library implements the network connector layer of an image-guided
//! therapy setup: a bidirectional, message-oriented OpenIGTLink endpoint that
//! moves typed binary messages (transforms, images, tracking bundles, ...)
//! between an application and an external device over TCP.
//!
//! # Architecture
//!
//! - **`protocol`** - wire framing: the fixed 58-byte header, CRC-64
//!   validation, and [`FramedMessage`](protocol::FramedMessage), the opaque
//!   header+body unit everything else moves around.
//! - **`io`** - the [`Connector`](io::Connector): role and lifecycle state
//!   machine, one dedicated worker thread for all blocking socket I/O, and
//!   per-device [`CircularBuffer`](io::CircularBuffer)s that hand the latest
//!   completed message to the application thread.
//! - **`registry`** - [`DeviceRegistry`](registry::DeviceRegistry) mapping
//!   wire (name, type) pairs to ids and directions, and
//!   [`ConverterRegistry`](registry::ConverterRegistry) dispatching payloads
//!   to [`Converter`](registry::Converter) implementations.
//! - **`bridge`** - the application-side contract: node handles that
//!   converters read from and write into, and the node factory consulted
//!   while draining.
//! - **`error`** - unified [`IgtlError`] and `Result` alias.
//!
//! The worker thread satisfies a non-blocking contract toward the consumer:
//! received messages land in fixed three-slot buffers with latest-wins
//! semantics, and the application polls [`drain`](io::Connector::drain) at
//! its own pace. A slow consumer sees only the newest sample per device,
//! never a backlog.
//!
//! # Quick start
//!
//! Serve on a port and poll for data:
//!
//! ```no_run
//! use igtl_connector::io::{Connector, ConnectorConfig};
//!
//! let mut server = Connector::new(ConnectorConfig::server(18944));
//! server.start()?;
//!
//! // ... register converters / nodes, then periodically:
//! for device in server.updated_device_names() {
//!     println!("new data from {device}");
//! }
//!
//! server.stop();
//! # Ok::<(), igtl_connector::IgtlError>(())
//! ```
//!
//! Connect to a device and send a framed message:
//!
//! ```no_run
//! use igtl_connector::io::{Connector, ConnectorConfig};
//! use igtl_connector::protocol::FramedMessage;
//!
//! let mut client = Connector::new(ConnectorConfig::client("tracker.local", 18944));
//! client.start()?;
//!
//! let mut frame = FramedMessage::from_parts("Tool01", "TRANSFORM", vec![0u8; 48])?;
//! client.send_frame(&mut frame)?;
//! # Ok::<(), igtl_connector::IgtlError>(())
//! ```
//!
//! # Error handling
//!
//! Transport-level failures (disconnects, malformed frames, short reads) are
//! recovered by the worker thread and surfaced only as
//! [`ConnectorEvent`](io::ConnectorEvent) notifications. Programmer-error
//! failures (starting without a role, duplicate converter registration,
//! sending while disconnected) come back as [`IgtlError`] values. No peer,
//! however corrupt or malicious, can crash the process; the worst it can
//! force is a disconnect/reconnect cycle.

pub mod bridge;
pub mod error;
pub mod io;
pub mod protocol;
pub mod registry;

pub use error::{IgtlError, Result};
