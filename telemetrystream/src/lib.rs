//! TelemetryStream: continuous telemetry uploads from the fleet, carried over
//! reliable byte-streams.
//!
//! Each connection transports exactly one file:
//!
//! ```ascii
//! LLLL          four ASCII-decimal bytes: filename length, zero-padded, 1-255
//! <name>        the filename
//! <bytes...>    the file, until end of stream
//! ```
//!
//! The server accepts connections in a loop and hands each one to its own
//! worker, so a slow or failing rover never blocks the others. Stored files
//! are keyed by rover: a payload that parses as JSON with a `rover_id` field
//! ends up under `<root>/<rover-id>/<name>`, anything else stays at the root.
//!
//! Uploads are deliberately one connection per file - the length prefix
//! frames exactly one name, so connection reuse would need a different wire
//! format.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::send_file;
pub use error::StreamError;
pub use server::StreamServer;
