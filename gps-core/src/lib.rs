//! gps-core: Pure decode library for GPS tracker wire protocols.
//!
//! No async and no socket I/O, just framing rules, protocol decoders and
//! the shared parsing primitives they are built from. The `gps-listener`
//! binary drives these over TCP.

pub mod codec;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod framing;
pub mod message;
pub mod protocol;
pub mod types;

// Re-export commonly used types at crate root
pub use cursor::ByteCursor;
pub use dispatch::{Dispatcher, PortRole, Selection, SNIFF_WINDOW};
pub use framing::{Framing, Split, MAX_FRAME_LEN};
pub use message::{Decoded, MessageInput};
pub use protocol::Protocol;
pub use types::*;
