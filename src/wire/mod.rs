//! The wire protocol layer: message framing (C2) and wire version negotiation (C3).

pub mod compression;
pub mod header;
pub mod op_msg;
pub mod version;

pub use compression::{Compressor, CompressorId};
pub use header::{Header, OpCode};
pub use op_msg::RequestIdGenerator;
pub use version::{WireCapabilities, WireVersion};
