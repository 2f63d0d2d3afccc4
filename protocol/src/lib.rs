//! Framed IPC transport between the orchestrator (parent) and the executor
//! (child).
//!
//! A frame is a 4-byte big-endian payload length followed by that many bytes
//! of MessagePack. The payload is a self-describing map whose `type` key
//! selects one of the frame kinds in [`Frame`]. The hard limit on a whole
//! frame is 16 MiB.

mod codec;
mod error;
mod frame;
mod sink;


pub use codec::FramedReader;
pub use error::{CodecError, SinkError};
pub use frame::{FileWriteFrame, Frame, RunResultFrame, RunResultOutcome};
pub use sink::FramedSink;

/// Byte width of the frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;
