//! Wire protocol for ringkv: frame header enums, decoded messages and the
//! big-endian length-prefixed codec shared by nodes, the orchestrator and
//! clients.

pub mod codec;
pub mod message;
pub mod status;

pub use codec::{encode_frame, CodecError, FrameCodec, MAX_FRAME_LEN};
pub use message::{format_timestamp, parse_timestamp, KeyValue, Message};
pub use status::{Source, StatusType};
