//! bus-protocol: SSM wire codec for the korebus message bus.
//!
//! One SSM frame is a length-prefixed message id plus a typed key/value
//! argument map:
//!
//! ```text
//! uint32_be  total_length          (includes these 4 bytes)
//! uint8      options               (0 = key-value map; others reserved)
//! uint8      mid_len
//! bytes      message_id[mid_len]   (UTF-8)
//! repeat until end of frame:
//!   uint8     key_len              (1..=255)
//!   bytes     key[key_len]         (UTF-8)
//!   uint8     value_type           (0 = binary, 1 = UTF-8 string, 2 = u32)
//!   uint24_be value_len
//!   bytes     value[value_len]
//! ```
//!
//! `total_length` is authoritative: [`FrameParser`] waits until that many
//! bytes are buffered, then consumes exactly that many. Any parse error
//! inside a complete frame discards the buffer — the connection owner is
//! expected to close.
//!
//! Arguments keep insertion order, so a canonical frame re-serializes to the
//! exact bytes it was parsed from.

pub mod frame;
pub mod value;

pub use frame::{CodecError, FrameParser, parse_frame, serialize};
pub use value::{Args, Value};

/// Message ids consumed or produced by the bus router itself.
/// Frames carrying these ids are never forwarded between peers.
pub mod msg {
    pub const HELLO: &str = "HELLO";
    pub const LIST_CLIENTS: &str = "LIST_CLIENTS";
    pub const JOIN: &str = "JOIN";
    pub const LEAVE: &str = "LEAVE";
    pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";
    pub const CLIENT_NOT_FOUND: &str = "CLIENT_NOT_FOUND";
}

/// Argument keys with routing semantics.
pub mod key {
    /// Target client id; presence selects unicast routing.
    pub const TO: &str = "TO";
    /// Sender client id, stamped by the router on routed frames.
    pub const FROM: &str = "FROM";
    /// Sender-chosen correlation token, echoed in synchronous replies.
    pub const SEQ: &str = "SEQ";
    /// Reply marker, set to `1` on router-generated replies.
    pub const IRY: &str = "IRY";
}
