//! Wire formats.
//!
//! Requests are `:`-delimited ASCII frames (see [`frame`]). The tracker
//! answers with bare text; peer sessions answer with length-prefixed
//! [`message::Message`]s so several chunks can share one connection.

pub mod frame;
pub mod message;

pub use frame::{PeerRequest, REPLY_NO_PEER, REPLY_OK, TrackerRequest};
pub use message::{Message, MessageKind, read_message, write_message};
