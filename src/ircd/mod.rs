//! IRC-facing components: the wire codec (C1), connection/session state
//! (C5), channel lifecycle (C4), and the numeric reply builders they
//! share.

pub mod channel;
pub mod codec;
pub mod connection;
pub mod numerics;
