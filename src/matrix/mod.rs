//! Matrix-facing components: the room-state cache (C2) and the channel
//! name deriver (C3). The HTTP sync client itself lives outside this
//! crate; these modules only operate on already-parsed event fields.

pub mod deriver;
pub mod room;
pub mod store;
