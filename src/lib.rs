//! Per-connection IRC↔Matrix translation engine.
//!
//! Each accepted IRC session owns one instance of every module here: the
//! wire codec (`ircd::codec`), the IRC-side registration/capability/batch
//! state (`ircd::connection`), the channel join/replay lifecycle
//! (`ircd::channel`), the Matrix room cache (`matrix::store`), and the pure
//! channel-name deriver (`matrix::deriver`). `gateway` wires the five
//! together; the TCP listener, the Matrix HTTP client, SASL and the
//! administrative command dispatcher live outside this crate.

pub mod config;
pub mod error;
pub mod gateway;
pub mod ircd;
pub mod matrix;

pub use error::CoreError;
