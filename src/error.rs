use thiserror::Error;

/// Error kinds the core distinguishes, per the error handling design.
///
/// Call sites match on variant instead of inspecting message text; the
/// glue layer in `gateway` is what maps `UnknownChannel`/`NotJoined` onto
/// the 403/442 numerics `ircd::channel` already knows how to build.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed IRC line: {0}")]
    MalformedLine(String),

    #[error("no such channel: {0}")]
    UnknownChannel(String),

    #[error("not on channel: {0}")]
    NotJoined(String),

    #[error("duplicate event, ignored: {0}")]
    DuplicateEvent(String),

    #[error("transient matrix sync failure: {0}")]
    SyncTransientFailure(String),

    #[error("fatal matrix sync failure: {0}")]
    SyncFatalFailure(String),

    #[error("channel-sync callback failed: {0}")]
    CallbackFailure(String),

    /// Not one of the error kinds above: the socket I/O failure that
    /// `tokio_util::codec::Framed` needs a `From<io::Error>` conversion
    /// for. Not part of the error taxonomy in the error handling design;
    /// just the seam where this crate's codec meets the byte stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
