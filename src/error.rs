//! Crate-wide error type.
//!
//! Mirrors the shape of the teacher's `hyper::Error` (a small set of named
//! failure kinds, each optionally carrying a cause) but expressed with
//! `thiserror` instead of a hand-rolled `Kind`/`ErrorImpl` pair, matching the
//! style `rusty-timer`'s `rt-updater` and `forwarder` crates use for their
//! own error enums.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed HTTP message: {0}")]
    Parse(String),

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connect to {addr} failed: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("no flow accepted the request")]
    FlowDoesNotAccept,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}
