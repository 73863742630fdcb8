//! Pieces pertaining to the HTTP/1.1 wire protocol: incremental parsing,
//! body-length decoding, and serialization.

pub mod decode;
pub mod encode;
pub mod parse;
