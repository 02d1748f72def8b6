//! OSC codec error types

use thiserror::Error;

/// Errors produced while decoding an OSC packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OscError {
    /// Zero-length datagram
    #[error("Empty OSC packet")]
    Empty,

    /// Packet or element length is not a multiple of 4
    #[error("OSC data size {0} is not a multiple of 4")]
    Misaligned(usize),

    /// A field extends past the end of the data
    #[error("Truncated OSC data: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// String without a NUL terminator
    #[error("OSC string at offset {0} is not NUL-terminated")]
    UnterminatedString(usize),

    /// String bytes are not valid UTF-8
    #[error("OSC string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    /// Address does not start with '/'
    #[error("Invalid OSC address: {0:?}")]
    InvalidAddress(String),

    /// Arguments present but no ',' type tag string
    #[error("Missing OSC type tag string")]
    MissingTypeTags,

    /// Type tag this codec does not understand
    #[error("Unknown OSC type tag '{0}'")]
    UnknownTypeTag(char),

    /// Negative blob or bundle element size
    #[error("Negative OSC size: {0}")]
    NegativeSize(i32),

    /// Bytes left over after the last argument
    #[error("{0} trailing bytes after OSC message")]
    TrailingBytes(usize),

    /// Bundles nested deeper than the decoder allows
    #[error("OSC bundle nesting exceeds {0} levels")]
    BundleTooDeep(usize),
}

/// Result type for OSC codec operations
pub type OscResult<T> = Result<T, OscError>;
