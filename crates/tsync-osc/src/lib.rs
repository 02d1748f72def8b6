//! OSC 1.0 codec for the transport sync engine
//!
//! This crate provides:
//! - Typed OSC arguments and messages ([`OscArg`], [`OscMessage`])
//! - Bundles with time tags ([`OscBundle`], [`TimeTag`])
//! - Allocation-free encoding into a reusable buffer
//! - Strict decoding of untrusted datagrams ([`decode_packet`])
//!
//! # Wire Format
//!
//! ```text
//! message: /address\0\0  ,ifs\0\0\0  <int32> <float32> <string\0 padded>
//! bundle:  #bundle\0  <time tag: u32 secs, u32 frac>  (<int32 size> <element>)*
//! ```
//!
//! Every field is big-endian and padded to a multiple of 4 bytes.

mod decode;
mod error;
mod message;
mod packet;

pub use decode::{decode_message, decode_packet, MAX_BUNDLE_DEPTH};
pub use error::{OscError, OscResult};
pub use message::{encode_message, OscArg, OscMessage};
pub use packet::{OscBundle, OscPacket, TimeTag, BUNDLE_TAG};
