//! OSC message and argument types, plus the encoder
//!
//! Encoding appends to a caller-owned buffer so the sender thread can reuse
//! one allocation for every datagram.

use std::fmt;

/// A single typed OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// `i` - 32-bit signed integer
    Int(i32),
    /// `f` - 32-bit IEEE float
    Float(f32),
    /// `s` - UTF-8 string
    String(String),
    /// `b` - binary blob
    Blob(Vec<u8>),
    /// `h` - 64-bit signed integer
    Long(i64),
    /// `d` - 64-bit IEEE float
    Double(f64),
    /// `T` / `F` - boolean carried entirely in the type tag
    Bool(bool),
    /// `N` - nil
    Nil,
    /// `I` - impulse (bang)
    Impulse,
}

impl OscArg {
    /// Type tag character for this argument
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Int(_) => b'i',
            Self::Float(_) => b'f',
            Self::String(_) => b's',
            Self::Blob(_) => b'b',
            Self::Long(_) => b'h',
            Self::Double(_) => b'd',
            Self::Bool(true) => b'T',
            Self::Bool(false) => b'F',
            Self::Nil => b'N',
            Self::Impulse => b'I',
        }
    }

    /// The value if this is an int32 argument
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value if this is a float32 argument
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Nil => write!(f, "nil"),
            Self::Impulse => write!(f, "impulse"),
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// An OSC message: address pattern plus ordered arguments
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    /// Create a message with no arguments
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    /// Builder-style argument append
    pub fn with_arg(mut self, arg: impl Into<OscArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when the message carries no arguments
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument at `index`, if present
    pub fn arg(&self, index: usize) -> Option<&OscArg> {
        self.args.get(index)
    }

    /// Encode into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded message to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        encode_message(&self.address, &self.args, buf);
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Append an encoded OSC message to `buf` without building an [`OscMessage`]
///
/// Padding is computed relative to where the message starts, so the
/// message is well-formed even if `buf` already holds unaligned data.
pub fn encode_message(address: &str, args: &[OscArg], buf: &mut Vec<u8>) {
    let start = buf.len();

    write_string(buf, start, address);

    buf.push(b',');
    for arg in args {
        buf.push(arg.type_tag());
    }
    buf.push(0);
    pad_to_word(buf, start);

    for arg in args {
        match arg {
            OscArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::String(s) => write_string(buf, start, s),
            OscArg::Blob(data) => {
                buf.extend_from_slice(&(data.len() as i32).to_be_bytes());
                buf.extend_from_slice(data);
                pad_to_word(buf, start);
            }
            OscArg::Long(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
            OscArg::Bool(_) | OscArg::Nil | OscArg::Impulse => {}
        }
    }
}

fn write_string(buf: &mut Vec<u8>, start: usize, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    pad_to_word(buf, start);
}

pub(crate) fn pad_to_word(buf: &mut Vec<u8>, start: usize) {
    while (buf.len() - start) % 4 != 0 {
        buf.push(0);
    }
}
