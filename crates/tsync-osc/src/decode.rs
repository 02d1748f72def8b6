//! OSC decoding for untrusted datagrams
//!
//! The decoder never panics on malformed input: every length is checked
//! before slicing and bundle recursion is depth-limited.

use crate::error::{OscError, OscResult};
use crate::message::{OscArg, OscMessage};
use crate::packet::{OscBundle, OscPacket, TimeTag, BUNDLE_TAG};

/// Maximum nesting of bundles inside bundles
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Decode one datagram into a message or bundle
pub fn decode_packet(data: &[u8]) -> OscResult<OscPacket> {
    decode_at_depth(data, 0)
}

/// Decode a datagram that must be a single message
pub fn decode_message(data: &[u8]) -> OscResult<OscMessage> {
    check_frame(data)?;
    let mut reader = Reader::new(data);
    let message = read_message(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(OscError::TrailingBytes(reader.remaining()));
    }
    Ok(message)
}

fn check_frame(data: &[u8]) -> OscResult<()> {
    if data.is_empty() {
        return Err(OscError::Empty);
    }
    if data.len() % 4 != 0 {
        return Err(OscError::Misaligned(data.len()));
    }
    Ok(())
}

fn decode_at_depth(data: &[u8], depth: usize) -> OscResult<OscPacket> {
    check_frame(data)?;

    if data.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::BundleTooDeep(MAX_BUNDLE_DEPTH));
        }
        return decode_bundle(data, depth).map(OscPacket::Bundle);
    }

    decode_message(data).map(OscPacket::Message)
}

fn decode_bundle(data: &[u8], depth: usize) -> OscResult<OscBundle> {
    let mut reader = Reader::new(data);
    reader.read_bytes(BUNDLE_TAG.len())?;

    let time_tag = TimeTag {
        seconds: reader.read_u32()?,
        fraction: reader.read_u32()?,
    };

    let mut content = Vec::new();
    while reader.remaining() > 0 {
        let size = reader.read_i32()?;
        if size < 0 {
            return Err(OscError::NegativeSize(size));
        }
        let element = reader.read_bytes(size as usize)?;
        content.push(decode_at_depth(element, depth + 1)?);
    }

    Ok(OscBundle { time_tag, content })
}

fn read_message(reader: &mut Reader<'_>) -> OscResult<OscMessage> {
    let address = reader.read_string()?;
    if !address.starts_with('/') {
        return Err(OscError::InvalidAddress(address.to_string()));
    }
    let address = address.to_string();

    // Some old senders omit the type tag string entirely for argument-less messages
    if reader.remaining() == 0 {
        return Ok(OscMessage {
            address,
            args: Vec::new(),
        });
    }

    let tags = reader.read_string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::MissingTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(reader.read_i32()?),
            'f' => OscArg::Float(f32::from_bits(reader.read_u32()?)),
            's' => OscArg::String(reader.read_string()?.to_string()),
            'b' => OscArg::Blob(reader.read_blob()?.to_vec()),
            'h' => OscArg::Long(reader.read_i64()?),
            'd' => OscArg::Double(f64::from_bits(reader.read_i64()? as u64)),
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnknownTypeTag(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage { address, args })
}

/// Bounds-checked cursor over a byte slice
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> OscResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(OscError::Truncated {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> OscResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> OscResult<u32> {
        self.read_array::<4>().map(u32::from_be_bytes)
    }

    fn read_i32(&mut self) -> OscResult<i32> {
        self.read_array::<4>().map(i32::from_be_bytes)
    }

    fn read_i64(&mut self) -> OscResult<i64> {
        self.read_array::<8>().map(i64::from_be_bytes)
    }

    /// NUL-terminated, zero-padded to a 4-byte boundary
    fn read_string(&mut self) -> OscResult<&'a str> {
        let start = self.pos;
        let rest = &self.data[start..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(OscError::UnterminatedString(start))?;

        let text = std::str::from_utf8(&rest[..nul]).map_err(|_| OscError::InvalidUtf8(start))?;

        let padded = (nul + 4) & !3;
        self.read_bytes(padded)?;
        Ok(text)
    }

    /// int32 size, payload, zero padding
    fn read_blob(&mut self) -> OscResult<&'a [u8]> {
        let size = self.read_i32()?;
        if size < 0 {
            return Err(OscError::NegativeSize(size));
        }
        let size = size as usize;
        let data = self.read_bytes(size)?;
        let padding = (4 - size % 4) % 4;
        self.read_bytes(padding)?;
        Ok(data)
    }
}
