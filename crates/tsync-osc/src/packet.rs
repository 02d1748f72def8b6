//! OSC packets: a single message or a time-tagged bundle

use crate::message::OscMessage;

/// Leading OSC-string of every bundle
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// NTP-format time tag (seconds since 1900, 2^-32 fractions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// The special "execute immediately" tag
    pub const IMMEDIATELY: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    /// Check for the "immediately" tag
    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATELY
    }
}

/// A bundle of packets sharing one time tag
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub time_tag: TimeTag,
    pub content: Vec<OscPacket>,
}

/// Top-level OSC datagram content
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Encode into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded packet to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Message(msg) => msg.encode_into(buf),
            Self::Bundle(bundle) => {
                buf.extend_from_slice(BUNDLE_TAG);
                buf.extend_from_slice(&bundle.time_tag.seconds.to_be_bytes());
                buf.extend_from_slice(&bundle.time_tag.fraction.to_be_bytes());
                for element in &bundle.content {
                    // Reserve the size word, then patch it once the element is written
                    let size_at = buf.len();
                    buf.extend_from_slice(&[0; 4]);
                    element.encode_into(buf);
                    let size = (buf.len() - size_at - 4) as i32;
                    buf[size_at..size_at + 4].copy_from_slice(&size.to_be_bytes());
                }
            }
        }
    }

    /// Visit every message in order, descending into nested bundles
    pub fn for_each_message<'a>(&'a self, f: &mut impl FnMut(&'a OscMessage)) {
        match self {
            Self::Message(msg) => f(msg),
            Self::Bundle(bundle) => {
                for element in &bundle.content {
                    element.for_each_message(f);
                }
            }
        }
    }

    /// Flatten into the contained messages, preserving order
    pub fn into_messages(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(self, out: &mut Vec<OscMessage>) {
        match self {
            Self::Message(msg) => out.push(msg),
            Self::Bundle(bundle) => {
                for element in bundle.content {
                    element.collect_into(out);
                }
            }
        }
    }
}

impl From<OscMessage> for OscPacket {
    fn from(msg: OscMessage) -> Self {
        Self::Message(msg)
    }
}
