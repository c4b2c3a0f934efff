//! ALPS (application settings) payload decoding.
//!
//! A server's application settings for `h2` are a run of HTTP/2-style frames:
//! a 9 byte header (24-bit length, type, flags, 31-bit stream id) followed by
//! the payload. Two frame types are interesting:
//!
//! - `SETTINGS` (0x4): six byte `(id, value)` entries.
//! - `ACCEPT_CH` (0x89): a vendor frame whose payload is kept verbatim.
//!
//! Decoding never fails. It stops at the first truncated or malformed frame
//! and returns whatever was decoded before it.

use tracing::debug;

/// HTTP/2 SETTINGS frame type.
pub const FRAME_SETTINGS: u8 = 0x4;
/// Vendor ACCEPT_CH frame type.
pub const FRAME_ACCEPT_CH: u8 = 0x89;

const FRAME_HEADER_LEN: usize = 9;
const SETTING_LEN: usize = 6;

/// One `(id, value)` settings pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

/// Decoded application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlpsFrames {
    /// Raw payload of the last ACCEPT_CH frame seen.
    pub accept_ch_payload: Option<Vec<u8>>,
    /// Settings from every SETTINGS frame, in wire order.
    pub settings: Vec<Setting>,
}

impl AlpsFrames {
    /// Decodes a raw application settings payload.
    pub fn decode(mut buf: &[u8]) -> Self {
        let mut frames = AlpsFrames::default();

        while buf.len() >= FRAME_HEADER_LEN {
            let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]) as usize;
            let frame_type = buf[3];
            let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;

            let rest = &buf[FRAME_HEADER_LEN..];
            if length > rest.len() {
                debug!(
                    "ALPS frame type {:#x} claims {} bytes, {} left",
                    frame_type,
                    length,
                    rest.len()
                );
                break;
            }
            let payload = &rest[..length];

            match frame_type {
                FRAME_SETTINGS => {
                    if stream_id != 0 || length % SETTING_LEN != 0 {
                        debug!("Malformed ALPS SETTINGS frame ({} bytes)", length);
                        break;
                    }
                    frames.settings.extend(payload.chunks_exact(SETTING_LEN).map(|entry| {
                        Setting {
                            id: u16::from_be_bytes([entry[0], entry[1]]),
                            value: u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]),
                        }
                    }));
                }
                FRAME_ACCEPT_CH => frames.accept_ch_payload = Some(payload.to_vec()),
                _ => {}
            }

            buf = &rest[length..];
        }

        frames
    }

    pub fn is_empty(&self) -> bool {
        self.accept_ch_payload.is_none() && self.settings.is_empty()
    }

    /// Parses the captured ACCEPT_CH payload, if any.
    pub fn accept_ch(&self) -> Option<AcceptCh> {
        self.accept_ch_payload.as_deref().and_then(AcceptCh::parse)
    }
}

/// Parsed ACCEPT_CH payload: an origin and the client hints it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptCh {
    pub origin: String,
    pub headers: Vec<String>,
}

impl AcceptCh {
    /// Parses `u16 len | origin | u16 len | comma separated hints`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (origin, rest) = read_u16_prefixed(payload)?;
        let (value, _) = read_u16_prefixed(rest)?;

        let origin = String::from_utf8(origin.to_vec()).ok()?;
        let value = std::str::from_utf8(value).ok()?;
        let headers = value
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        Some(Self { origin, headers })
    }
}

fn read_u16_prefixed(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    if buf.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let rest = &buf[2..];
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}
