//! Wire codec for the hub socket
//!
//! The canonical format carries one JSON [`HubEvent`] per frame, either
//! length-prefixed (`<len>#<json>`) or newline-terminated. Older processor
//! firmware speaks bit-packed joins instead; that variant lives in
//! [`crate::legacy`] and is selected through the same [`HubCodec`].

use crate::error::{HubError, Result};
use crate::legacy;
use crate::protocol::{Frame, HubEvent};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Largest JSON payload accepted from the hub
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Longest length header (`<digits>#`) before the buffer is treated as garbage
const MAX_HEADER_LEN: usize = 16;

const LENGTH_SEPARATOR: u8 = b'#';

/// Which wire format the processor speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    /// `<byte length>#<json>` frames
    #[default]
    Json,
    /// One JSON object per line
    NewlineJson,
    /// Bit-packed digital/analog/serial joins
    LegacyJoins,
}

/// Frames bytes from the hub socket into [`Frame`]s and back
#[derive(Debug, Clone, Copy, Default)]
pub struct HubCodec {
    kind: CodecKind,
}

impl HubCodec {
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }
}

/// Parse a framed payload; failures become [`Frame::Malformed`] so the stream keeps going
pub fn parse_event(payload: &[u8]) -> Frame {
    match serde_json::from_slice::<HubEvent>(payload) {
        Ok(event) => Frame::Event(event),
        Err(e) => Frame::Malformed(format!(
            "{} in {:?}",
            e,
            String::from_utf8_lossy(payload)
        )),
    }
}

/// Length of the ASCII digit run at the end of `buf`
fn trailing_digits(buf: &[u8]) -> usize {
    buf.iter().rev().take_while(|b| b.is_ascii_digit()).count()
}

/// Start of the `<digits><whitespace>` tail of a header candidate
fn header_start(header: &[u8]) -> usize {
    header
        .iter()
        .rposition(|b| !b.is_ascii_digit() && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1)
}

fn decode_length_prefixed(src: &mut BytesMut) -> Option<Frame> {
    loop {
        // Whitespace between frames is tolerated
        let leading = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(leading);

        let Some(separator) = src.iter().position(|b| *b == LENGTH_SEPARATOR) else {
            if src.len() > MAX_HEADER_LEN {
                // Keep a trailing digit run, it may be the start of the next header
                let keep = trailing_digits(src).min(MAX_HEADER_LEN);
                let junk = src.split_to(src.len() - keep);
                return Some(Frame::Malformed(format!(
                    "no length header in {} bytes",
                    junk.len()
                )));
            }
            return None;
        };

        let header = String::from_utf8_lossy(&src[..separator]).trim().to_string();
        let len = match header.parse::<usize>() {
            Ok(len) if len <= MAX_FRAME_LEN => len,
            Ok(len) => {
                src.advance(separator + 1);
                return Some(Frame::Malformed(format!(
                    "frame length {} exceeds {}",
                    len, MAX_FRAME_LEN
                )));
            }
            Err(_) => {
                // Resync on the digits right before the separator if there are any
                let candidate = header_start(&src[..separator]);
                let skip = if candidate > 0 && src[candidate..separator].iter().any(u8::is_ascii_digit) {
                    candidate
                } else {
                    separator + 1
                };
                let junk = src.split_to(skip);
                return Some(Frame::Malformed(format!(
                    "invalid length header {:?}",
                    String::from_utf8_lossy(&junk)
                )));
            }
        };

        let total = separator + 1 + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return None;
        }

        src.advance(separator + 1);
        let payload = src.split_to(len);
        if payload.is_empty() {
            continue;
        }
        return Some(parse_event(&payload));
    }
}

fn decode_newline(src: &mut BytesMut) -> Option<Frame> {
    loop {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_FRAME_LEN {
                let junk = src.split_to(src.len());
                return Some(Frame::Malformed(format!(
                    "line exceeds {} bytes ({})",
                    MAX_FRAME_LEN,
                    junk.len()
                )));
            }
            return None;
        };

        let line = src.split_to(newline + 1);
        let payload = line.trim_ascii();
        if payload.is_empty() {
            continue;
        }
        return Some(parse_event(payload));
    }
}

impl Decoder for HubCodec {
    type Item = Frame;
    type Error = HubError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        Ok(match self.kind {
            CodecKind::Json => decode_length_prefixed(src),
            CodecKind::NewlineJson => decode_newline(src),
            CodecKind::LegacyJoins => legacy::decode_join(src),
        })
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        let rest = src.split_to(src.len());
        if rest.trim_ascii().is_empty() {
            return Ok(None);
        }

        Ok(Some(match self.kind {
            // A final line may lack its terminator
            CodecKind::NewlineJson => parse_event(rest.trim_ascii()),
            _ => Frame::Malformed(format!("{} trailing bytes at end of stream", rest.len())),
        }))
    }
}

impl Encoder<Frame> for HubCodec {
    type Error = HubError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match (self.kind, frame) {
            (CodecKind::Json, Frame::Event(event)) => {
                let json = serde_json::to_vec(&event)?;
                dst.reserve(json.len() + MAX_HEADER_LEN);
                dst.put_slice(json.len().to_string().as_bytes());
                dst.put_u8(LENGTH_SEPARATOR);
                dst.put_slice(&json);
                Ok(())
            }
            (CodecKind::NewlineJson, Frame::Event(event)) => {
                let json = serde_json::to_vec(&event)?;
                dst.reserve(json.len() + 1);
                dst.put_slice(&json);
                dst.put_u8(b'\n');
                Ok(())
            }
            (CodecKind::LegacyJoins, Frame::Join(join)) => legacy::encode_join(&join, dst),
            (kind, Frame::Malformed(_)) => Err(HubError::Unsupported(format!(
                "cannot encode a malformed frame with {:?}",
                kind
            ))),
            (kind, other) => Err(HubError::Unsupported(format!(
                "{:?} codec cannot encode {:?}",
                kind, other
            ))),
        }
    }
}
