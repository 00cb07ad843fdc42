//! SLIP stream framing for OSC over TCP.
//!
//! OSC 1.1 delimits packets on stream transports with double-ended SLIP
//! (RFC 1055): every packet is wrapped in `END` bytes and any `END`/`ESC`
//! byte inside the payload is escaped. The codec yields one unescaped OSC
//! packet per frame and never interprets the payload itself.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

/// Frames larger than this without a terminator are treated as garbage.
const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Double-ended SLIP codec.
#[derive(Debug, Clone)]
pub struct SlipCodec {
    max_frame_len: usize,
}

impl SlipCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SlipCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            let Some(end) = src.iter().position(|&b| b == END) else {
                if src.len() > self.max_frame_len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("SLIP frame exceeds {} bytes", self.max_frame_len),
                    ));
                }
                return Ok(None);
            };

            let raw = src.split_to(end + 1);
            // Back-to-back END bytes delimit an empty frame; skip it.
            if end == 0 {
                continue;
            }
            return unescape(raw.get(..end).unwrap_or_default()).map(Some);
        }
    }
}

impl Encoder<Bytes> for SlipCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(item.len() + 2);
        dst.put_u8(END);
        for &byte in &item {
            match byte {
                END => dst.put_slice(&[ESC, ESC_END]),
                ESC => dst.put_slice(&[ESC, ESC_ESC]),
                other => dst.put_u8(other),
            }
        }
        dst.put_u8(END);
        Ok(())
    }
}

fn unescape(frame: &[u8]) -> Result<Bytes, io::Error> {
    let mut out = BytesMut::with_capacity(frame.len());
    let mut bytes = frame.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESC {
            out.put_u8(byte);
            continue;
        }
        match bytes.next() {
            Some(&ESC_END) => out.put_u8(END),
            Some(&ESC_ESC) => out.put_u8(ESC),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid SLIP escape sequence: {other:?}"),
                ));
            }
        }
    }
    Ok(out.freeze())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        SlipCodec::new()
            .encode(Bytes::copy_from_slice(payload), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn escapes_reserved_bytes() {
        let buf = encode(&[0x01, END, 0x02, ESC, 0x03]);
        assert_eq!(
            buf.as_ref(),
            &[END, 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, 0x03, END]
        );
    }

    #[test]
    fn decodes_escaped_frame() {
        let mut buf = encode(&[END, ESC, 0x7f]);
        let frame = SlipCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[END, ESC, 0x7f]);
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_terminator() {
        let mut codec = SlipCodec::new();
        let mut buf = BytesMut::from(&[END, 0x2f, 0x67][..]);
        // Leading END yields an empty frame that is skipped.
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x6f, END]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"/go");
    }

    #[test]
    fn splits_consecutive_frames() {
        let mut buf = encode(b"/a");
        buf.extend_from_slice(&encode(b"/b"));
        let mut codec = SlipCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"/a");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().as_ref(), b"/b");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_escape() {
        let mut buf = BytesMut::from(&[0x01, ESC, 0x00, END][..]);
        assert!(SlipCodec::new().decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_oversized_unterminated_frame() {
        let mut buf = BytesMut::from(&[0x01; 32][..]);
        assert!(SlipCodec::with_max_frame_len(16).decode(&mut buf).is_err());
    }
}
