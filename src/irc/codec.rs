/// Line codec: frames a byte stream into protocol lines.
///
/// Splits on `\n` (an optional preceding `\r` is dropped), and serializes
/// outgoing messages with `\r\n` termination. Used directly by the raw TCP
/// listener and as a line splitter for WebSocket text frames, which may
/// carry several lines at once.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Message;

/// Maximum line length (including the terminator).
pub const MAX_LINE_LENGTH: usize = 8191;

/// Codec error. Only I/O failures end a connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One decoded unit of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete line, terminator stripped.
    Line(String),
    /// A line longer than [`MAX_LINE_LENGTH`] was discarded.
    TooLong,
}

/// A tokio codec that frames protocol lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set while skipping the remainder of an over-long line.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(pos) if pos + 1 > MAX_LINE_LENGTH => {
                    src.advance(pos + 1);
                    Ok(Some(Inbound::TooLong))
                }
                Some(pos) => {
                    let mut line = src.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    Ok(Some(Inbound::Line(
                        String::from_utf8_lossy(&line).into_owned(),
                    )))
                }
                None if src.len() > MAX_LINE_LENGTH => {
                    // No terminator in sight: drop what we have and skip to the next one.
                    src.clear();
                    self.discarding = true;
                    Ok(Some(Inbound::TooLong))
                }
                None => Ok(None),
            };
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Split one WebSocket text frame into inbound lines.
///
/// A frame without a final terminator still counts as a complete line.
pub fn split_frame(text: &str) -> Vec<Inbound> {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(text.as_bytes());
    if !text.ends_with('\n') {
        buf.put_u8(b'\n');
    }
    let mut out = Vec::new();
    while let Ok(Some(item)) = codec.decode(&mut buf) {
        match item {
            Inbound::Line(line) if line.trim().is_empty() => {}
            item => out.push(item),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(s: &str) -> Inbound {
        Inbound::Line(s.to_owned())
    }

    // ── Decoder ──────────────────────────────────────────────────

    #[test]
    fn decode_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("AUTH key1\r\nJOIN #general\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(line("AUTH key1")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(line("JOIN #general")));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from("PRIVMSG #gen");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"eral :hi\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(line("PRIVMSG #general :hi"))
        );
    }

    #[test]
    fn decode_discards_oversized_line_and_recovers() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::TooLong));

        // Rest of the long line arrives, then a normal one.
        buf.extend_from_slice(b"AAAA\r\nPING :x\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(line("PING :x")));
    }

    #[test]
    fn decode_oversized_complete_line() {
        let mut codec = LineCodec::new();
        let mut long = vec![b'B'; MAX_LINE_LENGTH + 10];
        long.extend_from_slice(b"\r\nLIST\r\n");
        let mut buf = BytesMut::from(long.as_slice());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::TooLong));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(line("LIST")));
    }

    #[test]
    fn decode_invalid_utf8_is_lossy() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #g :\xff\n"[..]);
        let Some(Inbound::Line(text)) = codec.decode(&mut buf).unwrap() else {
            panic!("expected a line");
        };
        assert!(text.starts_with("PRIVMSG #g :"));
    }

    // ── Encoder ──────────────────────────────────────────────────

    #[test]
    fn encode_appends_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let msg = Message::new(Some("alpha".into()), "JOIN", vec!["#general".into()]);
        codec.encode(msg, &mut buf).unwrap();
        assert_eq!(&buf[..], b":alpha JOIN #general\r\n");
    }

    // ── Frame splitting ──────────────────────────────────────────

    #[test]
    fn split_frame_handles_multiple_and_unterminated_lines() {
        assert_eq!(split_frame("AUTH k"), vec![line("AUTH k")]);
        assert_eq!(
            split_frame("JOIN #a\r\nPRIVMSG #a :yo\r\n\r\n"),
            vec![line("JOIN #a"), line("PRIVMSG #a :yo")]
        );
        assert!(split_frame("").is_empty());
    }
}
