//! Binary-framed, checksummed, ack-based transport layer (spec §4.2).
//!
//! A packet on the wire looks like `$<payload>#<chk>`, where `<payload>` has
//! had `$`, `#`, `}`, and `*` escaped, and `<chk>` is the two-hex-digit low
//! byte of the sum of the (escaped) payload bytes. The peer acknowledges
//! with a bare `+` (accepted) or `-` (resend).

use crate::connection::Connection;
use crate::error::{DbgError, DbgResult};

const ESCAPE: u8 = b'}';
const RUN_LENGTH: u8 = b'*';
const FRAME_START: u8 = b'$';
const FRAME_END: u8 = b'#';
const ACK: u8 = b'+';
const NACK: u8 = b'-';
const INTERRUPT: u8 = 0x03;

/// Bounded number of times a packet is retransmitted after a `-` (resend)
/// ack before the call is abandoned as a protocol error.
const MAX_ACK_RETRIES: u32 = 3;

/// How a caller wants interleaved `O`-prefixed console output handled while
/// awaiting the reply to a request that resumes the target (`go`/`vCont`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// No `O` packets are expected; any `O` packet encountered is an error.
    None,
    /// Accumulate `O` packet text and return it alongside the final reply.
    Accumulate,
    /// Silently discard `O` packet text.
    Discard,
}

/// The result of a mixed-output exchange: the final (non-`O`) reply packet,
/// plus any accumulated console text.
#[derive(Clone, Debug, Default)]
pub struct MixedReply {
    /// The final stop-reply (or other) packet payload.
    pub reply: Vec<u8>,
    /// Concatenated decoded text from any `O` packets seen, if
    /// [`OutputMode::Accumulate`] was requested.
    pub console_output: Option<String>,
}

/// The RSP framing/ack layer over a single [`Connection`].
pub struct RspTransport<C: Connection> {
    conn: C,
}

impl<C: Connection> RspTransport<C> {
    /// Wrap a connection, running its one-time session-start hook.
    pub fn new(mut conn: C) -> DbgResult<Self> {
        conn.on_session_start()
            .map_err(|e| DbgError::Protocol(format!("connection setup failed: {}", e)))?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection (used to peek for a pending
    /// interrupt byte while the target is running).
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Send `payload` as a single request and return the logical bytes of
    /// the reply packet. No `O`-packet interleaving is expected or tolerated.
    pub fn send_and_receive(&mut self, payload: &[u8]) -> DbgResult<Vec<u8>> {
        let reply = self.send_and_receive_mixed(payload, OutputMode::None)?;
        Ok(reply.reply)
    }

    /// Send `payload`, then read reply packets until a non-`O` packet
    /// arrives, handling any intervening `O` packets per `mode`.
    pub fn send_and_receive_mixed(
        &mut self,
        payload: &[u8],
        mode: OutputMode,
    ) -> DbgResult<MixedReply> {
        self.send_packet(payload)?;

        let mut console_output = if mode == OutputMode::Accumulate {
            Some(String::new())
        } else {
            None
        };

        loop {
            let packet = self.recv_packet()?;
            if packet.first() == Some(&b'O') && packet.len() > 1 {
                match mode {
                    OutputMode::None => {
                        return Err(DbgError::Protocol(
                            "unexpected console-output packet".to_string(),
                        ))
                    }
                    OutputMode::Discard => continue,
                    OutputMode::Accumulate => {
                        let text = decode_hex_ascii(&packet[1..])?;
                        if let Some(buf) = console_output.as_mut() {
                            buf.push_str(&text);
                        }
                        continue;
                    }
                }
            }
            return Ok(MixedReply { reply: packet, console_output });
        }
    }

    /// Send a single unframed byte (notably the `0x03` interrupt) with no
    /// checksum and no ack wait. Safe to call while the target is running.
    pub fn send_raw(&mut self, byte: u8) -> DbgResult<()> {
        self.conn
            .write(byte)
            .map_err(|e| DbgError::Protocol(format!("raw send failed: {}", e)))?;
        self.conn
            .flush()
            .map_err(|e| DbgError::Protocol(format!("raw send flush failed: {}", e)))
    }

    /// Convenience wrapper around [`send_raw`](Self::send_raw) for the
    /// interrupt byte.
    pub fn send_interrupt(&mut self) -> DbgResult<()> {
        self.send_raw(INTERRUPT)
    }

    /// Peek the connection for a pending interrupt byte without blocking.
    pub fn peek_interrupt_pending(&mut self) -> DbgResult<bool> {
        match self
            .conn
            .peek()
            .map_err(|e| DbgError::Protocol(format!("peek failed: {}", e)))?
        {
            Some(INTERRUPT) => Ok(true),
            _ => Ok(false),
        }
    }

    fn send_packet(&mut self, payload: &[u8]) -> DbgResult<()> {
        let frame = encode_frame(payload);

        for attempt in 0..=MAX_ACK_RETRIES {
            self.conn
                .write_all(&frame)
                .map_err(|e| DbgError::Protocol(format!("write failed: {}", e)))?;
            self.conn
                .flush()
                .map_err(|e| DbgError::Protocol(format!("flush failed: {}", e)))?;

            let ack = self
                .conn
                .read()
                .map_err(|e| DbgError::Protocol(format!("ack read failed: {}", e)))?;

            match ack {
                ACK => return Ok(()),
                NACK => {
                    log::warn!("stub requested resend, attempt {}", attempt + 1);
                    continue;
                }
                other => {
                    return Err(DbgError::Protocol(format!(
                        "unexpected ack byte {:#04x}",
                        other
                    )))
                }
            }
        }

        Err(DbgError::Protocol(
            "exceeded ack retry budget".to_string(),
        ))
    }

    fn recv_packet(&mut self) -> DbgResult<Vec<u8>> {
        let start = self
            .conn
            .read()
            .map_err(|e| DbgError::Protocol(format!("packet read failed: {}", e)))?;
        if start != FRAME_START {
            return Err(DbgError::Protocol(format!(
                "expected packet start '$', got {:#04x}",
                start
            )));
        }

        let mut raw = Vec::new();
        loop {
            let byte = self
                .conn
                .read()
                .map_err(|e| DbgError::Protocol(format!("packet read failed: {}", e)))?;
            if byte == FRAME_END {
                break;
            }
            raw.push(byte);
        }

        let mut checksum_hex = [0u8; 2];
        self.conn
            .read_exact(&mut checksum_hex)
            .map_err(|e| DbgError::Protocol(format!("checksum read failed: {}", e)))?;
        let expected = parse_hex_byte(&checksum_hex)
            .ok_or_else(|| DbgError::Protocol("malformed checksum".to_string()))?;

        let actual = checksum(&raw);
        if actual != expected {
            let _ = self.conn.write(NACK);
            let _ = self.conn.flush();
            return Err(DbgError::Protocol(format!(
                "checksum mismatch: expected {:#04x}, got {:#04x}",
                expected, actual
            )));
        }

        self.conn
            .write(ACK)
            .map_err(|e| DbgError::Protocol(format!("ack write failed: {}", e)))?;
        self.conn
            .flush()
            .map_err(|e| DbgError::Protocol(format!("ack flush failed: {}", e)))?;

        Ok(decode_wire_bytes(&raw))
    }
}

/// Build a complete `$<escaped payload>#<chk>` frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let chk = checksum(&escaped);

    let mut frame = Vec::with_capacity(escaped.len() + 4);
    frame.push(FRAME_START);
    frame.extend_from_slice(&escaped);
    frame.push(FRAME_END);
    frame.extend_from_slice(format!("{:02x}", chk).as_bytes());
    frame
}

/// Escape `$`, `#`, `}`, and `*` as `}` followed by `byte ^ 0x20`.
fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if b == FRAME_START || b == FRAME_END || b == ESCAPE || b == RUN_LENGTH {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

/// Undo both run-length compression and `}`-escaping on raw wire bytes
/// (i.e. the bytes seen between `$` and `#`, exactly as transmitted).
fn decode_wire_bytes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b == ESCAPE && i + 1 < raw.len() {
            out.push(raw[i + 1] ^ 0x20);
            i += 2;
        } else if b == RUN_LENGTH && i + 1 < raw.len() {
            // The repeat-count byte encodes `count = byte - 29`; the
            // preceding decoded byte is already in `out` once, and is
            // repeated `count - 1` additional times for a total of `count`
            // occurrences.
            let count = raw[i + 1].wrapping_sub(29) as usize;
            if let Some(&prev) = out.last() {
                for _ in 1..count {
                    out.push(prev);
                }
            }
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    out
}

/// Low byte of the sum of `bytes`.
fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn parse_hex_byte(hex: &[u8; 2]) -> Option<u8> {
    let s = std::str::from_utf8(hex).ok()?;
    u8::from_str_radix(s, 16).ok()
}

/// Decode an ASCII-hex-encoded byte string into its original text, as used
/// by `O` console-output packets.
pub fn decode_hex_ascii(hex: &[u8]) -> DbgResult<String> {
    if hex.len() % 2 != 0 {
        return Err(DbgError::Protocol("odd-length hex payload".to_string()));
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.chunks_exact(2) {
        let pair = [chunk[0], chunk[1]];
        let byte = parse_hex_byte(&pair)
            .ok_or_else(|| DbgError::Protocol("malformed hex byte".to_string()))?;
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_dollar_and_hash() {
        let escaped = escape(b"$hi#");
        assert_eq!(escaped, vec![0x7D, 0x04, b'h', b'i', 0x7D, 0x03]);
    }

    #[test]
    fn encode_decode_roundtrip_with_escapes() {
        let payload = b"$hi#";
        let frame = encode_frame(payload);
        // Strip framing manually to drive decode_wire_bytes directly.
        let inner = &frame[1..frame.len() - 3];
        assert_eq!(decode_wire_bytes(inner), payload);
    }

    #[test]
    fn checksum_is_sum_of_escaped_bytes() {
        let escaped = escape(b"$hi#");
        let sum: u8 = escaped.iter().fold(0u8, |a, &b| a.wrapping_add(b));
        assert_eq!(checksum(&escaped), sum);
    }

    #[test]
    fn run_length_expansion() {
        // 'a' followed by *'. (count byte 0x2E = 46 -> count = 46-29 = 17,
        // so total occurrences of 'a' is 17).
        let raw = vec![b'a', RUN_LENGTH, 46];
        let decoded = decode_wire_bytes(&raw);
        assert_eq!(decoded.len(), 17);
        assert!(decoded.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn decode_hex_ascii_roundtrip() {
        let hex = b"68656c6c6f";
        assert_eq!(decode_hex_ascii(hex).unwrap(), "hello");
    }
}
