//! Binary framing for the router's TCP stream.
//!
//! Wire format (all big-endian):
//! `[length:4][sequence:4][command:1][version:1][reserved:2][body:length]`
//!
//! Body layouts:
//! - Authentication: `[uid:8]`
//! - AuthenticationToken: `[platform:1][token_len:1][token][device_len:1][device]`
//! - AuthenticationStatus: `[status:4][ip:4]`
//! - LoginPoint: `[timestamp:4][platform:1][device...]`
//! - VoipControl: `[sender:8][receiver:8][content...]`
//! - Heartbeat, Ping, Pong, Reset: empty

use crate::error::{VoipError, VoipResult};
use crate::messages::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 12;

/// Largest body a peer may declare. Anything larger invalidates the connection.
pub const MAX_BODY_LEN: u32 = 64 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub seq: i32,
    pub command: u8,
    pub version: u8,
}

impl FrameHeader {
    /// Serialize the header. Reserved bytes are always zero.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
        buf[8] = self.command;
        buf[9] = self.version;
        buf
    }

    /// Parse a header. Reserved bytes are ignored; the length is not checked here.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            seq: i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            command: buf[8],
            version: buf[9],
        }
    }

    /// Reject declared lengths outside `0..=MAX_BODY_LEN`.
    pub fn validate(&self) -> VoipResult<()> {
        if self.length > MAX_BODY_LEN {
            return Err(VoipError::FrameLength(self.length));
        }
        Ok(())
    }
}

/// Encode a message body (without header).
pub fn encode_body(body: &Body) -> VoipResult<Vec<u8>> {
    let mut buf = Vec::new();
    match body {
        Body::Heartbeat | Body::Reset | Body::Ping | Body::Pong | Body::Unknown(_) => {}
        Body::Authentication(a) => buf.extend_from_slice(&a.uid.to_be_bytes()),
        Body::AuthenticationToken(a) => {
            buf.push(a.platform_id as u8);
            put_prefixed(&mut buf, a.token.as_bytes(), "token")?;
            put_prefixed(&mut buf, a.device_id.as_bytes(), "device id")?;
        }
        Body::AuthenticationStatus(s) => {
            buf.extend_from_slice(&s.status.to_be_bytes());
            buf.extend_from_slice(&s.ip.to_be_bytes());
        }
        Body::LoginPoint(p) => {
            buf.extend_from_slice(&p.up_timestamp.to_be_bytes());
            buf.push(p.platform_id as u8);
            buf.extend_from_slice(p.device_id.as_bytes());
        }
        Body::VoipControl(ctl) => {
            buf.extend_from_slice(&ctl.sender.to_be_bytes());
            buf.extend_from_slice(&ctl.receiver.to_be_bytes());
            buf.extend_from_slice(&ctl.content);
        }
    }
    Ok(buf)
}

fn put_prefixed(buf: &mut Vec<u8>, data: &[u8], what: &str) -> VoipResult<()> {
    let len = u8::try_from(data.len())
        .map_err(|_| VoipError::Codec(format!("{what} longer than 255 bytes: {}", data.len())))?;
    buf.push(len);
    buf.extend_from_slice(data);
    Ok(())
}

/// Decode a message body for the given command.
///
/// Unknown commands decode to [`Body::Unknown`] only when the body is empty.
pub fn decode_body(command: u8, _version: u8, data: &[u8]) -> VoipResult<Body> {
    let cmd = match Command::try_from(command) {
        Ok(cmd) => cmd,
        Err(unknown) if data.is_empty() => return Ok(Body::Unknown(unknown)),
        Err(unknown) => {
            return Err(VoipError::malformed(
                unknown,
                format!("unknown command with {} byte body", data.len()),
            ))
        }
    };

    let body = match cmd {
        Command::Heartbeat | Command::Reset | Command::Ping | Command::Pong => {
            if !data.is_empty() {
                return Err(VoipError::malformed(command, "expected empty body"));
            }
            match cmd {
                Command::Heartbeat => Body::Heartbeat,
                Command::Reset => Body::Reset,
                Command::Ping => Body::Ping,
                _ => Body::Pong,
            }
        }
        Command::Auth => {
            if data.len() < 8 {
                return Err(VoipError::malformed(command, "body shorter than 8 bytes"));
            }
            Body::Authentication(Authentication {
                uid: be_i64(&data[0..8]),
            })
        }
        Command::AuthToken => {
            if data.len() < 3 {
                return Err(VoipError::malformed(command, "body shorter than 3 bytes"));
            }
            let platform_id = data[0] as i8;
            let mut rest = &data[1..];
            let token = take_prefixed(command, &mut rest, "token")?;
            let device_id = take_prefixed(command, &mut rest, "device id")?;
            Body::AuthenticationToken(AuthenticationToken {
                token,
                platform_id,
                device_id,
            })
        }
        Command::AuthStatus => {
            if data.len() < 8 {
                return Err(VoipError::malformed(command, "body shorter than 8 bytes"));
            }
            Body::AuthenticationStatus(AuthenticationStatus {
                status: i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                ip: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            })
        }
        Command::LoginPoint => {
            if data.len() <= 5 {
                return Err(VoipError::malformed(command, "body must exceed 5 bytes"));
            }
            Body::LoginPoint(LoginPoint {
                up_timestamp: i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                platform_id: data[4] as i8,
                device_id: String::from_utf8_lossy(&data[5..]).into_owned(),
            })
        }
        Command::VoipControl => {
            if data.len() <= 16 {
                return Err(VoipError::malformed(command, "body must exceed 16 bytes"));
            }
            Body::VoipControl(VoipControl {
                sender: be_i64(&data[0..8]),
                receiver: be_i64(&data[8..16]),
                content: data[16..].to_vec(),
            })
        }
    };
    Ok(body)
}

fn take_prefixed(command: u8, rest: &mut &[u8], what: &str) -> VoipResult<String> {
    let (&len, tail) = rest
        .split_first()
        .ok_or_else(|| VoipError::malformed(command, format!("missing {what} length")))?;
    let len = len as usize;
    if len > tail.len() {
        return Err(VoipError::malformed(
            command,
            format!("{what} length {len} exceeds remaining {} bytes", tail.len()),
        ));
    }
    let (value, tail) = tail.split_at(len);
    *rest = tail;
    Ok(String::from_utf8_lossy(value).into_owned())
}

fn be_i64(b: &[u8]) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[..8]);
    i64::from_be_bytes(arr)
}

/// Encode a full frame (header + body) for a message.
pub fn frame_encode(msg: &Message) -> VoipResult<Vec<u8>> {
    let body = encode_body(&msg.body)?;
    let header = FrameHeader {
        length: body.len() as u32,
        seq: msg.seq,
        command: msg.command(),
        version: msg.version,
    };
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend(body);
    Ok(frame)
}

/// Read exactly one message from a stream.
///
/// The declared length is checked before any body byte is read. Short reads
/// and decode failures are returned as errors; callers treat every error as
/// fatal to the connection.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> VoipResult<Message> {
    let mut header_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf);
    header.validate()?;

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    Ok(Message {
        seq: header.seq,
        version: header.version,
        body: decode_body(header.command, header.version, &body)?,
    })
}

/// Write one message as a single frame.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> VoipResult<()> {
    let frame = frame_encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(body: Body) {
        let data = encode_body(&body).unwrap();
        let decoded = decode_body(body.command(), 0, &data).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn header_layout_is_big_endian_with_zero_reserved() {
        let header = FrameHeader {
            length: 0x0102,
            seq: 7,
            command: 64,
            version: 1,
        };
        let bytes = header.encode();
        assert_eq!(bytes, [0, 0, 1, 2, 0, 0, 0, 7, 64, 1, 0, 0]);
        assert_eq!(FrameHeader::decode(&bytes), header);
    }

    #[test]
    fn header_decode_ignores_reserved_bytes() {
        let bytes = [0, 0, 0, 0, 0, 0, 0, 1, 13, 0, 0xff, 0xee];
        let header = FrameHeader::decode(&bytes);
        assert_eq!(header.command, 13);
        assert_eq!(header.seq, 1);
    }

    #[test]
    fn header_length_bound() {
        let mut header = FrameHeader {
            length: MAX_BODY_LEN,
            seq: 0,
            command: 1,
            version: 0,
        };
        assert!(header.validate().is_ok());
        header.length = MAX_BODY_LEN + 1;
        assert!(matches!(header.validate(), Err(VoipError::FrameLength(65537))));
        // Negative when read as a signed length.
        header.length = 0x8000_0000;
        assert!(header.validate().is_err());
    }

    #[test]
    fn authentication_round_trip() {
        round_trip(Body::Authentication(Authentication { uid: 86013800000009 }));
        round_trip(Body::Authentication(Authentication { uid: -1 }));
    }

    #[test]
    fn token_round_trip_at_length_limits() {
        round_trip(Body::AuthenticationToken(AuthenticationToken {
            token: String::new(),
            platform_id: 0,
            device_id: String::new(),
        }));
        round_trip(Body::AuthenticationToken(AuthenticationToken {
            token: "t".repeat(255),
            platform_id: -3,
            device_id: "d".repeat(255),
        }));
    }

    #[test]
    fn token_longer_than_255_fails_to_encode() {
        let body = Body::AuthenticationToken(AuthenticationToken {
            token: "t".repeat(256),
            platform_id: 1,
            device_id: "dev".into(),
        });
        assert!(matches!(encode_body(&body), Err(VoipError::Codec(_))));
    }

    #[test]
    fn token_prefix_exceeding_buffer_is_malformed() {
        // platform, token_len=10 but only 2 bytes follow
        let data = [1u8, 10, b'a', b'b'];
        assert!(matches!(
            decode_body(15, 0, &data),
            Err(VoipError::MalformedBody { command: 15, .. })
        ));
        // token ok, device length overruns
        let data = [1u8, 1, b'a', 5, b'x'];
        assert!(decode_body(15, 0, &data).is_err());
        // missing device length byte entirely
        let data = [1u8, 1, b'a'];
        assert!(decode_body(15, 0, &data).is_err());
    }

    #[test]
    fn status_round_trip() {
        round_trip(Body::AuthenticationStatus(AuthenticationStatus::ok(0xC0A8_0001)));
        round_trip(Body::AuthenticationStatus(AuthenticationStatus::failed()));
    }

    #[test]
    fn login_point_round_trip_and_minimum() {
        round_trip(Body::LoginPoint(LoginPoint {
            up_timestamp: 1_700_000_000,
            platform_id: 2,
            device_id: "iphone-7".into(),
        }));
        assert!(decode_body(16, 0, &[0, 0, 0, 1, 2]).is_err());
        assert!(decode_body(16, 0, &[0, 0, 0, 1, 2, b'x']).is_ok());
    }

    #[test]
    fn voip_control_round_trip_and_minimum() {
        round_trip(Body::VoipControl(VoipControl {
            sender: 10,
            receiver: 20,
            content: vec![0, 0, 0, 1, 0, 0, 0, 1],
        }));
        assert!(decode_body(64, 0, &[0u8; 16]).is_err());
        let decoded = decode_body(64, 0, &[0u8; 17]).unwrap();
        match decoded {
            Body::VoipControl(ctl) => assert_eq!(ctl.content, vec![0]),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn empty_bodies() {
        round_trip(Body::Heartbeat);
        round_trip(Body::Ping);
        round_trip(Body::Pong);
        round_trip(Body::Reset);
        assert!(decode_body(1, 0, &[0]).is_err());
    }

    #[test]
    fn unknown_commands() {
        assert_eq!(decode_body(99, 0, &[]).unwrap(), Body::Unknown(99));
        assert!(matches!(
            decode_body(99, 0, &[1, 2]),
            Err(VoipError::MalformedBody { command: 99, .. })
        ));
    }

    #[tokio::test]
    async fn write_then_read_stream() {
        let msg = Message {
            seq: 3,
            version: 1,
            body: Body::VoipControl(VoipControl {
                sender: 10,
                receiver: 20,
                content: b"hello".to_vec(),
            }),
        };
        let mut wire = Vec::new();
        write_message(&mut wire, &msg).await.unwrap();
        write_message(&mut wire, &Message::new(Body::Ping)).await.unwrap();

        let mut reader = &wire[..];
        assert_eq!(read_message(&mut reader).await.unwrap(), msg);
        let ping = read_message(&mut reader).await.unwrap();
        assert_eq!(ping.body, Body::Ping);
        assert!(matches!(read_message(&mut reader).await, Err(VoipError::Io(_))));
    }

    #[tokio::test]
    async fn oversized_length_rejected_before_body() {
        let header = FrameHeader {
            length: MAX_BODY_LEN + 1,
            seq: 1,
            command: 64,
            version: 0,
        };
        let mut wire = header.encode().to_vec();
        wire.extend(vec![0u8; (MAX_BODY_LEN + 1) as usize]);
        let mut reader = &wire[..];
        assert!(matches!(
            read_message(&mut reader).await,
            Err(VoipError::FrameLength(_))
        ));
        // Nothing past the header was consumed.
        assert_eq!(reader.len(), (MAX_BODY_LEN + 1) as usize);
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let header = FrameHeader {
            length: 8,
            seq: 1,
            command: 2,
            version: 0,
        };
        let mut wire = header.encode().to_vec();
        wire.extend([0u8; 4]);
        let mut reader = &wire[..];
        assert!(read_message(&mut reader).await.is_err());
    }
}
