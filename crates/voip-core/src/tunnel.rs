//! UDP tunnel datagrams.
//!
//! Current protocol: `[flags:4 | command:4][body]`, where only the low nibble
//! selects the command. Legacy protocol: a bare [`VoipData`] body with no
//! command byte.

use crate::error::{VoipError, VoipResult};

/// Sender and receiver uids precede every media payload.
pub const VOIP_DATA_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelCommand {
    Auth = 1,
    AuthStatus = 2,
    Data = 3,
}

impl TryFrom<u8> for TunnelCommand {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(Self::Auth),
            2 => Ok(Self::AuthStatus),
            3 => Ok(Self::Data),
            other => Err(other),
        }
    }
}

/// One relayed media packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoipData {
    pub sender: i64,
    pub receiver: i64,
    pub payload: Vec<u8>,
}

impl VoipData {
    /// Parse `[sender:8][receiver:8][payload...]`. This is also the whole
    /// datagram on the legacy listener.
    pub fn parse(buf: &[u8]) -> VoipResult<Self> {
        if buf.len() < VOIP_DATA_HEADER_LEN {
            return Err(VoipError::Codec(format!(
                "voip data shorter than {VOIP_DATA_HEADER_LEN} bytes: {}",
                buf.len()
            )));
        }
        let (ids, payload) = buf.split_at(VOIP_DATA_HEADER_LEN);
        let mut sender = [0u8; 8];
        let mut receiver = [0u8; 8];
        sender.copy_from_slice(&ids[..8]);
        receiver.copy_from_slice(&ids[8..]);
        Ok(Self {
            sender: i64::from_be_bytes(sender),
            receiver: i64::from_be_bytes(receiver),
            payload: payload.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VOIP_DATA_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.sender.to_be_bytes());
        buf.extend_from_slice(&self.receiver.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// A datagram on the current tunnel protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelPacket {
    Auth { token: String },
    AuthStatus { status: u8 },
    Data(VoipData),
}

impl TunnelPacket {
    pub fn command(&self) -> TunnelCommand {
        match self {
            TunnelPacket::Auth { .. } => TunnelCommand::Auth,
            TunnelPacket::AuthStatus { .. } => TunnelCommand::AuthStatus,
            TunnelPacket::Data(_) => TunnelCommand::Data,
        }
    }

    /// Parse a datagram. High nibble flags in the first byte are ignored.
    pub fn parse(buf: &[u8]) -> VoipResult<Self> {
        let (&head, body) = buf
            .split_first()
            .ok_or_else(|| VoipError::Codec("empty tunnel datagram".into()))?;
        let cmd = TunnelCommand::try_from(head & 0x0f)
            .map_err(|c| VoipError::Codec(format!("unknown tunnel command {c}")))?;

        match cmd {
            TunnelCommand::Auth => {
                if body.len() < 2 {
                    return Err(VoipError::Codec("auth body missing token length".into()));
                }
                let len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let token = body.get(2..2 + len).ok_or_else(|| {
                    VoipError::Codec(format!(
                        "token length {len} exceeds remaining {} bytes",
                        body.len() - 2
                    ))
                })?;
                Ok(TunnelPacket::Auth {
                    token: String::from_utf8_lossy(token).into_owned(),
                })
            }
            TunnelCommand::AuthStatus => {
                let status = *body
                    .first()
                    .ok_or_else(|| VoipError::Codec("auth status missing status byte".into()))?;
                Ok(TunnelPacket::AuthStatus { status })
            }
            TunnelCommand::Data => VoipData::parse(body).map(TunnelPacket::Data),
        }
    }

    pub fn encode(&self) -> VoipResult<Vec<u8>> {
        let mut buf = vec![self.command() as u8];
        match self {
            TunnelPacket::Auth { token } => {
                let len = u16::try_from(token.len()).map_err(|_| {
                    VoipError::Codec(format!("tunnel token too long: {}", token.len()))
                })?;
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(token.as_bytes());
            }
            TunnelPacket::AuthStatus { status } => buf.push(*status),
            TunnelPacket::Data(data) => buf.extend(data.encode()),
        }
        Ok(buf)
    }
}

/// Reply to an AUTH from an address that is already authenticated.
pub fn auth_status_ok() -> [u8; 2] {
    [TunnelCommand::AuthStatus as u8, 0]
}

/// Media body as forwarded to a peer: with a DATA prefix byte for peers on
/// the current protocol, bare for legacy peers.
pub fn relay_frame(data: &[u8], has_header: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    if has_header {
        out.push(TunnelCommand::Data as u8);
    }
    out.extend_from_slice(data);
    out
}
