//! Router message types.
//!
//! A [`Message`] is the decoded form of one TCP frame. Its body type is
//! determined solely by the frame's command byte; see [`crate::codec`] for
//! the byte layout of each body.

use std::fmt;

/// Command codes carried in byte 8 of the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Heartbeat = 1,
    Auth = 2,
    AuthStatus = 3,
    Reset = 6,
    Ping = 13,
    Pong = 14,
    AuthToken = 15,
    LoginPoint = 16,
    VoipControl = 64,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Auth),
            3 => Ok(Self::AuthStatus),
            6 => Ok(Self::Reset),
            13 => Ok(Self::Ping),
            14 => Ok(Self::Pong),
            15 => Ok(Self::AuthToken),
            16 => Ok(Self::LoginPoint),
            64 => Ok(Self::VoipControl),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heartbeat => "MSG_HEARTBEAT",
            Self::Auth => "MSG_AUTH",
            Self::AuthStatus => "MSG_AUTH_STATUS",
            Self::Reset => "MSG_RESET",
            Self::Ping => "MSG_PING",
            Self::Pong => "MSG_PONG",
            Self::AuthToken => "MSG_AUTH_TOKEN",
            Self::LoginPoint => "MSG_LOGIN_POINT",
            Self::VoipControl => "MSG_VOIP_CONTROL",
        };
        f.write_str(name)
    }
}

/// Legacy uid-only login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub uid: i64,
}

/// Token login. `token` and `device_id` are each limited to 255 bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationToken {
    pub token: String,
    pub platform_id: i8,
    pub device_id: String,
}

/// Login result. `status` 0 means success; `ip` is the router's public IPv4
/// address as a big-endian integer, or 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationStatus {
    pub status: i32,
    pub ip: u32,
}

impl AuthenticationStatus {
    pub const OK: i32 = 0;
    pub const FAILED: i32 = 1;

    pub fn ok(ip: u32) -> Self {
        Self { status: Self::OK, ip }
    }

    pub fn failed() -> Self {
        Self {
            status: Self::FAILED,
            ip: 0,
        }
    }
}

/// Informs a user's other devices that a new login happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPoint {
    pub up_timestamp: i32,
    pub platform_id: i8,
    pub device_id: String,
}

/// VOIP signaling between two users of the same application.
/// `content` is opaque to the router except for push gating
/// (see [`crate::control`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoipControl {
    pub sender: i64,
    pub receiver: i64,
    pub content: Vec<u8>,
}

/// Closed set of message bodies. Decoding dispatches on the command byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Heartbeat,
    Authentication(Authentication),
    AuthenticationStatus(AuthenticationStatus),
    Reset,
    Ping,
    Pong,
    AuthenticationToken(AuthenticationToken),
    LoginPoint(LoginPoint),
    VoipControl(VoipControl),
    /// A command this router does not know, received with an empty body.
    Unknown(u8),
}

impl Body {
    /// Raw command byte for this body.
    pub fn command(&self) -> u8 {
        match self {
            Body::Heartbeat => Command::Heartbeat.into(),
            Body::Authentication(_) => Command::Auth.into(),
            Body::AuthenticationStatus(_) => Command::AuthStatus.into(),
            Body::Reset => Command::Reset.into(),
            Body::Ping => Command::Ping.into(),
            Body::Pong => Command::Pong.into(),
            Body::AuthenticationToken(_) => Command::AuthToken.into(),
            Body::LoginPoint(_) => Command::LoginPoint.into(),
            Body::VoipControl(_) => Command::VoipControl.into(),
            Body::Unknown(cmd) => *cmd,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender-assigned sequence number. Outbound loops overwrite it.
    pub seq: i32,
    pub version: u8,
    pub body: Body,
}

impl Message {
    /// A message with sequence 0 and version 0, ready to be queued.
    pub fn new(body: Body) -> Self {
        Self {
            seq: 0,
            version: 0,
            body,
        }
    }

    pub fn command(&self) -> u8 {
        self.body.command()
    }
}

impl From<Body> for Message {
    fn from(body: Body) -> Self {
        Message::new(body)
    }
}

/// Human-readable command name for logging; unknown commands print their number.
pub fn command_name(cmd: u8) -> String {
    match Command::try_from(cmd) {
        Ok(c) => c.to_string(),
        Err(n) => n.to_string(),
    }
}
