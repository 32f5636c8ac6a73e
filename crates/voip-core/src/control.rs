//! Call-signaling content carried inside `VoipControl` bodies.
//!
//! Content is `[command:4]`, or `[command:4][dial_count:4]` for DIAL. The
//! router only looks inside to decide whether an undeliverable control
//! message should become a push notification.

use crate::error::{VoipError, VoipResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlCommand {
    Dial = 1,
    Accept = 2,
    Connected = 3,
    Refuse = 4,
    HangUp = 5,
    Reset = 6,
    Talking = 7,
}

impl TryFrom<i32> for ControlCommand {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, i32> {
        match v {
            1 => Ok(Self::Dial),
            2 => Ok(Self::Accept),
            3 => Ok(Self::Connected),
            4 => Ok(Self::Refuse),
            5 => Ok(Self::HangUp),
            6 => Ok(Self::Reset),
            7 => Ok(Self::Talking),
            other => Err(other),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dial => "dial",
            Self::Accept => "accept",
            Self::Connected => "connected",
            Self::Refuse => "refuse",
            Self::HangUp => "hang-up",
            Self::Reset => "reset",
            Self::Talking => "talking",
        };
        f.write_str(name)
    }
}

/// Build control content. `dial_count` is only written for DIAL.
pub fn encode_control(command: ControlCommand, dial_count: i32) -> Vec<u8> {
    let mut buf = (command as i32).to_be_bytes().to_vec();
    if command == ControlCommand::Dial {
        buf.extend_from_slice(&dial_count.to_be_bytes());
    }
    buf
}

/// Leading control command, if the content has one this router knows.
pub fn control_command(content: &[u8]) -> Option<ControlCommand> {
    let head: [u8; 4] = content.get(..4)?.try_into().ok()?;
    ControlCommand::try_from(i32::from_be_bytes(head)).ok()
}

/// Dial attempt number, present only for DIAL content of exactly 8 bytes.
pub fn dial_count(content: &[u8]) -> Option<i32> {
    if content.len() != 8 || control_command(content) != Some(ControlCommand::Dial) {
        return None;
    }
    let count: [u8; 4] = content[4..8].try_into().ok()?;
    Some(i32::from_be_bytes(count))
}

/// Only the first dial attempt to an offline callee produces a push.
pub fn wants_push(content: &[u8]) -> bool {
    dial_count(content) == Some(1)
}

/// Payload appended to the push queue for an undelivered first dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialNotification {
    pub sender: i64,
    pub receiver: i64,
    pub appid: i64,
}

impl DialNotification {
    pub fn to_json(&self) -> VoipResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VoipError::Push(e.to_string()))
    }
}
