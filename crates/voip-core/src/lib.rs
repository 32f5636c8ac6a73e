//! voip-core: shared protocol library for the VOIP router.
//!
//! Provides the TCP frame codec and message types, UDP tunnel datagrams,
//! call-signaling content helpers, and HMAC access tokens.

pub mod codec;
pub mod control;
pub mod error;
pub mod messages;
pub mod token;
pub mod tunnel;

// Re-export commonly used items at crate root.
pub use codec::{frame_encode, read_message, write_message, HEADER_LEN, MAX_BODY_LEN};
pub use error::{VoipError, VoipResult};
pub use messages::{Body, Command, Message};
pub use token::{create_token, generate_secret, verify_token, AccessToken};
pub use tunnel::{TunnelPacket, VoipData};
