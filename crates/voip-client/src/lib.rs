//! voip-client: Rust client library for the VOIP router.
//!
//! Provides an async TCP signaling client (login, call control, heartbeat)
//! and a UDP tunnel client for relayed media.
//!
//! # Quick Start
//!
//! ```no_run
//! use voip_client::{ConnectConfig, Credentials, RouterClient};
//! use voip_core::control::ControlCommand;
//!
//! # async fn example() -> voip_core::VoipResult<()> {
//! let mut client = RouterClient::connect("127.0.0.1:20000", ConnectConfig::default()).await?;
//! client.authenticate(Credentials::Uid(10)).await?;
//! client.send_control(10, 20, ControlCommand::Dial, 1).await?;
//!
//! let reply = client.recv().await?;
//! println!("{:?}", reply.body);
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod tunnel;

// Re-export primary public types.
pub use client::{ConnectConfig, Credentials, RouterClient};
pub use tunnel::TunnelClient;

// Re-export voip-core error types for convenience.
pub use voip_core::{VoipError, VoipResult};
