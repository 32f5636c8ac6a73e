//! UDP media tunnel: peer tracking and relay loops.

pub mod registry;
pub mod relay;

pub use registry::TunnelRegistry;
pub use relay::TunnelRelay;
