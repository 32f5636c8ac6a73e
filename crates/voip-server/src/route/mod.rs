//! Live-session directory keyed by (appid, uid).

pub mod registry;

pub use registry::{AppRoute, RouteRegistry};

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use voip_core::VoipError;

/// What happens to a user's existing sessions when they log in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginPolicy {
    /// Every device stays connected.
    #[default]
    Multi,
    /// Single sign-on: older sessions are reset and dropped from the registry.
    Single,
}

impl FromStr for LoginPolicy {
    type Err = VoipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(Self::Multi),
            "single" => Ok(Self::Single),
            other => Err(VoipError::Config(format!(
                "unknown login policy {other:?} (expected \"multi\" or \"single\")"
            ))),
        }
    }
}

impl fmt::Display for LoginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multi => f.write_str("multi"),
            Self::Single => f.write_str("single"),
        }
    }
}
