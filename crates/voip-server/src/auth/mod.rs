//! Access-token validation.
//!
//! Sessions and the tunnel relay only see the [`TokenValidator`] trait, so
//! the token scheme can be swapped without touching either.

use std::future::Future;
use std::pin::Pin;
use voip_core::token::verify_token;
use voip_core::{AccessToken, VoipResult};

/// Resolves an access token to the identity it was issued for.
pub trait TokenValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = VoipResult<AccessToken>> + Send + 'a>>;
}

/// Validates HMAC-signed tokens minted by `voip token`.
pub struct HmacTokenValidator {
    secret: Vec<u8>,
}

impl HmacTokenValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl TokenValidator for HmacTokenValidator {
    fn validate<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = VoipResult<AccessToken>> + Send + 'a>> {
        Box::pin(async move { verify_token(&self.secret, token) })
    }
}
