//! HMAC access tokens.
//!
//! A token binds an (appid, uid) identity to an expiry time and is signed
//! with a shared secret. On the wire it is hex text so it fits the string
//! fields of the TCP and UDP auth messages.
//! Layout before hex encoding: `[appid:8][uid:8][expiry:8][HMAC-SHA256:32]`

use crate::error::{VoipError, VoipResult};
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};

const CLAIMS_LEN: usize = 24;
const TAG_LEN: usize = 32;
const TOKEN_LEN: usize = CLAIMS_LEN + TAG_LEN;

/// Identity recovered from a valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessToken {
    pub appid: i64,
    pub uid: i64,
    /// Unix seconds.
    pub expires_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn claims(appid: i64, uid: i64, expiry: u64) -> [u8; CLAIMS_LEN] {
    let mut data = [0u8; CLAIMS_LEN];
    data[0..8].copy_from_slice(&appid.to_be_bytes());
    data[8..16].copy_from_slice(&uid.to_be_bytes());
    data[16..24].copy_from_slice(&expiry.to_be_bytes());
    data
}

/// Create a token valid for `ttl_secs` from now.
pub fn create_token(secret: &[u8], appid: i64, uid: i64, ttl_secs: u64) -> String {
    create_token_at(secret, appid, uid, unix_now().saturating_add(ttl_secs))
}

/// Create a token with an absolute expiry.
pub fn create_token_at(secret: &[u8], appid: i64, uid: i64, expires_at: u64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let data = claims(appid, uid, expires_at);
    let tag = hmac::sign(&key, &data);

    let mut token = Vec::with_capacity(TOKEN_LEN);
    token.extend_from_slice(&data);
    token.extend_from_slice(tag.as_ref());
    hex::encode(token)
}

/// Verify a token against the current time.
pub fn verify_token(secret: &[u8], token: &str) -> VoipResult<AccessToken> {
    verify_token_at(secret, token, unix_now())
}

/// Verify signature and expiry as of `now` (unix seconds).
pub fn verify_token_at(secret: &[u8], token: &str, now: u64) -> VoipResult<AccessToken> {
    let raw = hex::decode(token.trim()).map_err(|e| VoipError::Token(format!("not hex: {e}")))?;
    if raw.len() != TOKEN_LEN {
        return Err(VoipError::Token(format!(
            "invalid token length: expected {TOKEN_LEN}, got {}",
            raw.len()
        )));
    }

    let (data, tag) = raw.split_at(CLAIMS_LEN);
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, data, tag)
        .map_err(|_| VoipError::Token("invalid token signature".into()))?;

    let field = |range: std::ops::Range<usize>| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&data[range]);
        b
    };
    let access = AccessToken {
        appid: i64::from_be_bytes(field(0..8)),
        uid: i64::from_be_bytes(field(8..16)),
        expires_at: u64::from_be_bytes(field(16..24)),
    };

    if now > access.expires_at {
        return Err(VoipError::Token("token expired".into()));
    }
    Ok(access)
}

/// Generate a random 32-byte secret.
pub fn generate_secret() -> VoipResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| VoipError::Other("system RNG failure".into()))?;
    Ok(secret)
}
