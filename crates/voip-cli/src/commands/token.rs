//! `voip token`: mint an access token from a shared secret.

use anyhow::{Context, Result};

/// Mint a token for (appid, uid) valid for `ttl` seconds.
pub fn mint(secret_hex: &str, appid: i64, uid: i64, ttl: u64) -> Result<String> {
    let secret = hex::decode(secret_hex.trim()).context("secret must be hex")?;
    if secret.is_empty() {
        anyhow::bail!("secret must not be empty");
    }
    Ok(voip_core::create_token(&secret, appid, uid, ttl))
}

pub fn run(secret_hex: &str, appid: i64, uid: i64, ttl: u64) -> Result<()> {
    println!("{}", mint(secret_hex, appid, uid, ttl)?);
    Ok(())
}
