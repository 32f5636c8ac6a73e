//! `voip dial <receiver>`: place a call.
//!
//! Sends DIAL with an increasing dial count until the receiver answers or
//! the attempts run out. On ACCEPT it confirms with CONNECTED, streams a
//! few dummy media frames over the tunnel when a token is configured, and
//! hangs up.

use super::{control_from, Target};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use voip_client::{RouterClient, TunnelClient};
use voip_core::control::ControlCommand;

/// Size of each dummy media frame (20 ms of 8 kHz PCM).
const FRAME_LEN: usize = 160;
const FRAME_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct DialOptions {
    pub receiver: i64,
    pub attempts: u32,
    pub interval: Duration,
    /// Media frames to send after the call is accepted.
    pub frames: u32,
}

pub async fn run(target: &Target, opts: &DialOptions) -> Result<()> {
    let mut client = target.login().await?;
    let answer = ring(&mut client, target.uid, opts).await?;

    match answer {
        Some(ControlCommand::Accept) | Some(ControlCommand::Connected) => {
            println!("call accepted by {}", opts.receiver);
            client
                .send_control(target.uid, opts.receiver, ControlCommand::Connected, 0)
                .await?;
            println!("connected");
            if let Err(e) = stream_media(target, opts).await {
                warn!(error = %e, "media stream failed");
                eprintln!("voip: media: {e:#}");
            }
            client
                .send_control(target.uid, opts.receiver, ControlCommand::HangUp, 0)
                .await?;
            println!("hung up");
        }
        Some(ControlCommand::Refuse) => println!("call refused by {}", opts.receiver),
        Some(other) => println!("call ended by {} ({other})", opts.receiver),
        None => {
            println!("no answer from {} after {} dial(s)", opts.receiver, opts.attempts);
            client
                .send_control(target.uid, opts.receiver, ControlCommand::HangUp, 0)
                .await?;
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Dial until the receiver answers. Returns the answering command, or
/// `None` if every attempt timed out.
async fn ring(
    client: &mut RouterClient,
    me: i64,
    opts: &DialOptions,
) -> Result<Option<ControlCommand>> {
    for count in 1..=opts.attempts {
        debug!(receiver = opts.receiver, count, "dialing");
        client
            .send_control(me, opts.receiver, ControlCommand::Dial, count as i32)
            .await?;

        let deadline = Instant::now() + opts.interval;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(msg) = client.recv_timeout(remaining).await? else {
                break;
            };
            match control_from(&msg, Some(opts.receiver)) {
                Some((_, ControlCommand::Dial)) | Some((_, ControlCommand::Talking)) | None => {}
                Some((_, answer)) => return Ok(Some(answer)),
            }
        }
    }
    Ok(None)
}

async fn stream_media(target: &Target, opts: &DialOptions) -> Result<()> {
    let Some(token) = &target.token else {
        println!("no token configured, skipping media");
        return Ok(());
    };
    if opts.frames == 0 {
        return Ok(());
    }

    let tunnel = TunnelClient::connect(target.tunnel_addr().await?).await?;
    tunnel
        .authenticate(token, Duration::from_millis(500), 10)
        .await
        .context("tunnel auth failed")?;

    let frame = vec![0u8; FRAME_LEN];
    let mut ticker = time::interval(FRAME_INTERVAL);
    for _ in 0..opts.frames {
        ticker.tick().await;
        tunnel.send_data(target.uid, opts.receiver, &frame).await?;
    }
    println!("sent {} media frame(s)", opts.frames);
    Ok(())
}
