//! `voip listen`: wait for a call and answer it.

use super::{control_from, Target};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};
use voip_client::{RouterClient, TunnelClient};
use voip_core::control::{dial_count, ControlCommand};
use voip_core::messages::Body;
use voip_core::tunnel::VoipData;

pub async fn run(target: &Target, auto_accept: bool) -> Result<()> {
    let mut client = target.login().await?;
    println!("waiting for calls as uid {}", target.uid);

    let caller = wait_for_dial(&mut client).await?;
    println!("incoming call from {caller}");

    let accept = auto_accept || confirm(caller).await?;
    if !accept {
        client
            .send_control(target.uid, caller, ControlCommand::Refuse, 0)
            .await?;
        println!("refused");
        client.disconnect().await?;
        return Ok(());
    }
    client
        .send_control(target.uid, caller, ControlCommand::Accept, 0)
        .await?;
    println!("accepted");

    let tunnel = match &target.token {
        Some(token) => {
            let tunnel = TunnelClient::connect(target.tunnel_addr().await?).await?;
            tunnel
                .authenticate(token, Duration::from_millis(500), 10)
                .await
                .context("tunnel auth failed")?;
            Some(tunnel)
        }
        None => {
            warn!("no token configured, not joining the media tunnel");
            None
        }
    };

    let mut packets = 0u64;
    loop {
        tokio::select! {
            msg = client.recv() => {
                let msg = msg?;
                match control_from(&msg, Some(caller)) {
                    Some((_, ControlCommand::HangUp)) => {
                        println!("{caller} hung up ({packets} media packet(s))");
                        break;
                    }
                    Some((_, ControlCommand::Connected)) => println!("connected"),
                    Some((_, other)) => debug!(command = %other, "control from caller"),
                    None => {}
                }
            }
            data = recv_media(tunnel.as_ref()) => {
                let data = data?;
                packets += 1;
                println!("media: {} bytes from {}", data.payload.len(), data.sender);
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Block until some user dials us and return their uid.
async fn wait_for_dial(client: &mut RouterClient) -> Result<i64> {
    loop {
        let msg = client.recv().await?;
        if let Some((sender, ControlCommand::Dial)) = control_from(&msg, None) {
            if let Body::VoipControl(ctl) = &msg.body {
                debug!(sender, count = ?dial_count(&ctl.content), "dial received");
            }
            return Ok(sender);
        }
    }
}

async fn confirm(caller: i64) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(format!("Accept call from {caller}?"))
            .default(true)
            .interact()
    })
    .await
    .context("prompt task failed")?
    .context("failed to read answer")
}

async fn recv_media(tunnel: Option<&TunnelClient>) -> voip_core::VoipResult<VoipData> {
    match tunnel {
        Some(tunnel) => tunnel.recv_data().await,
        None => std::future::pending().await,
    }
}
