//! Mock autopilot peer for the X-Plane SITL plugin.
//!
//! Listens for state frames and answers each with a fixed actuator command,
//! so the plugin's lock-step and free-running paths can be exercised without
//! a real autopilot. One datagram in, one datagram out.

use std::net::UdpSocket;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sitl_protocol::{decode_state, encode_command};
use sitl_schema::{ActuatorCommand, MAX_CHANNELS};

#[derive(Parser, Debug)]
#[command(
    name = "sitl-peer",
    about = "Mock autopilot that echoes actuator commands back to the SITL plugin"
)]
struct Args {
    /// Address to listen on for state frames.
    #[arg(long, default_value = "0.0.0.0:9002")]
    listen: String,

    /// Number of actuator channels in each reply.
    #[arg(long, default_value_t = 4)]
    channels: usize,

    /// Comma-separated channel values, e.g. "0.1,-0.2,0.3,0.0".
    /// Overrides --channels; defaults to all-neutral.
    #[arg(long)]
    values: Option<String>,

    /// Stop after this many frames (0 = run forever).
    #[arg(long, default_value_t = 0)]
    count: u64,

    /// Print every received state frame.
    #[arg(long, short)]
    verbose: bool,
}

fn parse_values(text: &str) -> Result<Vec<f32>> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid channel values {text:?}"))?;
    if values.is_empty() || values.len() > MAX_CHANNELS {
        bail!("channel count must be 1..={MAX_CHANNELS}, got {}", values.len());
    }
    if let Some(bad) = values.iter().find(|v| !(-1.0..=1.0).contains(*v)) {
        bail!("channel value {bad} outside [-1, 1]");
    }
    Ok(values)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let channels = match &args.values {
        Some(text) => parse_values(text)?,
        None => {
            if args.channels == 0 || args.channels > MAX_CHANNELS {
                bail!("--channels must be 1..={MAX_CHANNELS}");
            }
            vec![0.0; args.channels]
        }
    };

    let socket = UdpSocket::bind(&args.listen)
        .with_context(|| format!("cannot bind {}", args.listen))?;
    println!(
        "sitl-peer: listening on {}, replying with {:?}",
        socket.local_addr()?,
        channels
    );

    let mut buf = [0u8; 128];
    let mut seen = 0u64;
    loop {
        let (n, from) = socket.recv_from(&mut buf).context("receive failed")?;
        match decode_state(&buf[..n]) {
            Ok(snap) => {
                seen += 1;
                if args.verbose {
                    println!(
                        "#{seen} t={:.3}s q=[{:.3} {:.3} {:.3} {:.3}] lat={:.6} lon={:.6}",
                        snap.sim_time_s,
                        snap.quaternion[0],
                        snap.quaternion[1],
                        snap.quaternion[2],
                        snap.quaternion[3],
                        snap.latitude_deg,
                        snap.longitude_deg,
                    );
                }
                let reply = ActuatorCommand {
                    sim_time_s: snap.sim_time_s,
                    channels: channels.clone(),
                };
                socket
                    .send_to(&encode_command(&reply), from)
                    .context("reply failed")?;
            }
            Err(e) => eprintln!("sitl-peer: dropped {n}-byte datagram: {e}"),
        }
        if args.count != 0 && seen >= args.count {
            break;
        }
    }
    Ok(())
}
