use std::{net::IpAddr, time::Duration};

use anyhow::{bail, Result};
use clap::Parser;
use common::interface_to_ipaddr;

mod args;
mod checksum;
mod clock;
mod packet;
mod session;
mod transport;

use session::{PingSession, ProbeOutcome, SessionConfig};
use transport::IcmpTransport;

fn main() -> Result<()> {
    let opts = args::Opts::parse();

    // One identifier for the whole run, threaded into every session up
    // front rather than read from ambient process state.
    let identifier = opts.identifier.unwrap_or_else(rand::random);

    if let Some(iface) = opts.iface.as_deref() {
        let src_addr = interface_to_ipaddr(iface)?;
        println!("binding to {iface} ({src_addr})");
    }

    let config = SessionConfig {
        count: opts.count,
        timeout: Duration::from_millis(opts.timeout),
        interval: Duration::from_millis(opts.interval),
    };

    for dst_addr in &opts.dst_addr {
        let dst_addr = match dst_addr {
            IpAddr::V4(addr) => *addr,
            IpAddr::V6(_) => bail!("IPv6 is not supported yet"),
        };

        // a fresh socket per destination; sessions are fully independent
        let transport = IcmpTransport::new(opts.iface.as_deref())?;
        println!(
            "Pinging {} with {} bytes of data",
            dst_addr,
            packet::ECHO_PACKET_LEN
        );

        let mut session =
            PingSession::new(transport, dst_addr, identifier, config.clone());
        let stats = session.run(|sequence, outcome| match outcome {
            ProbeOutcome::Success { rtt } => println!(
                "reply from {}: icmp_seq={} time={:.3} ms",
                dst_addr,
                sequence,
                rtt * 1e3
            ),
            ProbeOutcome::Timeout => {
                println!("icmp_seq={sequence} request timed out")
            }
        })?;

        println!("\n--- {dst_addr} ping statistics ---");
        println!("{stats}\n");
    }

    Ok(())
}
