use std::net::IpAddr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Opts {
    /// Destination addresses to probe, one session each
    #[arg(required = true)]
    pub dst_addr: Vec<IpAddr>,
    /// number of echo requests per destination
    #[arg(long, short, default_value = "4")]
    pub count: u16,
    /// per-probe reply timeout in milliseconds
    #[arg(long, short, default_value = "1000")]
    pub timeout: u64,
    /// pause between probes in milliseconds
    #[arg(long, default_value = "1000")]
    pub interval: u64,
    /// Interface to bind the raw socket to
    #[arg(long, short)]
    pub iface: Option<String>,
    /// ICMP identifier for the whole run (random by default)
    #[arg(long)]
    pub identifier: Option<u16>,
}
