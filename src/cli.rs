use std::path::PathBuf;
use clap::Parser;

/// Keeps the A/AAAA/PTR records of this host in sync with its public addresses.
#[derive(Debug, Default, Parser)]
#[command(name = "ddns", version, about)]
pub struct Args {
    /// Settings file (JSON). Defaults to ~/.ddns
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Domain name the host records live under
    #[arg(short, long)]
    pub domain: Option<String>,

    /// DNS provider: route53 or rfc2136
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Hosted zone id (route53)
    #[arg(short, long)]
    pub id: Option<String>,

    /// Nameserver address, host[:port] (rfc2136)
    #[arg(short, long)]
    pub ns: Option<String>,

    /// TSIG algorithm (rfc2136)
    #[arg(short, long)]
    pub algo: Option<String>,

    /// TSIG key name (rfc2136)
    #[arg(short, long)]
    pub key: Option<String>,

    /// TSIG secret, base64 (rfc2136)
    #[arg(short, long)]
    pub secret: Option<String>,

    /// Update zone, when it is not the record name minus its first label (rfc2136)
    #[arg(long)]
    pub zone: Option<String>,

    /// Use this host name instead of the system one
    #[arg(long)]
    pub hostname: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json: bool,
}
