use std::{net::Ipv4Addr, process::Stdio, time::Duration};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{process::Command, time};
use tracing::debug;
use super::DiscoveryError;

static IP_ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"IP Address\s+:\s+([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)").unwrap());

const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads the BMC address out of `ipmitool lan print` (or a compatible command).
#[derive(Debug)]
pub struct BmcTool {
    command: Vec<String>,
}

impl BmcTool {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    #[tracing::instrument(skip(self))]
    pub async fn address(&self) -> Result<Ipv4Addr, DiscoveryError> {
        let (program, args) = self.command
            .split_first()
            .ok_or_else(|| unavailable("no command configured"))?;

        let output = time::timeout(
            TOOL_TIMEOUT,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        ).await
            .map_err(|_| unavailable(format!("{program} timed out")))?
            .map_err(|e| unavailable(format!("cannot run {program}: {e}")))?;

        if !output.status.success() {
            return Err(unavailable(format!("{program} exited with {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bytes = stdout.len(), "read BMC LAN configuration");
        parse_lan_print(&stdout).ok_or_else(|| unavailable("no IP address in tool output"))
    }
}

/// Extracts the first `IP Address : a.b.c.d` line.
pub fn parse_lan_print(output: &str) -> Option<Ipv4Addr> {
    IP_ADDRESS_REGEX.captures_iter(output)
        .filter_map(|cap| cap.get(1))
        .find_map(|m| m.as_str().parse().ok())
}

fn unavailable(reason: impl Into<String>) -> DiscoveryError {
    DiscoveryError::BmcUnavailable(reason.into())
}
