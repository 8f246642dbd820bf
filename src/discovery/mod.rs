pub mod bmc;
pub mod http;

use std::{
    fmt::{Display, Formatter},
    net::{IpAddr, Ipv4Addr},
};
use thiserror::Error;
use crate::settings::DiscoverySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn matches(&self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (AddressFamily::V4, IpAddr::V4(_)) | (AddressFamily::V6, IpAddr::V6(_))
        )
    }
}

impl Display for AddressFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// Where the addresses to publish come from.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Public address of this host as seen from the internet.
    async fn public_address(&self, family: AddressFamily) -> Result<IpAddr, DiscoveryError>;

    /// Address of the local management controller.
    async fn bmc_address(&self) -> Result<Ipv4Addr, DiscoveryError>;
}

/// Echo endpoints for public addresses, the local management tool for the BMC.
#[derive(Debug)]
pub struct SystemDiscovery {
    echo: http::EchoClient,
    bmc: bmc::BmcTool,
}

impl SystemDiscovery {
    pub fn new(settings: &DiscoverySettings) -> Result<Self, DiscoveryError> {
        Ok(Self {
            echo: http::EchoClient::new(settings)?,
            bmc: bmc::BmcTool::new(settings.bmc_command.clone()),
        })
    }
}

#[async_trait::async_trait]
impl Discovery for SystemDiscovery {
    async fn public_address(&self, family: AddressFamily) -> Result<IpAddr, DiscoveryError> {
        self.echo.public_address(family).await
    }

    async fn bmc_address(&self) -> Result<Ipv4Addr, DiscoveryError> {
        self.bmc.address().await
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to get the public {0} address from any source")]
    NoEndpoint(AddressFamily),
    #[error("BMC address not available: {0}")]
    BmcUnavailable(String),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}
