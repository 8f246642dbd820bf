use std::net::IpAddr;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;
use super::{AddressFamily, DiscoveryError};
use crate::settings::DiscoverySettings;

/// Asks "what is my IP" services for the address they see.
#[derive(Debug)]
pub struct EchoClient {
    client: Client,
    ipv4: Vec<Url>,
    ipv6: Vec<Url>,
}

impl EchoClient {
    pub fn new(settings: &DiscoverySettings) -> Result<Self, DiscoveryError> {
        Ok(Self {
            client: Client::builder().timeout(settings.timeout).build()?,
            ipv4: settings.ipv4_endpoints.clone(),
            ipv6: settings.ipv6_endpoints.clone(),
        })
    }

    /// Tries each endpoint of `family` in order and returns the first valid answer.
    #[tracing::instrument(skip(self))]
    pub async fn public_address(&self, family: AddressFamily) -> Result<IpAddr, DiscoveryError> {
        let endpoints = match family {
            AddressFamily::V4 => &self.ipv4,
            AddressFamily::V6 => &self.ipv6,
        };

        for url in endpoints {
            match self.fetch(url, family).await {
                Ok(ip) => {
                    debug!(%url, %ip, "got public address");
                    return Ok(ip);
                }
                Err(e) => debug!(%url, "echo endpoint failed: {}", e),
            }
        }

        Err(DiscoveryError::NoEndpoint(family))
    }

    async fn fetch(&self, url: &Url, family: AddressFamily) -> Result<IpAddr, EchoError> {
        let body = self.client.get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_address(&body, family)
    }
}

fn parse_address(body: &str, family: AddressFamily) -> Result<IpAddr, EchoError> {
    let body = body.trim();
    let ip = body.parse::<IpAddr>()
        .map_err(|_| EchoError::NotAnAddress(body.chars().take(64).collect()))?;

    if family.matches(&ip) {
        Ok(ip)
    } else {
        Err(EchoError::WrongFamily(ip))
    }
}

#[derive(Debug, Error)]
enum EchoError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("response is not an address: {0:?}")]
    NotAnAddress(String),
    #[error("got {0}, which is the wrong address family")]
    WrongFamily(IpAddr),
}
