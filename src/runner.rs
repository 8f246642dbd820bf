use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr},
};
use thiserror::Error;
use tracing::{error, info, warn};
use crate::{
    discovery::{AddressFamily, Discovery, DiscoveryError},
    dns::{self, Provider, RecordType},
    reconciler::{Ipv4Reconciliation, Outcome, ReconcileError, Reconciler},
};

/// Names managed for this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    /// `{host}.{domain}.`
    pub host: String,
    /// `bmc-{host}.{domain}.`
    pub bmc: String,
}

impl Targets {
    /// Builds the names from the first label of `hostname`.
    pub fn new(hostname: &str, domain: &str) -> Result<Self, RunError> {
        let short = hostname.split('.').next().unwrap_or_default().trim();
        if short.is_empty() {
            return Err(RunError::Hostname(format!("{hostname:?} has no usable first label")));
        }
        let domain = domain.trim_end_matches('.');

        Ok(Self {
            host: dns::fqdn(&format!("{short}.{domain}")),
            bmc: dns::fqdn(&format!("bmc-{short}.{domain}")),
        })
    }

    /// Same as [`Targets::new`], using the system host name unless one is given.
    pub fn for_host(hostname: Option<&str>, domain: &str) -> Result<Self, RunError> {
        match hostname {
            Some(h) => Self::new(h, domain),
            None => {
                let system = hostname::get()
                    .map_err(|e| RunError::Hostname(e.to_string()))?
                    .into_string()
                    .map_err(|h| RunError::Hostname(format!("{h:?} is not valid UTF-8")))?;
                info!("got hostname: {}", system);
                Self::new(&system, domain)
            }
        }
    }
}

/// What happened to one address.
#[derive(Debug)]
pub enum Report<E> {
    /// Nothing to publish, the address could not be discovered.
    Unavailable(DiscoveryError),
    /// AAAA record reconciled.
    Reconciled(Outcome),
    /// A record reconciled, PTR record attempted.
    ReconciledWithReverse(Ipv4Reconciliation<E>),
    /// The forward record could not be reconciled.
    Failed(ReconcileError<E>),
}

impl<E> Report<E> {
    pub fn is_failure(&self) -> bool {
        match self {
            Report::Failed(_) => true,
            Report::ReconciledWithReverse(r) => r.is_partial(),
            Report::Unavailable(_) | Report::Reconciled(_) => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Report::Unavailable(_))
    }

    /// Records actually written, forward and reverse.
    pub fn updates(&self) -> usize {
        match self {
            Report::Reconciled(outcome) => written(outcome),
            Report::ReconciledWithReverse(r) => {
                written(&r.forward) + r.reverse.as_ref().map_or(0, written)
            }
            Report::Unavailable(_) | Report::Failed(_) => 0,
        }
    }
}

fn written(outcome: &Outcome) -> usize {
    usize::from(*outcome == Outcome::Updated)
}

#[derive(Debug)]
pub struct RunReport<E> {
    pub ipv4: Report<E>,
    pub ipv6: Report<E>,
    pub bmc: Report<E>,
}

impl<E> RunReport<E> {
    /// Neither public address could be discovered.
    pub fn no_public_address(&self) -> bool {
        self.ipv4.is_unavailable() && self.ipv6.is_unavailable()
    }

    pub fn failures(&self) -> usize {
        [&self.ipv4, &self.ipv6, &self.bmc].iter().filter(|r| r.is_failure()).count()
    }

    pub fn updates(&self) -> usize {
        [&self.ipv4, &self.ipv6, &self.bmc].iter().map(|r| r.updates()).sum()
    }

    pub fn is_success(&self) -> bool {
        !self.no_public_address() && self.failures() == 0
    }
}

/// Runs one pass over the host's records: IPv4, IPv6, then the BMC alias.
///
/// Each target is independent; a failure is logged and the next one still runs.
#[derive(Debug)]
pub struct Runner<P: Provider, D: Discovery> {
    reconciler: Reconciler<P>,
    discovery: D,
    targets: Targets,
}

impl<P: Provider, D: Discovery> Runner<P, D> {
    pub fn new(provider: P, discovery: D, targets: Targets) -> Self {
        Self {
            reconciler: Reconciler::new(provider),
            discovery,
            targets,
        }
    }

    #[tracing::instrument(skip(self), fields(host = %self.targets.host), level = "info")]
    pub async fn run(&self) -> RunReport<P::Error> {
        let ipv4 = match self.discovery.public_address(AddressFamily::V4).await {
            Ok(IpAddr::V4(ip)) => self.reconcile_ipv4(&self.targets.host, ip).await,
            Ok(ip) => Report::Unavailable(unexpected_family(AddressFamily::V4, ip)),
            Err(e) => Report::Unavailable(e),
        };

        let ipv6 = match self.discovery.public_address(AddressFamily::V6).await {
            Ok(ip @ IpAddr::V6(_)) => {
                let host = &self.targets.host;
                let report = match self.reconciler
                    .reconcile(host, &ip.to_string(), RecordType::Aaaa)
                    .await
                {
                    Ok(outcome) => Report::Reconciled(outcome),
                    Err(e) => Report::Failed(e),
                };
                log_report(host, RecordType::Aaaa, &report);
                report
            }
            Ok(ip) => Report::Unavailable(unexpected_family(AddressFamily::V6, ip)),
            Err(e) => Report::Unavailable(e),
        };

        for (family, report) in [(AddressFamily::V4, &ipv4), (AddressFamily::V6, &ipv6)] {
            if let Report::Unavailable(e) = report {
                warn!("skipping {} record: {}", family, e);
            }
        }

        let bmc = match self.discovery.bmc_address().await {
            Ok(ip) => self.reconcile_ipv4(&self.targets.bmc, ip).await,
            Err(e) => {
                info!("skipping BMC record: {}", e);
                Report::Unavailable(e)
            }
        };

        RunReport { ipv4, ipv6, bmc }
    }

    async fn reconcile_ipv4(&self, name: &str, ip: Ipv4Addr) -> Report<P::Error> {
        let report = match self.reconciler.reconcile_ipv4(name, ip).await {
            Ok(result) => Report::ReconciledWithReverse(result),
            Err(e) => Report::Failed(e),
        };
        log_report(name, RecordType::A, &report);
        report
    }
}

fn log_report<E: Display>(name: &str, record_type: RecordType, report: &Report<E>) {
    match report {
        Report::Unavailable(_) => {}
        Report::Reconciled(outcome) => {
            info!(?outcome, "{} record of {} reconciled", record_type, name);
        }
        Report::ReconciledWithReverse(result) => {
            info!(outcome = ?result.forward, "{} record of {} reconciled", record_type, name);
            match &result.reverse {
                Ok(outcome) => info!(?outcome, "reverse record of {} reconciled", name),
                Err(e) => error!("failed to set reverse dns for {}: {}", name, e),
            }
        }
        Report::Failed(e) => error!("failed to set dns for {}: {}", name, e),
    }
}

fn unexpected_family(family: AddressFamily, ip: IpAddr) -> DiscoveryError {
    warn!(%ip, "asked for an {} address, got something else", family);
    DiscoveryError::NoEndpoint(family)
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot determine host name: {0}")]
    Hostname(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use crate::dns::{tests::MockProviderError, MockProvider};

    const HOST: &str = "host.example.com.";
    const BMC: &str = "bmc-host.example.com.";

    struct FakeDiscovery {
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<IpAddr>,
        bmc: Option<Ipv4Addr>,
    }

    #[async_trait::async_trait]
    impl Discovery for FakeDiscovery {
        async fn public_address(&self, family: AddressFamily) -> Result<IpAddr, DiscoveryError> {
            match family {
                AddressFamily::V4 => self.ipv4.map(IpAddr::V4),
                AddressFamily::V6 => self.ipv6,
            }
            .ok_or(DiscoveryError::NoEndpoint(family))
        }

        async fn bmc_address(&self) -> Result<Ipv4Addr, DiscoveryError> {
            self.bmc.ok_or_else(|| DiscoveryError::BmcUnavailable("ipmitool not found".to_owned()))
        }
    }

    fn targets() -> Targets {
        Targets::new("host.internal.lan", "example.com").unwrap()
    }

    fn in_sync(
        provider: &mut MockProvider,
        name: &'static str,
        record_type: RecordType,
        value: &'static str,
    ) {
        provider.expect_get()
            .with(eq(name), eq(record_type))
            .times(1)
            .returning(move |_, _| Ok(vec![value.to_owned()]));
    }

    #[test]
    fn target_names() {
        assert_eq!(targets(), Targets {
            host: HOST.to_owned(),
            bmc: BMC.to_owned(),
        });
        assert_eq!(Targets::new("host", "example.com.").unwrap().host, HOST);
        assert!(matches!(Targets::new(".lan", "example.com"), Err(RunError::Hostname(_))));
    }

    #[tokio::test]
    async fn ipv6_discovery_failure_is_partial() {
        let mut provider = MockProvider::new();
        provider.expect_get()
            .with(eq(HOST), eq(RecordType::A))
            .times(1)
            .returning(|_, _| Ok(vec!["10.0.0.5".to_owned()]));
        provider.expect_set()
            .with(eq(HOST), eq("10.0.0.9"), eq(RecordType::A))
            .times(1)
            .returning(|_, _, _| Ok(()));
        in_sync(&mut provider, "9.0.0.10.in-addr.arpa.", RecordType::Ptr, HOST);

        let discovery = FakeDiscovery {
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ipv6: None,
            bmc: None,
        };
        let report = Runner::new(provider, discovery, targets()).run().await;

        assert!(matches!(
            report.ipv4,
            Report::ReconciledWithReverse(Ipv4Reconciliation {
                forward: Outcome::Updated,
                reverse: Ok(Outcome::Unchanged),
            })
        ));
        assert!(matches!(
            report.ipv6,
            Report::Unavailable(DiscoveryError::NoEndpoint(AddressFamily::V6))
        ));
        assert!(matches!(report.bmc, Report::Unavailable(DiscoveryError::BmcUnavailable(_))));
        assert!(!report.no_public_address());
        assert_eq!(report.failures(), 0);
        assert_eq!(report.updates(), 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn both_families_missing_fails_the_run() {
        let provider = MockProvider::new();
        let discovery = FakeDiscovery { ipv4: None, ipv6: None, bmc: None };

        let report = Runner::new(provider, discovery, targets()).run().await;

        assert!(report.no_public_address());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn one_failing_target_does_not_block_the_others() {
        let mut provider = MockProvider::new();
        provider.expect_get()
            .with(eq(HOST), eq(RecordType::A))
            .times(1)
            .returning(|_, _| Err(MockProviderError));
        provider.expect_get()
            .with(eq("9.0.0.10.in-addr.arpa."), eq(RecordType::Ptr))
            .times(0);
        in_sync(&mut provider, HOST, RecordType::Aaaa, "2001:db8::1");
        in_sync(&mut provider, BMC, RecordType::A, "10.1.0.1");
        in_sync(&mut provider, "1.0.1.10.in-addr.arpa.", RecordType::Ptr, BMC);
        provider.expect_set().times(0);

        let discovery = FakeDiscovery {
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ipv6: Some("2001:db8::1".parse().unwrap()),
            bmc: Some(Ipv4Addr::new(10, 1, 0, 1)),
        };
        let report = Runner::new(provider, discovery, targets()).run().await;

        assert!(matches!(report.ipv4, Report::Failed(ReconcileError::Query(_))));
        assert!(matches!(report.ipv6, Report::Reconciled(Outcome::Unchanged)));
        assert!(matches!(
            report.bmc,
            Report::ReconciledWithReverse(Ipv4Reconciliation {
                forward: Outcome::Unchanged,
                reverse: Ok(Outcome::Unchanged),
            })
        ));
        assert_eq!(report.failures(), 1);
        assert_eq!(report.updates(), 0);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn reverse_failure_counts_as_failure() {
        let mut provider = MockProvider::new();
        in_sync(&mut provider, HOST, RecordType::A, "10.0.0.9");
        provider.expect_get()
            .with(eq("9.0.0.10.in-addr.arpa."), eq(RecordType::Ptr))
            .times(1)
            .returning(|_, _| Err(MockProviderError));

        let discovery = FakeDiscovery {
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 9)),
            ipv6: None,
            bmc: None,
        };
        let report = Runner::new(provider, discovery, targets()).run().await;

        let Report::ReconciledWithReverse(result) = &report.ipv4 else {
            panic!("expected forward success, got {:?}", report.ipv4);
        };
        assert_eq!(result.forward, Outcome::Unchanged);
        assert!(matches!(result.reverse, Err(ReconcileError::Query(_))));
        assert_eq!(report.failures(), 1);
    }
}
