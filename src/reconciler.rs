use std::{
    fmt::{Debug, Display, Formatter},
    net::Ipv4Addr,
};
use tracing::info;
use crate::dns::{self, Provider, RecordType};

/// What a single reconciliation did to DNS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record already held exactly the desired value.
    Unchanged,
    /// The record was written.
    Updated,
}

/// Result of reconciling an IPv4 address: the forward A record always
/// succeeded; the reverse PTR record may not have.
#[derive(Debug)]
pub struct Ipv4Reconciliation<E> {
    pub forward: Outcome,
    pub reverse: Result<Outcome, ReconcileError<E>>,
}

impl<E> Ipv4Reconciliation<E> {
    pub fn is_partial(&self) -> bool {
        self.reverse.is_err()
    }
}

/// Runs the observe, compare, update cycle against one provider.
#[derive(Debug)]
pub struct Reconciler<P: Provider> {
    provider: P,
}

impl<P: Provider> Reconciler<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Makes `name`/`record_type` hold exactly `desired`.
    ///
    /// Only a single current value equal to `desired` counts as in sync;
    /// no value, another value or several values all lead to a write.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn reconcile(
        &self,
        name: &str,
        desired: &str,
        record_type: RecordType,
    ) -> Result<Outcome, ReconcileError<P::Error>> {
        let current = self.provider.get(name, record_type)
            .await
            .map_err(ReconcileError::Query)?;
        info!(?current, "the {} record of {} was observed", record_type, name);

        if let [value] = current.as_slice() {
            if value == desired {
                info!("no changes made");
                return Ok(Outcome::Unchanged);
            }
        }

        info!("setting {} record of {} to {}", record_type, name, desired);
        self.provider.set(name, desired, record_type)
            .await
            .map_err(ReconcileError::Update)?;

        Ok(Outcome::Updated)
    }

    /// Reconciles the A record of `name`, then the PTR record pointing back at it.
    ///
    /// The PTR step only runs once the A record is known to be correct. Its
    /// failure leaves the A record in place and is returned in `reverse`.
    pub async fn reconcile_ipv4(
        &self,
        name: &str,
        ip: Ipv4Addr,
    ) -> Result<Ipv4Reconciliation<P::Error>, ReconcileError<P::Error>> {
        let forward = self.reconcile(name, &ip.to_string(), RecordType::A).await?;
        let reverse = self
            .reconcile(&dns::reverse_name(ip), &dns::fqdn(name), RecordType::Ptr)
            .await;

        Ok(Ipv4Reconciliation { forward, reverse })
    }
}

#[derive(Debug)]
pub enum ReconcileError<E> {
    /// Reading the current value failed.
    Query(E),
    /// Writing the desired value failed.
    Update(E),
}

impl<E: Display> Display for ReconcileError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Query(e) => write!(f, "query failed: {e}"),
            ReconcileError::Update(e) => write!(f, "update failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ReconcileError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Query(e) | ReconcileError::Update(e) => Some(e),
        }
    }
}
