#[cfg(feature = "route53")]
pub mod route53;
#[cfg(feature = "rfc2136")]
pub mod rfc2136;

use std::{
    fmt::{Display, Formatter},
    net::Ipv4Addr,
    time::Duration,
};

/// Time to live written with every record.
pub const DEFAULT_TTL: u32 = 300;
/// Upper bound on any single request, to a provider or to an echo endpoint.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Record types this tool knows how to reconcile.
///
/// Anything outside this set cannot reach a [`Provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Ptr,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Ptr => "PTR",
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS backend able to read and upsert single records.
///
/// Names passed in are absolute (`host.example.com.`).
#[cfg_attr(test, mockall::automock(type Error = tests::MockProviderError;))]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the current values of `name`/`record_type`, in server order.
    ///
    /// Entries belonging to any other name or type are never returned.
    async fn get(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, Self::Error>;

    /// Replaces whatever `name`/`record_type` holds with exactly `value`.
    async fn set(
        &self,
        name: &str,
        value: &str,
        record_type: RecordType,
    ) -> Result<(), Self::Error>;
}

/// Appends the root label if it is missing.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

/// Compares two owner names the way DNS does: ASCII case-insensitive, root label optional.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// Reverse lookup name of an IPv4 address, e.g. `5.0.0.10.in-addr.arpa.`.
pub fn reverse_name(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}.in-addr.arpa.")
}
