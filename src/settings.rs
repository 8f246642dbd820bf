use std::{
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    time::Duration,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use config::{Config, ConfigError, Environment, File, FileFormat, FileSourceFile, Source};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use crate::cli::Args;

const DEFAULT_CONFIG_FILE: &str = "~/.ddns";
const SYSTEM_CONFIG_FILE: &str = "/etc/ddns/config";
const DEFAULT_TSIG_ALGORITHM: &str = "hmac-sha256";
const DNS_PORT: u16 = 53;

const DEFAULT_IPV4_ENDPOINTS: &[&str] = &["http://api.ipify.org", "http://ipinfo.io/ip"];
const DEFAULT_IPV6_ENDPOINTS: &[&str] = &["http://api6.ipify.org"];
const DEFAULT_BMC_COMMAND: &[&str] = &["sudo", "-n", "ipmitool", "lan", "print"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[cfg(feature = "route53")]
    Route53,
    #[cfg(feature = "rfc2136")]
    Rfc2136,
}

#[cfg(feature = "route53")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route53Settings {
    pub hosted_zone_id: String,
}

#[cfg(feature = "rfc2136")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc2136Settings {
    pub name_server: SocketAddr,
    pub zone: Option<String>,
    pub tsig: Option<TsigSettings>,
}

#[cfg(feature = "rfc2136")]
#[derive(Clone, PartialEq, Eq)]
pub struct TsigSettings {
    pub key_name: String,
    pub algorithm: String,
    pub secret: Vec<u8>,
}

#[cfg(feature = "rfc2136")]
impl std::fmt::Debug for TsigSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsigSettings")
            .field("key_name", &self.key_name)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    #[cfg(feature = "route53")]
    Route53(Route53Settings),
    #[cfg(feature = "rfc2136")]
    Rfc2136(Rfc2136Settings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub ipv4_endpoints: Vec<Url>,
    pub ipv6_endpoints: Vec<Url>,
    pub bmc_command: Vec<String>,
    pub timeout: Duration,
}

/// Merged, validated settings. Built once in `main` and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub domain_name: String,
    pub hostname: Option<String>,
    pub ttl: u32,
    pub timeout: Duration,
    pub provider: Provider,
    pub discovery: DiscoverySettings,
}

/// Settings as they come out of the layered sources, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    provider: Option<ProviderKind>,
    domain_name: Option<String>,
    hostname: Option<String>,

    domain_zone_id: Option<String>,

    name_server: Option<String>,
    zone: Option<String>,
    sig_algo: Option<String>,
    sig_key: Option<String>,
    sig_secret: Option<String>,

    ttl: Option<u32>,
    timeout: Option<String>,
    ipv4_endpoints: Option<Vec<String>>,
    ipv6_endpoints: Option<Vec<String>>,
    bmc_command: Option<Vec<String>>,
}

impl Settings {
    /// Loads settings with precedence: command line > `DDNS_*` environment >
    /// settings file > `/etc/ddns/config`.
    pub fn new(args: &Args) -> Result<Self, SettingsError> {
        let file = match &args.config {
            Some(path) => json_file(&path.to_string_lossy()).required(true),
            None => json_file(&shellexpand::tilde(DEFAULT_CONFIG_FILE)).required(false),
        };

        Self::from_sources(json_file(SYSTEM_CONFIG_FILE).required(false), file, args)
    }

    fn from_sources<S, F>(system: S, file: F, args: &Args) -> Result<Self, SettingsError>
    where
        S: Source + Send + Sync + 'static,
        F: Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            .add_source(system)
            .add_source(file)
            .add_source(Environment::with_prefix("DDNS")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ipv4_endpoints")
                .with_list_parse_key("ipv6_endpoints")
                .with_list_parse_key("bmc_command"))
            .set_override_option("provider", args.provider.clone())?
            .set_override_option("domain_name", args.domain.clone())?
            .set_override_option("hostname", args.hostname.clone())?
            .set_override_option("domain_zone_id", args.id.clone())?
            .set_override_option("name_server", args.ns.clone())?
            .set_override_option("zone", args.zone.clone())?
            .set_override_option("sig_algo", args.algo.clone())?
            .set_override_option("sig_key", args.key.clone())?
            .set_override_option("sig_secret", args.secret.clone())?
            .build()?;

        cfg.try_deserialize::<RawSettings>()?.validate()
    }
}

impl RawSettings {
    fn validate(self) -> Result<Settings, SettingsError> {
        let domain_name = non_empty(self.domain_name)
            .map(|d| d.trim_end_matches('.').to_owned())
            .ok_or(SettingsError::Missing("domain_name"))?;

        let provider = match self.provider.ok_or(SettingsError::Missing("provider"))? {
            #[cfg(feature = "route53")]
            ProviderKind::Route53 => Provider::Route53(Route53Settings {
                hosted_zone_id: non_empty(self.domain_zone_id)
                    .ok_or(SettingsError::Missing("domain_zone_id"))?,
            }),
            #[cfg(feature = "rfc2136")]
            ProviderKind::Rfc2136 => {
                let name_server = non_empty(self.name_server)
                    .ok_or(SettingsError::Missing("name_server"))?;
                let tsig = match (non_empty(self.sig_key), non_empty(self.sig_secret)) {
                    (Some(key_name), Some(secret)) => Some(TsigSettings {
                        key_name,
                        algorithm: non_empty(self.sig_algo)
                            .unwrap_or_else(|| DEFAULT_TSIG_ALGORITHM.to_owned()),
                        secret: BASE64.decode(secret.trim())?,
                    }),
                    (None, None) => None,
                    _ => return Err(SettingsError::PartialTsig),
                };

                Provider::Rfc2136(Rfc2136Settings {
                    name_server: name_server_addr(&name_server)?,
                    zone: non_empty(self.zone),
                    tsig,
                })
            }
        };

        let timeout = match non_empty(self.timeout) {
            Some(t) => humantime::parse_duration(&t)?,
            None => crate::dns::DEFAULT_TIMEOUT,
        };

        Ok(Settings {
            domain_name,
            hostname: non_empty(self.hostname),
            ttl: self.ttl.unwrap_or(crate::dns::DEFAULT_TTL),
            timeout,
            provider,
            discovery: DiscoverySettings {
                ipv4_endpoints: urls(self.ipv4_endpoints, DEFAULT_IPV4_ENDPOINTS)?,
                ipv6_endpoints: urls(self.ipv6_endpoints, DEFAULT_IPV6_ENDPOINTS)?,
                bmc_command: self.bmc_command
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_BMC_COMMAND.iter().map(|s| s.to_string()).collect()),
                timeout,
            },
        })
    }
}

/// Settings files carry no extension, so the format is never guessed.
fn json_file(path: &str) -> File<FileSourceFile, FileFormat> {
    File::new(path, FileFormat::Json)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn urls(configured: Option<Vec<String>>, defaults: &[&str]) -> Result<Vec<Url>, SettingsError> {
    let raw = configured
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| defaults.iter().map(|s| s.to_string()).collect());

    raw.into_iter()
        .map(|u| Url::parse(&u).map_err(|e| SettingsError::InvalidUrl(u, e)))
        .collect()
}

/// Accepts `ip`, `ip:port`, `[v6]:port`, `host` or `host:port`; the port defaults to 53.
fn name_server_addr(s: &str) -> Result<SocketAddr, SettingsError> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let resolved = if s.contains(':') {
        s.to_socket_addrs()
    } else {
        (s, DNS_PORT).to_socket_addrs()
    };
    resolved.ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| SettingsError::InvalidNameServer(s.to_owned()))
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("missing setting: {0}")]
    Missing(&'static str),
    #[error("sig_key and sig_secret must be set together")]
    PartialTsig,
    #[error("sig_secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
    #[error("cannot resolve name server {0:?}")]
    InvalidNameServer(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(#[from] humantime::DurationError),
    #[error("invalid endpoint {0:?}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(json: &str, args: &Args) -> Result<Settings, SettingsError> {
        let system = File::from_str("{}", FileFormat::Json);
        Settings::from_sources(system, File::from_str(json, FileFormat::Json), args)
    }

    #[cfg(feature = "route53")]
    #[test]
    fn route53_from_file() {
        let settings = load(
            r#"{"provider": "route53", "domain_name": "example.com.", "domain_zone_id": "Z123"}"#,
            &Args::default(),
        ).unwrap();

        assert_eq!(settings.domain_name, "example.com");
        assert_eq!(settings.provider, Provider::Route53(Route53Settings {
            hosted_zone_id: "Z123".to_owned(),
        }));
        assert_eq!(settings.ttl, 300);
        assert_eq!(settings.timeout, crate::dns::DEFAULT_TIMEOUT);
        assert_eq!(settings.discovery.ipv4_endpoints.len(), 2);
        assert_eq!(settings.discovery.ipv6_endpoints[0].as_str(), "http://api6.ipify.org/");
        assert_eq!(settings.discovery.bmc_command[0], "sudo");
    }

    #[cfg(feature = "route53")]
    #[test]
    fn arguments_override_file() {
        let args = Args {
            domain: Some("other.org".to_owned()),
            id: Some("ZARGS".to_owned()),
            ..Args::default()
        };
        let settings = load(
            r#"{"provider": "route53", "domain_name": "example.com", "domain_zone_id": "ZFILE"}"#,
            &args,
        ).unwrap();

        assert_eq!(settings.domain_name, "other.org");
        assert_eq!(settings.provider, Provider::Route53(Route53Settings {
            hosted_zone_id: "ZARGS".to_owned(),
        }));
    }

    #[cfg(feature = "route53")]
    #[test]
    fn empty_values_count_as_missing() {
        let err = load(
            r#"{"provider": "route53", "domain_name": "", "domain_zone_id": "Z1"}"#,
            &Args::default(),
        ).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("domain_name")));

        let err = load(r#"{"provider": "route53", "domain_name": "example.com"}"#, &Args::default())
            .unwrap_err();
        assert!(matches!(err, SettingsError::Missing("domain_zone_id")));
    }

    #[cfg(feature = "route53")]
    #[test]
    fn extensionless_system_file_is_read() {
        let dir = std::env::temp_dir().join(format!("ddns-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config");
        std::fs::write(
            &path,
            r#"{"provider": "route53", "domain_name": "system.example.com",
                "domain_zone_id": "ZSYS"}"#,
        ).unwrap();

        let system = json_file(path.to_str().unwrap()).required(false);
        let user = File::from_str(r#"{"domain_zone_id": "ZUSER"}"#, FileFormat::Json);
        let settings = Settings::from_sources(system, user, &Args::default());
        std::fs::remove_dir_all(&dir).unwrap();
        let settings = settings.unwrap();

        assert_eq!(settings.domain_name, "system.example.com");
        assert_eq!(settings.provider, Provider::Route53(Route53Settings {
            hosted_zone_id: "ZUSER".to_owned(),
        }));
    }

    #[test]
    fn provider_is_required() {
        let err = load(r#"{"domain_name": "example.com"}"#, &Args::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("provider")));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = load(r#"{"provider": "bind", "domain_name": "example.com"}"#, &Args::default())
            .unwrap_err();
        assert!(matches!(err, SettingsError::Config(_)));
    }

    #[cfg(feature = "rfc2136")]
    #[test]
    fn rfc2136_with_tsig() {
        let settings = load(
            r#"{
                "provider": "rfc2136",
                "domain_name": "example.com",
                "name_server": "10.0.0.1",
                "sig_key": "ddns-key",
                "sig_secret": "c2VjcmV0",
                "ttl": 60,
                "timeout": "2s 500ms"
            }"#,
            &Args::default(),
        ).unwrap();

        let Provider::Rfc2136(rfc) = settings.provider else {
            panic!("expected rfc2136 settings");
        };
        assert_eq!(rfc.name_server, "10.0.0.1:53".parse().unwrap());
        assert_eq!(rfc.zone, None);
        let tsig = rfc.tsig.unwrap();
        assert_eq!(tsig.key_name, "ddns-key");
        assert_eq!(tsig.algorithm, "hmac-sha256");
        assert_eq!(tsig.secret, b"secret");
        assert_eq!(settings.ttl, 60);
        assert_eq!(settings.timeout, Duration::from_millis(2500));
        assert_eq!(settings.discovery.timeout, Duration::from_millis(2500));
    }

    #[cfg(feature = "rfc2136")]
    #[test]
    fn rfc2136_without_tsig_is_unauthenticated() {
        let args = Args {
            ns: Some("[::1]:5353".to_owned()),
            ..Args::default()
        };
        let settings = load(r#"{"provider": "rfc2136", "domain_name": "example.com"}"#, &args)
            .unwrap();

        assert_eq!(settings.provider, Provider::Rfc2136(Rfc2136Settings {
            name_server: "[::1]:5353".parse().unwrap(),
            zone: None,
            tsig: None,
        }));
    }

    #[cfg(feature = "rfc2136")]
    #[test]
    fn half_configured_tsig_is_an_error() {
        let err = load(
            r#"{"provider": "rfc2136", "domain_name": "example.com", "name_server": "10.0.0.1",
                "sig_key": "k"}"#,
            &Args::default(),
        ).unwrap_err();
        assert!(matches!(err, SettingsError::PartialTsig));
    }

    #[cfg(feature = "rfc2136")]
    #[test]
    fn bad_secret_is_an_error() {
        let err = load(
            r#"{"provider": "rfc2136", "domain_name": "example.com", "name_server": "10.0.0.1",
                "sig_key": "k", "sig_secret": "not base64!"}"#,
            &Args::default(),
        ).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidSecret(_)));
    }

    #[test]
    fn name_server_forms() {
        assert_eq!(name_server_addr("10.0.0.1").unwrap(), "10.0.0.1:53".parse().unwrap());
        assert_eq!(name_server_addr("10.0.0.1:5353").unwrap(), "10.0.0.1:5353".parse().unwrap());
        assert_eq!(name_server_addr("::1").unwrap(), "[::1]:53".parse().unwrap());
        assert_eq!(name_server_addr("localhost:53").unwrap().port(), 53);
    }

    #[test]
    fn configured_endpoints_replace_defaults() {
        let configured = vec!["https://echo.example.net/ip".to_owned()];
        let parsed = urls(Some(configured), DEFAULT_IPV4_ENDPOINTS).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].host_str(), Some("echo.example.net"));

        let err = urls(Some(vec!["not a url".to_owned()]), DEFAULT_IPV4_ENDPOINTS).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidUrl(_, _)));
    }
}
