//! RFC 2136 dynamic updates against an authoritative nameserver.
//!
//! Every `set` is a single update transaction that first removes the whole
//! RRset for the name and type, then inserts the new record. A stale value can
//! therefore never survive next to the new one.
//!
//! The zone of the transaction is the record name minus its leftmost label,
//! unless a zone is configured explicitly and the name lies inside it. Deeper
//! hierarchies such as `a.b.example.com.` in zone `example.com.` need that
//! explicit zone. Reverse names keep their derived zone either way.

use std::{net::{Ipv4Addr, Ipv6Addr, SocketAddr}, str::FromStr, time::Duration};
use hickory_client::client::{Client, SyncClient};
use hickory_client::error::ClientError;
use hickory_client::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_client::rr::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::rdata::PTR;
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordType as WireType};
use hickory_client::udp::UdpClientConnection;
use hickory_proto::error::ProtoError;
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::xfer::{DnsRequest, DnsRequestOptions};
use thiserror::Error;
use tracing::debug;
use super::{Provider, RecordType, DEFAULT_TIMEOUT, DEFAULT_TTL};
use crate::settings::{Rfc2136Settings, TsigSettings};

const TSIG_FUDGE_SECS: u16 = 300;

#[derive(Clone)]
pub struct Rfc2136Provider {
    name_server: SocketAddr,
    zone: Option<Name>,
    signer: Option<TSigner>,

    ttl: u32,
    timeout: Duration,
}

impl Rfc2136Provider {
    pub fn new(settings: &Rfc2136Settings) -> Result<Self, Rfc2136Error> {
        let signer = settings.tsig.as_ref().map(signer).transpose()?;
        let zone = settings.zone.as_deref().map(parse_name).transpose()?;

        Ok(Self {
            name_server: settings.name_server,
            zone,
            signer,
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn ttl_mut(&mut self) -> &mut u32 {
        &mut self.ttl
    }
    pub fn timeout_mut(&mut self) -> &mut Duration {
        &mut self.timeout
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    fn client(&self) -> Result<SyncClient<UdpClientConnection>, Rfc2136Error> {
        let conn = UdpClientConnection::with_timeout(self.name_server, self.timeout)?;
        Ok(match &self.signer {
            Some(signer) => SyncClient::with_tsigner(conn, signer.clone()),
            None => SyncClient::new(conn),
        })
    }

    /// The configured zone when `name` lies inside it, otherwise the derived one.
    fn zone_for(&self, name: &Name) -> Name {
        match &self.zone {
            Some(zone) if zone.zone_of(name) => zone.clone(),
            _ => zone_of(name),
        }
    }

    fn query_blocking(
        &self,
        name: Name,
        record_type: RecordType,
    ) -> Result<Vec<String>, Rfc2136Error> {
        let client = self.client()?;
        let response = client.query(&name, DNSClass::IN, wire_type(record_type))?;

        match response.response_code() {
            ResponseCode::NoError | ResponseCode::NXDomain => {}
            code => return Err(rejected(code)),
        }

        Ok(answer_values(response.answers(), &name, record_type))
    }

    fn update_blocking(&self, message: Message) -> Result<(), Rfc2136Error> {
        let client = self.client()?;
        let request = DnsRequest::new(message, DnsRequestOptions::default());

        let response = client.send(request)
            .into_iter()
            .next()
            .ok_or(Rfc2136Error::NoResponse)??;

        match response.response_code() {
            ResponseCode::NoError => Ok(()),
            code => Err(rejected(code)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for Rfc2136Provider {
    type Error = Rfc2136Error;

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, Self::Error> {
        let name = parse_name(name)?;
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.query_blocking(name, record_type)).await?
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn set(
        &self,
        name: &str,
        value: &str,
        record_type: RecordType,
    ) -> Result<(), Self::Error> {
        let name = parse_name(name)?;
        let zone = self.zone_for(&name);
        let record = Record::from_rdata(name, self.ttl, rdata(value, record_type)?);
        let message = replace_rrset_message(zone, record);
        debug!(message = ?message.name_servers(), "sending update");

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.update_blocking(message)).await?
    }
}

/// Builds one update transaction: delete the RRset of `record`'s name and
/// type, then add `record`.
pub fn replace_rrset_message(zone: Name, record: Record) -> Message {
    let mut delete = Record::with(record.name().clone(), record.record_type(), 0);
    delete.set_dns_class(DNSClass::ANY);

    let mut message = Message::new();
    message
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .set_recursion_desired(false);
    message.add_query(Query::query(zone, WireType::SOA));
    message.add_name_server(delete);
    message.add_name_server(record);
    message
}

/// Strips the leftmost label.
pub fn zone_of(name: &Name) -> Name {
    name.base_name()
}

fn answer_values(answers: &[Record], name: &Name, record_type: RecordType) -> Vec<String> {
    answers.iter()
        .filter(|r| r.name() == name && r.record_type() == wire_type(record_type))
        .filter_map(|r| match r.data() {
            Some(RData::A(a)) => Some(a.0.to_string()),
            Some(RData::AAAA(aaaa)) => Some(aaaa.0.to_string()),
            Some(RData::PTR(ptr)) => Some(ptr.0.to_string()),
            _ => None,
        })
        .collect()
}

fn rdata(value: &str, record_type: RecordType) -> Result<RData, Rfc2136Error> {
    let invalid = || Rfc2136Error::InvalidValue {
        value: value.to_owned(),
        record_type,
    };

    Ok(match record_type {
        RecordType::A => RData::A(Ipv4Addr::from_str(value).map_err(|_| invalid())?.into()),
        RecordType::Aaaa => RData::AAAA(Ipv6Addr::from_str(value).map_err(|_| invalid())?.into()),
        RecordType::Ptr => {
            RData::PTR(PTR(Name::from_str(&super::fqdn(value)).map_err(|_| invalid())?))
        }
    })
}

fn wire_type(record_type: RecordType) -> WireType {
    match record_type {
        RecordType::A => WireType::A,
        RecordType::Aaaa => WireType::AAAA,
        RecordType::Ptr => WireType::PTR,
    }
}

fn parse_name(name: &str) -> Result<Name, Rfc2136Error> {
    Name::from_str(&super::fqdn(name))
        .map_err(|e| Rfc2136Error::InvalidName(name.to_owned(), e))
}

fn rejected(code: ResponseCode) -> Rfc2136Error {
    match code {
        ResponseCode::NotAuth | ResponseCode::Refused => Rfc2136Error::Unauthorized(code),
        code => Rfc2136Error::Rejected(code),
    }
}

fn signer(tsig: &TsigSettings) -> Result<TSigner, Rfc2136Error> {
    let algorithm = tsig_algorithm(&tsig.algorithm)?;
    let key_name = parse_name(&tsig.key_name)?;

    TSigner::new(tsig.secret.clone(), algorithm, key_name, TSIG_FUDGE_SECS)
        .map_err(Rfc2136Error::Signer)
}

/// Maps a BIND-style algorithm name (`hmac-sha256`, optionally with a root
/// label) onto the algorithms the signer supports.
pub fn tsig_algorithm(name: &str) -> Result<TsigAlgorithm, Rfc2136Error> {
    match name.trim_end_matches('.').to_ascii_lowercase().as_str() {
        "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
        "hmac-sha384" => Ok(TsigAlgorithm::HmacSha384),
        "hmac-sha512" => Ok(TsigAlgorithm::HmacSha512),
        _ => Err(Rfc2136Error::UnsupportedAlgorithm(name.to_owned())),
    }
}

#[derive(Debug, Error)]
pub enum Rfc2136Error {
    #[error("invalid DNS name {0:?}: {1}")]
    InvalidName(String, #[source] ProtoError),
    #[error("{value:?} is not a valid {record_type} value")]
    InvalidValue { value: String, record_type: RecordType },
    #[error("unsupported TSIG algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("failed to create TSIG signer: {0}")]
    Signer(#[source] ProtoError),
    #[error(transparent)]
    Transport(#[from] ClientError),
    #[error("server refused the request: {0}")]
    Unauthorized(ResponseCode),
    #[error("server replied: {0}")]
    Rejected(ResponseCode),
    #[error("server sent no response")]
    NoResponse,
    #[error("dns task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
