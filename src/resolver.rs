use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::proto::rr::{RData, RecordType};
use trust_dns_resolver::TokioAsyncResolver;

/// # DNS Error
///
/// The collaborator-facing error shape described in spec §6: a query
/// either came back empty/`NXDOMAIN` (`NotFound`, which the engine folds
/// into `none`/"advance to the next rule") or failed outright
/// (`Failure`, which the engine folds into `temperror`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// `NXDOMAIN` or an empty answer set.
    NotFound(String),
    /// Transport failure, `SERVFAIL`, or any other non-`NOERROR`/`NXDOMAIN`
    /// response code.
    Failure(String),
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::NotFound(name) => write!(f, "no records for {name}"),
            DnsError::Failure(msg) => write!(f, "DNS failure: {msg}"),
        }
    }
}

impl std::error::Error for DnsError {}

/// # DNS Resolver
///
/// The DNS collaborator interface of spec §6, asserted here as an async
/// trait so the evaluation driver can be exercised against a scripted
/// fake in tests instead of a live resolver.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolve `TXT` records for `name`, returning each record's
    /// concatenated character-strings as one entry.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// Resolve type-99 `SPF` records for `name`, same shape as
    /// [`DnsResolver::lookup_txt`]. Resolvers that do not support the
    /// legacy RR type may always return `DnsError::NotFound`.
    async fn lookup_spf(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// Resolve `A` records.
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;

    /// Resolve `AAAA` records.
    async fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError>;

    /// Resolve `MX` records, returning each exchange hostname ordered by
    /// preference.
    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// Resolve `PTR` records.
    async fn lookup_ptr(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// # Trust-DNS Resolver
///
/// The production [`DnsResolver`] implementation, wrapping a
/// `trust-dns-resolver` async resolver the same way the teacher wraps it
/// on `SMTPConnection`: behind an `Arc<Mutex<_>>` so a single resolver
/// instance can be shared across concurrently evaluating contexts.
pub struct TrustDnsResolver {
    inner: Arc<Mutex<TokioAsyncResolver>>,
}

impl TrustDnsResolver {
    /// Wrap an existing `trust-dns-resolver` resolver.
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self {
            inner: Arc::new(Mutex::new(resolver)),
        }
    }

    /// Build a resolver from the system's configured nameservers.
    pub fn from_system_conf() -> Result<Self, trust_dns_resolver::error::ResolveError> {
        Ok(Self::new(TokioAsyncResolver::tokio_from_system_conf()?))
    }

    fn classify(
        err: &trust_dns_resolver::error::ResolveError,
        name: &str,
    ) -> DnsError {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound(name.to_string()),
            _ => DnsError::Failure(err.to_string()),
        }
    }
}

#[async_trait]
impl DnsResolver for TrustDnsResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let resolver = self.inner.lock().await;
        match resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                        .collect::<String>()
                })
                .collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }

    async fn lookup_spf(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let resolver = self.inner.lock().await;
        match resolver.lookup(name, RecordType::Unknown(99)).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter_map(|record| match record.data() {
                    Some(RData::Unknown { rdata, .. }) => {
                        Some(parse_character_strings(rdata.anything()))
                    }
                    _ => None,
                })
                .collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }

    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let resolver = self.inner.lock().await;
        match resolver.ipv4_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }

    async fn lookup_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
        let resolver = self.inner.lock().await;
        match resolver.ipv6_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }

    async fn lookup_mx(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let resolver = self.inner.lock().await;
        match resolver.mx_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| mx.exchange().to_utf8())
                .collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }

    async fn lookup_ptr(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let resolver = self.inner.lock().await;
        let ip = name
            .parse()
            .map_err(|_| DnsError::Failure(format!("not an IP address: {name}")))?;
        match resolver.reverse_lookup(ip).await {
            Ok(lookup) => Ok(lookup.iter().map(|n| n.to_utf8()).collect()),
            Err(err) => Err(Self::classify(&err, name)),
        }
    }
}

/// Parse RFC 1035 length-prefixed `<character-string>` chunks out of a
/// raw TXT-like RDATA blob, as `spf_line_callback` does in the original.
fn parse_character_strings(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut pos = 0usize;
    while pos < raw.len() {
        let len = raw[pos] as usize;
        pos += 1;
        let end = (pos + len).min(raw.len());
        out.push_str(&String::from_utf8_lossy(&raw[pos..end]));
        pos = end;
    }
    out
}
