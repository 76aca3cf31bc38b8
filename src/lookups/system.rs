//! Implementation of [HostLookup] backed by the host's resolution paths.

use crate::lookup::{
    finish_lookup, literal_address, AddressLookup, Error, HostLookup, LookupOptions, ResolvedAddr,
    ServiceLookup,
};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{event, instrument, Level};

/// Tunables for [SystemLookup].
#[derive(Clone, Debug)]
pub struct SystemLookupConfig {
    /// How long any single resolution may take before it fails with
    /// [Error::Timeout].
    pub query_timeout: Duration,

    /// The services(5) database consulted by
    /// [HostLookup::lookup_service_name].
    pub services_path: PathBuf,
}

impl Default for SystemLookupConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(5),
            services_path: PathBuf::from("/etc/services"),
        }
    }
}

/// A [`HostLookup`] that asks the host's configured DNS servers and services
/// database.
pub struct SystemLookup {
    resolver: TokioAsyncResolver,
    config: SystemLookupConfig,
}

impl SystemLookup {
    /// Builds a lookup from the host's resolver configuration (resolv.conf
    /// and the hosts file on unix).
    pub fn from_system_conf(config: SystemLookupConfig) -> Result<Self, Error> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver, config })
    }

    /// Builds a lookup that queries a single nameserver over UDP.
    pub fn new(nameserver: SocketAddr, config: SystemLookupConfig) -> Self {
        let mut rc = ResolverConfig::new();
        rc.add_name_server(NameServerConfig {
            socket_addr: nameserver,
            protocol: Protocol::Udp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
        let mut opts = ResolverOpts::default();
        opts.timeout = config.query_timeout;
        let resolver = TokioAsyncResolver::tokio(rc, opts);
        Self { resolver, config }
    }

    async fn with_timeout<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: std::future::Future<Output = Result<T, Error>>,
    {
        tokio::time::timeout(self.config.query_timeout, fut)
            .await
            .map_err(|_| Error::Timeout)?
    }

    async fn reverse_names(&self, address: IpAddr) -> Result<Vec<String>, Error> {
        let ptrs = self.resolver.reverse_lookup(address).await?;
        let names = ptrs
            .iter()
            .map(|ptr| ptr.to_utf8().trim_end_matches('.').to_string())
            .collect::<Vec<_>>();
        if names.is_empty() {
            return Err(Error::NoNames(address));
        }
        Ok(names)
    }

    async fn service_name_for_port(&self, port: u16) -> Result<String, Error> {
        let from_db = match tokio::fs::read_to_string(&self.config.services_path).await {
            Ok(contents) => service_name_from(&contents, port, "tcp"),
            Err(err) => {
                event!(
                    Level::WARN,
                    err = %err,
                    path = %self.config.services_path.display(),
                    "could not read services database"
                );
                None
            }
        };
        from_db
            .or_else(|| well_known_service(port).map(str::to_string))
            .ok_or(Error::UnknownService(port))
    }
}

#[async_trait]
impl HostLookup for SystemLookup {
    #[instrument(skip(self), name = "SystemLookup::resolve_forward_a")]
    async fn resolve_forward_a(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, Error> {
        let lookup = self
            .with_timeout(async {
                self.resolver
                    .ipv4_lookup(hostname)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        let ips = lookup
            .iter()
            .copied()
            .map(Ipv4Addr::from)
            .collect::<Vec<_>>();
        event!(Level::DEBUG, ?ips, "resolved A records");
        if ips.is_empty() {
            return Err(Error::NoAddresses(hostname.to_string()));
        }
        Ok(ips)
    }

    #[instrument(skip(self), name = "SystemLookup::resolve_reverse")]
    async fn resolve_reverse(&self, address: IpAddr) -> Result<Vec<String>, Error> {
        self.with_timeout(self.reverse_names(address)).await
    }

    #[instrument(skip(self), name = "SystemLookup::lookup_address")]
    async fn lookup_address(
        &self,
        hostname: &str,
        options: LookupOptions,
    ) -> Result<AddressLookup, Error> {
        // An IP literal resolves to itself, without consulting the resolver.
        if let Some(addr) = literal_address(hostname) {
            return finish_lookup(vec![addr], hostname, options);
        }

        let lookup = self
            .with_timeout(async {
                self.resolver.lookup_ip(hostname).await.map_err(Error::from)
            })
            .await?;
        let addrs = lookup.iter().map(ResolvedAddr::new).collect::<Vec<_>>();
        finish_lookup(addrs, hostname, options)
    }

    #[instrument(skip(self), name = "SystemLookup::lookup_service_name")]
    async fn lookup_service_name(
        &self,
        address: IpAddr,
        port: u16,
    ) -> Result<ServiceLookup, Error> {
        let (names, service) = self
            .with_timeout(futures::future::try_join(
                self.reverse_names(address),
                self.service_name_for_port(port),
            ))
            .await?;
        // reverse_names only succeeds with at least one name.
        let hostname = names.into_iter().next().ok_or(Error::NoNames(address))?;
        Ok(ServiceLookup { hostname, service })
    }
}

// Finds the symbolic name for a port in services(5) database contents.
//
// Entries look like "http 80/tcp www # comment", with optional aliases
// after the port/protocol field.
fn service_name_from(db: &str, port: u16, proto: &str) -> Option<String> {
    for line in db.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let Some(name) = fields.next() else {
            continue;
        };
        let Some(port_proto) = fields.next() else {
            continue;
        };
        let Some((field_port, field_proto)) = port_proto.split_once('/') else {
            continue;
        };
        if field_proto != proto {
            continue;
        }
        if field_port.parse::<u16>() == Ok(port) {
            return Some(name.to_string());
        }
    }
    None
}

// Sensible defaults for ports the database may be missing.
fn well_known_service(port: u16) -> Option<&'static str> {
    match port {
        22 => Some("ssh"),
        53 => Some("domain"),
        80 => Some("http"),
        443 => Some("https"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = "\
# Network services, Internet style
tcpmux          1/tcp
echo            7/tcp
echo            7/udp
http            80/tcp          www www-http    # WorldWideWeb HTTP
https           443/tcp
";

    #[test]
    fn services_db_finds_tcp_entry() {
        assert_eq!(service_name_from(DB, 80, "tcp").as_deref(), Some("http"));
        assert_eq!(service_name_from(DB, 443, "tcp").as_deref(), Some("https"));
    }

    #[test]
    fn services_db_respects_protocol() {
        assert_eq!(service_name_from(DB, 7, "udp").as_deref(), Some("echo"));
        assert_eq!(service_name_from(DB, 80, "udp"), None);
    }

    #[test]
    fn services_db_ignores_comments_and_unknown_ports() {
        assert_eq!(service_name_from(DB, 9999, "tcp"), None);
        assert_eq!(service_name_from("# only comments\n", 80, "tcp"), None);
    }

    #[test]
    fn well_known_fallback_covers_http() {
        assert_eq!(well_known_service(80), Some("http"));
        assert_eq!(well_known_service(9999), None);
    }

    #[tokio::test]
    async fn literal_addresses_skip_the_resolver() {
        let lookup = SystemLookup::new(
            "127.0.0.1:53".parse().unwrap(),
            SystemLookupConfig::default(),
        );
        let result = lookup
            .lookup_address("192.0.2.7", LookupOptions::default())
            .await
            .expect("literal resolves to itself");
        assert_eq!(
            result,
            AddressLookup::First(ResolvedAddr::new("192.0.2.7".parse().unwrap())),
        );
    }
}
