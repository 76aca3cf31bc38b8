//! The interface for the name-resolution collaborator check workloads call.

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] hickory_resolver::error::ResolveError),

    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("lookup timed out")]
    Timeout,

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("no names found for {0}")]
    NoNames(IpAddr),

    #[error("no service name known for port {0}")]
    UnknownService(u16),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Address family of a resolved address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// A resolved address, tagged with its family.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAddr {
    pub address: IpAddr,
    pub family: Family,
}

impl ResolvedAddr {
    pub fn new(address: IpAddr) -> Self {
        Self {
            family: Family::of(&address),
            address,
        }
    }
}

/// Options controlling [HostLookup::lookup_address].
#[derive(Copy, Clone, Debug, Default)]
pub struct LookupOptions {
    /// Restrict results to one address family.
    pub family: Option<Family>,

    /// Return every matching address instead of just the first.
    pub all: bool,
}

/// The outcome of an address lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressLookup {
    /// The first matching address ([LookupOptions::all] unset).
    First(ResolvedAddr),

    /// Every matching address ([LookupOptions::all] set).
    All(Vec<ResolvedAddr>),
}

/// The outcome of a service-name lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceLookup {
    /// The primary name of the queried address.
    pub hostname: String,

    /// The symbolic name of the queried port.
    pub service: String,
}

/// Resolves names, addresses and service ports on behalf of check workloads.
///
/// The runner treats implementations as opaque asynchronous collaborators;
/// checks call them and decide for themselves what a failure means.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Looks up the IPv4 (A record) addresses of a hostname.
    async fn resolve_forward_a(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, Error>;

    /// Looks up the names (PTR records) of an address.
    async fn resolve_reverse(&self, address: IpAddr) -> Result<Vec<String>, Error>;

    /// Resolves a hostname to one or all of its addresses.
    ///
    /// A hostname which is already an IP literal resolves to itself.
    async fn lookup_address(
        &self,
        hostname: &str,
        options: LookupOptions,
    ) -> Result<AddressLookup, Error>;

    /// Resolves an address and TCP port to a hostname and symbolic service
    /// name.
    async fn lookup_service_name(
        &self,
        address: IpAddr,
        port: u16,
    ) -> Result<ServiceLookup, Error>;
}

/// Helper type for anything that implements the HostLookup interface.
pub type SharedLookup = Arc<dyn HostLookup>;

// Returns the literal address for hostnames which are already IP literals.
pub(crate) fn literal_address(hostname: &str) -> Option<ResolvedAddr> {
    hostname.parse::<IpAddr>().ok().map(ResolvedAddr::new)
}

// Applies family filtering and the one-or-all result shape shared by every
// address lookup.
pub(crate) fn finish_lookup(
    mut addrs: Vec<ResolvedAddr>,
    hostname: &str,
    options: LookupOptions,
) -> Result<AddressLookup, Error> {
    if let Some(family) = options.family {
        addrs.retain(|addr| addr.family == family);
    }
    if addrs.is_empty() {
        return Err(Error::NoAddresses(hostname.to_string()));
    }
    if options.all {
        Ok(AddressLookup::All(addrs))
    } else {
        Ok(AddressLookup::First(addrs[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_addresses_are_recognized() {
        let addr = literal_address("127.0.0.1").expect("v4 literal");
        assert_eq!(addr.address, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(addr.family, Family::V4);

        let addr = literal_address("::1").expect("v6 literal");
        assert_eq!(addr.family, Family::V6);

        assert!(literal_address("localhost").is_none());
    }

    #[test]
    fn family_filter_and_result_shape() {
        let addrs = vec![
            ResolvedAddr::new("192.0.2.1".parse().unwrap()),
            ResolvedAddr::new("2001:db8::1".parse().unwrap()),
        ];

        let first = finish_lookup(addrs.clone(), "host", LookupOptions::default()).unwrap();
        assert_eq!(first, AddressLookup::First(addrs[0]));

        let v6 = finish_lookup(
            addrs.clone(),
            "host",
            LookupOptions {
                family: Some(Family::V6),
                all: false,
            },
        )
        .unwrap();
        assert_eq!(v6, AddressLookup::First(addrs[1]));

        let all = finish_lookup(
            addrs.clone(),
            "host",
            LookupOptions {
                family: None,
                all: true,
            },
        )
        .unwrap();
        assert_eq!(all, AddressLookup::All(addrs.clone()));

        let none = finish_lookup(
            vec![addrs[0]],
            "host",
            LookupOptions {
                family: Some(Family::V6),
                all: false,
            },
        );
        assert!(matches!(none, Err(Error::NoAddresses(_))));
    }
}
