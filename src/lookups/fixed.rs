//! Implementation of [HostLookup] that answers from fixed tables.

use crate::lookup::{
    finish_lookup, literal_address, AddressLookup, Error, HostLookup, LookupOptions, ResolvedAddr,
    ServiceLookup,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

/// A [`HostLookup`] that answers every query from fixed in-memory tables.
///
/// Useful for tests and demos which should not depend on real resolution.
#[derive(Clone, Debug, Default)]
pub struct FixedLookup {
    hosts: BTreeMap<String, Vec<IpAddr>>,
    ptrs: BTreeMap<IpAddr, Vec<String>>,
    services: BTreeMap<u16, String>,
}

impl FixedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds forward entries for a hostname.
    pub fn with_host(
        mut self,
        hostname: impl ToString,
        addrs: impl IntoIterator<Item = IpAddr>,
    ) -> Self {
        self.hosts
            .insert(hostname.to_string(), addrs.into_iter().collect());
        self
    }

    /// Adds reverse entries for an address.
    pub fn with_ptr(
        mut self,
        address: IpAddr,
        names: impl IntoIterator<Item = impl ToString>,
    ) -> Self {
        self.ptrs.insert(
            address,
            names.into_iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    /// Names a TCP port.
    pub fn with_service(mut self, port: u16, name: impl ToString) -> Self {
        self.services.insert(port, name.to_string());
        self
    }
}

#[async_trait]
impl HostLookup for FixedLookup {
    async fn resolve_forward_a(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, Error> {
        let v4 = self
            .hosts
            .get(hostname)
            .map(|addrs| {
                addrs
                    .iter()
                    .filter_map(|addr| match addr {
                        IpAddr::V4(v4) => Some(*v4),
                        IpAddr::V6(_) => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if v4.is_empty() {
            return Err(Error::NoAddresses(hostname.to_string()));
        }
        Ok(v4)
    }

    async fn resolve_reverse(&self, address: IpAddr) -> Result<Vec<String>, Error> {
        match self.ptrs.get(&address) {
            Some(names) if !names.is_empty() => Ok(names.clone()),
            _ => Err(Error::NoNames(address)),
        }
    }

    async fn lookup_address(
        &self,
        hostname: &str,
        options: LookupOptions,
    ) -> Result<AddressLookup, Error> {
        if let Some(addr) = literal_address(hostname) {
            return finish_lookup(vec![addr], hostname, options);
        }
        let addrs = self
            .hosts
            .get(hostname)
            .map(|addrs| addrs.iter().copied().map(ResolvedAddr::new).collect())
            .unwrap_or_default();
        finish_lookup(addrs, hostname, options)
    }

    async fn lookup_service_name(
        &self,
        address: IpAddr,
        port: u16,
    ) -> Result<ServiceLookup, Error> {
        let hostname = match self.ptrs.get(&address) {
            Some(names) if !names.is_empty() => names[0].clone(),
            _ => return Err(Error::NoNames(address)),
        };
        let service = self
            .services
            .get(&port)
            .cloned()
            .ok_or(Error::UnknownService(port))?;
        Ok(ServiceLookup { hostname, service })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Family;

    fn lookup() -> FixedLookup {
        FixedLookup::new()
            .with_host(
                "db.example.com",
                [
                    "192.0.2.10".parse().unwrap(),
                    "2001:db8::10".parse().unwrap(),
                ],
            )
            .with_ptr("192.0.2.10".parse().unwrap(), ["db.example.com"])
            .with_service(80, "http")
    }

    #[tokio::test]
    async fn forward_a_filters_to_ipv4() {
        let ips = lookup()
            .resolve_forward_a("db.example.com")
            .await
            .expect("A records");
        assert_eq!(ips, vec![Ipv4Addr::new(192, 0, 2, 10)]);

        assert!(matches!(
            lookup().resolve_forward_a("missing.example.com").await,
            Err(Error::NoAddresses(_)),
        ));
    }

    #[tokio::test]
    async fn reverse_misses_are_errors() {
        let names = lookup()
            .resolve_reverse("192.0.2.10".parse().unwrap())
            .await
            .expect("PTR names");
        assert_eq!(names, vec!["db.example.com".to_string()]);

        assert!(matches!(
            lookup()
                .resolve_reverse("198.51.100.1".parse().unwrap())
                .await,
            Err(Error::NoNames(_)),
        ));
    }

    #[tokio::test]
    async fn address_lookup_honors_family_and_all() {
        let v6 = lookup()
            .lookup_address(
                "db.example.com",
                LookupOptions {
                    family: Some(Family::V6),
                    all: false,
                },
            )
            .await
            .expect("v6 entry");
        let AddressLookup::First(addr) = v6 else {
            panic!("expected a single address");
        };
        assert_eq!(addr.family, Family::V6);

        let all = lookup()
            .lookup_address(
                "db.example.com",
                LookupOptions {
                    family: None,
                    all: true,
                },
            )
            .await
            .expect("every entry");
        let AddressLookup::All(addrs) = all else {
            panic!("expected every address");
        };
        assert_eq!(addrs.len(), 2);
    }

    #[tokio::test]
    async fn service_lookup_joins_ptr_and_port() {
        let service = lookup()
            .lookup_service_name("192.0.2.10".parse().unwrap(), 80)
            .await
            .expect("service name");
        assert_eq!(service.hostname, "db.example.com");
        assert_eq!(service.service, "http");
    }

    #[tokio::test]
    async fn unknown_ports_are_errors() {
        assert!(matches!(
            lookup()
                .lookup_service_name("192.0.2.10".parse().unwrap(), 8080)
                .await,
            Err(Error::UnknownService(8080)),
        ));
    }
}
