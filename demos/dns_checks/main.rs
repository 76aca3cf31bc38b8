//! A suite of IPv4 resolution checks, executed strictly one at a time:
//! forward lookups, a reverse lookup, address lookups in several option
//! shapes, and a service-name lookup.
//!
//! Run with `cargo run --example dns_checks`. Requires working DNS.

use anyhow::Context;
use seqr::lookup::{AddressLookup, Family, HostLookup, LookupOptions, SharedLookup};
use seqr::lookups::system::{SystemLookup, SystemLookupConfig};
use seqr::policy::Policy;
use seqr::runner::Runner;
use seqr::task::Completion;
use std::net::IpAddr;
use std::sync::Arc;

const HOST: &str = "www.google.com";
const REVERSIBLE: &str = "8.8.8.8";

type CheckFn = Box<dyn FnOnce(Completion) + Send>;

fn fatal_panics() {
    // A failed check panics inside a spawned task, which on its own would
    // only stall the queue.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(1);
    }));
}

fn checks(lookup: SharedLookup) -> Vec<(&'static str, CheckFn)> {
    let mut checks: Vec<(&'static str, CheckFn)> = Vec::new();

    let l = lookup.clone();
    checks.push((
        "forward_a",
        Box::new(move |done| {
            tokio::spawn(async move {
                let ips = l.resolve_forward_a(HOST).await.expect("A lookup failed");
                assert!(!ips.is_empty(), "no A records for {HOST}");
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "reverse",
        Box::new(move |done| {
            tokio::spawn(async move {
                let address: IpAddr = REVERSIBLE.parse().unwrap();
                let names = l
                    .resolve_reverse(address)
                    .await
                    .expect("reverse lookup failed");
                assert!(!names.is_empty(), "no PTR names for {REVERSIBLE}");
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "lookup_v4_explicit",
        Box::new(move |done| {
            tokio::spawn(async move {
                let result = l
                    .lookup_address(
                        HOST,
                        LookupOptions {
                            family: Some(Family::V4),
                            all: false,
                        },
                    )
                    .await
                    .expect("v4 lookup failed");
                let AddressLookup::First(addr) = result else {
                    panic!("expected a single address");
                };
                assert_eq!(addr.family, Family::V4);
                assert!(addr.address.is_ipv4());
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "lookup_implicit",
        Box::new(move |done| {
            tokio::spawn(async move {
                let result = l
                    .lookup_address(HOST, LookupOptions::default())
                    .await
                    .expect("implicit lookup failed");
                assert!(matches!(result, AddressLookup::First(_)));
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "lookup_literal",
        Box::new(move |done| {
            tokio::spawn(async move {
                let result = l
                    .lookup_address("127.0.0.1", LookupOptions::default())
                    .await
                    .expect("literal lookup failed");
                let AddressLookup::First(addr) = result else {
                    panic!("expected a single address");
                };
                assert_eq!(addr.address, "127.0.0.1".parse::<IpAddr>().unwrap());
                assert_eq!(addr.family, Family::V4);
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "lookup_localhost",
        Box::new(move |done| {
            tokio::spawn(async move {
                let result = l
                    .lookup_address(
                        "localhost",
                        LookupOptions {
                            family: Some(Family::V4),
                            all: false,
                        },
                    )
                    .await
                    .expect("localhost lookup failed");
                let AddressLookup::First(addr) = result else {
                    panic!("expected a single address");
                };
                assert_eq!(addr.address, "127.0.0.1".parse::<IpAddr>().unwrap());
                done.complete();
            });
        }),
    ));

    let l = lookup.clone();
    checks.push((
        "lookup_all_v4",
        Box::new(move |done| {
            tokio::spawn(async move {
                let result = l
                    .lookup_address(
                        HOST,
                        LookupOptions {
                            family: Some(Family::V4),
                            all: true,
                        },
                    )
                    .await
                    .expect("all-addresses lookup failed");
                let AddressLookup::All(addrs) = result else {
                    panic!("expected every address");
                };
                assert!(!addrs.is_empty(), "no v4 addresses for {HOST}");
                assert!(addrs.iter().all(|addr| addr.family == Family::V4));
                done.complete();
            });
        }),
    ));

    let l = lookup;
    checks.push((
        "service_name",
        Box::new(move |done| {
            tokio::spawn(async move {
                let address: IpAddr = REVERSIBLE.parse().unwrap();
                let service = l
                    .lookup_service_name(address, 80)
                    .await
                    .expect("service-name lookup failed");
                assert!(!service.hostname.is_empty());
                assert!(!service.service.is_empty());
                done.complete();
            });
        }),
    ));

    checks
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    fatal_panics();

    let lookup: SharedLookup = Arc::new(
        SystemLookup::from_system_conf(SystemLookupConfig::default())
            .context("reading system resolver configuration")?,
    );
    let runner = Runner::new("dns-checks".to_string(), Policy::default())
        .unwrap_or_else(|err| err.into_inner());

    let checks = checks(lookup);
    let expected = checks.len();
    for (name, body) in checks {
        runner.register(name, body).await?;
    }

    // Let the queue drain, then run the shutdown checks.
    let mut stats = runner.stats_rx();
    stats
        .wait_for(|stats| stats.completed == expected)
        .await
        .context("runner worker exited unexpectedly")?;
    let summary = runner.finalize().await.context("shutdown checks failed")?;

    println!("{} tasks completed", summary.completed);
    Ok(())
}
