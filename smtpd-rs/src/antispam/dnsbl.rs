//! DNSBL reputation gate
//!
//! Checks a client IP against configured DNS blocklists by querying
//! `<reversed-octets>.<zone>`; any A-record answer means the IP is listed.
//! The whole check is bounded by a timeout and degrades to `Clear` on
//! timeout or resolver failure (fail-open): the anti-abuse layer must not
//! itself become a way to stall every session. Covered by an explicit
//! test against a blackholed resolver.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Outcome of a reputation check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsblVerdict {
    Clear,
    Listed,
}

pub struct DnsblGate {
    resolver: TokioAsyncResolver,
    zones: Vec<String>,
    timeout: Duration,
}

impl DnsblGate {
    /// Create a gate using the system's default resolver configuration
    pub fn new(zones: Vec<String>, timeout: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            resolver,
            zones,
            timeout,
        }
    }

    /// Create a gate with an explicit resolver configuration
    pub fn with_resolver_config(
        zones: Vec<String>,
        timeout: Duration,
        config: ResolverConfig,
        opts: ResolverOpts,
    ) -> Self {
        let resolver = TokioAsyncResolver::tokio(config, opts);
        Self {
            resolver,
            zones,
            timeout,
        }
    }

    /// Check a peer IP against every configured zone
    ///
    /// Only IPv4 peers are queried; IPv6 peers are `Clear`.
    pub async fn check(&self, ip: IpAddr) -> DnsblVerdict {
        let IpAddr::V4(v4) = ip else {
            return DnsblVerdict::Clear;
        };

        match timeout(self.timeout, self.lookup_zones(v4)).await {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!("DNSBL check for {} timed out, failing open", ip);
                DnsblVerdict::Clear
            }
        }
    }

    async fn lookup_zones(&self, ip: Ipv4Addr) -> DnsblVerdict {
        let octets = ip.octets();
        let reversed = format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0]);

        for zone in &self.zones {
            let query = format!("{}.{}.", reversed, zone);
            match self.resolver.lookup_ip(query.as_str()).await {
                Ok(answer) => {
                    if answer.iter().next().is_some() {
                        info!("DNSBL hit: {} listed in {}", ip, zone);
                        return DnsblVerdict::Listed;
                    }
                }
                Err(e) => {
                    // NXDOMAIN is the common not-listed answer; any other
                    // resolver failure also fails open for this zone.
                    debug!("DNSBL lookup {} returned no listing: {}", query, e);
                }
            }
        }

        DnsblVerdict::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trust_dns_resolver::config::NameServerConfigGroup;

    fn blackholed_gate(timeout: Duration) -> DnsblGate {
        // 192.0.2.1 (TEST-NET-1) never answers; every lookup hangs until
        // the gate's own timeout fires.
        let nameservers = NameServerConfigGroup::from_ips_clear(
            &["192.0.2.1".parse().unwrap()],
            53,
            true,
        );
        let config = ResolverConfig::from_parts(None, vec![], nameservers);
        let mut opts = ResolverOpts::default();
        opts.attempts = 1;
        opts.timeout = Duration::from_secs(30);

        DnsblGate::with_resolver_config(
            vec!["dnsbl.example.invalid".to_string()],
            timeout,
            config,
            opts,
        )
    }

    #[tokio::test]
    async fn ipv6_peers_are_clear_without_lookup() {
        let gate = blackholed_gate(Duration::from_millis(100));
        let verdict = gate.check("2001:db8::1".parse().unwrap()).await;
        assert_eq!(verdict, DnsblVerdict::Clear);
    }

    #[tokio::test]
    async fn dnsbl_times_out_fail_open() {
        // The documented policy decision: a hung resolver yields Clear
        // instead of stalling the session.
        let gate = blackholed_gate(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let verdict = gate.check("198.51.100.7".parse().unwrap()).await;

        assert_eq!(verdict, DnsblVerdict::Clear);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
