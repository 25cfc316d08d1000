use crate::lookup::{HostResolver, LookupResult};
use async_trait::async_trait;
use std::net::IpAddr;
use tracing::{debug, warn};
use trust_dns_resolver::{
    config::{LookupIpStrategy, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

/// Forward lookups through the async trust-dns resolver.
pub struct DnsHostResolver {
    resolver: TokioAsyncResolver,
}

impl DnsHostResolver {
    /// Uses the system resolver configuration, falling back to public defaults.
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("System DNS configuration unavailable ({}), using defaults", e);
                let mut opts = ResolverOpts::default();
                opts.ip_strategy = LookupIpStrategy::Ipv4thenIpv6;
                TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
            }
        };

        Self { resolver }
    }
}

#[async_trait]
impl HostResolver for DnsHostResolver {
    async fn resolve(&self, host: &str) -> LookupResult<IpAddr> {
        if host.is_empty() {
            return LookupResult::failure("empty host");
        }

        let lookup = match self.resolver.lookup_ip(host).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!("DNS lookup for {} failed: {}", host, e);
                return LookupResult::Failure(e.to_string());
            }
        };

        // IPv4 first, the way a plain gethostbyname answers.
        let addresses: Vec<IpAddr> = lookup.iter().collect();
        let chosen = addresses
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addresses.first())
            .copied();

        match chosen {
            Some(ip) => LookupResult::Success(ip),
            None => LookupResult::failure(format!("no addresses for {}", host)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ip_literal_resolves_to_itself() {
        let resolver = DnsHostResolver::new();
        let result = resolver.resolve("192.168.1.1").await;
        assert_eq!(result, LookupResult::Success("192.168.1.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_empty_host_fails_without_query() {
        let resolver = DnsHostResolver::new();
        assert!(matches!(resolver.resolve("").await, LookupResult::Failure(_)));
    }
}
