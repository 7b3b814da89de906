//! Forward and reverse name lookups around the probing engine.

use std::net::{IpAddr, Ipv4Addr};

use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{error::TraceError, session::TraceReport, utils};

/// Addresses a hostname resolved to, in resolver order. Only IPv4 is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub primary: Ipv4Addr,
    pub others: Vec<Ipv4Addr>,
}

impl Resolved {
    pub fn is_ambiguous(&self) -> bool {
        !self.others.is_empty()
    }

    fn from_addrs(host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Result<Self, TraceError> {
        let mut v4 = addrs.into_iter().filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        });
        let primary = v4.next().ok_or_else(|| TraceError::Resolution {
            host: host.to_string(),
            reason: "no IPv4 address found".to_string(),
        })?;
        Ok(Self {
            primary,
            others: v4.collect(),
        })
    }
}

#[derive(Clone)]
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    /// Use the system resolver configuration, falling back to the public
    /// defaults when it cannot be read.
    pub fn new() -> Self {
        let inner = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("Could not read system resolver config ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { inner }
    }

    pub async fn resolve(&self, host: &str) -> Result<Resolved, TraceError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Resolved::from_addrs(host, [ip]);
        }

        let response = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| TraceError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let resolved = Resolved::from_addrs(host, response.iter())?;
        debug!("Resolved {} to {:?}", host, resolved);
        Ok(resolved)
    }

    /// PTR name for `addr` without the trailing dot. Any failure is None.
    pub async fn reverse_lookup(&self, addr: Ipv4Addr) -> Option<String> {
        match self.inner.reverse_lookup(IpAddr::V4(addr)).await {
            Ok(names) => names
                .iter()
                .next()
                .map(|name| utils::network::trim_root_label(&name.to_string()).to_string())
                .filter(|name| !name.is_empty()),
            Err(e) => {
                debug!("Reverse lookup for {} failed: {}", addr, e);
                None
            }
        }
    }

    /// Fill in the hostname of every hop that has a responder.
    pub async fn annotate(&self, report: &mut TraceReport) {
        let mut lookups = JoinSet::new();
        for (i, hop) in report.hops.iter().enumerate() {
            if let Some(addr) = hop.addr {
                let resolver = self.clone();
                lookups.spawn(async move { (i, resolver.reverse_lookup(addr).await) });
            }
        }
        while let Some(joined) = lookups.join_next().await {
            if let Ok((i, hostname)) = joined {
                report.hops[i].hostname = hostname;
            }
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_keeps_order_and_skips_ipv6() {
        let addrs = [
            "2001:db8::1".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
            "192.0.2.2".parse().unwrap(),
        ];
        let resolved = Resolved::from_addrs("example.com", addrs).unwrap();
        assert_eq!(resolved.primary, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(resolved.others, vec![Ipv4Addr::new(192, 0, 2, 2)]);
        assert!(resolved.is_ambiguous());
    }

    #[test]
    fn test_resolved_requires_ipv4() {
        let addrs = ["2001:db8::1".parse().unwrap()];
        let err = Resolved::from_addrs("v6only.example", addrs).unwrap_err();
        assert!(matches!(err, TraceError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal_skips_dns() {
        let resolver = Resolver::new();
        let resolved = resolver.resolve("198.51.100.4").await.unwrap();
        assert_eq!(resolved.primary, Ipv4Addr::new(198, 51, 100, 4));
        assert!(!resolved.is_ambiguous());
    }

    #[tokio::test]
    async fn test_resolve_ipv6_literal_is_rejected() {
        let resolver = Resolver::new();
        let result = resolver.resolve("::1").await;
        tokio_test::assert_err!(result);
    }
}
