//! Address resolution: translate a host name to one socket address whose
//! family matches a [`FamilyPolicy`].

use std::net::SocketAddr;

use crate::error::PingError;

/// Which address family a resolved address must belong to.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FamilyPolicy {
    #[default]
    Any,
    V4,
    V6,
}

impl FamilyPolicy {
    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            FamilyPolicy::Any => true,
            FamilyPolicy::V4 => addr.is_ipv4(),
            FamilyPolicy::V6 => addr.is_ipv6(),
        }
    }
}

/// Resolve `host` to one address matching `policy`.
///
/// Iterates the resolver's results in the order the system returns them and
/// picks the first whose family is acceptable. Never blocks the calling
/// task — `tokio::net::lookup_host` does the DNS work on the runtime's
/// blocking pool.
pub async fn resolve(host: &str, policy: FamilyPolicy) -> Result<SocketAddr, PingError> {
    // A port is required by `ToSocketAddrs` even though ICMP has no ports;
    // it is discarded once we have the address. IPv6 literals need bracketing
    // or the trailing `:0` is ambiguous with the address's own colons.
    let lookup_target = if host.contains(':') {
        format!("[{host}]:0")
    } else {
        format!("{host}:0")
    };
    let addrs = tokio::net::lookup_host(lookup_target)
        .await
        .map_err(PingError::ResolutionFailed)?;

    addrs
        .into_iter()
        .find(|addr| policy.accepts(addr))
        .ok_or(PingError::HostNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ipv4_literal() {
        let addr = resolve("127.0.0.1", FamilyPolicy::Any).await.unwrap();
        assert!(addr.is_ipv4());
    }

    #[tokio::test]
    async fn resolves_ipv6_literal() {
        let addr = resolve("::1", FamilyPolicy::Any).await.unwrap();
        assert!(addr.is_ipv6());
    }

    #[tokio::test]
    async fn policy_v6_rejects_v4_literal() {
        let err = resolve("127.0.0.1", FamilyPolicy::V6).await.unwrap_err();
        assert!(matches!(err, PingError::HostNotFound));
    }

    #[tokio::test]
    async fn policy_v4_rejects_v6_literal() {
        let err = resolve("::1", FamilyPolicy::V4).await.unwrap_err();
        assert!(matches!(err, PingError::HostNotFound));
    }
}
