use std::net::IpAddr;

use url::{Host, Url};

use crate::error::{Error, Result};

/// Reject URLs whose host is, or resolves to, a non-public address.
pub(crate) async fn check_public(url: &Url) -> Result<()> {
    let host = url.host().ok_or(Error::MissingHost)?;
    let ips = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(80);
            tokio::net::lookup_host((domain, port))
                .await
                .map_err(|source| Error::Dns {
                    host: domain.to_string(),
                    source,
                })?
                .map(|addr| addr.ip())
                .collect()
        }
    };

    match ips.into_iter().find(|ip| is_private_ip(*ip)) {
        Some(ip) => {
            let host = url.host_str().unwrap_or_default().to_string();
            tracing::warn!(%host, %ip, "blocked fetch to private address");
            Err(Error::PrivateAddress { host, ip })
        }
        None => Ok(()),
    }
}

pub(crate) fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(v4));
            }
            v6.is_unique_local()
                || v6.is_loopback()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}
