//! The public resolution operations. Each one runs one or more collector
//! cycles with fixed listen windows and hands back the collated result.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::collate::{collate, ServiceEntry, META_QUERY};
use crate::collector::{collect, CollectParams};
use crate::protocol::{RData, QTYPE_ANY, RR, TYPE_A, TYPE_PTR, TYPE_SRV};

/// Listen window for service-type and instance enumeration.
const BROWSE_LISTEN: Duration = Duration::from_secs(2);
/// Listen window for the combined PTR step of an address lookup.
const PTR_LISTEN: Duration = Duration::from_millis(1500);
/// Listen window for single-record lookups (A, SRV).
const LOOKUP_LISTEN: Duration = Duration::from_secs(1);
/// Pause between the SRV and A steps of an address lookup.
const FALLBACK_PAUSE: Duration = Duration::from_millis(100);

/// One-shot mDNS resolver. Every operation opens its own socket pair, so a
/// resolver can serve concurrent callers; cancelling the token ends any
/// in-flight cycles at their next socket wait.
pub struct Resolver {
    cancel: CancellationToken,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn first_ip(batches: &[Vec<RR>]) -> Option<Ipv4Addr> {
    all_ips(batches).into_iter().next()
}

fn all_ips(batches: &[Vec<RR>]) -> Vec<Ipv4Addr> {
    batches
        .iter()
        .flatten()
        .filter_map(|rr| match rr.data {
            RData::A(ip) => Some(ip),
            _ => None,
        })
        .collect()
}

fn first_srv(batches: &[Vec<RR>]) -> (Option<u16>, Option<String>) {
    for rr in batches.iter().flatten() {
        if let RData::Srv { port, ref target, .. } = rr.data {
            return (Some(port), Some(target.clone()));
        }
    }
    (None, None)
}

/// Split `<instance>.<service_type>` on the first dot. The instance label
/// must be non-empty and must not itself look like a service-type label.
fn split_instance(fqdn: &str) -> Result<(&str, &str)> {
    let (instance, service_type) = match fqdn.split_once('.') {
        Some(v) => v,
        None => bail!("'{}' is not an <instance>.<service-type> name", fqdn),
    };
    if instance.is_empty() {
        bail!("'{}' has an empty instance label", fqdn);
    }
    if instance.starts_with('_') {
        bail!("'{}' names a service type, not an instance", fqdn);
    }
    if service_type.is_empty() {
        bail!("'{}' has an empty service type", fqdn);
    }
    Ok((instance, service_type))
}

impl Resolver {
    pub fn new() -> Self {
        Resolver {
            cancel: CancellationToken::new(),
        }
    }

    /// Token ending all in-flight cycles of this resolver when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn cycle(
        &self,
        name: &str,
        qtype: u16,
        listen_time: Duration,
        early_terminate: bool,
        early_match_name: Option<&str>,
    ) -> Result<Vec<Vec<RR>>> {
        collect(
            &CollectParams {
                name,
                qtype,
                listen_time,
                early_terminate,
                early_match_name,
            },
            &self.cancel,
        )
        .await
    }

    /// One query cycle, full listen window, collated per name.
    pub async fn query(
        &self,
        name: &str,
        qtype: u16,
        listen_time: Duration,
    ) -> Result<HashMap<String, ServiceEntry>> {
        if name.is_empty() {
            log::debug!("query called without a name");
            bail!("query name is empty");
        }
        let batches = self.cycle(name, qtype, listen_time, false, None).await?;
        Ok(collate(&batches))
    }

    /// Enumerate the service types present on the local network.
    pub async fn get_service_types(&self) -> Result<Vec<String>> {
        let mut map = self.query(META_QUERY, QTYPE_ANY, BROWSE_LISTEN).await?;
        Ok(map
            .remove(META_QUERY)
            .map(|entry| entry.servicetypes)
            .unwrap_or_default())
    }

    /// Enumerate the instances of one service type.
    pub async fn get_services(&self, service_type: &str) -> Result<Vec<String>> {
        if service_type.is_empty() {
            log::debug!("get_services called without a service type");
            bail!("service type is empty");
        }
        let batches = self
            .cycle(service_type, TYPE_PTR, BROWSE_LISTEN, false, None)
            .await?;
        let mut map = collate(&batches);
        Ok(map
            .remove(service_type)
            .map(|entry| entry.instances)
            .unwrap_or_default())
    }

    /// Resolve a host name to its IPv4 addresses. Returns every A record of
    /// the first datagram naming the host; empty when nothing answered.
    pub async fn get_ip(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        if name.is_empty() {
            log::debug!("get_ip called without a name");
            bail!("host name is empty");
        }
        let batches = self.cycle(name, TYPE_A, LOOKUP_LISTEN, true, None).await?;
        Ok(all_ips(&batches))
    }

    /// Resolve a service instance FQDN to its address and port, trying the
    /// combined PTR answer first and falling back to separate SRV and A
    /// lookups. Either half may come back `None` when discovery fails.
    pub async fn get_address(&self, fqdn: &str) -> Result<(Option<Ipv4Addr>, Option<u16>)> {
        let (instance, service_type) = match split_instance(fqdn) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("get_address rejected '{}': {}", fqdn, e);
                return Err(e);
            }
        };

        // Most responders attach SRV and A records to the PTR answer.
        let batches = self
            .cycle(service_type, TYPE_PTR, PTR_LISTEN, true, Some(instance))
            .await?;
        let mut ip = first_ip(&batches);
        let (mut port, _) = first_srv(&batches);
        if let (Some(ip), Some(port)) = (ip, port) {
            return Ok((Some(ip), Some(port)));
        }

        let batches = self.cycle(fqdn, TYPE_SRV, LOOKUP_LISTEN, true, None).await?;
        let (srv_port, hostname) = first_srv(&batches);
        if port.is_none() {
            port = srv_port;
        }

        tokio::time::sleep(FALLBACK_PAUSE).await;

        let host = format!("{}.local", instance);
        let batches = self.cycle(&host, TYPE_A, LOOKUP_LISTEN, true, None).await?;
        if ip.is_none() {
            ip = first_ip(&batches);
        }

        if ip.is_none() || port.is_none() {
            if let Some(hostname) = hostname {
                let batches = self
                    .cycle(&hostname, TYPE_A, LOOKUP_LISTEN, true, None)
                    .await?;
                if ip.is_none() {
                    ip = first_ip(&batches);
                }
            }
        }

        Ok((ip, port))
    }
}
