//! Folds the record lists gathered by a cycle into a per-name view of the
//! discovered services.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::protocol::{RData, RR};

/// The DNS-SD meta-query name whose PTR records enumerate service types.
pub const META_QUERY: &str = "_services._dns-sd._udp.local";

/// Everything learnt about one name. Fields stay unset until a record of
/// the corresponding type is seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    /// From A records. Last writer wins.
    pub ip: Option<Ipv4Addr>,
    /// From SRV records. Last writer wins.
    pub port: Option<u16>,
    /// From TXT records. Last writer wins; multiple TXTs are not merged.
    pub info: Option<HashMap<String, String>>,
    /// PTR targets of service-type queries: instance names.
    pub instances: Vec<String>,
    /// PTR targets of the meta query: service types.
    pub servicetypes: Vec<String>,
    /// SRV targets.
    pub hostnames: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_owned());
    }
}

/// Merge record batches into a map keyed by record name, in arrival order.
pub fn collate(batches: &[Vec<RR>]) -> HashMap<String, ServiceEntry> {
    let mut out: HashMap<String, ServiceEntry> = HashMap::new();
    for rr in batches.iter().flatten() {
        let entry = out.entry(rr.name.clone()).or_default();
        match &rr.data {
            RData::A(ip) => entry.ip = Some(*ip),
            RData::Srv { port, target, .. } => {
                entry.port = Some(*port);
                push_unique(&mut entry.hostnames, target);
            }
            RData::Ptr(target) => {
                if rr.name.trim_end_matches('.') == META_QUERY {
                    push_unique(&mut entry.servicetypes, target);
                } else {
                    push_unique(&mut entry.instances, target);
                }
            }
            RData::Txt(map) => entry.info = Some(map.clone()),
            RData::Other => {}
        }
    }
    out
}
