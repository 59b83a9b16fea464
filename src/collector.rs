//! One query + listen cycle: send a single question, collect authoritative
//! responses from the multicast and unicast sockets until a deadline, with
//! optional early termination once a matching record arrives.

use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, RR};
use crate::sockets::{SocketPair, MDNS_ADDR};

/// Margin added to every listen window to absorb network jitter.
const LISTEN_GRACE: Duration = Duration::from_millis(500);
/// Pause after sending so our own multicast echo drains before we listen.
const POST_SEND_SETTLE: Duration = Duration::from_millis(100);

pub(crate) struct CollectParams<'a> {
    pub name: &'a str,
    pub qtype: u16,
    pub listen_time: Duration,
    /// Return as soon as a datagram names the target.
    pub early_terminate: bool,
    /// Early-termination target when it differs from the queried name.
    pub early_match_name: Option<&'a str>,
}

/// Drop a trailing `.local` suffix (and trailing dot) for name comparison.
fn strip_local(name: &str) -> &str {
    let name = name.trim_end_matches('.');
    name.strip_suffix(".local").unwrap_or(name)
}

pub(crate) fn names_match(a: &str, b: &str) -> bool {
    strip_local(a) == strip_local(b)
}

/// Run one cycle and return the record lists of every accepted datagram, in
/// arrival order. With early termination, the matching datagram's records
/// are the only batch returned.
pub(crate) async fn collect(
    params: &CollectParams<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<RR>>> {
    let pair = match SocketPair::open().await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("mdns cycle aborted, sockets unavailable: {:#}", e);
            return Err(e);
        }
    };

    let query = protocol::create_query(params.name, params.qtype)?;
    pair.unicast.send_to(&query, MDNS_ADDR).await?;
    tokio::time::sleep(POST_SEND_SETTLE).await;

    let deadline = Instant::now() + params.listen_time + LISTEN_GRACE;
    let target = params.early_match_name.unwrap_or(params.name);
    let mut batches: Vec<Vec<RR>> = Vec::new();
    let mut ubuf = vec![0u8; 9000];
    let mut mbuf = vec![0u8; 9000];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (origin, result, buf) = tokio::select! {
            r = pair.unicast.recv_from(&mut ubuf) => ("unicast", r, &ubuf),
            r = pair.multicast.recv_from(&mut mbuf) => ("multicast", r, &mbuf),
            _ = tokio::time::sleep(remaining) => break,
            _ = cancel.cancelled() => break,
        };
        let (n, addr) = match result {
            Ok(v) => v,
            Err(e) => {
                log::debug!("mdns recv error: {}", e);
                continue;
            }
        };

        let msg = match protocol::parse_dns(&buf[..n], addr) {
            Ok(m) => m,
            Err(e) => {
                log::trace!("dropping undecodable {} datagram from {}: {:#}", origin, addr, e);
                continue;
            }
        };
        if !msg.is_authoritative_response() {
            log::trace!("ignoring non-answer from {} (flags {:#06x})", addr, msg.flags);
            continue;
        }
        let records = msg.into_records();
        if records.is_empty() {
            continue;
        }
        log::trace!("{} records in {} datagram from {}", records.len(), origin, addr);
        if log::log_enabled!(log::Level::Trace) {
            for rr in &records {
                log::trace!("  {}", rr);
            }
        }

        if params.early_terminate && records.iter().any(|rr| names_match(&rr.name, target)) {
            return Ok(vec![records]);
        }
        batches.push(records);
    }

    Ok(batches)
}
