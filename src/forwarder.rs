//! Recursive forwarding for queries outside the cluster zone.
//!
//! Upstream resolvers are tried in configured order over UDP with a
//! bounded per-exchange timeout. A response that carries no answers, is
//! non-authoritative and names an SOA in its authority section is treated
//! as a referral and followed, decrementing a hop budget; the final reply
//! is returned as-is once the budget runs out.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::rr::RData;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, trace};

use crate::error::DnsError;
use crate::metrics;

/// Total upstream exchanges allowed per query, including referral hops.
pub const RECURSE_DEPTH: u8 = 3;

/// Timeout for a single upstream exchange.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Port referral nameservers are contacted on.
const DNS_PORT: u16 = 53;

/// Where to send an exchange.
#[derive(Debug, Clone)]
enum Target {
    /// An already-resolved upstream address.
    Addr(SocketAddr),
    /// A nameserver host from a referral, resolved at exchange time.
    Host(String),
}

/// Forwards queries to upstream resolvers.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
    recurse_depth: u8,
}

impl Forwarder {
    /// Create a forwarder over the given upstreams.
    pub fn new(upstreams: Vec<SocketAddr>) -> Self {
        Self {
            upstreams,
            timeout: UPSTREAM_TIMEOUT,
            recurse_depth: RECURSE_DEPTH,
        }
    }

    /// Whether any upstream is configured.
    pub fn has_upstreams(&self) -> bool {
        !self.upstreams.is_empty()
    }

    /// Send the query to the upstreams in order, returning the first
    /// successful response.
    pub async fn resolve(&self, query: &Message) -> Result<Message, DnsError> {
        for upstream in &self.upstreams {
            match self
                .resolve_via(query, Target::Addr(*upstream), exchange_udp)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(e) => debug!(upstream = %upstream, "upstream failed: {e}"),
            }
        }
        Err(DnsError::UpstreamsFailed)
    }

    /// Exchange with referral-following, generic over the transport so the
    /// hop accounting is testable without sockets.
    async fn resolve_via<F, Fut>(
        &self,
        query: &Message,
        first: Target,
        exchange: F,
    ) -> Result<Message, DnsError>
    where
        F: Fn(Message, Target, Duration) -> Fut,
        Fut: Future<Output = Result<Message, DnsError>>,
    {
        let mut target = first;
        let mut remaining = self.recurse_depth;

        loop {
            let reply = exchange(query.clone(), target, self.timeout).await?;
            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                return Ok(reply);
            }
            match referral_target(&reply) {
                Some(next) => {
                    if remaining == self.recurse_depth - 1 {
                        metrics::record_recursion();
                    }
                    trace!(nameserver = %next, "following referral");
                    target = Target::Host(next);
                }
                None => return Ok(reply),
            }
        }
    }
}

/// The nameserver to follow when a reply is a referral: no answers,
/// non-authoritative, and an SOA leading the authority section.
fn referral_target(reply: &Message) -> Option<String> {
    if !reply.answers().is_empty() || reply.authoritative() {
        return None;
    }
    match reply.name_servers().first().map(|r| r.data()) {
        Some(RData::SOA(soa)) => Some(soa.mname().to_utf8()),
        _ => None,
    }
}

/// One UDP round-trip with the given target, bounded by `timeout`.
async fn exchange_udp(
    query: Message,
    target: Target,
    timeout: Duration,
) -> Result<Message, DnsError> {
    let addr = match target {
        Target::Addr(addr) => addr,
        Target::Host(host) => {
            let host = host.trim_end_matches('.').to_string();
            let result = tokio::time::timeout(timeout, lookup_host((host.as_str(), DNS_PORT)))
                .await
                .map_err(|_| DnsError::Upstream(format!("timed out resolving {host}")))?
                .map_err(DnsError::Io)?
                .next()
                .ok_or_else(|| DnsError::Upstream(format!("no address for nameserver {host}")))?;
            result
        }
    };

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;

    let bytes = query.to_vec()?;
    tokio::time::timeout(timeout, async {
        socket.send(&bytes).await?;
        let mut buf = vec![0u8; 4096];
        loop {
            let n = socket.recv(&mut buf).await?;
            let reply = Message::from_vec(&buf[..n])?;
            if reply.id() == query.id() {
                return Ok(reply);
            }
            trace!("dropping upstream reply with mismatched id");
        }
    })
    .await
    .map_err(|_| DnsError::Upstream(format!("exchange with {addr} timed out")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::rdata::SOA;
    use hickory_proto::rr::{Name, Record, RecordType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn query(name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(42);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        let mut q = Query::new();
        q.set_name(Name::from_ascii(name).unwrap());
        q.set_query_type(RecordType::A);
        msg.add_query(q);
        msg
    }

    fn referral_reply(id: u16, ns: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Response);
        msg.set_authoritative(false);
        let soa = SOA::new(
            Name::from_ascii(ns).unwrap(),
            Name::from_ascii("admin.example.com.").unwrap(),
            1,
            3600,
            600,
            86400,
            60,
        );
        msg.add_name_server(Record::from_rdata(
            Name::from_ascii("example.com.").unwrap(),
            60,
            RData::SOA(soa),
        ));
        msg
    }

    fn answered_reply(id: u16) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Response);
        msg.set_authoritative(true);
        msg.add_answer(Record::from_rdata(
            Name::from_ascii("example.com.").unwrap(),
            60,
            RData::A(hickory_proto::rr::rdata::A::new(1, 2, 3, 4)),
        ));
        msg
    }

    #[test]
    fn referral_detection() {
        assert_eq!(
            referral_target(&referral_reply(1, "ns1.example.com.")),
            Some("ns1.example.com.".to_string())
        );
        assert_eq!(referral_target(&answered_reply(1)), None);

        let mut authoritative_empty = referral_reply(1, "ns1.example.com.");
        authoritative_empty.set_authoritative(true);
        assert_eq!(referral_target(&authoritative_empty), None);

        let plain_empty = {
            let mut msg = Message::new();
            msg.set_id(1);
            msg.set_message_type(MessageType::Response);
            msg
        };
        assert_eq!(referral_target(&plain_empty), None);
    }

    #[tokio::test]
    async fn referral_chain_is_depth_bounded() {
        let forwarder = Forwarder::new(vec!["127.0.0.1:5300".parse().unwrap()]);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let reply = forwarder
            .resolve_via(
                &query("www.example.com."),
                Target::Addr("127.0.0.1:5300".parse().unwrap()),
                move |q, _target, _timeout| {
                    let counter = counter.clone();
                    async move {
                        let hop = counter.fetch_add(1, Ordering::SeqCst);
                        // an endless chain of referrals
                        Ok(referral_reply(q.id(), &format!("ns{hop}.example.com.")))
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), RECURSE_DEPTH as usize);
        // the last reply is returned as-is, still a referral
        assert!(referral_target(&reply).is_some());
    }

    #[tokio::test]
    async fn answered_reply_stops_recursion() {
        let forwarder = Forwarder::new(vec!["127.0.0.1:5300".parse().unwrap()]);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let reply = forwarder
            .resolve_via(
                &query("www.example.com."),
                Target::Addr("127.0.0.1:5300".parse().unwrap()),
                move |q, _target, _timeout| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(answered_reply(q.id()))
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn no_upstreams_fails() {
        let forwarder = Forwarder::new(Vec::new());
        assert!(!forwarder.has_upstreams());
        let result = forwarder.resolve(&query("www.example.com.")).await;
        assert!(matches!(result, Err(DnsError::UpstreamsFailed)));
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        // an upstream that never answers
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let result = exchange_udp(
            query("www.example.com."),
            Target::Addr(addr),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(DnsError::Upstream(_))));
    }
}
