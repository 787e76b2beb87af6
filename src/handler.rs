//! Query handling.
//!
//! A single [`DnsHandler`] serves both sides of the suffix dispatch:
//! names inside the cluster zone are answered from the published record
//! snapshot, everything else is forwarded upstream. Each request loads
//! the snapshot once, so it sees one consistent record set even while a
//! refresh swaps in a newer one. A panic inside either path is caught and
//! converted into a SERVFAIL reply; one bad query must never take the
//! server down.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use hickory_proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, NS, SOA, SRV};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, RequestInfo, ResponseHandler, ResponseInfo};
use rand::seq::SliceRandom;
use tracing::{debug, error, trace};

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::forwarder::Forwarder;
use crate::generator::resolve_ipv4;
use crate::metrics::{self, QueryResult, Timer};
use crate::records::{PublishedRecords, RecordSnapshot};

/// Request handler dispatching between the cluster zone and upstream
/// forwarding.
pub struct DnsHandler {
    origin: LowerName,
    records: PublishedRecords,
    forwarder: Forwarder,
    config: Arc<DnsConfig>,
}

/// Strip any `.*` substring out of a queried name, flattening legacy
/// wildcard queries onto the name they alias.
fn clean_wild(dom: &str) -> String {
    if dom.contains(".*") {
        dom.replace(".*", "")
    } else {
        dom.to_string()
    }
}

/// A SERVFAIL `ResponseInfo` for when no reply could be sent at all.
fn failed_info(request: &Request) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}

impl DnsHandler {
    /// Create a handler for the configured zone.
    pub fn new(
        config: Arc<DnsConfig>,
        records: PublishedRecords,
        forwarder: Forwarder,
    ) -> Result<Self, DnsError> {
        let origin: LowerName = Name::from_ascii(format!("{}.", config.domain))?.into();
        Ok(Self {
            origin,
            records,
            forwarder,
            config,
        })
    }

    /// The zone this handler answers authoritatively.
    pub fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn dispatch<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        if request.header().op_code() != OpCode::Query
            || request.header().message_type() != MessageType::Query
        {
            debug!(op_code = ?request.header().op_code(), "refusing non-query opcode");
            return self
                .reply_no_records(request, response_handle, ResponseCode::NotImp)
                .await;
        }

        let Ok(info) = request.request_info() else {
            return self
                .reply_no_records(request, response_handle, ResponseCode::FormErr)
                .await;
        };

        if self.origin.zone_of(info.query.name()) {
            self.handle_cluster(request, &info, response_handle).await
        } else {
            self.handle_forward(request, &info, response_handle).await
        }
    }

    /// Answer a question inside the cluster zone from the published
    /// snapshot.
    async fn handle_cluster<R: ResponseHandler>(
        &self,
        request: &Request,
        info: &RequestInfo<'_>,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let snapshot = self.records.load();

        let qname = info.query.name().to_string();
        let dom = clean_wild(&qname);
        let qtype = info.query.query_type();
        let record_name = Name::from(info.query.name().clone());

        trace!(name = %dom, qtype = ?qtype, "cluster query");

        let mut answers: Vec<Record> = Vec::new();
        match qtype {
            RecordType::A => self.push_a_answers(&snapshot, &dom, &record_name, &mut answers),
            RecordType::SRV => self.push_srv_answers(&snapshot, &dom, &record_name, &mut answers),
            RecordType::ANY => {
                self.push_a_answers(&snapshot, &dom, &record_name, &mut answers);
                self.push_srv_answers(&snapshot, &dom, &record_name, &mut answers);
            }
            RecordType::SOA => {
                if info.query.name() == &self.origin {
                    answers.extend(self.soa_record());
                }
            }
            RecordType::NS => {
                if info.query.name() == &self.origin {
                    answers.extend(self.ns_record());
                }
            }
            _ => {}
        }

        // spread load across task instances
        answers.shuffle(&mut rand::rng());

        let nxdomain = answers.is_empty()
            && matches!(qtype, RecordType::A | RecordType::SRV | RecordType::ANY)
            && !snapshot.has_name(&dom);

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(true);
        header.set_response_code(if nxdomain {
            ResponseCode::NXDomain
        } else {
            ResponseCode::NoError
        });

        let result = if answers.is_empty() {
            QueryResult::NxDomain
        } else {
            QueryResult::Success
        };

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            answers.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        match response_handle.send_response(response).await {
            Ok(sent) => {
                metrics::record_cluster_query(result, timer.elapsed());
                sent
            }
            Err(e) => {
                error!("failed to send cluster reply: {e}");
                metrics::record_cluster_query(QueryResult::Failed, timer.elapsed());
                failed_info(request)
            }
        }
    }

    /// Forward a question outside the cluster zone to the upstreams.
    async fn handle_forward<R: ResponseHandler>(
        &self,
        request: &Request,
        info: &RequestInfo<'_>,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();

        if !self.forwarder.has_upstreams() {
            debug!("no upstream resolvers configured");
            metrics::record_forward_query(QueryResult::Failed, timer.elapsed());
            return self
                .reply_no_records(request, response_handle, ResponseCode::ServFail)
                .await;
        }

        let mut query = Message::new();
        query.set_id(request.id());
        query.set_message_type(MessageType::Query);
        query.set_op_code(OpCode::Query);
        query.set_recursion_desired(request.header().recursion_desired());
        query.add_query(info.query.original().clone());

        match self.forwarder.resolve(&query).await {
            Ok(upstream) => {
                let mut header = Header::response_from_request(request.header());
                header.set_authoritative(false);
                header.set_recursion_available(true);
                header.set_response_code(upstream.response_code());

                let result = if upstream.answers().is_empty() {
                    QueryResult::NxDomain
                } else {
                    QueryResult::Success
                };

                let builder = MessageResponseBuilder::from_message_request(request);
                let response = builder.build(
                    header,
                    upstream.answers().iter(),
                    upstream.name_servers().iter(),
                    std::iter::empty(),
                    upstream.additionals().iter(),
                );
                match response_handle.send_response(response).await {
                    Ok(sent) => {
                        metrics::record_forward_query(result, timer.elapsed());
                        sent
                    }
                    Err(e) => {
                        error!("failed to send forwarded reply: {e}");
                        metrics::record_forward_query(QueryResult::Failed, timer.elapsed());
                        failed_info(request)
                    }
                }
            }
            Err(e) => {
                debug!("forwarding failed: {e}");
                metrics::record_forward_query(QueryResult::Failed, timer.elapsed());
                self.reply_no_records(request, response_handle, ResponseCode::ServFail)
                    .await
            }
        }
    }

    fn push_a_answers(
        &self,
        snapshot: &RecordSnapshot,
        dom: &str,
        name: &Name,
        answers: &mut Vec<Record>,
    ) {
        for value in snapshot.a_values(dom) {
            match self.format_a(name.clone(), value) {
                Some(record) => answers.push(record),
                None => error!(value = %value, "cannot translate A value into an IPv4 address"),
            }
        }
    }

    fn push_srv_answers(
        &self,
        snapshot: &RecordSnapshot,
        dom: &str,
        name: &Name,
        answers: &mut Vec<Record>,
    ) {
        for value in snapshot.srv_values(dom) {
            match self.format_srv(name.clone(), value) {
                Some(record) => answers.push(record),
                None => error!(value = %value, "malformed SRV target"),
            }
        }
    }

    /// An A record for the stored value, re-resolving the host part.
    fn format_a(&self, name: Name, value: &str) -> Option<Record> {
        let host = value.split(':').next()?;
        let ip: std::net::Ipv4Addr = resolve_ipv4(host)?.parse().ok()?;
        let mut record = Record::from_rdata(name, self.config.ttl, RData::A(A::from(ip)));
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }

    /// A SRV record for a stored `host.:port` target.
    fn format_srv(&self, name: Name, value: &str) -> Option<Record> {
        let (host, port) = value.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        let target = Name::from_ascii(host).ok()?;
        let srv = SRV::new(0, 0, port, target);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::SRV(srv));
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }

    /// The zone SOA, synthesized from configuration.
    fn soa_record(&self) -> Option<Record> {
        let mname = Name::from_ascii(&self.config.soa_name).ok()?;
        let rname = Name::from_ascii(format!("root.{}.", self.config.domain)).ok()?;
        let refresh = self.config.refresh_secs as i32;
        let soa = SOA::new(
            mname,
            rname,
            self.records.generation(),
            refresh,
            (refresh / 2).max(60),
            86_400,
            self.config.ttl,
        );
        let mut record = Record::from_rdata(
            Name::from(self.origin.clone()),
            self.config.ttl,
            RData::SOA(soa),
        );
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }

    /// The zone NS, pointing at the authoritative server name.
    fn ns_record(&self) -> Option<Record> {
        let ns_name = Name::from_ascii(&self.config.soa_name).ok()?;
        let mut record = Record::from_rdata(
            Name::from(self.origin.clone()),
            self.config.ttl,
            RData::NS(NS(ns_name)),
        );
        record.set_dns_class(DNSClass::IN);
        Some(record)
    }

    async fn reply_no_records<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(code);
        let builder = MessageResponseBuilder::from_message_request(request);
        match response_handle
            .send_response(builder.build_no_records(header))
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                error!("failed to send reply: {e}");
                failed_info(request)
            }
        }
    }
}

#[async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let dispatched = AssertUnwindSafe(self.dispatch(request, response_handle.clone()))
            .catch_unwind()
            .await;
        match dispatched {
            Ok(info) => info,
            Err(_) => {
                error!("query handler panicked, replying SERVFAIL");
                self.reply_no_records(request, response_handle, ResponseCode::ServFail)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_wild_flattens_wildcards() {
        assert_eq!(clean_wild("foo.*.mesos."), "foo.mesos.");
        assert_eq!(clean_wild("foo.mesos."), "foo.mesos.");
        assert_eq!(clean_wild("a.*.b.*.mesos."), "a.b.mesos.");
    }
}
