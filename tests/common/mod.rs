//! Shared test infrastructure for handler and server integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use mesos_dns::config::{DnsConfig, HashScheme, IpSource};
use mesos_dns::forwarder::Forwarder;
use mesos_dns::handler::DnsHandler;
use mesos_dns::records::{PublishedRecords, RecordKind, RecordSnapshot};

// --- Constants ---

pub const DOMAIN: &str = "mesos";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RequestHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Config/handler builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        masters: vec!["127.0.0.1:5050".to_string()],
        domain: DOMAIN.to_string(),
        listener: "127.0.0.1".to_string(),
        port: 5353,
        ttl: 60,
        refresh_secs: 60,
        resolvers: Vec::new(),
        ip_sources: vec![IpSource::Netinfo, IpSource::Host],
        templates: Vec::new(),
        soa_name: format!("mesos-dns.{DOMAIN}."),
        enforce_rfc952: false,
        task_hash: HashScheme::Fold17,
    }
}

/// A snapshot with a representative record mix.
pub fn test_snapshot() -> RecordSnapshot {
    let mut snap = RecordSnapshot::new();
    snap.insert("leader.mesos.", "1.2.3.9", RecordKind::A);
    snap.insert("master.mesos.", "1.2.3.9", RecordKind::A);
    snap.insert("master0.mesos.", "1.2.3.9", RecordKind::A);
    snap.insert("liquor-store.marathon.mesos.", "1.2.3.11", RecordKind::A);
    snap.insert("liquor-store.marathon.mesos.", "1.2.3.12", RecordKind::A);
    snap.insert(
        "_liquor-store._tcp.marathon.mesos.",
        "liquor-store.marathon.mesos.:31354",
        RecordKind::Srv,
    );
    snap.insert(
        "_liquor-store._tcp.marathon.mesos.",
        "liquor-store.marathon.mesos.:31355",
        RecordKind::Srv,
    );
    snap.insert(
        "_leader._tcp.mesos.",
        "leader.mesos.:5050",
        RecordKind::Srv,
    );
    snap
}

/// Build a handler serving `snapshot`, forwarding to `upstreams`.
pub fn build_handler(
    config: DnsConfig,
    snapshot: RecordSnapshot,
    upstreams: Vec<SocketAddr>,
) -> DnsHandler {
    let records = PublishedRecords::new();
    records.publish(snapshot);
    DnsHandler::new(Arc::new(config), records, Forwarder::new(upstreams))
        .expect("failed to create handler")
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a crafted query.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &DnsHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Extract `(target, port)` pairs from SRV answers.
pub fn extract_srv(msg: &Message) -> Vec<(String, u16)> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SRV(srv) => Some((srv.target().to_utf8(), srv.port())),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected A addresses,
/// in any order.
pub fn assert_a_response(msg: &Message, expected_ips: &[Ipv4Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_a_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv4Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "A records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
