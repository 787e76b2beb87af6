//! Handler-level integration tests: crafted requests run through the full
//! `RequestHandler` dispatch with the response captured in wire format.

mod common;

use common::*;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{RData, RecordType};

// =========================================================================
// Cluster zone answers
// =========================================================================

#[tokio::test]
async fn a_query_returns_every_address() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "liquor-store.marathon.mesos.", RecordType::A, 1).await;

    assert_a_response(
        &msg,
        &["1.2.3.11".parse().unwrap(), "1.2.3.12".parse().unwrap()],
    );
}

#[tokio::test]
async fn a_answers_are_authoritative_with_recursion_available() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "leader.mesos.", RecordType::A, 2).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.authoritative());
    assert!(msg.recursion_available());
}

#[tokio::test]
async fn srv_query_returns_targets_and_ports() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(
        &handler,
        "_liquor-store._tcp.marathon.mesos.",
        RecordType::SRV,
        3,
    )
    .await;

    assert_response_code(&msg, ResponseCode::NoError);
    let mut srvs = extract_srv(&msg);
    srvs.sort();
    assert_eq!(
        srvs,
        vec![
            ("liquor-store.marathon.mesos.".to_string(), 31354),
            ("liquor-store.marathon.mesos.".to_string(), 31355),
        ]
    );

    // zero priority and weight on every record
    for record in msg.answers() {
        if let RData::SRV(srv) = record.data() {
            assert_eq!(srv.priority(), 0);
            assert_eq!(srv.weight(), 0);
        }
    }
}

#[tokio::test]
async fn any_query_unions_a_and_srv() {
    let mut snapshot = test_snapshot();
    snapshot.insert(
        "liquor-store.marathon.mesos.",
        "liquor-store.marathon.mesos.:31354",
        mesos_dns::RecordKind::Srv,
    );
    let handler = build_handler(test_dns_config(), snapshot, Vec::new());
    let msg = execute_query(&handler, "liquor-store.marathon.mesos.", RecordType::ANY, 4).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(&msg).len(), 2);
    assert_eq!(extract_srv(&msg).len(), 1);
}

#[tokio::test]
async fn unknown_name_is_nxdomain() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "no-such-task.marathon.mesos.", RecordType::A, 5).await;

    assert_response_code(&msg, ResponseCode::NXDomain);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn srv_only_name_answers_a_with_noerror_empty() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "_leader._tcp.mesos.", RecordType::A, 6).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn unsupported_type_in_zone_is_noerror_empty() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "liquor-store.marathon.mesos.", RecordType::TXT, 7).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn wildcard_names_are_flattened() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(
        &handler,
        "liquor-store.*.marathon.mesos.",
        RecordType::A,
        8,
    )
    .await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(&msg).len(), 2);
}

#[tokio::test]
async fn queries_are_case_insensitive() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "Liquor-Store.MARATHON.mesos.", RecordType::A, 9).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(extract_a_ips(&msg).len(), 2);
}

#[tokio::test]
async fn shuffle_preserves_the_answer_set() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    for id in 0..8 {
        let msg =
            execute_query(&handler, "liquor-store.marathon.mesos.", RecordType::A, id).await;
        assert_a_response(
            &msg,
            &["1.2.3.11".parse().unwrap(), "1.2.3.12".parse().unwrap()],
        );
    }
}

// =========================================================================
// Zone metadata
// =========================================================================

#[tokio::test]
async fn soa_query_at_apex_is_synthesized() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "mesos.", RecordType::SOA, 10).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::SOA(soa) => {
            assert_eq!(soa.mname().to_utf8(), "mesos-dns.mesos.");
            assert_eq!(soa.refresh(), 60);
        }
        other => panic!("expected SOA, got {other:?}"),
    }
}

#[tokio::test]
async fn ns_query_at_apex_points_at_the_server() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "mesos.", RecordType::NS, 11).await;

    assert_response_code(&msg, ResponseCode::NoError);
    assert_eq!(msg.answers().len(), 1);
    match msg.answers()[0].data() {
        RData::NS(ns) => assert_eq!(ns.0.to_utf8(), "mesos-dns.mesos."),
        other => panic!("expected NS, got {other:?}"),
    }
}

// =========================================================================
// Forwarding edge cases
// =========================================================================

#[tokio::test]
async fn out_of_zone_query_without_upstreams_is_servfail() {
    let handler = build_handler(test_dns_config(), test_snapshot(), Vec::new());
    let msg = execute_query(&handler, "www.example.com.", RecordType::A, 12).await;

    assert_response_code(&msg, ResponseCode::ServFail);
    assert!(msg.answers().is_empty());
}
