//! Device session behaviour against a mock laser server over real TCP.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing_test::traced_test;

use common::{default_reply, frame, object, report, response, MockServer, Outgoing};
use solstis_link::error_recovery::RetryPolicy;
use solstis_link::hardware::{DeviceSession, SessionSettings};
use solstis_link::protocol::{
    Message, Parameters, ParseFailureCode, ReportRequest, TransmissionId,
};
use solstis_link::{BackendKind, LinkError};

fn settings() -> SessionSettings {
    SessionSettings {
        client_address: "127.0.0.1".to_string(),
        default_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(1),
        max_correlation_attempts: 5,
        handshake: RetryPolicy::immediate(2),
    }
}

async fn connect(server: &MockServer) -> DeviceSession {
    DeviceSession::connect(BackendKind::Solstis, server.address(), settings())
        .await
        .unwrap()
}

/// Handler that precedes the `poll_wave_m` response with `stale` old frames.
fn with_stale_frames(stale: u64) -> common::Handler {
    Arc::new(move |request: &Message| {
        if request.op != "poll_wave_m" {
            return default_reply(request);
        }
        let id = request.transmission_id.map_or(0, |id| id.0);
        let mut out: Vec<Outgoing> = (1..=stale)
            .map(|back| {
                Outgoing::now(frame(Message {
                    transmission_id: Some(TransmissionId(id.saturating_sub(back))),
                    op: "poll_wave_m".to_string(),
                    parameters: object(json!({"status": [0], "stale": true})),
                }))
            })
            .collect();
        out.push(Outgoing::now(response(
            request,
            json!({"status": [0], "current_wavelength": [780.1]}),
        )));
        out
    })
}

#[tokio::test]
async fn test_execute_returns_matching_response() {
    let server = MockServer::start().await;
    let mut session = connect(&server).await;

    let mut parameters = Parameters::new();
    parameters.insert("action".into(), json!("on"));
    let execution = session
        .execute("laser_control", parameters, None)
        .await
        .unwrap();

    assert_eq!(execution.response["echo"], json!("laser_control"));
    assert!(execution.report.is_none());

    let received = server.received();
    assert_eq!(received[0].op, "start_link");
    assert_eq!(received[0].transmission_id, Some(TransmissionId(1)));
    assert_eq!(received[1].transmission_id, Some(TransmissionId(2)));
    assert_eq!(received[1].parameters["action"], json!("on"));
}

#[tokio::test]
async fn test_ids_strictly_increase() {
    let server = MockServer::start().await;
    let mut session = connect(&server).await;

    for _ in 0..3 {
        session.execute("get_status", Parameters::new(), None).await.unwrap();
    }

    let ids: Vec<u64> = server
        .received()
        .iter()
        .filter_map(|m| m.transmission_id.map(|id| id.0))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_stale_ids_below_bound_are_skipped() {
    let server = MockServer::with_handler(with_stale_frames(4)).await;
    let mut session = connect(&server).await;

    let execution = session
        .execute("poll_wave_m", Parameters::new(), None)
        .await
        .unwrap();
    assert_eq!(execution.response["current_wavelength"], json!([780.1]));
    assert!(!execution.response.contains_key("stale"));
}

#[tokio::test]
async fn test_stale_ids_at_bound_exhaust() {
    let server = MockServer::with_handler(with_stale_frames(5)).await;
    let mut session = connect(&server).await;

    let err = session
        .execute("poll_wave_m", Parameters::new(), None)
        .await
        .unwrap_err();
    match err {
        LinkError::CorrelationExhausted {
            expected, attempts, ..
        } => {
            assert_eq!(expected, TransmissionId(2));
            assert_eq!(attempts, 5);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(session.pending().is_none());

    // The orphaned id-2 response is still in flight; the next call must not see it
    tokio::time::sleep(Duration::from_millis(50)).await;
    let execution = session
        .execute("get_status", Parameters::new(), None)
        .await
        .unwrap();
    assert_eq!(execution.response["echo"], json!("get_status"));
    assert!(!execution.response.contains_key("current_wavelength"));
    assert_eq!(session.last_transmission_id(), TransmissionId(3));
}

#[tokio::test]
async fn test_report_returned_with_response() {
    let server = MockServer::start().await;
    let mut session = connect(&server).await;

    let mut parameters = Parameters::new();
    parameters.insert("fitted_oven".into(), json!(1));
    let execution = session
        .execute(
            "start_ppln",
            parameters,
            Some(&ReportRequest::finished(Duration::from_secs(2))),
        )
        .await
        .unwrap();

    assert_eq!(execution.report, Some(object(json!({"report": [0]}))));
    let request = &server.received()[1];
    assert_eq!(request.parameters["report"], json!("finished"));
    assert_eq!(request.parameters["fitted_oven"], json!(1));
}

#[tokio::test]
async fn test_unbounded_report_wait_does_not_overflow() {
    let server = MockServer::start().await;
    let mut session = connect(&server).await;

    let execution = session
        .execute(
            "start_ppln",
            Parameters::new(),
            Some(&ReportRequest::finished(Duration::MAX)),
        )
        .await
        .unwrap();
    assert_eq!(execution.report, Some(object(json!({"report": [0]}))));
    assert!(session.pending().is_none());
}

#[traced_test]
#[tokio::test]
async fn test_report_timeout_then_late_report_is_drained() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        if request.op == "wavelength" {
            vec![
                Outgoing::now(response(request, json!({"status": [0]}))),
                Outgoing::later(
                    Duration::from_millis(300),
                    report("wavelength", json!({"report": [0]})),
                ),
            ]
        } else {
            default_reply(request)
        }
    });
    let server = MockServer::with_handler(handler).await;
    let mut session = connect(&server).await;

    let err = session
        .execute(
            "wavelength",
            Parameters::new(),
            Some(&ReportRequest::finished(Duration::from_millis(100))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::ReportTimeout { .. }));
    assert_eq!(session.last_transmission_id(), TransmissionId(2));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let execution = session
        .execute("status", Parameters::new(), None)
        .await
        .unwrap();
    assert_eq!(execution.response["echo"], json!("status"));
    assert_eq!(session.last_transmission_id(), TransmissionId(3));
    assert!(logs_contain("Found old bytes in input"));
}

#[tokio::test]
async fn test_wrong_report_is_unexpected() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        if request.op == "change_ppln" {
            vec![
                Outgoing::now(response(request, json!({"status": [0]}))),
                Outgoing::now(report("start_ppln", json!({"report": [0]}))),
            ]
        } else {
            default_reply(request)
        }
    });
    let server = MockServer::with_handler(handler).await;
    let mut session = connect(&server).await;

    let err = session
        .execute("change_ppln", Parameters::new(), Some(&ReportRequest::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::UnexpectedReport { .. }));
}

#[traced_test]
#[tokio::test]
async fn test_stale_bytes_are_never_returned() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        let mut out = default_reply(request);
        if request.op == "get_status" {
            out.push(Outgoing::now(
                br#"{"message":{"transmission_id":[99],"op":"junk","parameters":{"junk":true}}}"#
                    .to_vec(),
            ));
        }
        out
    });
    let server = MockServer::with_handler(handler).await;
    let mut session = connect(&server).await;

    session.execute("get_status", Parameters::new(), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let execution = session
        .execute("poll_wave_m", Parameters::new(), None)
        .await
        .unwrap();
    assert_eq!(execution.response["echo"], json!("poll_wave_m"));
    assert!(!execution.response.contains_key("junk"));
    assert!(logs_contain("Found old bytes in input"));
}

#[tokio::test]
async fn test_parse_fail_surfaces_sub_code() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        if request.op != "warp_drive" {
            return default_reply(request);
        }
        vec![Outgoing::now(frame(Message {
            transmission_id: request.transmission_id,
            op: "parse_fail".to_string(),
            parameters: object(json!({"protocol_error": [7]})),
        }))]
    });
    let server = MockServer::with_handler(handler).await;
    let mut session = connect(&server).await;

    match session.execute("warp_drive", Parameters::new(), None).await {
        Err(LinkError::RemoteParse { failure, original }) => {
            assert_eq!(failure.code, ParseFailureCode::UnknownOp);
            assert!(original.contains("warp_drive"));
        }
        other => panic!("expected remote parse error, got {other:?}"),
    }
    // Session stays usable
    assert!(session.pending().is_none());
    let execution = session
        .execute("get_status", Parameters::new(), None)
        .await
        .unwrap();
    assert_eq!(execution.response["echo"], json!("get_status"));
    assert_eq!(session.last_transmission_id(), TransmissionId(3));
}

#[tokio::test]
async fn test_disconnect_mid_message_is_fatal() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        if request.op == "start_link" {
            return default_reply(request);
        }
        vec![
            Outgoing::now(br#"{"message":{"transmission_id":[2],"op":"#.to_vec()),
            Outgoing::Close,
        ]
    });
    let server = MockServer::with_handler(handler).await;
    let mut session = connect(&server).await;

    let err = session
        .execute("get_status", Parameters::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Disconnected { pending_bytes } if pending_bytes > 0));
    assert!(err.is_session_fatal());
}

#[tokio::test]
async fn test_handshake_rejected() {
    let handler: common::Handler = Arc::new(|request: &Message| {
        vec![Outgoing::now(response(request, json!({"status": "failed"})))]
    });
    let server = MockServer::with_handler(handler).await;

    let err = DeviceSession::connect(BackendKind::Emm, server.address(), settings())
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::HandshakeRejected { backend: BackendKind::Emm, .. }));
}

#[tokio::test]
async fn test_handshake_retried_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let handler: common::Handler = Arc::new(move |request: &Message| {
        if request.op == "start_link" && seen.fetch_add(1, Ordering::SeqCst) == 0 {
            return Vec::new();
        }
        default_reply(request)
    });
    let server = MockServer::with_handler(handler).await;

    let session = connect(&server).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(session.last_transmission_id(), TransmissionId(2));
}

#[tokio::test]
async fn test_silent_server_is_unreachable_after_two_attempts() {
    let handler: common::Handler = Arc::new(|_: &Message| Vec::new());
    let server = MockServer::with_handler(handler).await;

    let err = DeviceSession::connect(BackendKind::Solstis, server.address(), settings())
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::BackendUnreachable { .. }));
    assert_eq!(server.received_ops(), vec!["start_link", "start_link"]);
}

#[tokio::test]
async fn test_close_releases_socket_once() {
    let server = MockServer::start().await;
    let session = connect(&server).await;

    let faults = session.close().await;
    assert!(faults.is_empty());
    server.wait_closed(1).await;
    assert_eq!(server.closed(), 1);
    assert_eq!(server.connections(), 1);
}
