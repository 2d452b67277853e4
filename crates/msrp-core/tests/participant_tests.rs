mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{active, config, loopback, passive, wait_for_request, Recorder, Wire, WAIT};
use sigstack_msrp_core::{
    ByteRange, Continuation, MsrpConfig, MsrpRequest, MsrpResponse, ParticipantId, ParticipantSignal,
    ParticipantState,
};

fn chunk(message_id: &str, range: &str, continuation: Continuation, body: &'static [u8]) -> MsrpRequest {
    MsrpRequest::send(
        message_id,
        "text/plain",
        ByteRange::parse(range).unwrap(),
        continuation,
        Bytes::from_static(body),
    )
}

#[tokio::test]
async fn test_loopback_delivers_message() {
    let (alice, bob) = loopback(config()).await;
    for ep in [&alice, &bob] {
        assert_eq!(ep.listener.count("connected"), 1);
    }
    alice.listener.wait_for("activated:alice").await;
    bob.listener.wait_for("activated:bob").await;

    let chunks = alice.participant.sender().send_message("msg-1", "text/plain", "Hello").unwrap();
    assert_eq!(chunks, 1);

    bob.listener.wait_for("received:msg-1:Hello").await;
    alice.listener.wait_for("response:msg-1:200").await;

    let meta = &bob.listener.metas()[0];
    assert_eq!(meta.message_id, "msg-1");
    assert_eq!(meta.content_type, "text/plain");
    assert_eq!(meta.expected_size, Some(5));
}

#[tokio::test]
async fn test_multi_chunk_message() {
    let (alice, bob) = loopback(MsrpConfig {
        max_chunk_size: 4,
        ..config()
    })
    .await;

    let chunks = alice
        .participant
        .sender()
        .send_message("fox", "text/plain", "The quick brown fox")
        .unwrap();
    assert_eq!(chunks, 5);

    bob.listener.wait_for("received:fox:The quick brown fox").await;
    alice.listener.wait_for("response:fox:200").await;
    assert_eq!(alice.listener.count("response:"), 1);

    let sent = alice.wire.sent_requests();
    assert_eq!(sent.len(), 6);
    assert!(sent[0].is_handshake());
    let ranges: Vec<String> = sent[1..]
        .iter()
        .map(|r| r.byte_range.map(|b| b.to_string()).unwrap_or_default())
        .collect();
    assert_eq!(ranges, vec!["1-4/19", "5-8/19", "9-12/19", "13-16/19", "17-19/19"]);
    assert_eq!(sent[5].continuation, Continuation::Complete);
    assert!(sent[1..5].iter().all(|r| r.continuation == Continuation::More));
}

#[tokio::test]
async fn test_rejected_chunk_aborts_message() {
    let (alice, bob) = loopback(MsrpConfig {
        max_chunk_size: 4,
        ..config()
    })
    .await;
    bob.listener.reject_with(415);

    alice
        .participant
        .sender()
        .send_message("m", "application/x-unknown", "abcdefghij")
        .unwrap();
    alice.listener.wait_for("abort-sending:m").await;
    alice.listener.wait_for("response:m:415").await;

    alice.participant.close().unwrap();
    alice.participant.handle().join().await.unwrap();

    // Handshake plus the first chunk; the rest was dropped.
    assert_eq!(alice.wire.sent_requests().len(), 2);
    assert_eq!(alice.listener.count("abort-sending:"), 1);
    assert_eq!(bob.listener.count("received:"), 0);
}

#[tokio::test]
async fn test_next_message_after_abort_is_sent() {
    let ep = active(config()).await;
    ep.wire.refuse(true);
    ep.participant.sender().send_message("m1", "text/plain", "lost").unwrap();
    ep.listener.wait_for("abort-sending:m1").await;
    assert_eq!(ep.participant.state(), ParticipantState::Ready);

    ep.wire.refuse(false);
    ep.participant.sender().send_message("m2", "text/plain", "kept").unwrap();
    let request = wait_for_request(&ep.wire, 2).await;
    assert_eq!(request.message_id.as_deref(), Some("m2"));
    assert!(ep
        .participant
        .response_received(MsrpResponse::new(request.transaction_id, 200)));
    ep.listener.wait_for("response:m2:200").await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_response_times_out() {
    let ep = active(config()).await;
    ep.participant.sender().send_message("m", "text/plain", "anyone?").unwrap();
    let request = wait_for_request(&ep.wire, 2).await;

    ep.listener.wait_for("response:m:408").await;
    ep.listener.wait_for("abort-sending:m").await;
    ep.participant.wait_for_state(ParticipantState::Ready, WAIT).await.unwrap();

    // A late answer finds nothing pending.
    assert!(!ep
        .participant
        .response_received(MsrpResponse::new(request.transaction_id, 200)));
}

#[tokio::test]
async fn test_bytes_sent_asks_for_more() {
    let ep = active(config()).await;
    ep.participant.sender().send_message("m", "text/plain", "hello").unwrap();
    let request = wait_for_request(&ep.wire, 2).await;
    ep.participant
        .wait_for_state(ParticipantState::Sending, WAIT)
        .await
        .unwrap();

    ep.participant.bytes_sent(5).unwrap();
    ep.listener.wait_for("ready:m").await;
    assert!(ep
        .participant
        .response_received(MsrpResponse::new(request.transaction_id, 200)));
    ep.listener.wait_for("response:m:200").await;
}

#[tokio::test]
async fn test_send_before_handshake_is_queued() {
    let listener = Recorder::new();
    let session = common::session(config(), &listener, "msrp://alice.example.com:2855/s;tcp");
    let participant = session.add_participant(ParticipantId::new("alice"), listener.clone());
    let wire = Wire::new();

    participant.sender().send_message("early", "text/plain", "first").unwrap();
    participant.bind(wire.clone()).unwrap();
    participant.perform_handshake().unwrap();

    let handshake = wait_for_request(&wire, 1).await;
    assert!(handshake.is_handshake());
    assert!(participant.response_received(MsrpResponse::new(handshake.transaction_id, 200)));

    let request = wait_for_request(&wire, 2).await;
    assert_eq!(request.message_id.as_deref(), Some("early"));
    assert_eq!(&request.body[..], b"first");
}

#[tokio::test]
async fn test_failed_handshake_closes() {
    let listener = Recorder::new();
    let session = common::session(config(), &listener, "msrp://alice.example.com:2855/s;tcp");
    let participant = session.add_participant(ParticipantId::new("alice"), listener.clone());
    let wire = Wire::new();

    participant.bind(wire.clone()).unwrap();
    participant.perform_handshake().unwrap();
    let handshake = wait_for_request(&wire, 1).await;
    assert!(participant.response_received(MsrpResponse::new(handshake.transaction_id, 481)));

    participant.handle().join().await.unwrap();
    assert_eq!(participant.state(), ParticipantState::Closed);
    assert!(*wire.closed.lock());
    assert_eq!(listener.count("connected"), 0);
    assert_eq!(listener.count("terminated"), 1);
    assert!(participant.close().is_err());
}

#[tokio::test]
async fn test_out_of_order_and_duplicate_chunks() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "6-10/10", Continuation::Complete, b"World"))
        .unwrap();
    ep.participant
        .request_received(chunk("m", "6-10/10", Continuation::Complete, b"World"))
        .unwrap();
    ep.participant
        .request_received(chunk("m", "1-5/10", Continuation::More, b"Hello"))
        .unwrap();

    ep.listener.wait_for("received:m:HelloWorld").await;
    assert_eq!(ep.listener.count("received:"), 1);
    // Handshake plus three chunks.
    let responses = ep.wire.sent_responses();
    assert_eq!(responses.len(), 4);
    assert!(responses.iter().all(|r| r.status == 200));
}

#[tokio::test]
async fn test_unknown_total_completes_on_last_chunk() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-3/*", Continuation::More, b"abc"))
        .unwrap();
    ep.participant
        .request_received(chunk("m", "4-6/*", Continuation::Complete, b"def"))
        .unwrap();
    ep.listener.wait_for("received:m:abcdef").await;
    assert_eq!(ep.listener.metas()[0].expected_size, None);
}

#[tokio::test]
async fn test_sender_abort_flag() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-3/9", Continuation::More, b"abc"))
        .unwrap();
    ep.participant
        .request_received(chunk("m", "4-4/9", Continuation::Aborted, b""))
        .unwrap();
    ep.listener.wait_for("aborted:m:3").await;
    assert_eq!(ep.listener.count("received:"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_message_times_out() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-5/10", Continuation::More, b"Hello"))
        .unwrap();
    ep.listener.wait_for("aborted:m:5").await;
    assert_eq!(ep.participant.state(), ParticipantState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_outdated_receive_timeout_is_ignored() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-5/10", Continuation::More, b"Hello"))
        .unwrap();
    ep.participant
        .request_received(chunk("m", "6-8/10", Continuation::More, b"Wor"))
        .unwrap();
    // The first chunk's timer already fired into the mailbox before the
    // second chunk re-armed it.
    assert!(ep
        .participant
        .handle()
        .send(ParticipantSignal::ReceiveTimeout("m".to_string(), 1)));
    ep.participant
        .request_received(chunk("m", "9-10/10", Continuation::Complete, b"ld"))
        .unwrap();

    ep.listener.wait_for("received:m:HelloWorld").await;
    assert_eq!(ep.listener.count("aborted:"), 0);
}

#[tokio::test]
async fn test_unbounded_range_is_refused() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-3/*", Continuation::More, b"abc"))
        .unwrap();
    ep.participant
        .request_received(chunk(
            "m",
            "1099511627776-1099511627778/*",
            Continuation::More,
            b"abc",
        ))
        .unwrap();

    ep.listener.wait_for("aborted:m:3").await;
    let statuses: Vec<u16> = ep.wire.sent_responses().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![200, 200, 413]);
    assert_eq!(ep.participant.state(), ParticipantState::Ready);

    // A later message on the same participant still goes through.
    ep.participant
        .request_received(chunk("n", "1-2/*", Continuation::Complete, b"ok"))
        .unwrap();
    ep.listener.wait_for("received:n:ok").await;
}

#[tokio::test]
async fn test_announced_size_over_limit_is_refused() {
    let ep = passive(MsrpConfig {
        max_message_size: 8,
        ..config()
    })
    .await;
    ep.participant
        .request_received(chunk("big", "1-4/1000", Continuation::More, b"abcd"))
        .unwrap();
    ep.listener.wait_for("aborted:big:0").await;
    assert_eq!(ep.wire.sent_responses().last().map(|r| r.status), Some(413));
}

#[tokio::test]
async fn test_close_aborts_partial_messages() {
    let ep = passive(config()).await;
    ep.participant
        .request_received(chunk("m", "1-5/10", Continuation::More, b"Hello"))
        .unwrap();
    ep.participant.close().unwrap();
    ep.participant.handle().join().await.unwrap();

    let events = ep.listener.events();
    let aborted = events.iter().position(|e| e == "aborted:m:5").unwrap();
    let closed = events.iter().position(|e| e == "closed:bob").unwrap();
    let terminated = events.iter().position(|e| e == "terminated").unwrap();
    assert!(aborted < closed && closed < terminated);
    assert!(*ep.wire.closed.lock());
}

#[tokio::test]
async fn test_cpim_metadata_from_first_chunk() {
    let ep = passive(config()).await;
    let body: &'static [u8] = b"From: Alice <im:alice@example.com>\r\n\
To: Bob <im:bob@example.com>\r\n\
\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hi Bob";
    let request = MsrpRequest::send(
        "cpim-1",
        "message/cpim",
        ByteRange::new(1, Some(body.len() as u64), Some(body.len() as u64)),
        Continuation::Complete,
        Bytes::from_static(body),
    );
    ep.participant.request_received(request).unwrap();
    ep.listener.wait_for(&format!("received:cpim-1:{}", String::from_utf8_lossy(body))).await;

    let meta = &ep.listener.metas()[0];
    assert_eq!(meta.content_type, "text/plain");
    assert_eq!(meta.originator.as_deref(), Some("Alice <im:alice@example.com>"));
    assert!(meta.destinations.contains("Bob <im:bob@example.com>"));
}

#[tokio::test]
async fn test_failure_report_no_suppresses_response() {
    let ep = passive(config()).await;
    let request = chunk("m", "1-2/2", Continuation::Complete, b"ok").with_header("Failure-Report", "no");
    ep.participant.request_received(request).unwrap();
    ep.listener.wait_for("received:m:ok").await;
    // Only the handshake was answered.
    assert_eq!(ep.wire.sent_responses().len(), 1);
}

#[tokio::test]
async fn test_report_reaches_listener_without_response() {
    let (alice, bob) = loopback(config()).await;
    bob.participant
        .send_report(MsrpRequest::report("m", ByteRange::new(1, Some(5), Some(5)), 200))
        .unwrap();
    alice.listener.wait_for("report:200").await;
    assert_eq!(bob.wire.reports.lock().len(), 1);
    assert!(alice.wire.sent_responses().is_empty());
}

#[tokio::test]
async fn test_sessions_share_nothing() {
    let (alice, bob) = loopback(config()).await;
    assert!(!Arc::ptr_eq(&alice.listener, &bob.listener));
    assert_eq!(alice.session.transactions().pending_count(), 0);
    assert_eq!(bob.session.config().max_chunk_size, 2048);
    assert!(!alice.session.new_message_id().is_empty());
}
