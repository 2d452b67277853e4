mod common;

use std::time::Duration;

use common::{ok, Harness, Recorder, WAIT};
use sigstack_sip_client::{
    Credentials, Method, RegisterConfig, RegisterController, RegisterSignal, RegisterState, SipResponse,
};

fn config() -> RegisterConfig {
    RegisterConfig::new("sip:example.com")
}

#[tokio::test]
async fn test_register_answers_digest_challenge() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let cfg = config().with_credentials(Credentials::new("alice", "secret"));
    let controller = RegisterController::start(cfg, h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let first = h.next_request().await;
    assert_eq!(first.method, Method::Register);
    assert_eq!(first.expires, Some(3600));
    assert!(first.authorization.is_none());
    h.respond(
        &first,
        SipResponse::new(401, "Unauthorized")
            .with_header("WWW-Authenticate", r#"Digest realm="example.com", nonce="abc123", qop="auth""#),
    );

    let second = h.next_request().await;
    let auth = second.authorization.clone().expect("challenge not answered");
    assert!(auth.starts_with(r#"Digest username="alice", realm="example.com", nonce="abc123""#));
    assert!(auth.contains("nc=00000001"));
    assert_ne!(second.transaction_id, first.transaction_id);
    h.respond(&second, ok(600));

    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:600"]);
}

#[tokio::test]
async fn test_challenge_without_credentials_fails() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let req = h.next_request().await;
    h.respond(
        &req,
        SipResponse::new(401, "Unauthorized").with_header("WWW-Authenticate", r#"Digest realm="x", nonce="n""#),
    );

    controller.wait_for_state(RegisterState::Terminated, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["failed:authentication failed"]);
}

#[tokio::test]
async fn test_conditional_request_failed_is_retried() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let first = h.next_request().await;
    h.respond(&first, SipResponse::new(412, "Conditional Request Failed"));

    let second = h.next_request().await;
    assert_eq!(second.method, Method::Register);
    h.respond(&second, ok(3600));

    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:3600"]);
}

#[tokio::test]
async fn test_accepted_is_treated_as_success() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let req = h.next_request().await;
    h.respond(&req, SipResponse::new(202, "Accepted"));

    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:3600"]);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_back_off_then_give_up() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let cfg = RegisterConfig {
        max_retries: 2,
        request_timeout_ms: 1_000,
        ..config()
    };
    let controller = RegisterController::start(cfg, h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    // Initial attempt plus two retries, none answered.
    for _ in 0..3 {
        let req = h.next_request().await;
        assert_eq!(req.method, Method::Register);
    }

    controller
        .wait_for_state(RegisterState::Terminated, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(listener.events(), vec!["failed:timed out"]);
    assert!(h.no_request());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_before_expiry() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let req = h.next_request().await;
    h.respond(&req, ok(120));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    // Half of the granted 120 s.
    let refresh = h.next_request_within(Duration::from_secs(90)).await;
    assert_eq!(refresh.expires, Some(3600));
    h.respond(&refresh, ok(120));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:120", "registered:120"]);
}

#[tokio::test]
async fn test_unregister_sends_zero_expires() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    let req = h.next_request().await;
    h.respond(&req, ok(3600));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    controller.unregister().unwrap();
    let bye = h.next_request().await;
    assert_eq!(bye.expires, Some(0));
    h.respond(&bye, ok(0));

    controller.wait_for_state(RegisterState::Terminated, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:3600", "unregistered"]);
    controller.handle().join().await.unwrap();
    assert!(controller.register().is_err());
}

#[tokio::test]
async fn test_refresh_from_replaced_timer_is_dropped() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();
    let first = h.next_request().await;
    h.respond(&first, ok(120));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    // The first refresh timer fires while an explicit re-REGISTER is in
    // flight, so its signal is parked and replayed once back in Ok.
    controller.register().unwrap();
    let second = h.next_request().await;
    assert!(controller.handle().send(RegisterSignal::Refresh(1)));
    h.respond(&second, ok(120));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.no_request());
    assert_eq!(controller.state(), RegisterState::Ok);
    assert_eq!(listener.events(), vec!["registered:120", "registered:120"]);
}

#[tokio::test]
async fn test_rejected_unregister_is_a_failure() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();
    let req = h.next_request().await;
    h.respond(&req, ok(3600));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    controller.unregister().unwrap();
    let bye = h.next_request().await;
    assert_eq!(bye.expires, Some(0));
    h.respond(&bye, SipResponse::new(403, "Forbidden"));

    controller.wait_for_state(RegisterState::Terminated, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["registered:3600", "failed:rejected with 403"]);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_unregister_times_out() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let cfg = RegisterConfig {
        request_timeout_ms: 1_000,
        ..config()
    };
    let controller = RegisterController::start(cfg, h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();
    let req = h.next_request().await;
    h.respond(&req, ok(3600));
    controller.wait_for_state(RegisterState::Ok, WAIT).await.unwrap();

    controller.unregister().unwrap();
    let bye = h.next_request().await;
    assert_eq!(bye.expires, Some(0));

    controller
        .wait_for_state(RegisterState::Terminated, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(listener.events(), vec!["registered:3600", "failed:timed out"]);
}

#[tokio::test]
async fn test_transport_failure_terminates() {
    let mut h = Harness::new();
    h.transport.refuse(true);
    let listener = Recorder::new();
    let controller = RegisterController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.register().unwrap();

    controller.wait_for_state(RegisterState::Terminated, WAIT).await.unwrap();
    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("failed:transport error"));
    assert_eq!(h.ctx.transactions.pending_count(), 0);
    assert!(h.no_request());
}

#[tokio::test]
async fn test_missing_registrar_is_rejected() {
    let h = Harness::new();
    let result = RegisterController::start(RegisterConfig::default(), h.ctx.clone(), Recorder::new());
    assert!(result.is_err());
}
