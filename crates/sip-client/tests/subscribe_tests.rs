mod common;

use std::time::Duration;

use common::{ok, Harness, Recorder, WAIT};
use sigstack_sip_client::{
    Method, NotifyRequest, SipResponse, SubscribeConfig, SubscribeController, SubscribeSignal, SubscribeState,
    SubscriptionState,
};

const PIDF: &str = "application/pidf+xml";

fn config() -> SubscribeConfig {
    SubscribeConfig::new("sip:bob@example.com", "presence")
}

fn notify(state: &str) -> NotifyRequest {
    NotifyRequest::new(SubscriptionState::parse(state))
}

/// Subscribe and bring the controller to `Active` with a 600 s lifetime.
async fn active(h: &mut Harness, controller: &SubscribeController) {
    controller.subscribe().unwrap();
    let req = h.next_request().await;
    h.respond(&req, ok(600));
    controller.notify_received(notify("active;expires=600")).unwrap();
    controller.wait_for_state(SubscribeState::Active, WAIT).await.unwrap();
}

#[tokio::test]
async fn test_subscribe_then_notify_activates() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();

    let req = h.next_request().await;
    assert_eq!(req.method, Method::Subscribe);
    assert_eq!(req.event.as_deref(), Some("presence"));
    assert_eq!(req.expires, Some(3600));
    h.respond(&req, ok(600));

    controller
        .notify_received(notify("active;expires=600").with_body(PIDF, "<open/>"))
        .unwrap();
    controller.wait_for_state(SubscribeState::Active, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec![format!("notify:{}:<open/>", PIDF), "active:600".to_string()]);
}

#[tokio::test]
async fn test_notify_may_overtake_response() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();
    let _req = h.next_request().await;

    controller.notify_received(notify("active;expires=3600")).unwrap();
    controller.wait_for_state(SubscribeState::Active, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["active:3600"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_notify_times_out() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();

    let req = h.next_request().await;
    h.respond(&req, ok(600));

    controller
        .wait_for_state(SubscribeState::Terminated, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(listener.events(), vec!["terminated:timeout"]);
}

#[tokio::test]
async fn test_timers_replaced_by_a_notify_are_ignored() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    active(&mut h, &controller).await;

    // Timers 2 (refresh) and 3 (NOTIFY wait) were armed on activation and
    // are replaced by the next NOTIFY; their signals were already queued.
    controller.notify_received(notify("active;expires=600")).unwrap();
    assert!(controller.handle().send(SubscribeSignal::NotifyTimeout(3)));
    assert!(controller.handle().send(SubscribeSignal::Refresh(Some(2))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.state(), SubscribeState::Active);
    assert!(h.no_request());
    assert_eq!(listener.events(), vec!["active:600"]);

    // An application refresh still goes out.
    controller.refresh().unwrap();
    let refresh = h.next_request().await;
    assert_eq!(refresh.method, Method::Subscribe);
}

#[tokio::test]
async fn test_pending_then_active_then_probation() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();
    let req = h.next_request().await;
    h.respond(&req, ok(3600));

    controller.notify_received(notify("pending")).unwrap();
    controller.wait_for_state(SubscribeState::Pending, WAIT).await.unwrap();
    controller.notify_received(notify("active")).unwrap();
    controller.wait_for_state(SubscribeState::Active, WAIT).await.unwrap();
    controller
        .notify_received(notify("terminated;reason=probation;retry-after=30"))
        .unwrap();
    controller.wait_for_state(SubscribeState::Terminated, WAIT).await.unwrap();

    assert_eq!(listener.events(), vec!["pending", "active:3600", "terminated:probation"]);
}

#[tokio::test]
async fn test_unsubscribe_waits_for_final_notify() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    active(&mut h, &controller).await;

    controller.unsubscribe().unwrap();
    let req = h.next_request().await;
    assert_eq!(req.expires, Some(0));
    h.respond(&req, ok(0));

    controller
        .notify_received(notify("active;expires=0").with_body(PIDF, "<last/>"))
        .unwrap();
    controller
        .notify_received(notify("terminated;reason=timeout"))
        .unwrap();
    controller.wait_for_state(SubscribeState::Terminated, WAIT).await.unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "active:600".to_string(),
            format!("notify:{}:<last/>", PIDF),
            "terminated:timeout".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_unsubscribe_during_subscribe_is_deferred() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();
    let req = h.next_request().await;

    controller.unsubscribe().unwrap();
    h.respond(&req, ok(600));
    controller.notify_received(notify("active")).unwrap();

    let bye = h.next_request().await;
    assert_eq!(bye.expires, Some(0));
    controller.wait_for_state(SubscribeState::Unsubscribing, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["active:600"]);
}

#[tokio::test]
async fn test_fetch_ends_after_one_notify() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.fetch().unwrap();

    let req = h.next_request().await;
    assert_eq!(req.expires, Some(0));
    h.respond(&req, ok(0));
    controller
        .notify_received(notify("terminated;reason=timeout").with_body(PIDF, "<now/>"))
        .unwrap();

    controller.wait_for_state(SubscribeState::Terminated, WAIT).await.unwrap();
    assert_eq!(
        listener.events(),
        vec![format!("notify:{}:<now/>", PIDF), "terminated:timeout".to_string()]
    );
}

#[tokio::test]
async fn test_refresh_retries_interval_too_brief() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    active(&mut h, &controller).await;

    controller.refresh().unwrap();
    let first = h.next_request().await;
    assert_eq!(first.expires, Some(3600));
    h.respond(
        &first,
        SipResponse::new(423, "Interval Too Brief").with_header("Min-Expires", "7200"),
    );

    let second = h.next_request().await;
    assert_eq!(second.expires, Some(7200));
    h.respond(&second, ok(7200));

    controller.wait_for_state(SubscribeState::Active, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["active:600", "active:7200"]);
}

#[tokio::test]
async fn test_rejected_subscribe_is_an_error() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    controller.subscribe().unwrap();

    let req = h.next_request().await;
    h.respond(&req, SipResponse::new(489, "Bad Event"));

    controller.wait_for_state(SubscribeState::Terminated, WAIT).await.unwrap();
    assert_eq!(listener.events(), vec!["terminated:error"]);
}

#[tokio::test]
async fn test_kill_ends_without_request() {
    let mut h = Harness::new();
    let listener = Recorder::new();
    let controller = SubscribeController::start(config(), h.ctx.clone(), listener.clone()).unwrap();
    active(&mut h, &controller).await;

    controller.kill().unwrap();
    controller.wait_for_state(SubscribeState::Terminated, WAIT).await.unwrap();
    assert!(h.no_request());
    assert_eq!(listener.events(), vec!["active:600", "terminated:timeout"]);
}
