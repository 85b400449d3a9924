mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use common::{next_batch, serve, serve_body, serve_status, target};
use logpoll::sink::ChannelSink;
use logpoll::{CollectorConfig, PollError, Scheduler, SchedulerState};

const WAIT: Duration = Duration::from_secs(3);

fn config(interval: Duration, targets: Vec<logpoll::TargetSpec>) -> CollectorConfig {
    CollectorConfig {
        collection_interval: interval,
        targets,
    }
}

#[tokio::test]
async fn polls_immediately_then_on_interval() {
    let url = serve_body("text/plain", "tick").await;
    let (sink, mut rx) = ChannelSink::new(64);
    let scheduler = Scheduler::from_config(
        config(Duration::from_millis(50), vec![target(&url, &[])]),
        Arc::new(sink),
    )
    .unwrap();

    let started = Instant::now();
    scheduler.start().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);

    let first = next_batch(&mut rx, WAIT).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(first.entries[0].body.as_str(), Some("tick"));

    next_batch(&mut rx, WAIT).await;
    next_batch(&mut rx, WAIT).await;

    scheduler.shutdown().await;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn first_poll_does_not_wait_for_the_interval() {
    let url = serve_body("text/plain", "now").await;
    let (sink, mut rx) = ChannelSink::new(4);
    let scheduler = Scheduler::from_config(
        config(Duration::from_secs(3600), vec![target(&url, &[])]),
        Arc::new(sink),
    )
    .unwrap();

    scheduler.start().unwrap();
    next_batch(&mut rx, WAIT).await;
    scheduler.shutdown().await;
}

#[tokio::test]
async fn failing_target_does_not_stop_the_others() {
    let broken = serve_status(StatusCode::INTERNAL_SERVER_ERROR).await;
    let bad_json = serve_body("application/json", "{").await;
    let healthy = serve_body("application/json", r#"{"status":"ok"}"#).await;

    let (sink, mut rx) = ChannelSink::new(64);
    let scheduler = Scheduler::from_config(
        config(
            Duration::from_millis(50),
            vec![
                target(&broken, &[]),
                target(&bad_json, &[]),
                target(&healthy, &[("status", "status")]),
            ],
        ),
        Arc::new(sink),
    )
    .unwrap();

    scheduler.start().unwrap();
    for _ in 0..3 {
        let batch = next_batch(&mut rx, WAIT).await;
        assert_eq!(batch.resource_attr("endpoint"), Some(healthy.as_str()));
        assert_eq!(batch.entries[0].attributes["status"], "ok");
    }
    scheduler.shutdown().await;
}

#[tokio::test]
async fn poll_all_reports_each_target() {
    let broken = serve_status(StatusCode::SERVICE_UNAVAILABLE).await;
    let healthy = serve_body("text/plain", "a\nb").await;

    let (sink, mut rx) = ChannelSink::new(4);
    let scheduler = Scheduler::from_config(
        config(
            Duration::from_secs(30),
            vec![target(&broken, &[]), target(&healthy, &[])],
        ),
        Arc::new(sink),
    )
    .unwrap();

    let outcomes = scheduler.poll_all().await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].endpoint, broken);
    assert!(matches!(
        outcomes[0].result,
        Err(PollError::Status { code: 503, .. })
    ));
    assert_eq!(outcomes[1].endpoint, healthy);
    assert_eq!(outcomes[1].result.as_ref().unwrap(), &2);

    assert_eq!(next_batch(&mut rx, WAIT).await.len(), 2);
    assert!(rx.try_recv().is_err());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn rounds_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));

    let router = {
        let (in_flight, max_in_flight, requests) =
            (in_flight.clone(), max_in_flight.clone(), requests.clone());
        Router::new().route(
            "/slow",
            get(move || {
                let (in_flight, max_in_flight, requests) =
                    (in_flight.clone(), max_in_flight.clone(), requests.clone());
                async move {
                    requests.fetch_add(1, Ordering::SeqCst);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "text/plain")], "slow")
                }
            }),
        )
    };
    let url = format!("{}/slow", serve(router).await);

    let (sink, mut rx) = ChannelSink::new(64);
    let scheduler = Scheduler::from_config(
        config(Duration::from_millis(20), vec![target(&url, &[])]),
        Arc::new(sink),
    )
    .unwrap();

    scheduler.start().unwrap();
    for _ in 0..3 {
        next_batch(&mut rx, WAIT).await;
    }
    scheduler.shutdown().await;

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert!(requests.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_polls() {
    let router = Router::new().route(
        "/hang",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(20)).await;
            "too late"
        }),
    );
    let url = format!("{}/hang", serve(router).await);

    let (sink, mut rx) = ChannelSink::new(4);
    let scheduler = Scheduler::from_config(
        config(Duration::from_secs(30), vec![target(&url, &[])]),
        Arc::new(sink),
    )
    .unwrap();

    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown())
        .await
        .expect("shutdown should not wait for the hung request");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn nothing_is_delivered_after_shutdown() {
    let url = serve_body("text/plain", "line").await;
    let (sink, mut rx) = ChannelSink::new(64);
    let scheduler = Scheduler::from_config(
        config(Duration::from_millis(20), vec![target(&url, &[])]),
        Arc::new(sink),
    )
    .unwrap();

    scheduler.start().unwrap();
    next_batch(&mut rx, WAIT).await;
    scheduler.shutdown().await;

    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_shutdowns_both_return() {
    let url = serve_body("text/plain", "line").await;
    let (sink, _rx) = ChannelSink::new(64);
    let scheduler = Arc::new(
        Scheduler::from_config(
            config(Duration::from_millis(20), vec![target(&url, &[])]),
            Arc::new(sink),
        )
        .unwrap(),
    );

    scheduler.start().unwrap();
    let other = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.shutdown().await })
    };
    tokio::time::timeout(Duration::from_secs(2), scheduler.shutdown())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), other)
        .await
        .unwrap()
        .unwrap();
}
