//! Event bus delivery tests

use std::time::Duration;

use cloudeploy::bus::{BuildEvent, Channels, EventBus, MemoryEventBus};
use cloudeploy::orchestrator::collector::LogCollector;

use crate::common::drain;

#[tokio::test]
async fn test_late_subscriber_misses_earlier_events() {
    let bus = MemoryEventBus::default();
    let channel = Channels::build_logs("p1");

    bus.publish(&channel, &BuildEvent::new("Build started..."))
        .await
        .unwrap();
    let mut subscription = bus.subscribe(&channel).await.unwrap();
    bus.publish(&channel, &BuildEvent::new("Build Complete"))
        .await
        .unwrap();

    assert_eq!(drain(&mut subscription).await, vec!["Build Complete"]);
}

#[tokio::test]
async fn test_malformed_payload_is_skipped() {
    let bus = MemoryEventBus::default();
    let channel = Channels::build_logs("p1");
    let mut subscription = bus.subscribe(&channel).await.unwrap();

    bus.publish_raw(&channel, "not json");
    bus.publish_raw(&channel, r#"{"message":"wrong field"}"#);
    bus.publish(&channel, &BuildEvent::new("ok")).await.unwrap();

    assert_eq!(drain(&mut subscription).await, vec!["ok"]);
}

#[tokio::test]
async fn test_projects_do_not_see_each_other() {
    let bus = MemoryEventBus::default();
    let mut first = bus.subscribe(&Channels::build_logs("p1")).await.unwrap();
    let mut second = bus.subscribe(&Channels::build_logs("p2")).await.unwrap();

    bus.publish(&Channels::build_logs("p1"), &BuildEvent::new("from p1"))
        .await
        .unwrap();
    bus.publish(&Channels::build_logs("p2"), &BuildEvent::new("from p2"))
        .await
        .unwrap();

    assert_eq!(drain(&mut first).await, vec!["from p1"]);
    assert_eq!(drain(&mut second).await, vec!["from p2"]);
}

#[tokio::test]
async fn test_collector_keeps_events_arriving_during_grace() {
    let bus = std::sync::Arc::new(MemoryEventBus::default());
    let channel = Channels::build_logs("p1");
    let collector = LogCollector::start(
        bus.subscribe(&channel).await.unwrap(),
        Duration::from_millis(200),
    );

    bus.publish(&channel, &BuildEvent::new("before")).await.unwrap();

    let publisher = {
        let bus = bus.clone();
        let channel = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.publish(&channel, &BuildEvent::new("straggler"))
                .await
                .unwrap();
        })
    };

    let lines = collector.finish().await;
    publisher.await.unwrap();
    assert_eq!(lines, vec!["before", "straggler"]);
}

#[tokio::test]
async fn test_collector_ends_when_bus_closes() {
    let bus = MemoryEventBus::new(8);
    let channel = Channels::build_logs("p1");
    let collector = LogCollector::start(
        bus.subscribe(&channel).await.unwrap(),
        Duration::from_secs(60),
    );

    bus.publish(&channel, &BuildEvent::new("only")).await.unwrap();
    drop(bus);

    let lines = tokio::time::timeout(Duration::from_secs(5), collector.finish())
        .await
        .unwrap();
    assert_eq!(lines, vec!["only"]);
}

#[tokio::test]
async fn test_finished_collector_releases_subscription() {
    let bus = MemoryEventBus::default();
    let released = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = released.clone();
    let subscription = bus
        .subscribe(&Channels::build_logs("p1"))
        .await
        .unwrap()
        .on_release(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));

    let collector = LogCollector::start(subscription, Duration::from_millis(10));
    assert!(!released.load(std::sync::atomic::Ordering::SeqCst));

    collector.finish().await;
    assert!(released.load(std::sync::atomic::Ordering::SeqCst));
}
