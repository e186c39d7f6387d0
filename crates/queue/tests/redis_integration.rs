//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apalis::prelude::*;
use serde_json::json;
use surplus_core::{Notice, Notifier};
use surplus_db::entities::notification::NotificationKind;
use surplus_queue::{NotifyJob, RedisNotifier};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn storage(namespace: &str) -> apalis_redis::RedisStorage<NotifyJob> {
    let conn = apalis_redis::connect(get_redis_url())
        .await
        .expect("Failed to connect to Redis");
    let config = apalis_redis::Config::default().set_namespace(namespace);
    apalis_redis::RedisStorage::new_with_config(conn, config)
}

/// Test that we can connect to Redis.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let conn = apalis_redis::connect(get_redis_url()).await;
    assert!(conn.is_ok(), "Failed to connect to Redis: {:?}", conn.err());
}

/// Test that the notifier queues a job.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_notifier_queues_job() {
    let mut storage = storage("surplus-test-notify").await;
    let before = storage.len().await.unwrap();

    let notifier = RedisNotifier::new(storage.clone());
    notifier
        .notify(Notice::new(
            "customer1",
            NotificationKind::ReservationCreated,
            json!({ "reservationId": "r1" }),
        ))
        .await
        .unwrap();

    assert_eq!(storage.len().await.unwrap(), before + 1);
}

/// Test that several notices queue independently.
#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_notifier_queues_many_jobs() {
    let mut storage = storage("surplus-test-notify-many").await;
    let before = storage.len().await.unwrap();

    let notifier = RedisNotifier::new(storage.clone());
    for kind in [
        NotificationKind::MissedPickup,
        NotificationKind::PenaltyIssued,
        NotificationKind::CooldownLifted,
    ] {
        notifier
            .notify(Notice::new("customer1", kind, json!({})))
            .await
            .unwrap();
    }

    assert_eq!(storage.len().await.unwrap(), before + 3);
}
