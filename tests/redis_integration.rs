//! Integration tests against a live Redis server with the qless script
//! library.
//!
//! Run with:
//! QLESS_REDIS_URL=redis://localhost:6379/15 QLESS_SCRIPT_PATH=qless-core/qless.lua \
//!     cargo test --test redis_integration -- --ignored

use qless_client::client::PutOptions;
use qless_client::{Client, ClientConfig, JobState, Lookup, QlessError};
use serde_json::json;

async fn create_test_client() -> Client {
    let config = ClientConfig::from_env()
        .expect("QLESS_* environment variables must be valid")
        .with_worker_name("integration-worker");
    assert!(
        config.redis_url.is_some(),
        "QLESS_REDIS_URL environment variable must be set for integration tests"
    );
    Client::connect(config).await.expect("Should connect to Redis")
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_put_pop_complete() {
    let client = create_test_client().await;
    let queue = client.queue(unique("queue"));

    let jid = queue
        .put("Mailer", &json!({"to": "a@example.com"}), PutOptions::new())
        .await
        .expect("Should put job");

    let mut jobs = queue.pop(1).await.expect("Should pop");
    assert_eq!(jobs.len(), 1, "Should lease the job just put");
    let mut job = jobs.remove(0);
    assert_eq!(job.jid, jid);
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.data, json!({"to": "a@example.com"}));

    let expires = job.heartbeat().await.expect("Should heartbeat");
    assert!(expires > 0);

    let state = job.complete().await.expect("Should complete");
    assert_eq!(state, JobState::Completed);

    let fetched = client.get_job(&jid).await.expect("Should fetch job");
    assert_eq!(fetched.state, JobState::Completed);
}

#[tokio::test]
#[ignore]
async fn test_cancelled_job_cannot_heartbeat() {
    let client = create_test_client().await;
    let queue = client.queue(unique("queue"));

    queue
        .put("Mailer", &json!({}), PutOptions::new())
        .await
        .expect("Should put job");
    let mut job = queue.pop(1).await.expect("Should pop").remove(0);

    job.cancel().await.expect("Should cancel");
    let err = job.heartbeat().await.expect_err("Heartbeat must fail");
    assert!(
        err.is_lease_lost() || err.is_not_found(),
        "Unexpected error: {:?}",
        err
    );
}

#[tokio::test]
#[ignore]
async fn test_recurring_job_lookup_and_update() {
    let client = create_test_client().await;
    let queue = client.queue(unique("queue"));

    let jid = queue
        .recur("Report", &json!({"kind": "daily"}), 3600, Default::default())
        .await
        .expect("Should register recurring job");

    let mut recurring = match client.get(&jid).await.expect("Should resolve jid") {
        Lookup::Recurring(job) => job,
        other => panic!("Expected recurring job, got {:?}", other),
    };
    assert_eq!(recurring.interval, 3600);

    recurring
        .update([("priority", json!(7))])
        .await
        .expect("Should update");
    let refreshed = client
        .get_recurring_job(&jid)
        .await
        .expect("Should refetch");
    assert_eq!(refreshed.priority, 7);

    recurring.cancel().await.expect("Should cancel");
    let err = client.get(&jid).await.expect_err("Cancelled template is gone");
    assert!(err.is_not_found(), "Unexpected error: {:?}", err);
}

#[tokio::test]
#[ignore]
async fn test_config_round_trip() {
    let client = create_test_client().await;

    client
        .set_config("integration-option", "42")
        .await
        .expect("Should set config");
    let value = client
        .get_config("integration-option")
        .await
        .expect("Should read config");
    assert_eq!(value, "42");

    client
        .unset_config("integration-option")
        .await
        .expect("Should unset config");
    let missing = client.get_config("integration-option").await;
    assert!(matches!(
        missing,
        Err(QlessError::UnsupportedConfigType { .. }) | Ok(_)
    ));
}

#[tokio::test]
#[ignore]
async fn test_tracking_and_tags() {
    let client = create_test_client().await;
    let queue = client.queue(unique("queue"));
    let tag = unique("tag");

    let jid = queue
        .put(
            "Mailer",
            &json!({}),
            PutOptions::new().with_tags([tag.clone()]),
        )
        .await
        .expect("Should put job");

    let tagged = client.tagged(&tag, 0, 10).await.expect("Should query tag");
    assert_eq!(tagged.total, 1);
    assert_eq!(tagged.jobs, vec![jid.clone()]);

    assert!(client.track(&jid).await.expect("Should track"));
    let tracked = client.tracked().await.expect("Should list tracked");
    assert!(tracked.jobs.iter().any(|job| job.jid == jid));
    assert!(client.untrack(&jid).await.expect("Should untrack"));
}
