//! Route-level tests for the operator surface: guarded queue item
//! transitions, the campaign lifecycle, contact admission, and the
//! dispatch run/status endpoints.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use outreach_engine::models::{AccountStatus, CampaignStatus, Channel, QueueStatus};
use outreach_engine::provider::{ProviderClient, ProviderConfig};
use outreach_engine::routes::admin::{dispatch_status, run_dispatch};
use outreach_engine::routes::campaigns::{
    pause_campaign, resume_campaign, schedule_contacts, stop_campaign,
};
use outreach_engine::routes::queue::{cancel_item, requeue_item, skip_item};
use outreach_engine::scheduler::{PlannerConfig, SchedulerConfig, WindowConfig};
use outreach_engine::test_support::{TestDatabase, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Status};
use rocket::routes;
use serde_json::{Value, json};
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        window: WindowConfig::unrestricted(),
        max_batch_size: 10,
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        cooldown_days: 60,
        max_attempts: 3,
        retry_backoff_minutes: 15,
        reconcile_after_minutes: 10,
        pass_interval: Duration::from_secs(300),
        default_time_zone: chrono_tz::UTC,
        daily_limit_email: 40,
        daily_limit_linkedin_connect: 20,
        daily_limit_linkedin_dm: 40,
        daily_limit_linkedin_inmail: 40,
    }
}

fn test_planner() -> PlannerConfig {
    PlannerConfig {
        min_gap_minutes: 6,
        max_gap_minutes: 16,
    }
}

#[tokio::test]
async fn queue_admin_transitions_are_guarded() {
    let test_db = TestDatabase::new()
        .await
        .expect("failed to provision test database");
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let account_id = fixtures
        .insert_account("acct-ops", "UTC", AccountStatus::Active)
        .await
        .expect("insert account");
    let campaign_id = fixtures
        .insert_campaign("Ops", CampaignStatus::Active)
        .await
        .expect("insert campaign");
    let item_id = fixtures
        .insert_queue_item(
            campaign_id,
            account_id,
            Channel::Email,
            "lead@example.com",
            None,
            "Hi there",
            QueueStatus::Pending,
            Utc::now() + ChronoDuration::hours(1),
        )
        .await
        .expect("insert queue item");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(routes![skip_item, cancel_item, requeue_item])
        .async_client()
        .await;

    let response = client
        .post(format!("/api/v1/admin/queue/{item_id}/skip"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["status"], "skipped");

    // The item already left pending, so a second skip is a conflict.
    let response = client
        .post(format!("/api/v1/admin/queue/{item_id}/skip"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
    drop(response);

    let response = client
        .post(format!("/api/v1/admin/queue/{item_id}/requeue"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["status"], "pending");

    let response = client
        .post(format!("/api/v1/admin/queue/{item_id}/cancel"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["status"], "cancelled");

    let response = client
        .post(format!("/api/v1/admin/queue/{}/skip", Uuid::new_v4()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
    drop(response);

    let status: QueueStatus = sqlx::query_scalar("SELECT status FROM send_queue WHERE id = $1")
        .bind(item_id)
        .fetch_one(&pool)
        .await
        .expect("fetch item status");
    assert_eq!(status, QueueStatus::Cancelled);

    drop(client);
    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn campaign_lifecycle_routes_enforce_state() {
    let test_db = TestDatabase::new()
        .await
        .expect("failed to provision test database");
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let account_id = fixtures
        .insert_account("acct-lifecycle", "UTC", AccountStatus::Active)
        .await
        .expect("insert account");
    let campaign_id = fixtures
        .insert_campaign("Lifecycle", CampaignStatus::Active)
        .await
        .expect("insert campaign");
    for n in 0..2 {
        fixtures
            .insert_queue_item(
                campaign_id,
                account_id,
                Channel::Email,
                &format!("pending-{n}@example.com"),
                None,
                "Hi there",
                QueueStatus::Pending,
                Utc::now() + ChronoDuration::hours(1),
            )
            .await
            .expect("insert queue item");
    }
    let sent_item = fixtures
        .insert_queue_item(
            campaign_id,
            account_id,
            Channel::Email,
            "done@example.com",
            None,
            "Hi there",
            QueueStatus::Sent,
            Utc::now() - ChronoDuration::hours(1),
        )
        .await
        .expect("insert queue item");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .mount_api_routes(routes![pause_campaign, resume_campaign, stop_campaign])
        .async_client()
        .await;

    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/pause"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["status"], "paused");

    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/pause"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
    drop(response);

    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/resume"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    drop(response);

    // Stop is allowed from active or paused and cancels what is still
    // pending, leaving sent rows untouched.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/stop"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["status"], "stopped");
    let message = body["message"].as_str().expect("message is a string");
    assert!(
        message.contains("2 pending item(s) cancelled"),
        "unexpected message: {message}"
    );

    let cancelled: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM send_queue WHERE campaign_id = $1 AND status = 'cancelled'",
    )
    .bind(campaign_id)
    .fetch_one(&pool)
    .await
    .expect("count cancelled items");
    assert_eq!(cancelled, 2);

    let sent_status: QueueStatus =
        sqlx::query_scalar("SELECT status FROM send_queue WHERE id = $1")
            .bind(sent_item)
            .fetch_one(&pool)
            .await
            .expect("fetch sent item");
    assert_eq!(sent_status, QueueStatus::Sent);

    // A stopped campaign can be neither paused nor resumed.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/pause"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
    drop(response);
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/resume"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
    drop(response);

    let response = client
        .post(format!("/api/v1/admin/campaigns/{}/pause", Uuid::new_v4()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);
    drop(response);

    drop(client);
    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn schedule_route_inserts_spaced_pending_items() {
    let test_db = TestDatabase::new()
        .await
        .expect("failed to provision test database");
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let account_id = fixtures
        .insert_account("acct-admit", "UTC", AccountStatus::Active)
        .await
        .expect("insert account");
    let campaign_id = fixtures
        .insert_campaign("Admit", CampaignStatus::Active)
        .await
        .expect("insert campaign");
    let stopped_campaign = fixtures
        .insert_campaign("Done", CampaignStatus::Stopped)
        .await
        .expect("insert campaign");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .manage_scheduler_config(test_config(), test_planner())
        .mount_api_routes(routes![schedule_contacts])
        .async_client()
        .await;

    let start_at = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/schedule"))
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": account_id,
                "channel": "email",
                "startAt": start_at,
                "contacts": [
                    { "recipient": "one@example.com", "subject": "Hello", "body": "Hi there" },
                    { "recipient": "two@example.com", "subject": "Hello", "body": "Hi there" },
                    { "recipient": "three@example.com", "subject": "Hello", "body": "Hi there" }
                ]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(body["scheduled"], 3);
    assert_eq!(body["campaignId"], campaign_id.to_string());

    // Slots continue from the admission instant with a bounded random
    // gap between consecutive sends.
    let slots: Vec<(DateTime<Utc>,)> = sqlx::query_as(
        "SELECT scheduled_at FROM send_queue WHERE campaign_id = $1 ORDER BY scheduled_at ASC",
    )
    .bind(campaign_id)
    .fetch_all(&pool)
    .await
    .expect("fetch slots");
    assert_eq!(slots.len(), 3);

    let mut previous = start_at;
    for (slot,) in &slots {
        let gap = *slot - previous;
        assert!(
            gap >= ChronoDuration::minutes(6) && gap <= ChronoDuration::minutes(16),
            "slot gap {gap} outside the planner bounds"
        );
        previous = *slot;
    }

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM send_queue WHERE campaign_id = $1 AND status = 'pending'",
    )
    .bind(campaign_id)
    .fetch_one(&pool)
    .await
    .expect("count pending items");
    assert_eq!(pending, 3);

    // Admission into a stopped campaign is refused.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{stopped_campaign}/schedule"))
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": account_id,
                "channel": "email",
                "contacts": [{ "recipient": "late@example.com", "body": "Hi there" }]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Conflict);
    drop(response);

    // An empty contact list is a caller mistake.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/schedule"))
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": account_id,
                "channel": "email",
                "contacts": []
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    drop(response);

    // Connection invitations carry a hard note-length cap.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/schedule"))
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": account_id,
                "channel": "linkedin_connect",
                "contacts": [{ "recipient": "prov-lead-9", "body": "x".repeat(301) }]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    drop(response);

    // An account the engine does not know cannot be scheduled on.
    let response = client
        .post(format!("/api/v1/admin/campaigns/{campaign_id}/schedule"))
        .header(ContentType::JSON)
        .body(
            json!({
                "accountId": Uuid::new_v4(),
                "channel": "email",
                "contacts": [{ "recipient": "ghost@example.com", "body": "Hi there" }]
            })
            .to_string(),
        )
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    drop(response);

    drop(client);
    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn dispatch_run_and_status_routes_report_state() {
    let test_db = TestDatabase::new()
        .await
        .expect("failed to provision test database");
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tracking_id": "msg-9" })))
        .expect(1)
        .mount(&server)
        .await;

    let account_id = fixtures
        .insert_account("acct-status", "UTC", AccountStatus::Active)
        .await
        .expect("insert account");
    let campaign_id = fixtures
        .insert_campaign("Status", CampaignStatus::Active)
        .await
        .expect("insert campaign");
    fixtures
        .insert_queue_item(
            campaign_id,
            account_id,
            Channel::Email,
            "lead@example.com",
            Some("Hello"),
            "Hi there",
            QueueStatus::Pending,
            Utc::now() - ChronoDuration::minutes(5),
        )
        .await
        .expect("insert queue item");

    let provider = ProviderClient::new(ProviderConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        request_timeout: Duration::from_millis(500),
        history_page_size: 50,
    })
    .expect("build provider client");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone())
        .manage_scheduler_config(test_config(), test_planner())
        .manage_provider_client(provider)
        .mount_api_routes(routes![run_dispatch, dispatch_status])
        .async_client()
        .await;

    let response = client.post("/api/v1/admin/dispatch/run").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let summary: Value = response.into_json().await.expect("valid JSON payload");
    assert_eq!(summary["selected"], 1);
    assert_eq!(summary["sent"], 1);

    let response = client.get("/api/v1/admin/dispatch/status").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let status: Value = response.into_json().await.expect("valid JSON payload");

    let counts = status["queueCounts"].as_array().expect("queueCounts array");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0]["status"], "sent");
    assert_eq!(counts[0]["count"], 1);

    let accounts = status["accounts"].as_array().expect("accounts array");
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["providerAccountId"], "acct-status");
    assert_eq!(accounts[0]["windowOpen"], true);

    let channels = accounts[0]["channels"].as_array().expect("channels array");
    let email = channels
        .iter()
        .find(|entry| entry["channel"] == "email")
        .expect("email channel entry");
    assert_eq!(email["limit"], 40);
    assert_eq!(email["used"], 1);
    assert_eq!(email["remaining"], 39);

    drop(client);
    test_db.close().await.expect("failed to drop test database");
}
