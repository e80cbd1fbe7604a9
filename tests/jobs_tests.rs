/// Integration tests for the monitor and purge jobs against a real SQLite store
use chrono::Duration;
use logkeeper::{
    alerts::{AlertDispatcher, AlertOutcome},
    config::DatabaseConfig,
    email::HttpEmailSender,
    engine::{format_timestamp, EngineSettings, LogEngine},
    purge::PurgeJob,
    record::{NewConnectionProtectionLog, NewLogRecord},
    storage::{LogStore, SqliteLogStore},
};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn memory_store(protection_table: &str) -> Arc<SqliteLogStore> {
    let cfg = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        protection_table_name: protection_table.to_string(),
        ..Default::default()
    };
    Arc::new(SqliteLogStore::connect(&cfg).await.unwrap())
}

fn settings() -> EngineSettings {
    EngineSettings {
        component: "billing".to_string(),
        environment: "staging".to_string(),
        health_check_recipients: vec!["ops@example.com".to_string()],
        ..Default::default()
    }
}

fn record(level: &str, message: &str, timestamp: String) -> NewLogRecord {
    NewLogRecord {
        level: level.to_string(),
        component: "billing".to_string(),
        context: "charge".to_string(),
        message: Some(message.to_string()),
        timestamp,
        ..Default::default()
    }
}

fn protection_log() -> NewConnectionProtectionLog {
    NewConnectionProtectionLog {
        sso_id: "sso-1".to_string(),
        booking_id: "booking-9".to_string(),
        request_method: "POST".to_string(),
        request_url: "/bookings/9/connect".to_string(),
        request_body: "{}".to_string(),
        response_code: Some(200),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_monitor_emails_recent_errors_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(body_partial_json(serde_json::json!({
            "to": ["ops@example.com"],
            "subject": "billing health check - staging"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = memory_store("connection_protection_logs").await;
    let sender = HttpEmailSender::new(
        reqwest::Client::new(),
        format!("{}/send", server.uri()),
        "alerts@example.com",
    );
    let engine = Arc::new(
        LogEngine::new(settings(), store.clone()).with_email_sender(Arc::new(sender)),
    );

    let now = engine.now();
    store
        .insert_log(&record("ERROR", "card declined", format_timestamp(&(now - Duration::minutes(2)))))
        .await
        .unwrap();
    store
        .insert_log(&record("ERROR", "ancient failure", format_timestamp(&(now - Duration::hours(3)))))
        .await
        .unwrap();
    store
        .insert_log(&record("INFO", "charge ok", format_timestamp(&(now - Duration::minutes(2)))))
        .await
        .unwrap();

    let outcome = AlertDispatcher::new(engine).run().await;
    assert_eq!(outcome, AlertOutcome::Sent(1));
}

#[tokio::test]
async fn test_monitor_is_quiet_without_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = memory_store("connection_protection_logs").await;
    let sender = HttpEmailSender::new(reqwest::Client::new(), server.uri(), "alerts@example.com");
    let engine = Arc::new(
        LogEngine::new(settings(), store.clone()).with_email_sender(Arc::new(sender)),
    );

    let outcome = AlertDispatcher::new(engine).run().await;
    assert_eq!(outcome, AlertOutcome::Quiet);
}

#[tokio::test]
async fn test_monitor_reports_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = memory_store("connection_protection_logs").await;
    let sender = HttpEmailSender::new(reqwest::Client::new(), server.uri(), "alerts@example.com");
    let engine = Arc::new(
        LogEngine::new(settings(), store.clone()).with_email_sender(Arc::new(sender)),
    );

    let now = engine.now();
    store
        .insert_log(&record("ERROR", "card declined", format_timestamp(&(now - Duration::minutes(1)))))
        .await
        .unwrap();

    let outcome = AlertDispatcher::new(engine.clone()).run().await;
    assert_eq!(outcome, AlertOutcome::Failed);

    // The failed send is itself recorded
    let from = format_timestamp(&(now - Duration::minutes(5)));
    let to = format_timestamp(&(engine.now() + Duration::minutes(5)));
    let errors = store.recent_errors(&from, &to).await.unwrap();
    assert!(errors.iter().any(|r| r.context == "logkeeper sendEmail"));
}

#[tokio::test]
async fn test_purge_deletes_only_expired_rows() {
    let store = memory_store("connection_protection_logs").await;
    let engine = Arc::new(LogEngine::new(settings(), store.clone()));
    let now = engine.now();

    store
        .insert_log(&record("INFO", "old", format_timestamp(&(now - Duration::days(10)))))
        .await
        .unwrap();
    store
        .insert_log(&record("INFO", "fresh", format_timestamp(&(now - Duration::days(1)))))
        .await
        .unwrap();
    store
        .insert_protection_log(&protection_log(), &format_timestamp(&(now - Duration::days(45))))
        .await
        .unwrap();
    store
        .insert_protection_log(&protection_log(), &format_timestamp(&(now - Duration::days(10))))
        .await
        .unwrap();

    let job = PurgeJob::new(engine);
    let report = job.run().await;
    assert_eq!(report.logs_deleted, Some(1));
    assert_eq!(report.protection_deleted, Some(1));

    // Running again right away deletes nothing more
    let report = job.run().await;
    assert_eq!(report.logs_deleted, Some(0));
    assert_eq!(report.protection_deleted, Some(0));
}

#[tokio::test]
async fn test_purge_survives_missing_protection_table() {
    let store = memory_store("booking_audit").await;
    sqlx::query("DROP TABLE booking_audit")
        .execute(store.pool())
        .await
        .unwrap();

    let engine = Arc::new(LogEngine::new(settings(), store.clone()));
    let now = engine.now();
    store
        .insert_log(&record("INFO", "old", format_timestamp(&(now - Duration::days(30)))))
        .await
        .unwrap();

    let report = PurgeJob::new(engine).run().await;
    assert_eq!(report.logs_deleted, Some(1));
    assert_eq!(report.protection_deleted, None);
}
