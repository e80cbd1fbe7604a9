/// Integration tests for filtered, paginated queries against a real SQLite store
use chrono::NaiveDate;
use logkeeper::{
    config::DatabaseConfig,
    query::{LogFilter, Pagination},
    record::NewLogRecord,
    storage::{LogStore, SqliteLogStore},
    EngineSettings, Level, LogEngine,
};
use std::sync::Arc;

async fn seeded_engine() -> LogEngine {
    let cfg = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let store = Arc::new(SqliteLogStore::connect(&cfg).await.unwrap());

    let rows = [
        ("ERROR", "before range", "2023-12-31 23:59:59.999"),
        ("ERROR", "first day", "2024-01-01 00:00:00.000"),
        ("INFO", "info in range", "2024-01-10 08:00:00.000"),
        ("ERROR", "mid month", "2024-01-15 12:30:00.000"),
        ("WARN", "warn in range", "2024-01-20 09:00:00.000"),
        ("ERROR", "last day", "2024-01-31 23:59:59.000"),
        ("INFO", "info after range", "2024-02-01 00:00:00.000"),
        ("ERROR", "after range", "2024-02-01 00:00:00.000"),
    ];
    for (level, message, timestamp) in rows {
        store
            .insert_log(&NewLogRecord {
                level: level.to_string(),
                component: "reports".to_string(),
                context: "export".to_string(),
                message: Some(message.to_string()),
                timestamp: timestamp.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    LogEngine::new(EngineSettings::default(), store)
}

fn january_errors() -> LogFilter {
    LogFilter {
        level: Some(Level::Error),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 31),
    }
}

fn messages(rows: &[logkeeper::record::LogRecord]) -> Vec<&str> {
    rows.iter().filter_map(|r| r.message.as_deref()).collect()
}

#[tokio::test]
async fn test_level_and_date_range_select_matching_rows_newest_first() {
    let engine = seeded_engine().await;

    let page = engine
        .query(&january_errors(), &Pagination::default())
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert!(page.rows.iter().all(|r| r.level == "ERROR"));
    assert_eq!(messages(&page.rows), vec!["last day", "mid month", "first day"]);
}

#[tokio::test]
async fn test_total_counts_all_matches_beyond_limit() {
    let engine = seeded_engine().await;
    let page = Pagination {
        limit: Some(2),
        ..Default::default()
    };

    let first = engine.query(&january_errors(), &page).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(messages(&first.rows), vec!["last day", "mid month"]);

    let rest = Pagination {
        offset: Some(2),
        ..page
    };
    let second = engine.query(&january_errors(), &rest).await.unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(messages(&second.rows), vec!["first day"]);
}

#[tokio::test]
async fn test_date_range_without_level_keeps_every_level() {
    let engine = seeded_engine().await;
    let filter = LogFilter {
        level: None,
        ..january_errors()
    };

    let page = engine.query(&filter, &Pagination::default()).await.unwrap();
    assert_eq!(page.total, 5);
    assert!(page.rows.iter().any(|r| r.level == "INFO"));
    assert!(page.rows.iter().any(|r| r.level == "WARN"));
}
