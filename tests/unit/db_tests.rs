use agent_dispatch::persistence::db;

#[tokio::test]
async fn connect_creates_parent_dirs_and_schema() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir
        .path()
        .join("nested")
        .join("dispatch.db")
        .to_string_lossy()
        .to_string();

    let pool = db::connect(&path).await.expect("file-backed connect");

    for table in ["agent_sessions", "jobs", "assignments", "processed_messages"] {
        let query = format!("SELECT COUNT(*) AS cnt FROM {table}");
        let row: (i64,) = sqlx::query_as(&query)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("table '{table}' should be queryable: {e}"));
        assert_eq!(row.0, 0, "table '{table}' should start empty");
    }
}

#[tokio::test]
async fn bootstrap_is_idempotent_across_connects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dispatch.db").to_string_lossy().to_string();

    let first = db::connect(&path).await.expect("first connect");
    sqlx::query(
        "INSERT INTO jobs (id, type, organization_id, integration_id, channel_id, user_id,
         slack_thread_ts, created_at, updated_at)
         VALUES ('j-1', 'slack', 'org-1', 'intg-1', 'C1', 'U1', '111.222',
         '2026-08-01T00:00:00+00:00', '2026-08-01T00:00:00+00:00')",
    )
    .execute(&first)
    .await
    .expect("insert");
    drop(first);

    // Re-running the DDL on startup must not disturb existing rows.
    let second = db::connect(&path).await.expect("second connect");
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
        .fetch_one(&second)
        .await
        .expect("count");
    assert_eq!(row.0, 1);
}

#[tokio::test]
async fn connect_memory_starts_fresh_every_time() {
    let a = db::connect_memory().await.expect("first");
    sqlx::query(
        "INSERT INTO agent_sessions (id, organization_id, transport_session_id,
         agent_instance_id, last_active_at, created_at, updated_at)
         VALUES ('a-1', 'org-1', 's-1', 'inst-1',
         '2026-08-01T00:00:00+00:00', '2026-08-01T00:00:00+00:00', '2026-08-01T00:00:00+00:00')",
    )
    .execute(&a)
    .await
    .expect("insert");

    let b = db::connect_memory().await.expect("second");
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_sessions")
        .fetch_one(&b)
        .await
        .expect("count");
    assert_eq!(row.0, 0, "databases are isolated");
}
