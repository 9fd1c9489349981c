//! Database initialization tests
//!
//! - Database file and parent directories created on first run
//! - Re-opening an existing database is idempotent
//! - Schema constraints reject invalid rows
//! - Connection pragmas hold on every pooled connection

use cuentakm_common::db::init::init_database;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("cuentakm.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cuentakm.db");

    let pool1 = init_database(&db_path).await.expect("first open");
    sqlx::query("INSERT INTO agents (name) VALUES ('Ana')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.expect("second open");
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1, "existing rows must survive re-initialization");
}

#[tokio::test]
async fn test_schema_rejects_invalid_readings() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("cuentakm.db")).await.unwrap();

    sqlx::query("INSERT INTO agents (name) VALUES ('Ana')")
        .execute(&pool)
        .await
        .unwrap();

    let bad_kind = sqlx::query(
        "INSERT INTO readings (agent_id, kind, week, year, created_at) VALUES (1, 'lunes', 10, 2026, '2026-03-02T12:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(bad_kind.is_err(), "unknown kind must be rejected");

    let too_large = sqlx::query(
        "INSERT INTO readings (agent_id, kind, week, year, odometer_km, created_at) VALUES (1, 'fin_semana', 10, 2026, 10000000, '2026-03-06T12:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(too_large.is_err(), "odometer above 9,999,999 must be rejected");

    let orphan = sqlx::query(
        "INSERT INTO readings (agent_id, kind, week, year, created_at) VALUES (99, 'inicio_semana', 10, 2026, '2026-03-02T12:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(orphan.is_err(), "reading for unknown agent must be rejected");
}

#[tokio::test]
async fn test_duplicate_agent_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("cuentakm.db")).await.unwrap();

    sqlx::query("INSERT INTO agents (name) VALUES ('Ana')")
        .execute(&pool)
        .await
        .unwrap();
    let duplicate = sqlx::query("INSERT INTO agents (name) VALUES ('Ana')")
        .execute(&pool)
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_every_pooled_connection_has_pragmas() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("cuentakm.db")).await.unwrap();

    // Hold several connections at once so each is a distinct one
    let mut conns = Vec::new();
    for _ in 0..4 {
        conns.push(pool.acquire().await.unwrap());
    }

    for conn in conns.iter_mut() {
        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1);

        let busy_timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }
}
