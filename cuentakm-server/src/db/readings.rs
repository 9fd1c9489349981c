//! Reading record store
//!
//! Append-only log of reading events. "Most recent" always means
//! `ORDER BY created_at DESC, id DESC`: timestamps are stored in a fixed-width
//! RFC 3339 form so text order is chronological, and the id breaks ties.
//!
//! The `latest_*` lookups only see recorded readings (odometer value set).
//! A record still waiting for its value, or one left behind by a crash, never
//! drives the weekly state or serves as a baseline.

use chrono::{DateTime, SecondsFormat, Utc};
use cuentakm_common::db::{Reading, ReadingKind};
use cuentakm_common::{Error, Result};
use sqlx::SqlitePool;

const RECENT_FIRST: &str = "ORDER BY created_at DESC, id DESC";
const RECORDED: &str = "odometer_km IS NOT NULL";

/// Fields of a freshly submitted reading (value not yet extracted)
#[derive(Debug, Clone)]
pub struct NewReading {
    pub agent_id: i64,
    pub kind: ReadingKind,
    pub week: u32,
    pub year: i32,
    pub photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Optional filters for [`list_readings`]
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub kind: Option<ReadingKind>,
    pub year: Option<i32>,
    pub week: Option<u32>,
    /// Only readings carrying a late-close or continuity-mismatch flag
    pub flagged_only: bool,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Create a reading record and return it
pub async fn insert_reading(pool: &SqlitePool, new: &NewReading) -> Result<Reading> {
    let result = sqlx::query(
        r#"
        INSERT INTO readings (agent_id, kind, week, year, photo_ref, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.agent_id)
    .bind(new.kind.as_str())
    .bind(new.week as i64)
    .bind(new.year as i64)
    .bind(&new.photo_ref)
    .bind(timestamp(new.created_at))
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    get_reading(pool, id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Reading {} vanished after insert", id)))
}

pub async fn get_reading(pool: &SqlitePool, id: i64) -> Result<Option<Reading>> {
    let row = sqlx::query("SELECT * FROM readings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Reading::from_row).transpose()
}

/// Most recent recorded reading of any kind for an agent
pub async fn latest_for_agent(pool: &SqlitePool, agent_id: i64) -> Result<Option<Reading>> {
    let sql = format!(
        "SELECT * FROM readings WHERE agent_id = ? AND {} {} LIMIT 1",
        RECORDED, RECENT_FIRST
    );
    let row = sqlx::query(&sql)
        .bind(agent_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Reading::from_row).transpose()
}

/// Most recent reading of `kind` for an agent, any week
pub async fn latest_of_kind(
    pool: &SqlitePool,
    agent_id: i64,
    kind: ReadingKind,
) -> Result<Option<Reading>> {
    let sql = format!(
        "SELECT * FROM readings WHERE agent_id = ? AND kind = ? AND {} {} LIMIT 1",
        RECORDED, RECENT_FIRST
    );
    let row = sqlx::query(&sql)
        .bind(agent_id)
        .bind(kind.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Reading::from_row).transpose()
}

/// Most recent reading of `kind` for an agent in one ISO week
///
/// Older duplicates for the same period are ignored.
pub async fn latest_of_kind_in_week(
    pool: &SqlitePool,
    agent_id: i64,
    kind: ReadingKind,
    week: u32,
    year: i32,
) -> Result<Option<Reading>> {
    let sql = format!(
        "SELECT * FROM readings WHERE agent_id = ? AND kind = ? AND week = ? AND year = ? AND {} {} LIMIT 1",
        RECORDED, RECENT_FIRST
    );
    let row = sqlx::query(&sql)
        .bind(agent_id)
        .bind(kind.as_str())
        .bind(week as i64)
        .bind(year as i64)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(Reading::from_row).transpose()
}

/// Readings of an agent, newest first
pub async fn list_readings(
    pool: &SqlitePool,
    agent_id: i64,
    filter: &ReadingFilter,
) -> Result<Vec<Reading>> {
    let mut sql = String::from("SELECT * FROM readings WHERE agent_id = ?");
    if filter.kind.is_some() {
        sql.push_str(" AND kind = ?");
    }
    if filter.year.is_some() {
        sql.push_str(" AND year = ?");
    }
    if filter.week.is_some() {
        sql.push_str(" AND week = ?");
    }
    if filter.flagged_only {
        sql.push_str(" AND (late_close = 1 OR continuity_mismatch = 1)");
    }
    sql.push(' ');
    sql.push_str(RECENT_FIRST);

    let mut query = sqlx::query(&sql).bind(agent_id);
    if let Some(kind) = filter.kind {
        query = query.bind(kind.as_str());
    }
    if let Some(year) = filter.year {
        query = query.bind(year as i64);
    }
    if let Some(week) = filter.week {
        query = query.bind(week as i64);
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(Reading::from_row).collect()
}

pub async fn set_odometer(pool: &SqlitePool, id: i64, km: u32) -> Result<()> {
    sqlx::query("UPDATE readings SET odometer_km = ? WHERE id = ?")
        .bind(km as i64)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_late_close(pool: &SqlitePool, id: i64, late: bool) -> Result<()> {
    sqlx::query("UPDATE readings SET late_close = ? WHERE id = ?")
        .bind(late)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_continuity_mismatch(pool: &SqlitePool, id: i64, mismatch: bool) -> Result<()> {
    sqlx::query("UPDATE readings SET continuity_mismatch = ? WHERE id = ?")
        .bind(mismatch)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Null the photo reference (the blob is handled by the photo store)
pub async fn clear_photo(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE readings SET photo_ref = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Readings of any agent still without a value, oldest first
pub async fn incomplete_readings(pool: &SqlitePool) -> Result<Vec<Reading>> {
    let rows = sqlx::query("SELECT * FROM readings WHERE odometer_km IS NULL ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Reading::from_row).collect()
}

pub async fn delete_reading(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM readings WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use cuentakm_common::db::init::init_database;

    async fn setup() -> (tempfile::TempDir, SqlitePool, i64) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        let agent_id = sqlx::query("INSERT INTO agents (name) VALUES ('Ana')")
            .execute(&pool)
            .await
            .unwrap()
            .last_insert_rowid();
        (dir, pool, agent_id)
    }

    fn new_reading(agent_id: i64, kind: ReadingKind, week: u32, at: DateTime<Utc>) -> NewReading {
        NewReading {
            agent_id,
            kind,
            week,
            year: 2026,
            photo_ref: Some(format!("lecturas/{}-{}.jpg", kind, week)),
            created_at: at,
        }
    }

    /// Insert and give the reading its value, as a completed submission does
    async fn recorded(pool: &SqlitePool, new: NewReading, km: u32) -> Reading {
        let reading = insert_reading(pool, &new).await.unwrap();
        set_odometer(pool, reading.id, km).await.unwrap();
        get_reading(pool, reading.id).await.unwrap().unwrap()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 12, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_insert_starts_without_value() {
        let (_dir, pool, agent_id) = setup().await;

        let reading = insert_reading(&pool, &new_reading(agent_id, ReadingKind::WeekStart, 42, base_time()))
            .await
            .unwrap();

        assert_eq!(reading.kind, ReadingKind::WeekStart);
        assert_eq!(reading.odometer_km, None);
        assert!(!reading.late_close);
        assert!(!reading.continuity_mismatch);
        assert_eq!(reading.created_at, base_time());
        assert!(reading.photo_ref.is_some());
    }

    #[tokio::test]
    async fn test_latest_prefers_newest_then_highest_id() {
        let (_dir, pool, agent_id) = setup().await;
        let t0 = base_time();

        recorded(&pool, new_reading(agent_id, ReadingKind::WeekStart, 42, t0), 1000).await;
        let end = recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekEnd, 42, t0 + Duration::days(4)),
            1000,
        )
        .await;

        let latest = latest_for_agent(&pool, agent_id).await.unwrap().unwrap();
        assert_eq!(latest.id, end.id);

        // Same timestamp: the later insert wins
        let dup = recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekStart, 42, t0 + Duration::days(4)),
            1000,
        )
        .await;
        let latest = latest_for_agent(&pool, agent_id).await.unwrap().unwrap();
        assert_eq!(latest.id, dup.id);
    }

    #[tokio::test]
    async fn test_latest_of_kind_in_week_ignores_older_duplicates() {
        let (_dir, pool, agent_id) = setup().await;
        let t0 = base_time();

        let first = recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekStart, 42, t0),
            1000,
        )
        .await;
        let second = recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekStart, 42, t0 + Duration::hours(1)),
            1000,
        )
        .await;
        recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekStart, 43, t0 + Duration::days(7)),
            1000,
        )
        .await;

        let found = latest_of_kind_in_week(&pool, agent_id, ReadingKind::WeekStart, 42, 2026)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_ne!(found.id, first.id);

        let none = latest_of_kind_in_week(&pool, agent_id, ReadingKind::WeekEnd, 42, 2026)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_latest_ignores_readings_without_value() {
        let (_dir, pool, agent_id) = setup().await;
        let t0 = base_time();

        let start = recorded(
            &pool,
            new_reading(agent_id, ReadingKind::WeekStart, 42, t0),
            1000,
        )
        .await;
        // Newer, but its value was never extracted
        insert_reading(&pool, &new_reading(agent_id, ReadingKind::WeekEnd, 42, t0 + Duration::days(4)))
            .await
            .unwrap();

        let latest = latest_for_agent(&pool, agent_id).await.unwrap().unwrap();
        assert_eq!(latest.id, start.id);
        assert!(latest_of_kind(&pool, agent_id, ReadingKind::WeekEnd)
            .await
            .unwrap()
            .is_none());
        assert!(latest_of_kind_in_week(&pool, agent_id, ReadingKind::WeekEnd, 42, 2026)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_field_updates_and_delete() {
        let (_dir, pool, agent_id) = setup().await;
        let reading = insert_reading(&pool, &new_reading(agent_id, ReadingKind::WeekEnd, 42, base_time()))
            .await
            .unwrap();

        set_odometer(&pool, reading.id, 1120).await.unwrap();
        set_late_close(&pool, reading.id, true).await.unwrap();
        set_continuity_mismatch(&pool, reading.id, true).await.unwrap();
        clear_photo(&pool, reading.id).await.unwrap();

        let updated = get_reading(&pool, reading.id).await.unwrap().unwrap();
        assert_eq!(updated.odometer_km, Some(1120));
        assert!(updated.late_close);
        assert!(updated.continuity_mismatch);
        assert_eq!(updated.photo_ref, None);

        delete_reading(&pool, reading.id).await.unwrap();
        assert!(get_reading(&pool, reading.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_readings_filters() {
        let (_dir, pool, agent_id) = setup().await;
        let t0 = base_time();

        let start = insert_reading(&pool, &new_reading(agent_id, ReadingKind::WeekStart, 42, t0))
            .await
            .unwrap();
        let end = insert_reading(&pool, &new_reading(agent_id, ReadingKind::WeekEnd, 42, t0 + Duration::days(4)))
            .await
            .unwrap();
        set_late_close(&pool, end.id, true).await.unwrap();

        let all = list_readings(&pool, agent_id, &ReadingFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![end.id, start.id]);

        let starts = list_readings(
            &pool,
            agent_id,
            &ReadingFilter {
                kind: Some(ReadingKind::WeekStart),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].id, start.id);

        let flagged = list_readings(
            &pool,
            agent_id,
            &ReadingFilter {
                flagged_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, end.id);

        let other_week = list_readings(
            &pool,
            agent_id,
            &ReadingFilter {
                year: Some(2026),
                week: Some(41),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(other_week.is_empty());
    }
}
