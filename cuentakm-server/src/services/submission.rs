//! Reading submission engine
//!
//! Sequence for one submission:
//! 1. agent lookup
//! 2. state-machine check against the agent's last reading
//! 3. photo stored, record created without a value
//! 4. value extracted from the photo
//! 5. reconciliation against history (continuity or week close)
//! 6. flags persisted
//! 7. administrative notification (best-effort)
//! 8. photo retention decision
//!
//! Any failure that would leave a record without a value, or a `WeekEnd`
//! without its `WeekStart`, deletes both the record and its photo before the
//! error is returned.
//!
//! Submissions for the same agent are serialized with a per-agent lock held
//! across the whole sequence, so two concurrent uploads cannot both pass the
//! state check. Different agents never wait on each other.
//!
//! The sequence runs on its own task. A request dropped mid-way (client
//! disconnect while the vision model is answering) does not cancel it, so
//! the record either gets its value or is removed.

use chrono::{DateTime, Utc};
use cuentakm_common::db::{Agent, Reading, ReadingKind};
use cuentakm_common::time::{iso_week_year, Clock};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::notifications::NotificationDispatcher;
use super::odometer::{ExtractionError, OdometerExtractor};
use super::photo_store::PhotoStore;
use super::reconciliation::{
    is_continuity_mismatch, CloseAssessment, MISMATCH_WARNING, MISSING_START_ERROR,
};
use super::weekly_state::WeeklyState;
use crate::db::{agents, readings};

#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Missing field, non-image upload, or kind not allowed in current state
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Error leyendo kilómetros: {0}")]
    Extraction(#[from] ExtractionError),

    /// `WeekEnd` without a `WeekStart` for the same ISO week
    #[error("{0}")]
    Prerequisite(String),

    #[error(transparent)]
    Storage(#[from] cuentakm_common::Error),
}

/// An inbound reading
#[derive(Debug, Clone)]
pub struct Submission {
    pub agent_id: i64,
    pub kind: ReadingKind,
    pub photo: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub agent: Agent,
    /// The new reading as persisted (value, flags, photo reference)
    pub reading: Reading,
    /// Set on `WeekEnd` only
    pub weekly_distance_km: Option<i64>,
    pub warning: Option<String>,
}

/// What an agent may submit now
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub agent: Agent,
    pub current_week: u32,
    pub current_year: i32,
    pub state: WeeklyState,
    pub last: Option<Reading>,
}

/// Per-agent mutual exclusion
#[derive(Debug, Clone, Default)]
pub struct AgentLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl AgentLocks {
    pub async fn acquire(&self, agent_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(agent_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct SubmissionEngine {
    db: SqlitePool,
    photos: PhotoStore,
    extractor: Arc<dyn OdometerExtractor>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    locks: AgentLocks,
}

impl SubmissionEngine {
    pub fn new(
        db: SqlitePool,
        photos: PhotoStore,
        extractor: Arc<dyn OdometerExtractor>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            photos,
            extractor,
            dispatcher,
            clock,
            locks: AgentLocks::default(),
        }
    }

    async fn find_agent(&self, agent_id: i64) -> Result<Agent, SubmissionError> {
        agents::get_agent(&self.db, agent_id)
            .await?
            .ok_or_else(|| SubmissionError::NotFound("Comercial no encontrado".to_string()))
    }

    /// Current ISO week and the reading kind the agent may submit
    pub async fn status(&self, agent_id: i64) -> Result<AgentStatus, SubmissionError> {
        let agent = self.find_agent(agent_id).await?;
        let (current_week, current_year) = iso_week_year(self.clock.today());
        let last = readings::latest_for_agent(&self.db, agent.id).await?;

        Ok(AgentStatus {
            agent,
            current_week,
            current_year,
            state: WeeklyState::from_last(last.as_ref()),
            last,
        })
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmissionOutcome, SubmissionError> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run(submission).await })
            .await
            .map_err(|e| {
                SubmissionError::Storage(cuentakm_common::Error::Internal(format!(
                    "Submission task failed: {}",
                    e
                )))
            })?
    }

    /// Remove readings that never got their value, with their photos
    ///
    /// Run at startup, before any submission is accepted.
    pub async fn discard_incomplete(&self) -> Result<usize, SubmissionError> {
        let incomplete = readings::incomplete_readings(&self.db).await?;
        for mut reading in incomplete.iter().cloned() {
            warn!(
                agent_id = reading.agent_id,
                reading_id = reading.id,
                "Removing reading left without a value"
            );
            self.abandon(&mut reading).await;
        }
        Ok(incomplete.len())
    }

    async fn run(&self, submission: Submission) -> Result<SubmissionOutcome, SubmissionError> {
        if submission.photo.is_empty() {
            return Err(SubmissionError::Validation("Falta imagen".to_string()));
        }
        if !infer::is_image(&submission.photo) {
            return Err(SubmissionError::Validation(
                "El archivo subido no es una imagen".to_string(),
            ));
        }

        let agent = self.find_agent(submission.agent_id).await?;
        let _guard = self.locks.acquire(agent.id).await;

        let now = self.clock.now();
        let (week, year) = iso_week_year(now.date_naive());

        let last = readings::latest_for_agent(&self.db, agent.id).await?;
        let state = WeeklyState::from_last(last.as_ref());
        if !state.accepts(submission.kind) {
            return Err(SubmissionError::Validation(format!(
                "Tipo de lectura no permitido ahora. Permitidos: [{}]",
                state.allowed_next()
            )));
        }

        let mut reading = self
            .create_record(&agent, submission.kind, week, year, now, &submission.photo)
            .await?;

        let km = match self.extractor.extract(&submission.photo).await {
            Ok(km) => km,
            Err(e) => {
                error!(
                    agent_id = agent.id,
                    reading_id = reading.id,
                    error = %e,
                    "Odometer extraction failed"
                );
                self.abandon(&mut reading).await;
                return Err(e.into());
            }
        };
        if let Err(e) = readings::set_odometer(&self.db, reading.id, km).await {
            self.abandon(&mut reading).await;
            return Err(e.into());
        }
        reading.odometer_km = Some(km);

        info!(
            agent_id = agent.id,
            reading_id = reading.id,
            kind = %reading.kind,
            week,
            year,
            km,
            "Reading recorded"
        );

        match reading.kind {
            ReadingKind::WeekStart => self.open_week(agent, reading, km).await,
            ReadingKind::WeekEnd => self.close_week(agent, reading, km, now).await,
        }
    }

    async fn create_record(
        &self,
        agent: &Agent,
        kind: ReadingKind,
        week: u32,
        year: i32,
        now: DateTime<Utc>,
        photo: &[u8],
    ) -> Result<Reading, SubmissionError> {
        let photo_ref = self.photos.store(photo).await?;
        let new = readings::NewReading {
            agent_id: agent.id,
            kind,
            week,
            year,
            photo_ref: Some(photo_ref.clone()),
            created_at: now,
        };

        match readings::insert_reading(&self.db, &new).await {
            Ok(reading) => Ok(reading),
            Err(e) => {
                self.photos.remove_blob(&photo_ref).await;
                Err(e.into())
            }
        }
    }

    /// Compensating deletion of a half-completed reading and its photo
    async fn abandon(&self, reading: &mut Reading) {
        self.photos.discard(&self.db, reading).await;
        if let Err(e) = readings::delete_reading(&self.db, reading.id).await {
            error!(reading_id = reading.id, error = %e, "Error deleting abandoned reading");
        }
    }

    /// `WeekStart`: compare against the last `WeekEnd`; keep the photo for
    /// the week-close email
    async fn open_week(
        &self,
        agent: Agent,
        mut reading: Reading,
        km: u32,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let prior_end = readings::latest_of_kind(&self.db, agent.id, ReadingKind::WeekEnd).await?;

        let mut warning = None;
        if let Some(prior) = prior_end.filter(|p| is_continuity_mismatch(Some(p), km)) {
            match readings::set_continuity_mismatch(&self.db, reading.id, true).await {
                Ok(()) => reading.continuity_mismatch = true,
                Err(e) => error!(
                    reading_id = reading.id,
                    error = %e,
                    "Error setting continuity-mismatch flag"
                ),
            }
            warn!(
                agent_id = agent.id,
                reading_id = reading.id,
                prior_km = ?prior.odometer_km,
                km,
                "Week start does not match previous week end"
            );

            if let Err(e) = self
                .dispatcher
                .notify_mismatch(&agent, &prior, &reading, MISMATCH_WARNING)
                .await
            {
                error!(agent_id = agent.id, error = %e, "Error sending mismatch warning");
            }
            warning = Some(MISMATCH_WARNING.to_string());
        }

        Ok(SubmissionOutcome {
            agent,
            reading,
            weekly_distance_km: None,
            warning,
        })
    }

    /// `WeekEnd`: find the week's `WeekStart`, compute distance, flag
    /// anomalies, send the summary, then purge both photos
    async fn close_week(
        &self,
        agent: Agent,
        mut reading: Reading,
        km: u32,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let start = readings::latest_of_kind_in_week(
            &self.db,
            agent.id,
            ReadingKind::WeekStart,
            reading.week,
            reading.year,
        )
        .await?;

        // A start without a value cannot serve as a baseline either
        let Some((mut start, start_km)) =
            start.and_then(|s| s.odometer_km.map(|start_km| (s, start_km)))
        else {
            warn!(
                agent_id = agent.id,
                week = reading.week,
                year = reading.year,
                "Week end without week start"
            );
            self.abandon(&mut reading).await;
            return Err(SubmissionError::Prerequisite(MISSING_START_ERROR.to_string()));
        };

        let assessment = CloseAssessment::assess(start_km, km, now.date_naive());

        if assessment.late_close {
            match readings::set_late_close(&self.db, reading.id, true).await {
                Ok(()) => reading.late_close = true,
                Err(e) => error!(reading_id = reading.id, error = %e, "Error setting late-close flag"),
            }
        }

        let warning = assessment.warning_text();
        if let Some(text) = &warning {
            warn!(
                agent_id = agent.id,
                reading_id = reading.id,
                distance_km = assessment.distance_km,
                warning = %text,
                "Week closed with warnings"
            );
        }

        if let Err(e) = self
            .dispatcher
            .notify_week_close(&agent, &start, &reading, assessment.distance_km, warning.as_deref())
            .await
        {
            error!(agent_id = agent.id, error = %e, "Error sending week-close summary");
        }

        self.photos.discard(&self.db, &mut start).await;
        self.photos.discard(&self.db, &mut reading).await;

        info!(
            agent_id = agent.id,
            week = reading.week,
            year = reading.year,
            distance_km = assessment.distance_km,
            "Week closed"
        );

        Ok(SubmissionOutcome {
            agent,
            reading,
            weekly_distance_km: Some(assessment.distance_km),
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::LogOnlyNotifier;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use cuentakm_common::db::init::init_database;
    use cuentakm_common::time::FixedClock;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    /// Answers only once the test releases a permit
    struct GatedExtractor {
        gate: Semaphore,
        results: std::sync::Mutex<VecDeque<Result<u32, ExtractionError>>>,
    }

    impl GatedExtractor {
        fn new(results: Vec<Result<u32, ExtractionError>>) -> Self {
            Self {
                gate: Semaphore::new(0),
                results: std::sync::Mutex::new(results.into()),
            }
        }
    }

    #[async_trait]
    impl OdometerExtractor for GatedExtractor {
        async fn extract(&self, _photo: &[u8]) -> Result<u32, ExtractionError> {
            self.gate
                .acquire()
                .await
                .map_err(|e| ExtractionError::Unavailable(e.to_string()))?
                .forget();
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ExtractionError::EmptyAnswer))
        }
    }

    async fn setup(
        extractor: Arc<dyn OdometerExtractor>,
    ) -> (tempfile::TempDir, SubmissionEngine, i64) {
        let dir = tempfile::tempdir().unwrap();
        let db = init_database(&dir.path().join("test.db")).await.unwrap();
        agents::seed_agents(&db, &["Ana".to_string()]).await.unwrap();
        let agent_id = agents::list_agents(&db).await.unwrap()[0].id;

        let photos = PhotoStore::new(dir.path().join("media"));
        let dispatcher =
            NotificationDispatcher::new(Arc::new(LogOnlyNotifier), photos.clone(), Vec::new(), Vec::new());
        let friday = FixedClock::on(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        let engine = SubmissionEngine::new(db, photos, extractor, dispatcher, Arc::new(friday));
        (dir, engine, agent_id)
    }

    fn submission(agent_id: i64, kind: ReadingKind) -> Submission {
        Submission {
            agent_id,
            kind,
            photo: JPEG.to_vec(),
        }
    }

    async fn reading_count(engine: &SubmissionEngine) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM readings")
            .fetch_one(&engine.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dropped_request_still_completes() {
        let extractor = Arc::new(GatedExtractor::new(vec![Ok(1000), Ok(1120)]));
        let (_dir, engine, agent_id) = setup(extractor.clone()).await;

        // Caller gives up while the model is still answering
        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            engine.submit(submission(agent_id, ReadingKind::WeekStart)),
        )
        .await;
        assert!(dropped.is_err());

        extractor.gate.add_permits(2);

        // Waits on the agent lock until the first submission has finished
        let outcome = engine
            .submit(submission(agent_id, ReadingKind::WeekEnd))
            .await
            .expect("week start must have been recorded");
        assert_eq!(outcome.weekly_distance_km, Some(120));

        let status = engine.status(agent_id).await.unwrap();
        assert_eq!(status.state, WeeklyState::AwaitingStart);
        assert_eq!(reading_count(&engine).await, 2);
    }

    #[tokio::test]
    async fn test_dropped_request_with_failed_extraction_leaves_nothing() {
        let extractor = Arc::new(GatedExtractor::new(vec![
            Err(ExtractionError::NoDigits("ilegible".to_string())),
            Ok(1000),
        ]));
        let (_dir, engine, agent_id) = setup(extractor.clone()).await;

        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            engine.submit(submission(agent_id, ReadingKind::WeekStart)),
        )
        .await;
        assert!(dropped.is_err());

        extractor.gate.add_permits(2);

        // The retry runs after the failed one cleaned up; WeekStart is still allowed
        let retry = engine
            .submit(submission(agent_id, ReadingKind::WeekStart))
            .await
            .unwrap();
        assert_eq!(retry.reading.odometer_km, Some(1000));
        assert_eq!(reading_count(&engine).await, 1);
    }

    #[tokio::test]
    async fn test_discard_incomplete_removes_record_and_photo() {
        let (_dir, engine, agent_id) = setup(Arc::new(GatedExtractor::new(Vec::new()))).await;

        let photo_ref = engine.photos.store(JPEG).await.unwrap();
        readings::insert_reading(
            &engine.db,
            &readings::NewReading {
                agent_id,
                kind: ReadingKind::WeekStart,
                week: 42,
                year: 2026,
                photo_ref: Some(photo_ref.clone()),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert_eq!(engine.discard_incomplete().await.unwrap(), 1);
        assert_eq!(reading_count(&engine).await, 0);
        assert!(!engine.photos.exists(&photo_ref).await);
        assert_eq!(engine.discard_incomplete().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_agent_lock_serializes_same_agent() {
        let locks = AgentLocks::default();
        let guard = locks.acquire(1).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(second.is_err(), "same agent must wait");

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(2)).await;
        assert!(other.is_ok(), "different agents must not wait");

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.acquire(1)).await;
        assert!(third.is_ok());
    }
}
