//! Attendance ledger: turns "this face was seen at T" into at most one
//! attendance row per identity per day.
//!
//! Session state is written only after the row is persisted. A failed write
//! leaves the identity unseen, so the next detection retries it.

use crate::store::{AttendanceStore, StoreError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use rollcall_core::{classify, AttendanceRecord, AttendanceStats, Clock, Identity, SchedulePolicy};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Time recorded for identities never seen during a session.
const FORCED_ABSENCE: (u32, u32, u32) = (23, 0, 0);

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to persist attendance for {identity}: {source}")]
    Persistence {
        identity: String,
        #[source]
        source: StoreError,
    },
    #[error("store query failed: {0}")]
    Query(#[from] StoreError),
}

/// Change notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Marked { record: AttendanceRecord },
    Finalized { absent: usize },
}

/// Single-slot notification channel. Sending never blocks: when an event is
/// already pending the new one is dropped, since the consumer re-reads the
/// store anyway.
#[derive(Clone)]
pub struct UpdateNotifier {
    tx: mpsc::Sender<LedgerEvent>,
}

impl UpdateNotifier {
    pub fn channel() -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    fn notify(&self, event: LedgerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("update already pending; coalesced"),
            Err(TrySendError::Closed(_)) => tracing::trace!("no update listener"),
        }
    }
}

/// Result of [`Ledger::record_presence`].
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceOutcome {
    /// First sighting this session; the row was written.
    Marked(AttendanceRecord),
    AlreadyPresent,
    NotEnrolled,
}

struct SessionState {
    date: NaiveDate,
    /// First-seen time per identity full name.
    first_seen: HashMap<String, NaiveDateTime>,
}

impl SessionState {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            first_seen: HashMap::new(),
        }
    }

    /// Start a fresh session when the calendar day changed.
    fn roll_over(&mut self, date: NaiveDate) {
        if self.date != date {
            tracing::info!(previous = %self.date, current = %date, "new attendance day; session reset");
            *self = Self::new(date);
        }
    }
}

pub struct Ledger {
    roster: Vec<Identity>,
    store: Arc<AttendanceStore>,
    clock: Arc<dyn Clock>,
    policy: SchedulePolicy,
    session: Mutex<SessionState>,
    notifier: Option<UpdateNotifier>,
}

impl Ledger {
    pub fn new(
        roster: Vec<Identity>,
        store: Arc<AttendanceStore>,
        clock: Arc<dyn Clock>,
        policy: SchedulePolicy,
    ) -> Self {
        let today = clock.now().date();
        Self {
            roster,
            store,
            clock,
            policy,
            session: Mutex::new(SessionState::new(today)),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: UpdateNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn roster(&self) -> &[Identity] {
        &self.roster
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Called when the pipeline starts. Keeps the session if it is still
    /// the same day, so restarting never re-marks anyone.
    pub fn begin_session(&self) {
        let today = self.clock.now().date();
        self.session.lock().roll_over(today);
    }

    pub fn session_date(&self) -> NaiveDate {
        self.session.lock().date
    }

    pub fn present_count(&self) -> usize {
        self.session.lock().first_seen.len()
    }

    pub fn is_present(&self, full_name: &str) -> bool {
        self.session.lock().first_seen.contains_key(full_name)
    }

    /// Mark `full_name` present as of `seen_at`, once per session.
    ///
    /// The check, the write and the mark happen under one lock, so duplicate
    /// detections of the same face produce a single row and a single event.
    pub fn record_presence(
        &self,
        full_name: &str,
        seen_at: NaiveDateTime,
    ) -> Result<PresenceOutcome, LedgerError> {
        let Some(identity) = self.roster.iter().find(|i| i.full_name == full_name) else {
            tracing::warn!(name = full_name, "presence for an identity that is not enrolled; ignored");
            return Ok(PresenceOutcome::NotEnrolled);
        };

        let mut session = self.session.lock();
        session.roll_over(seen_at.date());
        if session.first_seen.contains_key(full_name) {
            return Ok(PresenceOutcome::AlreadyPresent);
        }

        let record = self.classify(identity, seen_at);
        self.persist(identity, &record)?;
        session.first_seen.insert(full_name.to_string(), seen_at);
        drop(session);

        tracing::info!(
            name = %identity,
            at = %seen_at.time(),
            status = %record.status,
            lateness_minutes = record.lateness_minutes,
            "attendance recorded"
        );
        self.notify(LedgerEvent::Marked {
            record: record.clone(),
        });
        Ok(PresenceOutcome::Marked(record))
    }

    /// Mark everyone not seen this session at the forced absence time.
    ///
    /// Returns the rows written by this call; a second call writes nothing.
    pub fn finalize_session(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let (h, m, s) = FORCED_ABSENCE;
        let mut written = Vec::new();

        let mut session = self.session.lock();
        let forced_at = session.date.and_time(NaiveTime::from_hms_opt(h, m, s).unwrap_or_default());

        for identity in &self.roster {
            if session.first_seen.contains_key(&identity.full_name) {
                continue;
            }
            let record = self.classify(identity, forced_at);
            self.persist(identity, &record)?;
            session.first_seen.insert(identity.full_name.clone(), forced_at);
            tracing::info!(name = %identity, status = %record.status, "not seen this session");
            written.push(record);
        }
        let date = session.date;
        drop(session);

        tracing::info!(%date, absent = written.len(), "session finalized");
        if !written.is_empty() {
            self.notify(LedgerEvent::Finalized {
                absent: written.len(),
            });
        }
        Ok(written)
    }

    pub fn snapshot(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.store.query_all()?)
    }

    pub fn records_for(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.store.query_by_date(date)?)
    }

    pub fn distinct_dates(&self) -> Result<Vec<NaiveDate>, LedgerError> {
        Ok(self.store.distinct_dates()?)
    }

    pub fn summary_counts(&self) -> Result<AttendanceStats, LedgerError> {
        Ok(self.store.aggregate_counts()?)
    }

    fn classify(&self, identity: &Identity, at: NaiveDateTime) -> AttendanceRecord {
        let half = self.policy.half(at.time(), self.clock.now().time());
        let c = classify(at.time(), half);
        AttendanceRecord {
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            date: at.date(),
            status: c.status,
            lateness_minutes: c.lateness_minutes,
        }
    }

    fn persist(&self, identity: &Identity, record: &AttendanceRecord) -> Result<(), LedgerError> {
        self.store.upsert(record).map_err(|source| {
            tracing::error!(name = %identity, error = %source, "attendance write failed");
            LedgerError::Persistence {
                identity: identity.full_name.clone(),
                source,
            }
        })
    }

    fn notify(&self, event: LedgerEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }
}
