use crate::engine::{EngineError, EngineHandle};
use crate::ledger::{Ledger, LedgerError};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Commands go through the engine thread. Record queries read the store
/// directly and run concurrently with frame processing.
pub struct AttendanceService {
    engine: EngineHandle,
    ledger: Arc<Ledger>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, ledger: Arc<Ledger>) -> Self {
        Self { engine, ledger }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Open the camera and start recognizing faces.
    async fn start(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start requested");
        self.engine.start().await.map_err(engine_failed)
    }

    /// Stop recognition and release the camera.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().await.map_err(engine_failed)
    }

    /// Mark everyone not seen today absent. Returns all records as JSON.
    async fn finalize(&self) -> zbus::fdo::Result<String> {
        tracing::info!("finalize requested");
        let records = self.engine.finalize().await.map_err(engine_failed)?;
        to_json(&records)
    }

    async fn records(&self) -> zbus::fdo::Result<String> {
        to_json(&self.ledger.snapshot().map_err(ledger_failed)?)
    }

    /// Records for one day, `YYYY-MM-DD`.
    async fn records_by_date(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        to_json(&self.ledger.records_for(date).map_err(ledger_failed)?)
    }

    /// Days with at least one record, newest first.
    async fn dates(&self) -> zbus::fdo::Result<Vec<String>> {
        let dates = self.ledger.distinct_dates().map_err(ledger_failed)?;
        Ok(dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect())
    }

    async fn stats(&self) -> zbus::fdo::Result<String> {
        to_json(&self.ledger.summary_counts().map_err(ledger_failed)?)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.status().await.map_err(engine_failed)?)
    }

    /// Latest annotated frame as JPEG. Fails while recognition is stopped.
    async fn snapshot(&self) -> zbus::fdo::Result<Vec<u8>> {
        live_frame(self.engine.latest_frame())
    }

    /// Attendance rows changed; `event` is a JSON description.
    #[zbus(signal)]
    pub async fn records_changed(emitter: &SignalEmitter<'_>, event: &str) -> zbus::Result<()>;

    /// An attendance write failed and will be retried on the next sighting.
    #[zbus(signal)]
    pub async fn persistence_failed(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;
}

fn live_frame(frame: Option<Vec<u8>>) -> zbus::fdo::Result<Vec<u8>> {
    frame.ok_or_else(|| zbus::fdo::Error::Failed("no live frame; recognition is not running".into()))
}

fn parse_date(date: &str) -> zbus::fdo::Result<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid date {date:?}: {e}")))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn engine_failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn ledger_failed(e: LedgerError) -> zbus::fdo::Error {
    tracing::error!(error = %e, "record query failed");
    zbus::fdo::Error::Failed(e.to_string())
}
