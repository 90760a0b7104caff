use anyhow::{Context, Result};
use rollcall_core::{
    EnrollmentSource, FaceMatcher, Gallery, ImageDirectory, OnnxBackend, SystemClock,
};
use rollcall_hw::CameraSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod ledger;
mod overlay;
mod pipeline;
mod store;

use config::Config;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use ledger::{Ledger, UpdateNotifier};
use pipeline::Pipeline;
use store::AttendanceStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        enrollment_dir = %config.enrollment_dir.display(),
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        policy = ?config.schedule_policy,
        "configuration loaded"
    );

    let store = Arc::new(AttendanceStore::open(&config.db_path)?);

    let mut backend = OnnxBackend::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detection_confidence,
        config.fallback_confidence,
    )
    .context("failed to load face models")?;
    tracing::info!("face models loaded");

    let references = ImageDirectory::new(config.enrollment_dir.clone()).list_reference_images()?;
    let gallery = Arc::new(Gallery::enroll(&mut backend, references));
    if gallery.is_empty() {
        tracing::warn!("no identities enrolled; every face will be unknown");
    }

    let (notifier, mut updates) = UpdateNotifier::channel();
    let ledger = Arc::new(
        Ledger::new(
            gallery.identities().cloned().collect(),
            store,
            Arc::new(SystemClock),
            config.schedule_policy,
        )
        .with_notifier(notifier),
    );

    let matcher = FaceMatcher::new(gallery, config.match_threshold);
    let source = CameraSource::new(config.camera_device.clone(), config.warmup_frames);
    let pipeline = Pipeline::new(source, backend, matcher, Arc::clone(&ledger));

    let (failures_tx, mut failures) = mpsc::channel(16);
    let engine = engine::spawn_engine(
        pipeline,
        Duration::from_millis(config.frame_interval_ms),
        failures_tx,
    )?;

    let service = AttendanceService::new(engine, ledger);
    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;
    let iface = conn
        .object_server()
        .interface::<_, AttendanceService>(OBJECT_PATH)
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = updates.recv() => {
                let json = serde_json::to_string(&event)?;
                if let Err(e) = AttendanceService::records_changed(iface.signal_emitter(), &json).await {
                    tracing::warn!(error = %e, "failed to emit RecordsChanged");
                }
            }
            Some(message) = failures.recv() => {
                if let Err(e) = AttendanceService::persistence_failed(iface.signal_emitter(), &message).await {
                    tracing::warn!(error = %e, "failed to emit PersistenceFailed");
                }
            }
            signal = &mut shutdown => {
                signal?;
                break;
            }
        }
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
