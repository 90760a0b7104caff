use crate::pipeline::{FrameOutcome, Pipeline, PipelineError};
use chrono::NaiveDate;
use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use rollcall_core::{AttendanceRecord, FaceBackend};
use rollcall_hw::CaptureSource;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Point-in-time view of the engine for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub running: bool,
    pub enrolled: usize,
    pub session_date: NaiveDate,
    pub present_today: usize,
    pub frames_processed: u64,
    pub last_error: Option<String>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Finalize {
        reply: oneshot::Sender<Result<Vec<AttendanceRecord>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
}

impl EngineHandle {
    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    pub async fn finalize(&self) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.request(|reply| EngineRequest::Finalize { reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Most recent annotated frame as JPEG. `None` until the first frame
    /// and whenever the pipeline is stopped.
    pub fn latest_frame(&self) -> Option<Vec<u8>> {
        self.latest_frame.lock().clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// While running, the thread processes one frame per iteration and checks
/// for requests between frames. While idle it blocks on the request
/// channel. Persistence failures are forwarded on `failures` without
/// blocking the worker.
pub fn spawn_engine<S, B>(
    mut pipeline: Pipeline<S, B>,
    frame_interval: Duration,
    failures: mpsc::Sender<String>,
) -> Result<EngineHandle, EngineError>
where
    S: CaptureSource + 'static,
    B: FaceBackend + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let latest_frame = Arc::new(Mutex::new(None));
    let worker_frame = Arc::clone(&latest_frame);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut last_error: Option<String> = None;

            loop {
                let request = if pipeline.is_running() {
                    match rx.try_recv() {
                        Ok(req) => Some(req),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break,
                    }
                } else {
                    match rx.blocking_recv() {
                        Some(req) => Some(req),
                        None => break,
                    }
                };

                match request {
                    Some(req) => handle_request(req, &mut pipeline, &worker_frame, &mut last_error),
                    None => {
                        run_frame(&mut pipeline, &worker_frame, &failures, &mut last_error);
                        if !frame_interval.is_zero() {
                            std::thread::sleep(frame_interval);
                        }
                    }
                }
            }

            stop_pipeline(&mut pipeline, &worker_frame);
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, latest_frame })
}

/// Stop the pipeline and drop the last frame; an idle engine has no live view.
fn stop_pipeline<S: CaptureSource, B: FaceBackend>(
    pipeline: &mut Pipeline<S, B>,
    latest_frame: &Mutex<Option<Vec<u8>>>,
) {
    pipeline.stop();
    *latest_frame.lock() = None;
}

fn handle_request<S: CaptureSource, B: FaceBackend>(
    request: EngineRequest,
    pipeline: &mut Pipeline<S, B>,
    latest_frame: &Mutex<Option<Vec<u8>>>,
    last_error: &mut Option<String>,
) {
    match request {
        EngineRequest::Start { reply } => {
            let result = pipeline.start().map_err(EngineError::from);
            if let Err(e) = &result {
                tracing::error!(error = %e, "failed to start pipeline");
                *last_error = Some(e.to_string());
            }
            let _ = reply.send(result);
        }
        EngineRequest::Stop { reply } => {
            stop_pipeline(pipeline, latest_frame);
            let _ = reply.send(());
        }
        EngineRequest::Finalize { reply } => {
            let result = pipeline.finalize().map_err(EngineError::from);
            if let Err(e) = &result {
                tracing::error!(error = %e, "finalize failed");
                *last_error = Some(e.to_string());
            }
            let _ = reply.send(result);
        }
        EngineRequest::Status { reply } => {
            let ledger = pipeline.ledger();
            let _ = reply.send(EngineStatus {
                version: env!("CARGO_PKG_VERSION"),
                running: pipeline.is_running(),
                enrolled: ledger.roster().len(),
                session_date: ledger.session_date(),
                present_today: ledger.present_count(),
                frames_processed: pipeline.frames_processed(),
                last_error: last_error.clone(),
            });
        }
    }
}

fn run_frame<S: CaptureSource, B: FaceBackend>(
    pipeline: &mut Pipeline<S, B>,
    latest_frame: &Mutex<Option<Vec<u8>>>,
    failures: &mpsc::Sender<String>,
    last_error: &mut Option<String>,
) {
    match pipeline.annotated_frame() {
        Ok(FrameOutcome::Frame(frame)) => {
            for failure in frame.failures {
                let message = failure.to_string();
                if failures.try_send(message.clone()).is_err() {
                    tracing::debug!("persistence failure notification dropped");
                }
                *last_error = Some(message);
            }
            match encode_jpeg(&frame.image) {
                Ok(jpeg) => *latest_frame.lock() = Some(jpeg),
                Err(e) => tracing::warn!(error = %e, "failed to encode snapshot"),
            }
        }
        Ok(FrameOutcome::Exhausted) => {
            tracing::warn!("capture stream exhausted; stopping pipeline");
            stop_pipeline(pipeline, latest_frame);
        }
        Ok(FrameOutcome::Idle) => {}
        Err(PipelineError::Backend(e)) => {
            tracing::warn!(error = %e, "face backend failed on frame; skipping");
        }
        Err(e) => {
            tracing::error!(error = %e, "frame capture failed; stopping pipeline");
            *last_error = Some(e.to_string());
            stop_pipeline(pipeline, latest_frame);
        }
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
