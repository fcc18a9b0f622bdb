use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{broadcast, Notify};

use transync::transport::SnapshotFetcher;
use transync::{HttpTransport, JobStatus, SyncConfig, SyncEngine, SyncError, UploadFile};

use crate::render;

fn engine_for(config: SyncConfig) -> Result<SyncEngine, SyncError> {
    let transport = Arc::new(HttpTransport::from_config(&config)?);
    SyncEngine::builder(config).transport(transport).start()
}

/// Wakes on Ctrl-C.
fn interrupt_signal() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    let handler_notify = Arc::clone(&notify);
    if let Err(e) = ctrlc::set_handler(move || handler_notify.notify_one()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
    notify
}

pub async fn watch(config: SyncConfig) -> Result<ExitCode, SyncError> {
    let engine = engine_for(config)?;
    let interrupted = interrupt_signal();
    let mut changes = engine.subscribe_changes();
    let mut health = engine.health_receiver();

    info!("Watching jobs, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = interrupted.notified() => break,
            change = changes.recv() => match change {
                Ok(change) => {
                    if let Some(record) = engine.job(&change.job_id) {
                        println!("{}", render::job_line(&record));
                    }
                    if change.became_terminal() {
                        println!("{}", render::counts_line(&engine.store().counts()));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Skipped {} updates, reprinting list", missed);
                    for record in engine.jobs() {
                        println!("{}", render::job_line(&record));
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Ok(()) = health.changed() => {
                let current = health.borrow_and_update().clone();
                if let Some(warning) = render::health_warning(&current) {
                    warn!("{}", warning);
                }
            },
        }
    }

    engine.shutdown();
    println!("{}", render::counts_line(&engine.store().counts()));
    Ok(ExitCode::SUCCESS)
}

pub async fn list(config: SyncConfig) -> Result<ExitCode, SyncError> {
    let transport = HttpTransport::from_config(&config)?;
    let mut snapshot = transport.fetch_snapshot().await?;
    snapshot
        .records
        .sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    for record in &snapshot.records {
        println!("{}", render::job_line(record));
    }
    if snapshot.is_truncated() {
        println!("... showing {} of {} jobs", snapshot.records.len(), snapshot.total);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn submit(config: SyncConfig, paths: Vec<PathBuf>) -> Result<ExitCode, SyncError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::Submit(format!("cannot read {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(UploadFile::new(filename, bytes));
    }

    let engine = engine_for(config)?;
    let interrupted = interrupt_signal();
    let record = engine.submit(files).await?;
    println!("{}", render::job_line(&record));

    let finished = tokio::select! {
        _ = interrupted.notified() => {
            engine.shutdown();
            return Ok(ExitCode::from(130));
        }
        finished = engine.wait_for_terminal(&record.id) => finished?,
    };

    println!("{}", render::job_line(&finished));
    engine.shutdown();
    if finished.status == JobStatus::Completed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
