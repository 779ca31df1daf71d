//! Asynchronous audit sink
//!
//! [`AuditSink::dispatch`] hands a record to a bounded queue and returns at
//! once. A background [`AuditWorker`] drains the queue and writes each record
//! to the configured destinations: the `audit` log target and/or an
//! [`AuditStore`]. Destination failures are logged and never retried. When the
//! queue is full the record is dropped with a warning so callers never block.

use super::{models::AuditRecord, store::AuditStore};
use crate::error::InstrumentError;
use chrono::SecondsFormat;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc};
use taskboard_common::logging::AUDIT_TARGET;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Default number of records buffered between dispatch and persistence
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSinkConfig {
    pub enabled: bool,
    pub log_to_file: bool,
    pub log_to_db: bool,
    pub queue_capacity: usize,
}

impl Default for AuditSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_to_file: true,
            log_to_db: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Sending half; cheap to clone
#[derive(Debug, Clone)]
pub struct AuditSink {
    sender: Option<mpsc::Sender<AuditRecord>>,
}

impl AuditSink {
    /// Start the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(config: AuditSinkConfig, store: Option<Arc<dyn AuditStore>>) -> (Self, AuditWorker) {
        if !config.enabled {
            info!("Audit logging disabled");
            return (Self::disabled(), AuditWorker::idle());
        }

        let store = match (config.log_to_db, store) {
            (true, None) => {
                warn!("Audit database logging requested but no audit store is configured");
                None
            },
            (true, store) => store,
            (false, _) => None,
        };

        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (stop, stop_signal) = watch::channel(false);
        let persister = Persister {
            log_to_file: config.log_to_file,
            store,
        };

        let handle = tokio::spawn(run_worker(receiver, stop_signal, persister));

        (
            Self {
                sender: Some(sender),
            },
            AuditWorker {
                stop: Some(stop),
                handle: Some(handle),
            },
        )
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a record for persistence without waiting
    pub fn dispatch(&self, record: AuditRecord) -> Result<(), InstrumentError> {
        let Some(sender) = &self.sender else {
            return Ok(());
        };

        match sender.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(
                    unit = %record.unit_name,
                    operation = %record.operation_name,
                    "Audit queue full, dropping record"
                );
                Ok(())
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(InstrumentError::Dispatch("audit worker has shut down".to_string()))
            },
        }
    }
}

/// Handle to the background persistence task
#[derive(Debug)]
pub struct AuditWorker {
    stop: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl AuditWorker {
    fn idle() -> Self {
        Self {
            stop: None,
            handle: None,
        }
    }

    /// Stop accepting records and wait until the queue is drained
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(true);
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Audit worker terminated abnormally");
            }
        }
    }
}

struct Persister {
    log_to_file: bool,
    store: Option<Arc<dyn AuditStore>>,
}

impl Persister {
    async fn persist(&self, record: AuditRecord) {
        if self.log_to_file {
            info!(target: AUDIT_TARGET, "{}", format_audit_line(&record));
            if let Some(line) = format_audit_error_line(&record) {
                warn!(target: AUDIT_TARGET, "{}", line);
            }
        }

        let Some(store) = &self.store else {
            return;
        };

        let unit = record.unit_name.clone();
        let operation = record.operation_name.clone();
        match AssertUnwindSafe(store.insert(record)).catch_unwind().await {
            Ok(Ok(entry)) => debug!(audit_id = entry.id, "Persisted audit record"),
            Ok(Err(e)) => error!(%unit, %operation, error = %e, "Failed to save audit log"),
            Err(_) => error!(%unit, %operation, "Audit store panicked while saving audit log"),
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<AuditRecord>,
    mut stop_signal: watch::Receiver<bool>,
    persister: Persister,
) {
    debug!("Audit worker started");

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Some(record) => persister.persist(record).await,
                None => break,
            },
            changed = stop_signal.changed() => {
                // A dropped handle keeps the worker alive until every sink is gone
                if changed.is_ok() {
                    receiver.close();
                }
                while let Some(record) = receiver.recv().await {
                    persister.persist(record).await;
                }
                break;
            },
        }
    }

    debug!("Audit worker stopped");
}

/// `AUDIT: [<timestamp>] User: <name>(<id>) | Operation: ...`
pub fn format_audit_line(record: &AuditRecord) -> String {
    format!(
        "AUDIT: [{}] User: {}({}) | Operation: {}.{} | Result: {} | Time: {}ms | Description: {} | IP: {} | Session: {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        record.username,
        display_or_null(record.user_id.as_ref()),
        record.unit_name,
        record.operation_name,
        record.result,
        record.execution_time_ms,
        record.description,
        record.ip_address,
        display_or_null(record.session_id.as_ref()),
    )
}

/// `AUDIT_ERROR: [<timestamp>] <error>` for failed operations
pub fn format_audit_error_line(record: &AuditRecord) -> Option<String> {
    record.error_message.as_ref().map(|error| {
        format!(
            "AUDIT_ERROR: [{}] {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            error
        )
    })
}

fn display_or_null<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "null".to_string(), ToString::to_string)
}
