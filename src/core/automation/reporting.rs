use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{AutomationEvent, Job};
use crate::core::api::{BidState, BidStatusSink, StatusReport};

/// Status report for `event` on `job`, when the platform tracks this job.
/// Jobs without a business id and informational events report nothing.
pub fn report_for(job: &Job, event: &AutomationEvent, now: i64) -> Option<StatusReport> {
    let business_id = job.business_id.clone()?;
    let (state, step, message) = match event {
        AutomationEvent::Progress { step, message, .. } => (
            BidState::InProgress,
            step.clone(),
            message.clone().unwrap_or_else(|| format!("Running {}", step)),
        ),
        AutomationEvent::Completed { message } => (
            BidState::Completed,
            "finalizado".to_string(),
            message
                .clone()
                .unwrap_or_else(|| "Automation completed".to_string()),
        ),
        AutomationEvent::Error { error } => (
            BidState::Error,
            job.current_step
                .clone()
                .unwrap_or_else(|| "automatizacion".to_string()),
            error.clone(),
        ),
        AutomationEvent::Warning { .. } | AutomationEvent::Info { .. } => return None,
    };
    let timestamp = chrono::DateTime::from_timestamp_millis(now)
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();
    Some(StatusReport {
        business_id,
        state,
        message,
        step,
        timestamp,
        automation_id: job.id.clone(),
        progress: job.progress,
    })
}

/// Current state first; the history entry only follows a delivered update.
pub async fn deliver(sink: &dyn BidStatusSink, report: &StatusReport) {
    if let Err(e) = sink.update_status(report).await {
        warn!(
            job = %report.automation_id,
            business_id = %report.business_id,
            "Bid status update failed: {}",
            e
        );
        return;
    }
    if let Err(e) = sink.insert_status_log(report).await {
        warn!(job = %report.automation_id, "Bid status history write failed: {}", e);
    }
}

/// Delivers reports one at a time, in submission order, off the caller's path.
pub struct StatusRelay {
    sink: Arc<dyn BidStatusSink>,
    queue: OnceLock<mpsc::UnboundedSender<StatusReport>>,
}

impl StatusRelay {
    pub fn new(sink: Arc<dyn BidStatusSink>) -> Self {
        Self {
            sink,
            queue: OnceLock::new(),
        }
    }

    pub fn submit(&self, report: StatusReport) {
        let queue = self.queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<StatusReport>();
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                while let Some(report) = rx.recv().await {
                    deliver(sink.as_ref(), &report).await;
                }
            });
            tx
        });
        if let Err(e) = queue.send(report) {
            debug!("Status relay closed, dropping report for {}", e.0.business_id);
        }
    }
}
