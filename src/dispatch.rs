//! Timer firing: launch one pipeline run per subject, never two at once.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::{DispatchOutcome, DispatchPipeline};
use crate::timer::FireCallback;

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Arc<DispatchPipeline>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<DispatchPipeline>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_in_flight(&self, subject_id: i64) -> bool {
        self.lock().contains(&subject_id)
    }

    /// Spawn a run for the subject unless one is already running.
    ///
    /// Returns immediately; an overlapping firing is logged and skipped.
    pub fn fire(&self, subject_id: i64, contact: &str) -> Option<JoinHandle<DispatchOutcome>> {
        if !self.lock().insert(subject_id) {
            warn!(subject_id, contact, "previous dispatch still running; skipping firing");
            return None;
        }
        let guard = InFlightGuard {
            set: self.in_flight.clone(),
            subject_id,
        };
        let pipeline = self.pipeline.clone();
        let contact = contact.to_string();
        Some(tokio::spawn(async move {
            let _guard = guard;
            let outcome = pipeline.run(&contact).await;
            log_outcome(subject_id, &outcome);
            outcome
        }))
    }

    /// Callback handed to the scheduler for one subject.
    pub fn trigger(&self, subject_id: i64, contact: String) -> FireCallback {
        let dispatcher = self.clone();
        Arc::new(move || {
            dispatcher.fire(subject_id, &contact);
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<i64>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }
}

struct InFlightGuard {
    set: Arc<Mutex<HashSet<i64>>>,
    subject_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.subject_id);
    }
}

fn log_outcome(subject_id: i64, outcome: &DispatchOutcome) {
    match &outcome.failure {
        Some(err) => error!(subject_id, contact = %outcome.contact, %err, "daily update failed"),
        None if outcome.degraded.is_empty() => {
            info!(subject_id, contact = %outcome.contact, "daily update completed")
        }
        None => {
            for issue in &outcome.degraded {
                warn!(subject_id, contact = %outcome.contact, %issue, "daily update degraded");
            }
        }
    }
}
