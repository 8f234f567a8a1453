//! Keeps installed timers in sync with the subjects' stored notification times.
//!
//! Each cycle walks `Idle -> Fetching -> Diffing -> Applying -> Idle`. A failed
//! fetch leaves the current schedule untouched; a failed install or cancel
//! only affects that one subject.
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::Dispatcher;
use crate::model::DesiredTime;
use crate::schedule::{diff, ScheduleChange, ScheduleEntry, ScheduleTable};
use crate::store::Store;
use crate::timer::{FireCallback, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    Fetching,
    Diffing,
    Applying,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("failed to fetch desired schedule: {0}")]
    Fetch(String),
    #[error("failed to apply schedule for subject {subject_id}: {reason}")]
    Apply { subject_id: i64, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub installed: usize,
    pub replaced: usize,
    pub cancelled: usize,
    pub errors: Vec<ScheduleError>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.installed == 0 && self.replaced == 0 && self.cancelled == 0 && self.errors.is_empty()
    }
}

type TriggerFactory = Box<dyn Fn(&DesiredTime) -> FireCallback + Send + Sync>;

/// Sole owner and writer of the [`ScheduleTable`].
pub struct Reconciler {
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    timezone: Tz,
    make_trigger: TriggerFactory,
    table: ScheduleTable,
    state: ReconcileState,
}

impl Reconciler {
    pub fn new<F>(
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        timezone: Tz,
        make_trigger: F,
    ) -> Self
    where
        F: Fn(&DesiredTime) -> FireCallback + Send + Sync + 'static,
    {
        Self {
            store,
            scheduler,
            timezone,
            make_trigger: Box::new(make_trigger),
            table: ScheduleTable::new(),
            state: ReconcileState::Idle,
        }
    }

    /// Timers that launch a pipeline run through `dispatcher`.
    pub fn with_dispatcher(
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        timezone: Tz,
        dispatcher: Dispatcher,
    ) -> Self {
        Self::new(store, scheduler, timezone, move |d: &DesiredTime| {
            dispatcher.trigger(d.subject_id, d.contact.clone())
        })
    }

    pub fn table(&self) -> &ScheduleTable {
        &self.table
    }

    pub fn state(&self) -> ReconcileState {
        self.state
    }

    /// Run cycles forever at the given cadence, starting immediately.
    pub async fn run(mut self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.reconcile_once().await {
                Ok(report) if report.is_noop() => debug!("schedule unchanged"),
                Ok(report) => info!(
                    installed = report.installed,
                    replaced = report.replaced,
                    cancelled = report.cancelled,
                    failed = report.errors.len(),
                    active = self.table.len(),
                    "schedule reconciled"
                ),
                Err(err) => warn!(%err, "reconciliation cycle skipped; keeping current schedule"),
            }
        }
    }

    /// One full Fetching -> Diffing -> Applying cycle.
    #[instrument(skip_all)]
    pub async fn reconcile_once(&mut self) -> Result<ReconcileReport, ScheduleError> {
        self.state = ReconcileState::Fetching;
        let desired = match self.store.list_subject_desired_times().await {
            Ok(desired) => desired,
            Err(err) => {
                self.state = ReconcileState::Idle;
                return Err(ScheduleError::Fetch(format!("{err:#}")));
            }
        };

        self.state = ReconcileState::Diffing;
        let changes = diff(&self.table, &desired);

        self.state = ReconcileState::Applying;
        let mut report = ReconcileReport::default();
        for change in changes {
            let subject_id = change.subject_id();
            if let Err(reason) = self.apply(change, &mut report) {
                warn!(subject_id, %reason, "schedule change failed");
                report.errors.push(ScheduleError::Apply { subject_id, reason });
            }
        }

        self.state = ReconcileState::Idle;
        Ok(report)
    }

    /// The old timer is always cancelled before a new one is registered.
    fn apply(&mut self, change: ScheduleChange, report: &mut ReconcileReport) -> Result<(), String> {
        match change {
            ScheduleChange::Install(desired) => {
                self.install(desired)?;
                report.installed += 1;
            }
            ScheduleChange::Replace { previous, desired } => {
                self.scheduler
                    .cancel(previous)
                    .map_err(|e| format!("cancel {previous}: {e:#}"))?;
                let prior = self.table.remove(desired.subject_id);
                if let Err(reason) = self.install(desired) {
                    return Err(match prior {
                        Some(prior) => self.restore(prior, reason),
                        None => reason,
                    });
                }
                report.replaced += 1;
            }
            ScheduleChange::Cancel { subject_id, handle } => {
                self.scheduler
                    .cancel(handle)
                    .map_err(|e| format!("cancel {handle}: {e:#}"))?;
                self.table.remove(subject_id);
                info!(subject_id, "timer removed");
                report.cancelled += 1;
            }
        }
        Ok(())
    }

    fn install(&mut self, desired: DesiredTime) -> Result<(), String> {
        let callback = (self.make_trigger)(&desired);
        let handle = self
            .scheduler
            .register(desired.time, self.timezone, callback)
            .map_err(|e| format!("register {}: {e:#}", desired.time))?;
        info!(subject_id = desired.subject_id, time = %desired.time, "timer installed");
        self.table.upsert(ScheduleEntry {
            subject_id: desired.subject_id,
            contact: desired.contact,
            time: desired.time,
            handle,
        });
        Ok(())
    }

    /// Put back the subject's previous timer after a failed replacement.
    fn restore(&mut self, prior: ScheduleEntry, reason: String) -> String {
        let subject_id = prior.subject_id;
        let previous = DesiredTime {
            subject_id,
            contact: prior.contact,
            time: prior.time,
        };
        match self.install(previous) {
            Ok(()) => {
                warn!(subject_id, %reason, "replacement failed; previous time restored");
                reason
            }
            Err(restore) => format!("{reason}; restoring previous time failed: {restore}"),
        }
    }
}
