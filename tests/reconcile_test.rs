use anyhow::{anyhow, Result};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use farm_digest::model::{DesiredTime, Reading, Subject, TimeOfDay};
use farm_digest::reconcile::{ReconcileState, Reconciler, ScheduleError};
use farm_digest::store::Store;
use farm_digest::timer::{FireCallback, Scheduler, TimerHandle};

#[derive(Default)]
struct DesiredTimesStore {
    desired: Mutex<Vec<DesiredTime>>,
    fail_fetch: AtomicBool,
}

impl DesiredTimesStore {
    fn set(&self, desired: Vec<DesiredTime>) {
        *self.desired.lock().unwrap() = desired;
    }
}

#[async_trait::async_trait]
impl Store for DesiredTimesStore {
    async fn list_subject_desired_times(&self) -> Result<Vec<DesiredTime>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("database is locked"));
        }
        Ok(self.desired.lock().unwrap().clone())
    }

    async fn get_subject_by_contact(&self, _contact: &str) -> Result<Option<Subject>> {
        Err(anyhow!("not used"))
    }

    async fn get_recent_readings(&self, _subject_id: i64, _limit: i64) -> Result<Vec<Reading>> {
        Err(anyhow!("not used"))
    }

    async fn append_conversation_record(
        &self,
        _subject_id: i64,
        _prompt_label: &str,
        _text: &str,
        _follow_up: bool,
    ) -> Result<()> {
        Err(anyhow!("not used"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Register(TimeOfDay),
    Cancel(TimerHandle),
}

#[derive(Default)]
struct RecordingScheduler {
    active: Mutex<HashMap<TimerHandle, (TimeOfDay, FireCallback)>>,
    ops: Mutex<Vec<Op>>,
    reject_times: Mutex<HashSet<TimeOfDay>>,
    reject_cancel: AtomicBool,
}

impl RecordingScheduler {
    fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    fn active_times(&self) -> Vec<TimeOfDay> {
        let mut times: Vec<TimeOfDay> = self.active.lock().unwrap().values().map(|(t, _)| *t).collect();
        times.sort();
        times
    }

    fn is_active(&self, handle: TimerHandle) -> bool {
        self.active.lock().unwrap().contains_key(&handle)
    }

    /// Invoke every live callback once, as if all timers fired together.
    fn fire_all(&self) {
        let callbacks: Vec<FireCallback> =
            self.active.lock().unwrap().values().map(|(_, cb)| cb.clone()).collect();
        for cb in callbacks {
            cb();
        }
    }
}

impl Scheduler for RecordingScheduler {
    fn register(&self, at: TimeOfDay, _tz: Tz, callback: FireCallback) -> Result<TimerHandle> {
        if self.reject_times.lock().unwrap().contains(&at) {
            return Err(anyhow!("scheduler rejected {}", at));
        }
        let handle = TimerHandle::new();
        self.ops.lock().unwrap().push(Op::Register(at));
        self.active.lock().unwrap().insert(handle, (at, callback));
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> Result<()> {
        if self.reject_cancel.load(Ordering::SeqCst) {
            return Err(anyhow!("scheduler refused cancel"));
        }
        self.active
            .lock()
            .unwrap()
            .remove(&handle)
            .ok_or_else(|| anyhow!("unknown timer"))?;
        self.ops.lock().unwrap().push(Op::Cancel(handle));
        Ok(())
    }
}

struct Harness {
    store: Arc<DesiredTimesStore>,
    scheduler: Arc<RecordingScheduler>,
    fired: Arc<Mutex<Vec<i64>>>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let store = Arc::new(DesiredTimesStore::default());
    let scheduler = Arc::new(RecordingScheduler::default());
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let reconciler = Reconciler::new(
        store.clone(),
        scheduler.clone(),
        chrono_tz::Asia::Karachi,
        move |d: &DesiredTime| -> FireCallback {
            let sink = sink.clone();
            let subject_id = d.subject_id;
            Arc::new(move || sink.lock().unwrap().push(subject_id))
        },
    );
    Harness {
        store,
        scheduler,
        fired,
        reconciler,
    }
}

fn t(h: i64, m: i64) -> TimeOfDay {
    TimeOfDay::new(h, m).unwrap()
}

fn desired(id: i64, at: TimeOfDay) -> DesiredTime {
    DesiredTime {
        subject_id: id,
        contact: format!("92300000000{id}"),
        time: at,
    }
}

/// Every table entry owns exactly one live timer and nothing else is live.
fn assert_one_timer_per_subject(h: &Harness) {
    let table = h.reconciler.table();
    assert_eq!(h.scheduler.active.lock().unwrap().len(), table.len());
    for entry in table.entries() {
        assert!(h.scheduler.is_active(entry.handle));
    }
}

#[tokio::test]
async fn installs_once_and_is_idempotent() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15)), desired(2, t(18, 0))]);

    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.installed, 2);
    assert_eq!(h.reconciler.state(), ReconcileState::Idle);
    assert_one_timer_per_subject(&h);

    let ops_before = h.scheduler.ops().len();
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert!(report.is_noop());
    assert_eq!(h.scheduler.ops().len(), ops_before, "no cancel/install on unchanged input");

    h.scheduler.fire_all();
    let mut fired = h.fired.lock().unwrap().clone();
    fired.sort();
    assert_eq!(fired, vec![1, 2]);
}

#[tokio::test]
async fn time_change_cancels_old_before_installing_new() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15))]);
    h.reconciler.reconcile_once().await.unwrap();
    let old = h.reconciler.table().get(1).unwrap().handle;

    h.store.set(vec![desired(1, t(9, 40))]);
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.replaced, 1);

    assert_eq!(
        h.scheduler.ops(),
        vec![
            Op::Register(t(9, 15)),
            Op::Cancel(old),
            Op::Register(t(9, 40)),
        ]
    );
    assert_eq!(h.scheduler.active_times(), vec![t(9, 40)]);
    let entry = h.reconciler.table().get(1).unwrap();
    assert_eq!(entry.time, t(9, 40));
    assert_ne!(entry.handle, old);
    assert_one_timer_per_subject(&h);

    h.scheduler.fire_all();
    assert_eq!(*h.fired.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn removed_subject_is_cancelled() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15)), desired(2, t(10, 0))]);
    h.reconciler.reconcile_once().await.unwrap();

    h.store.set(vec![desired(2, t(10, 0))]);
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert!(h.reconciler.table().get(1).is_none());
    assert_eq!(h.scheduler.active_times(), vec![t(10, 0)]);
    assert_one_timer_per_subject(&h);
}

#[tokio::test]
async fn fetch_failure_keeps_current_schedule() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15))]);
    h.reconciler.reconcile_once().await.unwrap();
    let ops_before = h.scheduler.ops();

    h.store.fail_fetch.store(true, Ordering::SeqCst);
    h.store.set(Vec::new());
    let err = h.reconciler.reconcile_once().await.unwrap_err();
    assert!(matches!(err, ScheduleError::Fetch(_)));
    assert_eq!(h.reconciler.state(), ReconcileState::Idle);
    assert_eq!(h.scheduler.ops(), ops_before);
    assert_eq!(h.reconciler.table().len(), 1);
    assert_one_timer_per_subject(&h);
}

#[tokio::test]
async fn install_failure_is_isolated_and_retried_next_cycle() {
    let mut h = harness();
    h.scheduler.reject_times.lock().unwrap().insert(t(7, 0));
    h.store.set(vec![desired(1, t(7, 0)), desired(2, t(8, 0))]);

    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.installed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        report.errors[0],
        ScheduleError::Apply { subject_id: 1, .. }
    ));
    assert!(h.reconciler.table().get(1).is_none());
    assert!(h.reconciler.table().get(2).is_some());

    h.scheduler.reject_times.lock().unwrap().clear();
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.installed, 1);
    assert!(report.errors.is_empty());
    assert_one_timer_per_subject(&h);
}

#[tokio::test]
async fn cancel_failure_leaves_prior_entry() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15))]);
    h.reconciler.reconcile_once().await.unwrap();
    let old = h.reconciler.table().get(1).unwrap().clone();

    h.scheduler.reject_cancel.store(true, Ordering::SeqCst);
    h.store.set(vec![desired(1, t(9, 40))]);
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.replaced, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(h.reconciler.table().get(1), Some(&old));
    assert_eq!(h.scheduler.active_times(), vec![t(9, 15)]);

    h.scheduler.reject_cancel.store(false, Ordering::SeqCst);
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(h.scheduler.active_times(), vec![t(9, 40)]);
    assert_one_timer_per_subject(&h);
}

#[tokio::test]
async fn rejected_new_time_restores_previous_timer() {
    let mut h = harness();
    h.store.set(vec![desired(1, t(9, 15))]);
    h.reconciler.reconcile_once().await.unwrap();
    let old = h.reconciler.table().get(1).unwrap().clone();

    h.scheduler.reject_times.lock().unwrap().insert(t(9, 40));
    h.store.set(vec![desired(1, t(9, 40))]);
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.replaced, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        report.errors[0],
        ScheduleError::Apply { subject_id: 1, .. }
    ));

    let entry = h.reconciler.table().get(1).unwrap();
    assert_eq!(entry.time, t(9, 15));
    assert_eq!(entry.contact, old.contact);
    assert_ne!(entry.handle, old.handle);
    assert_eq!(h.scheduler.active_times(), vec![t(9, 15)]);
    assert_one_timer_per_subject(&h);

    h.scheduler.fire_all();
    assert_eq!(*h.fired.lock().unwrap(), vec![1]);

    // Still rejected: the old slot survives every cycle.
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.errors.len(), 1);
    assert_eq!(h.scheduler.active_times(), vec![t(9, 15)]);

    h.scheduler.reject_times.lock().unwrap().clear();
    let report = h.reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(h.scheduler.active_times(), vec![t(9, 40)]);
    assert_one_timer_per_subject(&h);
}
