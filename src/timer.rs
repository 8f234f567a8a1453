//! Daily wall-clock timers: "fire callback C every day at T in zone Z".
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::TimeOfDay;

/// Opaque reference to one registered daily firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(Uuid);

impl TimerHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// No-argument trigger invoked on every firing. Must return promptly.
pub type FireCallback = Arc<dyn Fn() + Send + Sync>;

pub trait Scheduler: Send + Sync {
    fn register(&self, at: TimeOfDay, tz: Tz, callback: FireCallback) -> Result<TimerHandle>;

    fn cancel(&self, handle: TimerHandle) -> Result<()>;
}

/// [`Scheduler`] running one sleeping tokio task per registration.
///
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct TokioScheduler {
    tasks: Mutex<HashMap<TimerHandle, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn register(&self, at: TimeOfDay, tz: Tz, callback: FireCallback) -> Result<TimerHandle> {
        let schedule = daily_schedule(at)?;
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?;
        let handle = TimerHandle::new();
        let task = tokio::spawn(async move {
            let mut last_fired: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                let Some(next) = next_firing(&schedule, tz, now, last_fired) else {
                    warn!(%handle, time = %at, "no upcoming occurrence; timer stopped");
                    return;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(%handle, time = %at, next = %next, "timer sleeping");
                tokio::time::sleep(wait).await;
                callback();
                last_fired = Some(next);
            }
        });
        tasks.insert(handle, task);
        info!(%handle, time = %at, timezone = %tz, "timer registered");
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> Result<()> {
        let task = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("timer registry poisoned"))?
            .remove(&handle)
            .ok_or_else(|| anyhow!("unknown timer {}", handle))?;
        task.abort();
        info!(%handle, "timer cancelled");
        Ok(())
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for (_, task) in tasks.drain() {
                task.abort();
            }
        }
    }
}

/// Cron schedule firing once a day at `at` (seconds field pinned to zero).
pub fn daily_schedule(at: TimeOfDay) -> Result<Schedule> {
    let expr = format!("0 {} {} * * *", at.minute(), at.hour());
    Schedule::from_str(&expr).with_context(|| format!("invalid cron expression '{}'", expr))
}

/// First occurrence of `schedule`, evaluated in `tz`, strictly after `after`.
pub fn next_occurrence(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

/// Next firing for a timer that last fired at `last_fired`.
///
/// An occurrence at or before `last_fired` never fires again, even if the wall
/// clock has stepped back since.
fn next_firing(
    schedule: &Schedule,
    tz: Tz,
    now: DateTime<Utc>,
    last_fired: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let from = last_fired.map_or(now, |last| last.max(now));
    next_occurrence(schedule, tz, from)
}
