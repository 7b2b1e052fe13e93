//! Weekly refresh trigger.
//!
//! A single process-wide ticker owned by the caller through [`SchedulerHandle`].
//! Every `check_every` it compares the wall clock with the next due instant and,
//! when due, runs every retailer through the orchestrator. Retailers are never
//! scheduled individually.

use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How often the ticker looks at the clock.
const DEFAULT_CHECK_SECS: u64 = 60;

/// A day of the week and a local time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub at: NaiveTime,
}

impl Default for WeeklySchedule {
    /// Wednesday 10:00, after the new catalogues go live.
    fn default() -> Self {
        Self {
            weekday: Weekday::Wed,
            at: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl WeeklySchedule {
    /// Parse a day name (`wed`, `Wednesday`) and an `HH:MM` time.
    pub fn parse(day: &str, at: &str) -> Result<Self, String> {
        let weekday = Weekday::from_str(day.trim()).map_err(|_| format!("unknown day {day:?}"))?;
        let at = NaiveTime::parse_from_str(at.trim(), "%H:%M")
            .map_err(|e| format!("bad time {at:?} (expected HH:MM): {e}"))?;
        Ok(Self { weekday, at })
    }

    /// First occurrence strictly after `now`, in `now`'s time zone.
    ///
    /// Local times skipped by a DST transition fall through to the following
    /// week; `None` only if three consecutive weeks are unrepresentable.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();
        let days_ahead = (7 + self.weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            % 7;

        (0..3)
            .map(|week| days_ahead + 7 * week)
            .filter_map(|offset| today.checked_add_days(chrono::Days::new(offset as u64)))
            .filter_map(|date| tz.from_local_datetime(&date.and_time(self.at)).earliest())
            .find(|candidate| candidate > now)
    }
}

impl std::fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "every {} at {}", self.weekday, self.at.format("%H:%M"))
    }
}

/// Running weekly trigger. Dropping the handle does not stop the task; call
/// [`SchedulerHandle::stop`].
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the ticker and wait for an in-progress run to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!("scheduler task ended abnormally: {e}");
        }
    }

    /// Whether the ticker task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start the weekly trigger.
pub fn start(orchestrator: Arc<Orchestrator>, schedule: WeeklySchedule) -> SchedulerHandle {
    start_with_interval(orchestrator, schedule, Duration::from_secs(DEFAULT_CHECK_SECS))
}

/// Start the weekly trigger with a custom clock-check interval.
pub fn start_with_interval(
    orchestrator: Arc<Orchestrator>,
    schedule: WeeklySchedule,
    check_every: Duration,
) -> SchedulerHandle {
    match schedule.next_after(&Local::now()) {
        Some(first_due) => start_from(orchestrator, schedule, first_due, check_every),
        None => {
            tracing::error!("schedule {schedule} has no representable next run; scheduler not started");
            SchedulerHandle {
                shutdown: Arc::new(Notify::new()),
                task: tokio::spawn(async {}),
            }
        }
    }
}

/// Start the trigger with an explicit first due instant. A `first_due` in the
/// past fires on the first tick.
pub fn start_from(
    orchestrator: Arc<Orchestrator>,
    schedule: WeeklySchedule,
    first_due: DateTime<Local>,
    check_every: Duration,
) -> SchedulerHandle {
    let shutdown = Arc::new(Notify::new());
    let stop = Arc::clone(&shutdown);

    let task = tokio::spawn(async move {
        let mut next_due = first_due;
        tracing::info!("scheduler started: {schedule}, next run at {next_due}");

        let mut ticker = tokio::time::interval(check_every);
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    tracing::info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if orchestrator.is_cancelled() {
                        tracing::info!("scheduler stopping after cancellation");
                        break;
                    }
                    let now = Local::now();
                    if now < next_due {
                        continue;
                    }
                    tracing::info!("scheduled refresh due ({next_due}), running all retailers");
                    let summary = orchestrator.run_all().await;
                    tracing::info!(
                        "scheduled refresh finished: {} succeeded, {} failed",
                        summary.succeeded(),
                        summary.failed()
                    );
                    if orchestrator.is_cancelled() {
                        tracing::info!("scheduler stopping after cancellation");
                        break;
                    }
                    match schedule.next_after(&Local::now()) {
                        Some(next) => {
                            next_due = next;
                            tracing::info!("next scheduled refresh at {next_due}");
                        }
                        None => {
                            tracing::error!("schedule {schedule} has no representable next run");
                            break;
                        }
                    }
                }
            }
        }
    });

    SchedulerHandle { shutdown, task }
}
