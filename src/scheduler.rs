//! Recurring execution of the sync pipeline.
//!
//! The scheduler is a two-state machine (`Idle` / `Armed`). The polling loop
//! checks the armed job once per poll period and runs it to completion before
//! sleeping again, so at most one run is ever in flight. Time comes from an
//! injectable [`Clock`] so due-checks can be tested without waiting.

use crate::config::ScheduleConfig;
use crate::errors::AppError;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

static TIME_OF_DAY: OnceLock<Option<Regex>> = OnceLock::new();

/// Recurrence of the armed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    pub fn period(&self) -> ChronoDuration {
        match self {
            Cadence::Hourly => ChronoDuration::hours(1),
            Cadence::Daily => ChronoDuration::days(1),
            Cadence::Weekly => ChronoDuration::weeks(1),
        }
    }
}

impl FromStr for Cadence {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(Cadence::Hourly),
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            other => Err(AppError::Scheduling(format!(
                "unrecognized schedule cadence '{}' (expected hourly, daily or weekly)",
                other
            ))),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
        })
    }
}

/// Parses `HH:MM` (or `HH:MM:SS`) as a local time of day.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, AppError> {
    let invalid = || AppError::Scheduling(format!("invalid time of day '{}' (expected HH:MM)", raw));
    let re = TIME_OF_DAY
        .get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)(?::([0-5]\d))?$").ok())
        .as_ref()
        .ok_or_else(invalid)?;
    let caps = re.captures(raw.trim()).ok_or_else(invalid)?;

    let field = |i: usize| -> u32 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    NaiveTime::from_hms_opt(field(1), field(2), field(3)).ok_or_else(invalid)
}

/// A validated schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDescriptor {
    pub cadence: Cadence,
    /// Only meaningful for daily and weekly jobs.
    pub time_of_day: Option<NaiveTime>,
}

impl ScheduleDescriptor {
    pub fn hourly() -> Self {
        Self {
            cadence: Cadence::Hourly,
            time_of_day: None,
        }
    }

    pub fn at(cadence: Cadence, time_of_day: NaiveTime) -> Self {
        Self {
            cadence,
            time_of_day: (cadence != Cadence::Hourly).then_some(time_of_day),
        }
    }

    /// Validates the persisted schedule section. `enabled` is not checked here.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, AppError> {
        let cadence: Cadence = config.cadence.parse()?;
        match cadence {
            Cadence::Hourly => Ok(Self::hourly()),
            _ => Ok(Self::at(cadence, parse_time_of_day(&config.time)?)),
        }
    }

    /// First firing time strictly after `now`.
    pub fn first_run(&self, now: NaiveDateTime) -> Result<NaiveDateTime, AppError> {
        let overflow = || AppError::Scheduling("next run time out of range".to_string());
        match (self.cadence, self.time_of_day) {
            (Cadence::Hourly, _) | (_, None) => {
                now.checked_add_signed(self.cadence.period()).ok_or_else(overflow)
            }
            (_, Some(time)) => {
                let today = now.date().and_time(time);
                if today > now {
                    Ok(today)
                } else {
                    today
                        .checked_add_signed(ChronoDuration::days(1))
                        .ok_or_else(overflow)
                }
            }
        }
    }

    /// Next firing time after a run that was due at `previous`, skipping any
    /// slots that passed while the job was running.
    pub fn following_run(
        &self,
        previous: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<NaiveDateTime, AppError> {
        let overflow = || AppError::Scheduling("next run time out of range".to_string());
        let period = self.cadence.period();
        let mut next = previous.checked_add_signed(period).ok_or_else(overflow)?;
        if next <= now {
            let period_secs = period.num_seconds();
            let behind = (now - next).num_seconds() / period_secs + 1;
            let skip = behind
                .checked_mul(period_secs)
                .and_then(ChronoDuration::try_seconds)
                .ok_or_else(overflow)?;
            next = next.checked_add_signed(skip).ok_or_else(overflow)?;
        }
        Ok(next)
    }
}

/// Registered recurring job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedJob {
    pub descriptor: ScheduleDescriptor,
    pub next_run: NaiveDateTime,
    pub last_run: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed(ArmedJob),
}

/// Source of time for the polling loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
    async fn sleep(&self, duration: Duration);
}

/// Local wall clock with a real tokio sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose `sleep` advances time instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let (Ok(mut now), Ok(step)) = (self.now.lock(), ChronoDuration::from_std(by)) {
            *now += step;
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Totals reported when the polling loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub runs: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    state: SchedulerState,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SchedulerState::Armed(_))
    }

    pub fn next_run(&self) -> Option<NaiveDateTime> {
        match &self.state {
            SchedulerState::Armed(job) => Some(job.next_run),
            SchedulerState::Idle => None,
        }
    }

    /// Idle/Armed → Armed with `descriptor`; returns the first firing time.
    pub fn arm(
        &mut self,
        descriptor: ScheduleDescriptor,
        now: NaiveDateTime,
    ) -> Result<NaiveDateTime, AppError> {
        let next_run = descriptor.first_run(now)?;
        self.state = SchedulerState::Armed(ArmedJob {
            descriptor,
            next_run,
            last_run: None,
        });
        Ok(next_run)
    }

    pub fn disarm(&mut self) {
        self.state = SchedulerState::Idle;
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        matches!(&self.state, SchedulerState::Armed(job) if job.next_run <= now)
    }

    /// Records a run that started at `started` and finished at `finished`.
    pub fn mark_ran(&mut self, started: NaiveDateTime, finished: NaiveDateTime) -> Result<(), AppError> {
        let SchedulerState::Armed(job) = &mut self.state else {
            return Err(AppError::Scheduling("no job armed".to_string()));
        };
        job.next_run = job.descriptor.following_run(job.next_run, finished)?;
        job.last_run = Some(started);
        Ok(())
    }

    /// Polls every `poll` and runs `job` whenever the armed job is due.
    ///
    /// The job runs to completion before the next sleep; a failed run is
    /// logged and the loop keeps going. The loop ends cleanly when `shutdown`
    /// resolves (checked only while sleeping, never mid-run) and with an error
    /// when nothing is armed or the next firing time cannot be computed.
    pub async fn run<C, F, Fut, T, S>(
        &mut self,
        clock: &C,
        poll: Duration,
        mut job: F,
        shutdown: S,
    ) -> Result<RunSummary, AppError>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        S: Future<Output = ()>,
    {
        if !self.is_armed() {
            return Err(AppError::Scheduling(
                "no job armed; schedule a job before running".to_string(),
            ));
        }

        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();
        tracing::info!(next_run = ?self.next_run(), "Starting scheduled job loop");

        loop {
            let now = clock.now();
            if self.is_due(now) {
                tracing::info!("Scheduled job due, running");
                summary.runs += 1;
                if let Err(e) = job().await {
                    summary.failures += 1;
                    tracing::error!(error = %e, "Scheduled run failed");
                }
                self.mark_ran(now, clock.now())?;
                tracing::info!(next_run = ?self.next_run(), "Next scheduled run");
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(runs = summary.runs, failures = summary.failures, "Scheduled job loop interrupted, shutting down");
                    return Ok(summary);
                }
                _ = clock.sleep(poll) => {}
            }
        }
    }
}
