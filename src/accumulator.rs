//! Shared counter guarded by a single mutex, with an unguarded twin.
//!
//! Both adjust paths do the same read, compute, write sequence. The guarded
//! path holds the accumulator's guard for the whole sequence; the unguarded
//! path does not, so concurrent adjustments overwrite each other and updates
//! are lost. The value lives in an atomic cell so the racy path stays
//! well-defined: a lost update is a stale store, never a torn one.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{BankConfig, CounterConfig};
use crate::error::{ConcurrencyError, Result};
use crate::pool::{WorkItem, WorkerPool};

/// Pause inserted between the read and the write of an adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceWindow {
    None,
    Yield,
    Sleep(Duration),
}

impl RaceWindow {
    pub fn from_micros(micros: u64) -> Self {
        if micros == 0 {
            RaceWindow::None
        } else {
            RaceWindow::Sleep(Duration::from_micros(micros))
        }
    }

    fn pause(self) {
        match self {
            RaceWindow::None => {}
            RaceWindow::Yield => thread::yield_now(),
            RaceWindow::Sleep(duration) => thread::sleep(duration),
        }
    }
}

#[derive(Debug)]
pub struct SynchronizedAccumulator {
    value: AtomicI64,
    guard: Mutex<()>,
    window: RaceWindow,
}

impl SynchronizedAccumulator {
    pub fn new(initial: i64, window: RaceWindow) -> Self {
        Self {
            value: AtomicI64::new(initial),
            guard: Mutex::new(()),
            window,
        }
    }

    /// Read, pause, write back with no guard held. Concurrent callers lose updates.
    pub fn unguarded_adjust(&self, amount: i64) {
        let current = self.value.load(Ordering::Relaxed);
        self.window.pause();
        self.value.store(current + amount, Ordering::Relaxed);
    }

    /// Same sequence as [`unguarded_adjust`](Self::unguarded_adjust), but under the guard.
    pub fn guarded_adjust(&self, amount: i64) {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.value.load(Ordering::Relaxed);
        self.window.pause();
        self.value.store(current + amount, Ordering::Relaxed);
    }

    pub fn adjust(&self, mode: Guarding, amount: i64) {
        match mode {
            Guarding::Guarded => self.guarded_adjust(amount),
            Guarding::Unguarded => self.unguarded_adjust(amount),
        }
    }

    /// Current value. Only exact once every adjusting worker has been joined.
    pub fn snapshot(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn reset(&self, value: i64) {
        let _held = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.value.store(value, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarding {
    Guarded,
    Unguarded,
}

impl fmt::Display for Guarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guarding::Guarded => write!(f, "guarded"),
            Guarding::Unguarded => write!(f, "unguarded"),
        }
    }
}

/// K workers each making M adjustments of `amount`, repeated over several trials.
#[derive(Debug, Clone)]
pub struct AccumulatorScenario {
    pub label: String,
    /// Prefix of the worker thread names, e.g. `Customer-3`.
    pub worker_label: String,
    pub workers: usize,
    pub adjustments_per_worker: u32,
    pub amount: i64,
    pub base: i64,
    pub trials: usize,
    pub window: RaceWindow,
    pub guarding: Guarding,
}

impl AccumulatorScenario {
    pub fn counter(config: &CounterConfig, guarding: Guarding) -> Self {
        Self {
            label: format!("counter ({guarding})"),
            worker_label: "Worker".into(),
            workers: config.workers,
            adjustments_per_worker: config.increments_per_worker,
            amount: 1,
            base: 0,
            trials: config.trials,
            window: config.race_window(),
            guarding,
        }
    }

    pub fn bank(config: &BankConfig, guarding: Guarding) -> Self {
        Self {
            label: format!("bank account ({guarding})"),
            worker_label: "Customer".into(),
            workers: config.customers,
            adjustments_per_worker: config.deposits_per_customer,
            amount: config.deposit_cents,
            base: config.opening_balance_cents,
            trials: config.trials,
            window: config.race_window(),
            guarding,
        }
    }

    /// V + K·M·A, or `None` when it does not fit in an `i64`.
    ///
    /// Every intermediate value of a run lies between V and this total, so
    /// when it fits no worker's write can overflow either.
    pub fn expected_total(&self) -> Option<i64> {
        i64::try_from(self.workers)
            .ok()?
            .checked_mul(i64::from(self.adjustments_per_worker))?
            .checked_mul(self.amount)?
            .checked_add(self.base)
    }

    pub fn run(&self) -> Result<TrialSummary> {
        let expected = self.expected_total().ok_or_else(|| ConcurrencyError::Overflow {
            scenario: self.label.clone(),
        })?;
        let accumulator = SynchronizedAccumulator::new(self.base, self.window);
        let pool = WorkerPool::new(self.worker_label.as_str());
        let mut trials = Vec::with_capacity(self.trials);

        for trial in 1..=self.trials {
            accumulator.reset(self.base);

            let items: Vec<WorkItem<()>> = (0..self.workers)
                .map(|_| {
                    let accumulator = &accumulator;
                    WorkItem::new(move || {
                        for _ in 0..self.adjustments_per_worker {
                            accumulator.adjust(self.guarding, self.amount);
                        }
                        Ok(())
                    })
                })
                .collect();

            let report = pool.launch_and_join(items);
            let failed_workers = report.len() - report.success_count();
            let value = accumulator.snapshot();
            debug!(label = %self.label, trial, value, failed_workers, "trial finished");

            trials.push(TrialResult {
                trial,
                value,
                failed_workers,
            });
        }

        let summary = TrialSummary {
            label: self.label.clone(),
            base: self.base,
            expected,
            trials,
        };
        info!(
            label = %summary.label,
            expected = summary.expected,
            exact = summary.exact_trials(),
            divergent = summary.divergent_trials(),
            "scenario complete"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub trial: usize,
    pub value: i64,
    pub failed_workers: usize,
}

impl TrialResult {
    pub fn succeeded(&self) -> bool {
        self.failed_workers == 0
    }
}

#[derive(Debug, Clone)]
pub struct TrialSummary {
    pub label: String,
    pub base: i64,
    pub expected: i64,
    pub trials: Vec<TrialResult>,
}

impl TrialSummary {
    /// How much of the intended change a final value failed to apply.
    ///
    /// Measured from the base, so it is positive for lost updates whether the
    /// adjustments raise or lower the value.
    pub fn shortfall(&self, value: i64) -> i64 {
        (self.expected - self.base).abs() - (value - self.base).abs()
    }

    pub fn exact_trials(&self) -> usize {
        self.trials.iter().filter(|t| t.value == self.expected).count()
    }

    pub fn divergent_trials(&self) -> usize {
        self.trials.len() - self.exact_trials()
    }

    pub fn failed_trials(&self) -> usize {
        self.trials.iter().filter(|t| !t.succeeded()).count()
    }

    /// Sum over all trials of the applied work each one lost.
    pub fn total_lost(&self) -> i64 {
        self.trials.iter().map(|t| self.shortfall(t.value)).sum()
    }

    /// True when every final value lies between the base and the expected
    /// total: updates were lost, never applied twice.
    pub fn never_exceeded(&self) -> bool {
        let low = self.base.min(self.expected);
        let high = self.base.max(self.expected);
        self.trials.iter().all(|t| (low..=high).contains(&t.value))
    }
}

/// Formats an amount held in cents as dollars, e.g. `$1000.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}${}.{:02}", cents / 100, cents % 100)
}
