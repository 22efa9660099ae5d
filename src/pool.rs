//! One-shot launch/join primitive.
//!
//! Every call to [`WorkerPool::launch_and_join`] spawns one named OS thread per
//! [`WorkItem`], in input order, and does not return until every one of them has
//! finished. Work items run inside a thread scope, so they may borrow data from
//! the caller's stack (matrix operands, search partitions) without `Arc`.
//!
//! Failures stay with the worker that produced them: an `Err` returned by a work
//! item, or a panic caught at join time, is recorded in that worker's
//! [`WorkerReport`] and never cancels its siblings.

use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use tracing::{debug, warn};

use crate::error::{ConcurrencyError, Result};

/// Lifecycle of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Finished,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Created => 0,
            WorkerState::Running => 1,
            WorkerState::Finished => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            _ => WorkerState::Finished,
        }
    }
}

/// A unit of work: a closure plus whatever it captured, run exactly once.
pub struct WorkItem<'scope, T> {
    name: Option<String>,
    job: Box<dyn FnOnce() -> Result<T> + Send + 'scope>,
}

impl<'scope, T> WorkItem<'scope, T> {
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'scope,
    {
        Self {
            name: None,
            job: Box::new(job),
        }
    }

    /// Same as [`WorkItem::new`] but the worker thread carries `name`
    /// instead of the pool's `<label>-<n>` default.
    pub fn named<F>(name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'scope,
    {
        Self {
            name: Some(name.into()),
            job: Box::new(job),
        }
    }
}

#[derive(Debug)]
pub struct WorkerReport<T> {
    pub name: String,
    pub state: WorkerState,
    pub outcome: Result<T>,
}

impl<T> WorkerReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-worker outcomes, in the same order as the submitted work items.
#[derive(Debug)]
pub struct JoinReport<T> {
    workers: Vec<WorkerReport<T>>,
}

impl<T> JoinReport<T> {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerReport<T>> {
        self.workers.iter()
    }

    pub fn all_finished(&self) -> bool {
        self.workers.iter().all(|w| w.state == WorkerState::Finished)
    }

    pub fn success_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkerReport<T>> {
        self.workers.iter().filter(|w| !w.is_success())
    }

    pub fn into_outcomes(self) -> Vec<Result<T>> {
        self.workers.into_iter().map(|w| w.outcome).collect()
    }

    /// Collects every successful value, or the first recorded failure.
    pub fn into_values(self) -> Result<Vec<T>> {
        self.workers.into_iter().map(|w| w.outcome).collect()
    }
}

/// Launches a fixed batch of workers and waits for all of them.
///
/// The pool holds no threads between calls; `label` only names the workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    label: String,
}

impl WorkerPool {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn launch_and_join<'scope, T>(&self, items: Vec<WorkItem<'scope, T>>) -> JoinReport<T>
    where
        T: Send + 'scope,
    {
        let states: Vec<AtomicU8> = items
            .iter()
            .map(|_| AtomicU8::new(WorkerState::Created.as_u8()))
            .collect();

        let workers: Vec<WorkerReport<T>> = thread::scope(|scope| {
            let mut launched = Vec::with_capacity(items.len());

            for (index, (item, state)) in items.into_iter().zip(&states).enumerate() {
                let name = item
                    .name
                    .unwrap_or_else(|| format!("{}-{}", self.label, index + 1));
                let job = item.job;

                let spawned = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || {
                        let _finished = FinishOnDrop(state);
                        state.store(WorkerState::Running.as_u8(), Ordering::Release);
                        debug!("worker started");
                        job()
                    });
                launched.push((name, spawned));
            }

            launched
                .into_iter()
                .zip(&states)
                .map(|((name, spawned), state)| {
                    let outcome = match spawned {
                        Ok(handle) => match handle.join() {
                            Ok(outcome) => outcome,
                            Err(payload) => Err(ConcurrencyError::worker_panicked(
                                name.clone(),
                                panic_message(payload.as_ref()),
                            )),
                        },
                        Err(err) => Err(ConcurrencyError::SpawnFailed {
                            worker: name.clone(),
                            message: err.to_string(),
                        }),
                    };
                    if let Err(err) = &outcome {
                        warn!(worker = %name, error = %err, "worker failed");
                    }
                    WorkerReport {
                        state: WorkerState::from_u8(state.load(Ordering::Acquire)),
                        name,
                        outcome,
                    }
                })
                .collect()
        });

        debug!(pool = %self.label, "all workers joined");
        JoinReport { workers }
    }
}

/// Marks a worker finished even when its job unwinds.
struct FinishOnDrop<'a>(&'a AtomicU8);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(WorkerState::Finished.as_u8(), Ordering::Release);
        debug!("worker finished");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_outcomes_follow_input_order() {
        let pool = WorkerPool::new("order");
        let items: Vec<WorkItem<usize>> = (0..8)
            .map(|i| {
                WorkItem::new(move || {
                    // later items finish first
                    thread::sleep(Duration::from_millis((8 - i) as u64));
                    Ok(i * 10)
                })
            })
            .collect();

        let report = pool.launch_and_join(items);
        assert_eq!(report.len(), 8);
        assert!(report.all_finished());
        assert_eq!(
            report.into_values().unwrap(),
            vec![0, 10, 20, 30, 40, 50, 60, 70]
        );
    }

    #[test]
    fn test_join_is_a_full_barrier() {
        let done = AtomicUsize::new(0);
        let pool = WorkerPool::new("barrier");
        let items: Vec<WorkItem<()>> = (0..5)
            .map(|i| {
                let done = &done;
                WorkItem::new(move || {
                    thread::sleep(Duration::from_millis(i * 2));
                    done.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
            })
            .collect();

        pool.launch_and_join(items);
        assert_eq!(done.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_workers_are_named() {
        let pool = WorkerPool::new("Worker");
        let items = vec![
            WorkItem::new(|| Ok(thread::current().name().map(str::to_string))),
            WorkItem::named("Server-East", || {
                Ok(thread::current().name().map(str::to_string))
            }),
        ];

        let report = pool.launch_and_join(items);
        let names: Vec<_> = report.iter().map(|w| w.name.clone()).collect();
        assert_eq!(names, vec!["Worker-1", "Server-East"]);

        let seen = report.into_values().unwrap();
        assert_eq!(seen[0].as_deref(), Some("Worker-1"));
        assert_eq!(seen[1].as_deref(), Some("Server-East"));
    }

    #[test]
    fn test_panic_is_recorded_against_its_worker_only() {
        let completed = AtomicUsize::new(0);
        let pool = WorkerPool::new("partial");
        let items: Vec<WorkItem<u32>> = (0..4)
            .map(|i| {
                let completed = &completed;
                WorkItem::new(move || {
                    if i == 1 {
                        panic!("boom in worker {i}");
                    }
                    thread::sleep(Duration::from_millis(5));
                    completed.fetch_add(1, Ordering::Relaxed);
                    Ok(i)
                })
            })
            .collect();

        let report = pool.launch_and_join(items);
        assert!(report.all_finished());
        assert_eq!(report.success_count(), 3);
        assert_eq!(completed.load(Ordering::Relaxed), 3);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "partial-2");
        match &failures[0].outcome {
            Err(ConcurrencyError::WorkerPanicked { worker, message }) => {
                assert_eq!(worker, "partial-2");
                assert!(message.contains("boom in worker 1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_error_outcome_does_not_cancel_siblings() {
        let pool = WorkerPool::new("errors");
        let items: Vec<WorkItem<&str>> = vec![
            WorkItem::new(|| Err(ConcurrencyError::Interrupted { worker: "x".into() })),
            WorkItem::new(|| Ok("ok")),
        ];

        let outcomes = pool.launch_and_join(items).into_outcomes();
        assert!(outcomes[0].is_err());
        assert_eq!(outcomes[1], Ok("ok"));
    }

    #[test]
    fn test_items_can_borrow_caller_data() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let pool = WorkerPool::new("borrow");
        let items: Vec<WorkItem<i32>> = data
            .chunks(2)
            .map(|chunk| WorkItem::new(move || Ok(chunk.iter().sum())))
            .collect();

        let sums = pool.launch_and_join(items).into_values().unwrap();
        assert_eq!(sums, vec![3, 7, 11]);
        assert_eq!(data.len(), 6);
    }

    #[test]
    fn test_empty_batch_returns_immediately() {
        let report = WorkerPool::new("empty").launch_and_join::<()>(Vec::new());
        assert!(report.is_empty());
        assert!(report.all_finished());
    }
}
