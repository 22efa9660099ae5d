//! Cooperative multi-partition search with first-match-wins publication.
//!
//! One worker per partition scans its records in order. Before every record
//! it polls the shared found flag and stops as soon as the flag is up. The
//! first worker to match commits its hit under the slot's guard; any later
//! match is discarded. The flag is only raised after the hit is stored, so a
//! reader that sees the flag always finds a result behind it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{ConcurrencyError, Result};
use crate::pool::{WorkItem, WorkerPool};

/// A record that can be looked up by key.
pub trait Keyed {
    type Key: PartialEq + fmt::Display + Sync;

    fn key(&self) -> Self::Key;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: u32,
    pub name: String,
}

impl Student {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl Keyed for Student {
    type Key = u32;

    fn key(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Student{{id={}, name='{}'}}", self.id, self.name)
    }
}

/// A named slice of the dataset, e.g. one file server.
#[derive(Debug, Clone)]
pub struct Partition<T> {
    name: String,
    records: Vec<T>,
}

impl<T> Partition<T> {
    pub fn new(name: impl Into<String>, records: Vec<T>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The three file servers of the classroom demo.
pub fn student_servers() -> Vec<Partition<Student>> {
    vec![
        Partition::new(
            "Server-East",
            vec![
                Student::new(1001, "Alice"),
                Student::new(1002, "Bob"),
                Student::new(1003, "Charlie"),
            ],
        ),
        Partition::new(
            "Server-West",
            vec![
                Student::new(2001, "Diana"),
                Student::new(2002, "Eve"),
                Student::new(2003, "Frank"),
            ],
        ),
        Partition::new(
            "Server-Central",
            vec![
                Student::new(3001, "Grace"),
                Student::new(3002, "Henry"),
                Student::new(3003, "Iris"),
            ],
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit<T> {
    pub record: T,
    pub partition: String,
    /// Index of the record inside its partition.
    pub position: usize,
}

/// Found flag plus the result it guards. Written at most once.
#[derive(Debug)]
struct SearchSlot<T> {
    found: AtomicBool,
    result: Mutex<Option<Hit<T>>>,
}

impl<T> SearchSlot<T> {
    fn new() -> Self {
        Self {
            found: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    fn is_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// Stores `hit` unless another worker got there first.
    fn commit(&self, hit: Hit<T>) -> bool {
        let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if result.is_some() {
            return false;
        }
        *result = Some(hit);
        self.found.store(true, Ordering::Release);
        true
    }

    fn into_result(self) -> Option<Hit<T>> {
        self.result
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// This worker's hit was committed.
    Matched,
    /// Matched, but another worker had already committed.
    MatchDiscarded,
    /// Saw the found flag and quit before the end of the partition.
    StoppedEarly,
    /// Reached the end without a match.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub partition: String,
    pub partition_len: usize,
    pub inspected: usize,
    /// Records this worker finished inspecting after the flag was already up.
    pub inspected_after_found: usize,
    pub outcome: ScanOutcome,
}

/// One entry per partition, in partition order. A worker that failed keeps
/// its slot as an `Err` so a partial search is never mistaken for a miss.
#[derive(Debug)]
pub struct SearchReport<T> {
    pub result: Result<Hit<T>>,
    pub scans: Vec<Result<ScanReport>>,
}

impl<T> SearchReport<T> {
    pub fn completed_scans(&self) -> impl Iterator<Item = &ScanReport> {
        self.scans.iter().filter_map(|scan| scan.as_ref().ok())
    }

    pub fn failed_scans(&self) -> impl Iterator<Item = &ConcurrencyError> {
        self.scans.iter().filter_map(|scan| scan.as_ref().err())
    }
}

#[derive(Debug, Clone)]
pub struct CooperativeMultiSearch {
    record_delay: Duration,
}

impl CooperativeMultiSearch {
    /// `record_delay` is the simulated cost of inspecting one record.
    pub fn new(record_delay: Duration) -> Self {
        Self { record_delay }
    }

    pub fn search<T>(&self, key: &T::Key, partitions: &[Partition<T>]) -> Result<Hit<T>>
    where
        T: Keyed + Clone + Send + Sync,
    {
        self.search_with_report(key, partitions).result
    }

    /// Searches every partition concurrently and reports how each worker ended.
    pub fn search_with_report<T>(&self, key: &T::Key, partitions: &[Partition<T>]) -> SearchReport<T>
    where
        T: Keyed + Clone + Send + Sync,
    {
        info!(
            "Searching for key {key} across {} partitions...",
            partitions.len()
        );
        let slot = SearchSlot::new();

        let items: Vec<WorkItem<ScanReport>> = partitions
            .iter()
            .map(|partition| {
                let slot = &slot;
                WorkItem::named(partition.name(), move || {
                    Ok(self.scan(key, partition, slot))
                })
            })
            .collect();

        let scans: Vec<Result<ScanReport>> = WorkerPool::new("search")
            .launch_and_join(items)
            .into_outcomes();

        // a miss only counts once every partition was scanned to the end
        let failure = scans.iter().find_map(|scan| scan.as_ref().err());
        let result = match (slot.into_result(), failure) {
            (Some(hit), _) => {
                info!(partition = %hit.partition, "search succeeded");
                Ok(hit)
            }
            (None, Some(err)) => {
                warn!(error = %err, "search incomplete, a partition was not fully scanned");
                Err(err.clone())
            }
            (None, None) => {
                info!("key {key} not found");
                Err(ConcurrencyError::not_found(key))
            }
        };

        SearchReport { result, scans }
    }

    fn scan<T>(&self, key: &T::Key, partition: &Partition<T>, slot: &SearchSlot<T>) -> ScanReport
    where
        T: Keyed + Clone,
    {
        info!("Thread searching {}...", partition.name());
        let mut report = ScanReport {
            partition: partition.name().to_string(),
            partition_len: partition.len(),
            inspected: 0,
            inspected_after_found: 0,
            outcome: ScanOutcome::Exhausted,
        };

        for (position, record) in partition.records().iter().enumerate() {
            if slot.is_found() {
                info!(
                    "Thread on {} stopping early - key found elsewhere",
                    partition.name()
                );
                report.outcome = ScanOutcome::StoppedEarly;
                return report;
            }

            thread::sleep(self.record_delay);
            report.inspected += 1;

            if record.key() == *key {
                let hit = Hit {
                    record: record.clone(),
                    partition: partition.name().to_string(),
                    position,
                };
                report.outcome = if slot.commit(hit) {
                    info!("*** Key {key} found on {}! ***", partition.name());
                    ScanOutcome::Matched
                } else {
                    debug!(partition = partition.name(), "late match discarded");
                    ScanOutcome::MatchDiscarded
                };
                return report;
            }

            if slot.is_found() {
                report.inspected_after_found += 1;
            }
        }

        info!("Thread finished searching {} - not found", partition.name());
        report
    }
}
