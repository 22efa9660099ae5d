//! Thread basics: the current thread, sleeping, yielding, and two workers
//! interleaving into one shared transcript.

use std::hint::black_box;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::Result;
use crate::pool::{WorkItem, WorkerPool};

/// What [`thread_tour`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTour {
    /// Name of the calling thread, `<unnamed>` when it has none.
    pub caller: String,
    /// How long the caller actually slept.
    pub slept: Duration,
    /// Name of the worker launched for the task.
    pub worker: String,
}

fn current_name() -> String {
    thread::current().name().unwrap_or("<unnamed>").to_string()
}

/// Names the current thread, naps, yields, then launches one task on a
/// worker of its own and reports which thread ran it.
pub fn thread_tour(nap: Duration) -> Result<ThreadTour> {
    let caller = current_name();
    info!("current thread = {caller}");
    info!("going to sleep...");
    let started = Instant::now();
    thread::sleep(nap);
    let slept = started.elapsed();
    info!("ah, that was nice");

    info!("letting someone else run");
    thread::yield_now();
    info!("back");

    let worker = WorkerPool::new("task")
        .launch_and_join(vec![WorkItem::new(|| {
            let name = current_name();
            info!("now in {name}");
            Ok(name)
        })])
        .into_values()?
        .pop()
        .unwrap_or_default();

    Ok(ThreadTour {
        caller,
        slept,
        worker,
    })
}

/// Each worker appends its character `repetitions` times, doing a little
/// floating-point busywork between appends, then appends it once in upper
/// case to mark that it finished. The order of the transcript is whatever
/// the scheduler produced.
pub fn interleave(letters: &[char], repetitions: usize, busywork: u32) -> Result<String> {
    let transcript = Mutex::new(String::with_capacity(letters.len() * (repetitions + 1)));

    let items: Vec<WorkItem<()>> = letters
        .iter()
        .map(|&letter| {
            let transcript = &transcript;
            WorkItem::new(move || {
                for i in 0..repetitions {
                    transcript
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(letter);
                    for j in 0..busywork {
                        black_box(f64::from(i as u32).hypot(f64::from(j)));
                    }
                }
                transcript
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(letter.to_ascii_uppercase());
                Ok(())
            })
        })
        .collect();

    WorkerPool::new("interleave")
        .launch_and_join(items)
        .into_values()?;

    let transcript = transcript.into_inner().unwrap_or_else(PoisonError::into_inner);
    info!("{transcript}");
    Ok(transcript)
}

/// Switches between letters, a rough measure of how interleaved a run was.
pub fn switch_count(transcript: &str) -> usize {
    transcript
        .chars()
        .zip(transcript.chars().skip(1))
        .filter(|(a, b)| !a.eq_ignore_ascii_case(b))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_letter_is_written_in_full() {
        for _ in 0..3 {
            let transcript = interleave(&['a', 'b'], 100, 1_000).unwrap();
            assert_eq!(transcript.len(), 202);
            assert_eq!(transcript.matches('a').count(), 100);
            assert_eq!(transcript.matches('b').count(), 100);
            assert_eq!(transcript.matches('A').count(), 1);
            assert_eq!(transcript.matches('B').count(), 1);

            // the upper-case marker comes after that worker's last letter
            assert!(transcript.find('A').unwrap() > transcript.rfind('a').unwrap());
            assert!(transcript.find('B').unwrap() > transcript.rfind('b').unwrap());
        }
    }

    #[test]
    fn test_thread_tour() {
        let tour = thread_tour(Duration::from_millis(5)).unwrap();
        assert!(tour.slept >= Duration::from_millis(5));
        assert_eq!(tour.worker, "task-1");
        assert_ne!(tour.worker, tour.caller);
    }

    #[test]
    fn test_thread_tour_from_a_named_thread() {
        let tour = thread::Builder::new()
            .name("main-demo".into())
            .spawn(|| thread_tour(Duration::ZERO))
            .unwrap()
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(tour.caller, "main-demo");
    }

    #[test]
    fn test_switch_count() {
        assert_eq!(switch_count(""), 0);
        assert_eq!(switch_count("aaaA"), 0);
        assert_eq!(switch_count("aabbAB"), 3);
    }

    #[test]
    fn test_single_worker_is_sequential() {
        let transcript = interleave(&['z'], 5, 0).unwrap();
        assert_eq!(transcript, "zzzzzZ");
    }
}
