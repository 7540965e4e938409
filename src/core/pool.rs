//! Bounded worker pool.
//!
//! Scoped threads drain a shared job queue. Used for credential file
//! decrypts during scanning and for commit/rollback writes.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::thread;

use tracing::trace;

/// Worker count for `jobs` jobs: `min(cpu_count, jobs)`, at least one.
pub fn worker_count(jobs: usize) -> usize {
    let cpus = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    cpus.min(jobs).max(1)
}

/// Run `job` over every item on up to `workers` threads.
///
/// Results come back in input order. Every job runs to completion even when
/// others fail; callers inspect the results afterwards.
pub fn run<T, R, F>(items: Vec<T>, workers: usize, job: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);
    trace!(jobs = total, workers, "starting pool");

    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let queue = &queue;
    let job = &job;

    let mut results: Vec<(usize, R)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some((idx, item)) = next else { break };
                        done.push((idx, job(item)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_input_order() {
        let items: Vec<usize> = (0..50).collect();
        let out = run(items, 4, |n| n * 2);
        assert_eq!(out, (0..50).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_job_runs_despite_failures() {
        let ran = AtomicUsize::new(0);
        let out: Vec<Result<usize, String>> = run((0..10).collect(), 3, |n| {
            ran.fetch_add(1, Ordering::SeqCst);
            if n == 3 {
                Err("boom".to_string())
            } else {
                Ok(n)
            }
        });
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(out.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    fn test_empty_and_worker_bounds() {
        let out: Vec<u8> = run(Vec::<u8>::new(), 8, |n| n);
        assert!(out.is_empty());
        assert_eq!(worker_count(0), 1);
        assert!(worker_count(1) == 1);
        assert_eq!(run(vec![1, 2], 0, |n: i32| n + 1), vec![2, 3]);
    }
}
