//! Bounded worker pool with declaration-order results.
//!
//! Workers pull `(index, item)` pairs from a shared queue and send
//! `(index, result)` back; each result lands in the slot for its index, so the
//! returned vector is already in input order regardless of completion order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Run `job` over `items` with at most `max_workers` in flight.
///
/// Every item is processed; a failure in one job does not stop the others,
/// and a panicking job does not take its worker down. Slot `i` holds the
/// result for `items[i]`, or `None` if that job panicked.
pub async fn run_indexed<T, R, F, Fut>(items: Vec<T>, max_workers: usize, job: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    if total == 0 {
        return slots;
    }

    let workers = max_workers.clamp(1, total);
    debug!("Starting {} workers for {} jobs", workers, total);

    let queue = Arc::new(Mutex::new(items.into_iter().enumerate()));
    let job = Arc::new(job);
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Option<R>)>();

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let queue = queue.clone();
        let job = job.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                // Lock is released before the job is awaited
                let next = match queue.lock() {
                    Ok(mut q) => q.next(),
                    Err(poisoned) => poisoned.into_inner().next(),
                };
                let Some((index, item)) = next else {
                    break;
                };
                let result = match AssertUnwindSafe(job(item)).catch_unwind().await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        error!("Job {} panicked", index);
                        None
                    }
                };
                if tx.send((index, result)).is_err() {
                    break;
                }
            }
            debug!("Worker {} finished", worker_id);
        }));
    }
    drop(tx);

    while let Some((index, result)) = rx.recv().await {
        slots[index] = result;
    }

    for handle in handles {
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!("Worker panicked: {}", e);
            }
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_follow_input_order() {
        // Earlier items sleep longer so they finish last
        let delays = vec![60u64, 30, 0];
        let results = run_indexed(delays, 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms
        })
        .await;
        assert_eq!(results, vec![Some(60), Some(30), Some(0)]);
    }

    #[tokio::test]
    async fn test_respects_worker_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (active.clone(), peak.clone());
        let results = run_indexed((0..8).collect::<Vec<_>>(), 2, move |i| {
            let (a, p) = (a.clone(), p.clone());
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().enumerate().all(|(i, r)| *r == Some(i * 2)));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_job_leaves_empty_slot() {
        let results = run_indexed(vec![1, 2, 3], 1, |i| async move {
            if i == 2 {
                panic!("boom");
            }
            i
        })
        .await;
        assert_eq!(results, vec![Some(1), None, Some(3)]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<Option<u8>> = run_indexed(Vec::<u8>::new(), 4, |i| async move { i }).await;
        assert!(results.is_empty());
    }
}
