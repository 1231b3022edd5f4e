use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Mutex,
    },
    thread,
};

use anyhow::Result;

pub const DOWNLOADS_ENV: &str = "LAYERPACK_DOWNLOADS";
const MAX_WORKERS: usize = 16;

/// Worker count: explicit request, then `LAYERPACK_DOWNLOADS`, then the
/// machine's parallelism; clamped to 1..=16 and never above `total`.
pub fn download_concurrency(requested: Option<usize>, total: usize) -> usize {
    let requested = requested.or_else(|| {
        env::var(DOWNLOADS_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
    });
    let available = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .max(1);
    let max_workers = requested.unwrap_or(available).clamp(1, MAX_WORKERS);
    max_workers.min(total.max(1))
}

/// Run `work` over `jobs` on `workers` threads sharing one queue.
///
/// Results come back in job order. After the first failure no new jobs are
/// started, and the failure of the earliest job is returned.
pub fn run_pool<J, R, F>(jobs: Vec<J>, workers: usize, work: F) -> Result<Vec<R>>
where
    J: Send,
    R: Send,
    F: Fn(J) -> Result<R> + Sync,
{
    let total = jobs.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let (job_tx, job_rx) = mpsc::channel();
    for job in jobs.into_iter().enumerate() {
        // The receiver is alive until the scope below ends.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let job_rx = Mutex::new(job_rx);
    let failed = AtomicBool::new(false);
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let result_tx = result_tx.clone();
            let job_rx = &job_rx;
            let failed = &failed;
            let work = &work;
            scope.spawn(move || loop {
                if failed.load(Ordering::Relaxed) {
                    break;
                }
                let (idx, job) = {
                    let Ok(guard) = job_rx.lock() else {
                        break;
                    };
                    match guard.recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    }
                };
                let outcome = work(job);
                if outcome.is_err() {
                    failed.store(true, Ordering::Relaxed);
                }
                if result_tx.send((idx, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);
    });

    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<(usize, anyhow::Error)> = None;
    for (idx, outcome) in result_rx {
        match outcome {
            Ok(value) => slots[idx] = Some(value),
            Err(err) => {
                if first_error.as_ref().map_or(true, |(current, _)| idx < *current) {
                    first_error = Some((idx, err));
                }
            }
        }
    }
    if let Some((_, err)) = first_error {
        return Err(err);
    }
    Ok(slots.into_iter().flatten().collect())
}
