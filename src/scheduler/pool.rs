use crate::{GoesGridError, GoesGridResult};
use crossbeam_channel::{bounded, unbounded};
use log::{error, trace};
use std::thread;

/**
 * Run `work` over `jobs` on up to `size` threads and collect the results.
 *
 * Jobs are handed out one at a time as workers become free, and `keep_going` is asked before
 * each one. Once it says no, the remaining jobs are never started but those already handed out
 * run to completion. Results come back in completion order.
 */
pub(crate) fn run_pool<J, R, W, K>(
    name: &str,
    size: usize,
    jobs: Vec<J>,
    keep_going: K,
    work: W,
) -> GoesGridResult<Vec<R>>
where
    J: Send,
    R: Send,
    W: Fn(J) -> R + Sync,
    K: Fn() -> bool,
{
    let size = size.max(1).min(jobs.len());
    if size == 0 {
        return Ok(vec![]);
    }

    thread::scope(|s| {
        // Zero capacity, so a job is only taken off the list when a worker is ready for it.
        let (job_tx, job_rx) = bounded::<J>(0);
        let (result_tx, result_rx) = unbounded::<R>();

        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn_scoped(s, move || {
                    for job in job_rx {
                        if result_tx.send(work(job)).is_err() {
                            break;
                        }
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(
                        target: "goesgrid::scheduler",
                        "could not start worker {}-{}: {}",
                        name,
                        i,
                        err
                    );
                    break;
                }
            }
        }
        drop(job_rx);
        drop(result_tx);

        if handles.is_empty() {
            return Err(GoesGridError::Pool(format!("no workers started for {}", name)));
        }

        for job in jobs {
            if !keep_going() {
                trace!(target: "goesgrid::scheduler", "{}: stopped handing out jobs", name);
                break;
            }

            if job_tx.send(job).is_err() {
                // Every worker is gone.
                break;
            }
        }
        drop(job_tx);

        let mut panics = 0;
        for handle in handles {
            if handle.join().is_err() {
                panics += 1;
            }
        }

        if panics > 0 {
            return Err(GoesGridError::Pool(format!(
                "{} worker(s) of {} panicked",
                panics, name
            )));
        }

        Ok(result_rx.try_iter().collect())
    })
}
