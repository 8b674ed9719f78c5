/*!
 * Resumable batch processing over ranges of days.
 *
 * Each [DateRange] is processed one day at a time. The files for a day are found through a
 * [BlobLookup], grouped by observation time, and handed to the caller's processing function one
 * [WorkUnit] per time instant. When every hour window of a day is done the day is written to the
 * range's [CheckpointLog], so an interrupted run picks up after the last completed day.
 *
 * Ranges are processed one after another. Within a range days run in order on the calling thread
 * when there is one worker, or in parallel on a pool of threads otherwise. Either way days are
 * checkpointed in calendar order.
 */
pub use checkpoint::CheckpointLog;
pub use ranges::{CancelToken, DateRange, HourRange, WorkUnit};

use crate::{
    archive::BlobLookup, satellite::ProductBand, storage::BlobStorage, GoesGridError,
    GoesGridResult,
};
use checkpoint::{CheckpointWriter, LogEvent};
use chrono::NaiveDate;
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use std::{sync::Arc, thread, time::Instant};

mod checkpoint;
mod pool;
mod ranges;

/// A day and what came of it.
type DayResult<T> = (NaiveDate, GoesGridResult<Vec<T>>);

/// The results of one day.
#[derive(Debug)]
pub struct DayReport<T> {
    pub date: NaiveDate,
    /// One result per work unit, in time order.
    pub results: Vec<T>,
}

/// A day that could not be completed.
#[derive(Debug)]
pub struct DayFailure {
    pub date: NaiveDate,
    pub error: GoesGridError,
}

/// How a date range ended.
#[derive(Debug)]
pub enum RangeOutcome<T> {
    /// Everything was already done in an earlier run.
    NothingToDo,
    Processed {
        /// Days that completed, in calendar order.
        days: Vec<DayReport<T>>,
        failures: Vec<DayFailure>,
        /// True if the run was cancelled before every day was started.
        cancelled: bool,
    },
}

/// Summary of a date range after a run.
#[derive(Debug)]
pub struct RangeReport<T> {
    pub name: String,
    /// First day of this run after accounting for the checkpoint log, if any day was left.
    pub effective_from: Option<NaiveDate>,
    pub to_date: NaiveDate,
    pub outcome: RangeOutcome<T>,
}

impl<T> RangeReport<T> {
    /// True if every day of the range is now done.
    pub fn is_complete(&self) -> bool {
        match &self.outcome {
            RangeOutcome::NothingToDo => true,
            RangeOutcome::Processed {
                failures,
                cancelled,
                ..
            } => failures.is_empty() && !cancelled,
        }
    }
}

/// Drives the processing of a list of date ranges.
pub struct BatchScheduler {
    lookup: Arc<dyn BlobLookup>,
    storage: Arc<dyn BlobStorage>,
    bands: Vec<ProductBand>,
    ranges: Vec<DateRange>,
    workers: usize,
    log_dir: String,
    cancel: CancelToken,
}

impl BatchScheduler {
    /**
     * A scheduler that finds files with `lookup` and keeps its checkpoint logs in `storage`.
     *
     * It starts out with one worker and the logs in the `logs` directory.
     */
    pub fn new(
        lookup: Arc<dyn BlobLookup>,
        storage: Arc<dyn BlobStorage>,
        bands: Vec<ProductBand>,
        ranges: Vec<DateRange>,
    ) -> GoesGridResult<Self> {
        if bands.is_empty() {
            return Err(GoesGridError::Config("no bands to process".to_owned()));
        }

        Ok(BatchScheduler {
            lookup,
            storage,
            bands,
            ranges,
            workers: 1,
            log_dir: "logs".to_owned(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_log_dir(mut self, log_dir: &str) -> Self {
        self.log_dir = log_dir.trim_end_matches('/').to_owned();
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A token that cancels this scheduler's runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn checkpoint_log(&self, range: &DateRange) -> CheckpointLog {
        CheckpointLog::new(Arc::clone(&self.storage), &self.log_dir, range.name())
    }

    /**
     * Process every range, calling `process` once per work unit.
     *
     * `process` may be called more than once for the same unit across runs, a day interrupted
     * part way through is processed again from the start on resume.
     *
     * Failed days are reported in the returned summaries. Only a failure of the worker pool
     * itself is returned as an error.
     */
    pub fn run<T, F>(&self, process: F) -> GoesGridResult<Vec<RangeReport<T>>>
    where
        T: Send,
        F: Fn(&WorkUnit) -> GoesGridResult<T> + Sync,
    {
        if !self.log_dir.is_empty() {
            if let Err(err) = self.storage.mkdir(&self.log_dir) {
                warn!(
                    target: "goesgrid::scheduler",
                    "could not create log directory {}: {}",
                    self.log_dir,
                    err
                );
            }
        }

        let mut reports = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            if self.cancel.is_cancelled() {
                info!(target: "goesgrid::scheduler", "cancelled, skipping {}", range.name());
                break;
            }

            reports.push(self.run_range(range, &process)?);
        }

        Ok(reports)
    }

    fn run_range<T, F>(&self, range: &DateRange, process: &F) -> GoesGridResult<RangeReport<T>>
    where
        T: Send,
        F: Fn(&WorkUnit) -> GoesGridResult<T> + Sync,
    {
        let log = self.checkpoint_log(range);

        let start = self.resume_point(range, &log);
        let days = match start {
            Some(start) => ranges::days_between(start, range.to_date()),
            None => vec![],
        };

        if days.is_empty() {
            info!(target: "goesgrid::scheduler", "NOTHING TO DO {}", range.name());
            if let Err(err) = log.nothing_to_do() {
                warn!(target: "goesgrid::scheduler", "could not write to {}: {}", log.path(), err);
            }

            return Ok(RangeReport {
                name: range.name().to_owned(),
                effective_from: None,
                to_date: range.to_date(),
                outcome: RangeOutcome::NothingToDo,
            });
        }

        let first = days[0];
        let num_days = days.len();
        let num_workers = self.workers.min(num_days);
        info!(
            target: "goesgrid::scheduler",
            "RUNNING {} from {} to {}, {} days on {} worker(s)",
            range.name(),
            first,
            range.to_date(),
            num_days,
            num_workers
        );

        let mut results = if num_workers <= 1 {
            self.run_days_in_order(range, &log, days, process)
        } else {
            self.run_days_in_parallel(range, &log, days, num_workers, process)?
        };
        results.sort_by_key(|(date, _)| *date);

        let cancelled = self.cancel.is_cancelled() && results.len() < num_days;
        if cancelled {
            info!(target: "goesgrid::scheduler", "CANCELLED {}", range.name());
            if let Err(err) = log.cancelled() {
                warn!(target: "goesgrid::scheduler", "could not write to {}: {}", log.path(), err);
            }
        }

        let mut day_reports = vec![];
        let mut failures = vec![];
        for (date, res) in results {
            match res {
                Ok(results) => day_reports.push(DayReport { date, results }),
                Err(error) => failures.push(DayFailure { date, error }),
            }
        }

        if failures.is_empty() && !cancelled {
            info!(target: "goesgrid::scheduler", "COMPLETED {}", range.name());
        } else {
            warn!(
                target: "goesgrid::scheduler",
                "{} stopped with {} of {} days done",
                range.name(),
                day_reports.len(),
                num_days
            );
        }

        Ok(RangeReport {
            name: range.name().to_owned(),
            effective_from: Some(first),
            to_date: range.to_date(),
            outcome: RangeOutcome::Processed {
                days: day_reports,
                failures,
                cancelled,
            },
        })
    }

    /// The first day still to do, `None` if the log shows the whole range is done.
    fn resume_point(&self, range: &DateRange, log: &CheckpointLog) -> Option<NaiveDate> {
        match log.last_completed() {
            Ok(Some(last)) => {
                let next = last.succ_opt()?;
                if next > range.from_date() {
                    info!(target: "goesgrid::scheduler", "RESUMED {} from {}", range.name(), next);
                    if let Err(err) = log.resumed(next) {
                        warn!(
                            target: "goesgrid::scheduler",
                            "could not write to {}: {}",
                            log.path(),
                            err
                        );
                    }
                    Some(next)
                } else {
                    Some(range.from_date())
                }
            }
            Ok(None) => Some(range.from_date()),
            Err(err) => {
                if err.is_not_found() {
                    info!(target: "goesgrid::scheduler", "INIT {}", range.name());
                } else {
                    warn!(
                        target: "goesgrid::scheduler",
                        "unreadable checkpoint log for {}, starting over: {}",
                        range.name(),
                        err
                    );
                }

                if let Err(err) = log.init() {
                    warn!(
                        target: "goesgrid::scheduler",
                        "could not write to {}: {}",
                        log.path(),
                        err
                    );
                }
                Some(range.from_date())
            }
        }
    }

    fn run_days_in_order<T, F>(
        &self,
        range: &DateRange,
        log: &CheckpointLog,
        days: Vec<NaiveDate>,
        process: &F,
    ) -> Vec<DayResult<T>>
    where
        F: Fn(&WorkUnit) -> GoesGridResult<T>,
    {
        let mut writer = CheckpointWriter::new(log, days[0]);
        let mut results = Vec::with_capacity(days.len());

        for date in days {
            if self.cancel.is_cancelled() {
                break;
            }

            let res = self.run_day(range, date, process, &mut |event| writer.handle(event));
            let failed = res.is_err();
            results.push((date, res));

            if failed {
                break;
            }
        }

        writer.finish();
        results
    }

    fn run_days_in_parallel<T, F>(
        &self,
        range: &DateRange,
        log: &CheckpointLog,
        days: Vec<NaiveDate>,
        num_workers: usize,
        process: &F,
    ) -> GoesGridResult<Vec<DayResult<T>>>
    where
        T: Send,
        F: Fn(&WorkUnit) -> GoesGridResult<T> + Sync,
    {
        let writer = CheckpointWriter::new(log, days[0]);
        let failed = std::sync::atomic::AtomicBool::new(false);

        thread::scope(|s| -> GoesGridResult<Vec<DayResult<T>>> {
            let (event_tx, event_rx) = unbounded::<LogEvent>();

            let writer_thread = thread::Builder::new()
                .name(format!("{}-log", range.name()))
                .spawn_scoped(s, move || {
                    let mut writer = writer;
                    for event in event_rx {
                        writer.handle(event);
                    }
                    writer.finish()
                })
                .map_err(|e| GoesGridError::Pool(e.to_string()))?;

            let results = pool::run_pool(
                range.name(),
                num_workers,
                days,
                || {
                    !self.cancel.is_cancelled()
                        && !failed.load(std::sync::atomic::Ordering::SeqCst)
                },
                |date| {
                    let res = self.run_day(range, date, process, &mut |event| {
                        // The writer only goes away when every worker is done.
                        let _ = event_tx.send(event);
                    });
                    if res.is_err() {
                        failed.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    (date, res)
                },
            );
            drop(event_tx);

            writer_thread
                .join()
                .map_err(|_| GoesGridError::Pool("checkpoint writer panicked".to_owned()))?;

            results
        })
    }

    /// Process every work unit of one day, in time order.
    fn run_day<T, F>(
        &self,
        range: &DateRange,
        date: NaiveDate,
        process: &F,
        events: &mut dyn FnMut(LogEvent),
    ) -> GoesGridResult<Vec<T>>
    where
        F: Fn(&WorkUnit) -> GoesGridResult<T>,
    {
        let started = Instant::now();
        events(LogEvent::Begin(date));

        match self.process_day(range, date, process) {
            Ok(results) => {
                events(LogEvent::Completed(date, started.elapsed()));
                Ok(results)
            }
            Err(err) => {
                events(LogEvent::Failed(date, err.to_string()));
                Err(err)
            }
        }
    }

    fn process_day<T, F>(
        &self,
        range: &DateRange,
        date: NaiveDate,
        process: &F,
    ) -> GoesGridResult<Vec<T>>
    where
        F: Fn(&WorkUnit) -> GoesGridResult<T>,
    {
        let mut results = vec![];

        for hours in range.hours() {
            let hour_list: Vec<u32> = hours.hours().collect();
            let groupings = self
                .lookup
                .grouped_blobs_for_day(date, &hour_list, &self.bands)?;

            debug!(
                target: "goesgrid::scheduler",
                "{} {} {}: {} groupings",
                range.name(),
                date,
                hours,
                groupings.len()
            );

            for grouping in groupings {
                let unit = WorkUnit::from(grouping);
                results.push(process(&unit)?);
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        archive::{BandFile, FileRef, GridDataset, Grouping},
        satellite::{Band, Product},
        storage::MemoryStorage,
    };
    use chrono::{Datelike, NaiveDateTime};
    use std::sync::Mutex;

    const BAND: ProductBand = ProductBand {
        product: Product::CMIPF,
        band: Band::CleanLongwaveWindow,
    };

    /// Two groupings per requested hour, at minutes 0 and 30.
    struct FakeLookup {
        calls: Mutex<Vec<(NaiveDate, Vec<u32>)>>,
        fail_on: Option<NaiveDate>,
    }

    impl FakeLookup {
        fn new(fail_on: Option<NaiveDate>) -> Self {
            FakeLookup {
                calls: Mutex::new(vec![]),
                fail_on,
            }
        }
    }

    impl BlobLookup for FakeLookup {
        fn grouped_blobs_for_day(
            &self,
            date: NaiveDate,
            hours: &[u32],
            bands: &[ProductBand],
        ) -> GoesGridResult<Vec<Grouping>> {
            self.calls.lock().unwrap().push((date, hours.to_vec()));
            if Some(date) == self.fail_on {
                return Err(GoesGridError::Lookup("bucket unreachable".to_owned()));
            }

            let mut groupings = vec![];
            for &hour in hours {
                for minute in [0, 30] {
                    let start: NaiveDateTime = date.and_hms_opt(hour, minute, 0).unwrap();
                    let files = bands
                        .iter()
                        .map(|&band| BandFile {
                            band,
                            file: FileRef::new(format!("{}/{}", band, start)),
                        })
                        .collect();
                    groupings.push(Grouping { start, files });
                }
            }
            Ok(groupings)
        }

        fn open_dataset(&self, file: &FileRef) -> GoesGridResult<Box<dyn GridDataset>> {
            Err(GoesGridError::Dataset(format!("no dataset {}", file)))
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, d).unwrap()
    }

    fn june(from: u32, to: u32, hours: Vec<HourRange>) -> DateRange {
        DateRange::new("june", date(from), date(to), hours).unwrap()
    }

    fn scheduler(
        lookup: Arc<FakeLookup>,
        storage: Arc<MemoryStorage>,
        ranges: Vec<DateRange>,
    ) -> BatchScheduler {
        BatchScheduler::new(lookup, storage, vec![BAND], ranges).unwrap()
    }

    fn log_lines(storage: &MemoryStorage) -> Vec<String> {
        String::from_utf8(storage.download_bytes("logs/june.log").unwrap())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn date_lines(storage: &MemoryStorage) -> Vec<String> {
        log_lines(storage)
            .into_iter()
            .filter(|l| !l.starts_with('#'))
            .collect()
    }

    #[test]
    fn test_sequential_run_from_scratch() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        let hours = vec![HourRange::new(1, 2).unwrap(), HourRange::new(5, 5).unwrap()];
        let sched = scheduler(lookup.clone(), storage.clone(), vec![june(1, 3, hours)]);

        let reports = sched
            .run(|unit| Ok((unit.day(), unit.hour, unit.minute)))
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_complete());
        match &reports[0].outcome {
            RangeOutcome::Processed { days, .. } => {
                assert_eq!(days.len(), 3);
                assert_eq!(
                    days[0].results,
                    [(1, 1, 0), (1, 1, 30), (1, 2, 0), (1, 2, 30), (1, 5, 0), (1, 5, 30)]
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let lines = log_lines(&storage);
        assert!(lines[0].starts_with("# INIT june "));
        assert_eq!(date_lines(&storage), ["2020-06-01", "2020-06-02", "2020-06-03"]);

        // Each hour window is looked up separately.
        let calls = lookup.calls.lock().unwrap();
        assert_eq!(calls.len(), 6);
        assert_eq!(calls[0], (date(1), vec![1, 2]));
        assert_eq!(calls[1], (date(1), vec![5]));
    }

    #[test]
    fn test_resume_after_last_checkpoint() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        storage
            .upload_bytes(
                b"# INIT june x\n2020-06-13\n# END 2020-06-13 1s\n2020-06-14\n# BEGIN 2020-06-15 x\n",
                "logs/june.log",
            )
            .unwrap();

        let sched = scheduler(
            lookup.clone(),
            storage.clone(),
            vec![june(1, 30, vec![HourRange::new(0, 0).unwrap()])],
        );
        let reports = sched.run(|_| Ok(())).unwrap();

        assert_eq!(reports[0].effective_from, Some(date(15)));
        assert!(log_lines(&storage).contains(&"# RESUMED june from 2020-06-15".to_owned()));

        let calls = lookup.calls.lock().unwrap();
        assert_eq!(calls.len(), 16);
        assert_eq!(calls[0].0, date(15));
        assert_eq!(date_lines(&storage).last().unwrap(), "2020-06-30");
    }

    #[test]
    fn test_nothing_to_do() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        storage
            .upload_bytes(b"# INIT june x\n2020-06-30\n", "logs/june.log")
            .unwrap();

        let sched = scheduler(
            lookup.clone(),
            storage.clone(),
            vec![june(1, 30, vec![HourRange::all_day()])],
        );
        let reports = sched.run(|_| Ok(())).unwrap().pop().unwrap();

        assert!(matches!(reports.outcome, RangeOutcome::NothingToDo));
        assert!(lookup.calls.lock().unwrap().is_empty());
        assert_eq!(log_lines(&storage).last().unwrap(), "# NOTHING TO DO june");
    }

    #[test]
    fn test_corrupt_log_starts_over() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        storage
            .upload_bytes(b"2020-06-14\n!!garbage!!\n", "logs/june.log")
            .unwrap();

        let sched = scheduler(
            lookup,
            storage.clone(),
            vec![june(1, 2, vec![HourRange::all_day()])],
        );
        let reports = sched.run(|_| Ok(())).unwrap();

        assert_eq!(reports[0].effective_from, Some(date(1)));
        assert!(log_lines(&storage)
            .iter()
            .any(|l| l.starts_with("# INIT june ")));
        assert_eq!(date_lines(&storage).last().unwrap(), "2020-06-02");
    }

    #[test]
    fn test_parallel_days_checkpoint_in_order() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        let hours = vec![HourRange::new(0, 3).unwrap(), HourRange::new(10, 12).unwrap()];
        let sched =
            scheduler(lookup, storage.clone(), vec![june(1, 4, hours)]).with_workers(4);

        let reports = sched
            .run(|unit| {
                // Make the early days the slow ones.
                let delay = (5 - unit.day()) as u64;
                thread::sleep(std::time::Duration::from_millis(delay));
                Ok(unit.hour)
            })
            .unwrap();

        match &reports[0].outcome {
            RangeOutcome::Processed { days, failures, .. } => {
                assert!(failures.is_empty());
                assert_eq!(days.len(), 4);
                for day in days {
                    assert_eq!(day.results, [0, 0, 1, 1, 2, 2, 3, 3, 10, 10, 11, 11, 12, 12]);
                }
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            date_lines(&storage),
            ["2020-06-01", "2020-06-02", "2020-06-03", "2020-06-04"]
        );
    }

    #[test]
    fn test_failed_day_stops_the_range() {
        let lookup = Arc::new(FakeLookup::new(Some(date(3))));
        let storage = Arc::new(MemoryStorage::new());
        let sched = scheduler(
            lookup.clone(),
            storage.clone(),
            vec![june(1, 10, vec![HourRange::new(0, 0).unwrap()])],
        );

        let report = sched.run(|_| Ok(())).unwrap().pop().unwrap();
        assert!(!report.is_complete());
        match report.outcome {
            RangeOutcome::Processed { days, failures, .. } => {
                assert_eq!(days.len(), 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].date, date(3));
                assert!(matches!(failures[0].error, GoesGridError::Lookup(_)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(lookup.calls.lock().unwrap().len(), 3);
        assert_eq!(date_lines(&storage), ["2020-06-01", "2020-06-02"]);
        assert!(log_lines(&storage)
            .iter()
            .any(|l| l.starts_with("# FAILED 2020-06-03")));
    }

    #[test]
    fn test_processing_error_fails_the_day() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        let sched = scheduler(
            lookup,
            storage.clone(),
            vec![june(1, 3, vec![HourRange::new(4, 4).unwrap()])],
        );

        let report = sched
            .run(|unit| {
                if unit.day() == 2 && unit.minute == 30 {
                    Err(GoesGridError::Processing("bad pixel".to_owned()))
                } else {
                    Ok(())
                }
            })
            .unwrap()
            .pop()
            .unwrap();

        assert!(!report.is_complete());
        assert_eq!(date_lines(&storage), ["2020-06-01"]);
    }

    #[test]
    fn test_cancel_stops_new_days() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        let sched = scheduler(
            lookup.clone(),
            storage.clone(),
            vec![
                june(1, 10, vec![HourRange::new(0, 0).unwrap()]),
                DateRange::new("july", date(1), date(2), vec![HourRange::all_day()]).unwrap(),
            ],
        );
        let cancel = sched.cancel_token();

        let reports = sched
            .run(|unit| {
                if unit.day() == 2 {
                    cancel.cancel();
                }
                Ok(())
            })
            .unwrap();

        // The second range never started.
        assert_eq!(reports.len(), 1);
        match &reports[0].outcome {
            RangeOutcome::Processed {
                days, cancelled, ..
            } => {
                assert!(*cancelled);
                assert_eq!(days.len(), 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(date_lines(&storage), ["2020-06-01", "2020-06-02"]);
        assert_eq!(log_lines(&storage).last().unwrap(), "# CANCELLED june");
        assert!(storage.download_bytes("logs/july.log").is_err());
    }

    #[test]
    fn test_cancel_with_workers_keeps_a_contiguous_log() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(MemoryStorage::new());
        let sched = scheduler(
            lookup,
            storage.clone(),
            vec![june(1, 10, vec![HourRange::new(0, 0).unwrap()])],
        )
        .with_workers(4);
        let cancel = sched.cancel_token();

        let reports = sched
            .run(|unit| {
                if unit.day() == 3 {
                    cancel.cancel();
                } else {
                    thread::sleep(std::time::Duration::from_millis(20));
                }
                Ok(unit.day())
            })
            .unwrap();

        let num_days = match &reports[0].outcome {
            RangeOutcome::Processed {
                days,
                failures,
                cancelled,
            } => {
                assert!(*cancelled);
                assert!(failures.is_empty());
                assert!(days.len() >= 3 && days.len() < 10, "{} days", days.len());
                for (i, day) in days.iter().enumerate() {
                    assert_eq!(day.date, date(i as u32 + 1));
                    assert_eq!(day.results, [day.date.day(), day.date.day()]);
                }
                days.len()
            }
            other => panic!("unexpected outcome {:?}", other),
        };

        // Every day handed out finished and was checkpointed in calendar order.
        let expected: Vec<String> = (1..=num_days as u32)
            .map(|d| date(d).format("%Y-%m-%d").to_string())
            .collect();
        assert_eq!(date_lines(&storage), expected);
        assert_eq!(log_lines(&storage).last().unwrap(), "# CANCELLED june");
    }

    /// Memory storage whose appends can be switched off.
    struct FailingAppends {
        inner: MemoryStorage,
        failing: std::sync::atomic::AtomicBool,
    }

    impl BlobStorage for FailingAppends {
        fn list(&self, path: &str) -> GoesGridResult<Vec<String>> {
            self.inner.list(path)
        }

        fn mkdir(&self, path: &str) -> GoesGridResult<()> {
            self.inner.mkdir(path)
        }

        fn upload_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
            self.inner.upload_bytes(data, path)
        }

        fn download_bytes(&self, path: &str) -> GoesGridResult<Vec<u8>> {
            self.inner.download_bytes(path)
        }

        fn append_bytes(&self, data: &[u8], path: &str) -> GoesGridResult<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                Err(GoesGridError::storage(
                    path,
                    std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                ))
            } else {
                self.inner.append_bytes(data, path)
            }
        }
    }

    #[test]
    fn test_failed_appends_do_not_fail_days() {
        let lookup = Arc::new(FakeLookup::new(None));
        let storage = Arc::new(FailingAppends {
            inner: MemoryStorage::new(),
            failing: std::sync::atomic::AtomicBool::new(true),
        });
        let ranges = vec![june(1, 3, vec![HourRange::new(6, 6).unwrap()])];

        for workers in [1, 3] {
            let sched =
                BatchScheduler::new(lookup.clone(), storage.clone(), vec![BAND], ranges.clone())
                    .unwrap()
                    .with_workers(workers);

            let report = sched.run(|unit| Ok(unit.minute)).unwrap().pop().unwrap();
            assert!(report.is_complete());
            match &report.outcome {
                RangeOutcome::Processed { days, .. } => {
                    assert_eq!(days.len(), 3);
                    for day in days {
                        assert_eq!(day.results, [0, 30]);
                    }
                }
                other => panic!("unexpected outcome {:?}", other),
            }
            assert!(storage.download_bytes("logs/june.log").is_err());
        }

        // Nothing was checkpointed, so the next run starts over.
        storage
            .failing
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let sched = BatchScheduler::new(lookup, storage.clone(), vec![BAND], ranges).unwrap();
        let report = sched.run(|_| Ok(())).unwrap().pop().unwrap();

        assert_eq!(report.effective_from, Some(date(1)));
        assert!(report.is_complete());
        assert_eq!(
            date_lines(&storage.inner),
            ["2020-06-01", "2020-06-02", "2020-06-03"]
        );
    }

    #[test]
    fn test_requires_bands() {
        let lookup: Arc<dyn BlobLookup> = Arc::new(FakeLookup::new(None));
        let storage: Arc<dyn BlobStorage> = Arc::new(MemoryStorage::new());
        assert!(BatchScheduler::new(lookup, storage, vec![], vec![]).is_err());
    }
}
