/*!
 * The append-only checkpoint log of a date range.
 *
 * Every line starting with `#` is a marker for people reading the log. All other lines are the
 * ISO dates of completed days, and only the last one matters when resuming.
 */
use crate::{storage::BlobStorage, GoesGridError, GoesGridResult};
use chrono::{NaiveDate, Utc};
use log::{debug, info, warn};
use std::{collections::BTreeMap, io, sync::Arc, time::Duration};

/// Markers and completed days for one named date range.
#[derive(Clone)]
pub struct CheckpointLog {
    storage: Arc<dyn BlobStorage>,
    name: String,
    path: String,
}

impl CheckpointLog {
    /// The log for range `name`, stored at `{log_dir}/{name}.log`.
    pub fn new(storage: Arc<dyn BlobStorage>, log_dir: &str, name: &str) -> Self {
        let log_dir = log_dir.trim_end_matches('/');
        let path = if log_dir.is_empty() {
            format!("{}.log", name)
        } else {
            format!("{}/{}.log", log_dir, name)
        };

        CheckpointLog {
            storage,
            name: name.to_owned(),
            path,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /**
     * The last day recorded as complete.
     *
     * `Ok(None)` means the log exists but holds only markers. A missing log is an error that
     * [is_not_found](GoesGridError::is_not_found), anything unreadable is some other error.
     */
    pub fn last_completed(&self) -> GoesGridResult<Option<NaiveDate>> {
        let bytes = self.storage.download_bytes(&self.path)?;
        let text = std::str::from_utf8(&bytes).map_err(|e| {
            GoesGridError::storage(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        parse_last_completed(text).map_err(|msg| {
            GoesGridError::storage(&self.path, io::Error::new(io::ErrorKind::InvalidData, msg))
        })
    }

    pub fn init(&self) -> GoesGridResult<()> {
        self.append(&format!("# INIT {} {}", self.name, timestamp()))
    }

    pub fn resumed(&self, from: NaiveDate) -> GoesGridResult<()> {
        self.append(&format!("# RESUMED {} from {}", self.name, from))
    }

    pub fn nothing_to_do(&self) -> GoesGridResult<()> {
        self.append(&format!("# NOTHING TO DO {}", self.name))
    }

    pub fn cancelled(&self) -> GoesGridResult<()> {
        self.append(&format!("# CANCELLED {}", self.name))
    }

    pub fn begin(&self, date: NaiveDate) -> GoesGridResult<()> {
        self.append(&format!("# BEGIN {} {}", date, timestamp()))
    }

    pub fn end(&self, date: NaiveDate, elapsed: Duration) -> GoesGridResult<()> {
        self.append(&format!("# END {} {:.3}s", date, elapsed.as_secs_f64()))
    }

    pub fn failed(&self, date: NaiveDate, reason: &str) -> GoesGridResult<()> {
        // Keep it to one line.
        let reason = reason.replace(['\n', '\r'], " ");
        self.append(&format!("# FAILED {} {}", date, reason))
    }

    /// Record `date` as complete.
    pub fn completed(&self, date: NaiveDate) -> GoesGridResult<()> {
        self.append(&date.format("%Y-%m-%d").to_string())
    }

    fn append(&self, line: &str) -> GoesGridResult<()> {
        debug!(target: "goesgrid::checkpoint", "{}: {}", self.path, line);
        let mut data = String::with_capacity(line.len() + 1);
        data.push_str(line);
        data.push('\n');
        self.storage.append_bytes(data.as_bytes(), &self.path)
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Find the last completed day in the text of a log.
pub(crate) fn parse_last_completed(text: &str) -> Result<Option<NaiveDate>, String> {
    let last = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .last();

    match last {
        None => Ok(None),
        Some(line) => NaiveDate::parse_from_str(line, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("last checkpoint line is not a date: '{}'", line)),
    }
}

/// What happened to a day, as reported to the [CheckpointWriter].
#[derive(Debug)]
pub(crate) enum LogEvent {
    Begin(NaiveDate),
    Completed(NaiveDate, Duration),
    Failed(NaiveDate, String),
}

/**
 * The single writer of a checkpoint log during a run.
 *
 * Days may complete in any order, but a day is only written as complete once every day before
 * it in the run has completed too. Completions that are not yet contiguous are held back.
 * Append failures never stop the run, they are logged and resuming will redo the day.
 */
pub(crate) struct CheckpointWriter<'a> {
    log: &'a CheckpointLog,
    /// The next day that can be checkpointed, `None` once the run has gone past the last date.
    next: Option<NaiveDate>,
    /// Completed days waiting on an earlier day.
    held: BTreeMap<NaiveDate, Duration>,
    /// Set once a day fails, nothing after it can be checkpointed any more.
    blocked: bool,
    last_written: Option<NaiveDate>,
}

impl<'a> CheckpointWriter<'a> {
    pub(crate) fn new(log: &'a CheckpointLog, start: NaiveDate) -> Self {
        CheckpointWriter {
            log,
            next: Some(start),
            held: BTreeMap::new(),
            blocked: false,
            last_written: None,
        }
    }

    pub(crate) fn handle(&mut self, event: LogEvent) {
        match event {
            LogEvent::Begin(date) => {
                info!(target: "goesgrid::checkpoint", "BEGIN {}", date);
                warn_on_failure(self.log.begin(date), date);
            }
            LogEvent::Completed(date, elapsed) => {
                info!(
                    target: "goesgrid::checkpoint",
                    "END {} in {:.1}s",
                    date,
                    elapsed.as_secs_f64()
                );
                self.held.insert(date, elapsed);
                self.flush();
            }
            LogEvent::Failed(date, reason) => {
                warn!(target: "goesgrid::checkpoint", "FAILED {}: {}", date, reason);
                warn_on_failure(self.log.failed(date, &reason), date);
                if self.next.map(|next| next <= date).unwrap_or(false) {
                    self.blocked = true;
                }
            }
        }
    }

    /// Write out everything that is contiguous with what is already written.
    fn flush(&mut self) {
        while !self.blocked {
            let next = match self.next {
                Some(next) => next,
                None => break,
            };

            let elapsed = match self.held.remove(&next) {
                Some(elapsed) => elapsed,
                None => break,
            };

            match self.log.completed(next) {
                Ok(()) => self.last_written = Some(next),
                Err(err) => {
                    warn!(
                        target: "goesgrid::checkpoint",
                        "could not checkpoint {} in {}, a resume will reprocess it: {}",
                        next,
                        self.log.path(),
                        err
                    );
                }
            }
            warn_on_failure(self.log.end(next, elapsed), next);

            self.next = next.succ_opt();
        }
    }

    /**
     * Finish the run. Days still held back completed after an earlier day that did not, they
     * only get an END marker and will be processed again on resume.
     *
     * Returns the last day written as complete.
     */
    pub(crate) fn finish(mut self) -> Option<NaiveDate> {
        for (date, elapsed) in std::mem::take(&mut self.held) {
            warn!(
                target: "goesgrid::checkpoint",
                "{} completed but an earlier day did not, it will be reprocessed on resume",
                date
            );
            warn_on_failure(self.log.end(date, elapsed), date);
        }

        self.last_written
    }
}

fn warn_on_failure(res: GoesGridResult<()>, date: NaiveDate) {
    if let Err(err) = res {
        warn!(target: "goesgrid::checkpoint", "failed to write log marker for {}: {}", date, err);
    }
}
