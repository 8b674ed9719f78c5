use crate::{
    archive::{BandFile, FileRef, Grouping},
    satellite::ProductBand,
    GoesGridError, GoesGridResult,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A window of hours within a day, both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHourRange")]
pub struct HourRange {
    from_hour: u32,
    to_hour: u32,
}

impl HourRange {
    pub fn new(from_hour: u32, to_hour: u32) -> GoesGridResult<Self> {
        if from_hour > 23 || to_hour > 23 || from_hour > to_hour {
            return Err(GoesGridError::Config(format!(
                "invalid hour range {}-{}",
                from_hour, to_hour
            )));
        }

        Ok(HourRange { from_hour, to_hour })
    }

    /// The whole day.
    pub fn all_day() -> Self {
        HourRange {
            from_hour: 0,
            to_hour: 23,
        }
    }

    pub fn from_hour(&self) -> u32 {
        self.from_hour
    }

    pub fn to_hour(&self) -> u32 {
        self.to_hour
    }

    pub fn hours(&self) -> RangeInclusive<u32> {
        self.from_hour..=self.to_hour
    }
}

impl Display for HourRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}-{:02}Z", self.from_hour, self.to_hour)
    }
}

#[derive(Deserialize)]
struct RawHourRange {
    from_hour: u32,
    to_hour: u32,
}

impl TryFrom<RawHourRange> for HourRange {
    type Error = GoesGridError;

    fn try_from(raw: RawHourRange) -> Result<Self, Self::Error> {
        HourRange::new(raw.from_hour, raw.to_hour)
    }
}

/**
 * A named span of days to process, and the hours to process on each of those days.
 *
 * The name doubles as the name of the range's checkpoint log, so it may not contain path
 * separators.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    name: String,
    from_date: NaiveDate,
    to_date: NaiveDate,
    hours: Vec<HourRange>,
}

impl DateRange {
    pub fn new(
        name: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
        hours: Vec<HourRange>,
    ) -> GoesGridResult<Self> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(GoesGridError::Config(format!(
                "invalid date range name '{}'",
                name
            )));
        }

        if from_date > to_date {
            return Err(GoesGridError::Config(format!(
                "date range {} starts after it ends: {} > {}",
                name, from_date, to_date
            )));
        }

        if hours.is_empty() {
            return Err(GoesGridError::Config(format!(
                "date range {} has no hours",
                name
            )));
        }

        Ok(DateRange {
            name: name.to_owned(),
            from_date,
            to_date,
            hours,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from_date(&self) -> NaiveDate {
        self.from_date
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to_date
    }

    pub fn hours(&self) -> &[HourRange] {
        &self.hours
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{} to {}]", self.name, self.from_date, self.to_date)?;
        for hours in &self.hours {
            write!(f, " {}", hours)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawDateRange {
    name: String,
    from_date: NaiveDate,
    to_date: NaiveDate,
    #[serde(default = "default_hours")]
    hours: Vec<HourRange>,
}

fn default_hours() -> Vec<HourRange> {
    vec![HourRange::all_day()]
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = GoesGridError;

    fn try_from(raw: RawDateRange) -> Result<Self, Self::Error> {
        DateRange::new(&raw.name, raw.from_date, raw.to_date, raw.hours)
    }
}

/// Every day from `from` to `to`, inclusive.
pub(crate) fn days_between(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = vec![];
    let mut day = from;
    while day <= to {
        days.push(day);
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    days
}

/// One time instant's worth of files, handed to the processing callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
    pub files: Vec<BandFile>,
}

impl WorkUnit {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    /// Observation start, to the minute.
    pub fn start(&self) -> Option<NaiveDateTime> {
        self.date.and_hms_opt(self.hour, self.minute, 0)
    }

    pub fn file_for(&self, band: ProductBand) -> Option<&FileRef> {
        self.files.iter().find(|f| f.band == band).map(|f| &f.file)
    }
}

impl From<Grouping> for WorkUnit {
    fn from(grouping: Grouping) -> Self {
        WorkUnit {
            date: grouping.start.date(),
            hour: grouping.start.hour(),
            minute: grouping.start.minute(),
            files: grouping.files,
        }
    }
}

/**
 * Asks a running batch to stop.
 *
 * Clones share the flag. Once cancelled no new days are started, days already running finish.
 */
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
