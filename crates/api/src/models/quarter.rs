use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

/// A `(year, quarter number)` pair scoping planning and deadline fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quarter {
    pub year: i32,
    pub number: u8,
}

impl Quarter {
    /// Panics unless `number` is 1 through 4.
    pub fn new(year: i32, number: u8) -> Self {
        assert!(
            (1..=4).contains(&number),
            "quarter number out of range: {number}"
        );
        Self { year, number }
    }

    /// The quarter a calendar date falls in.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            number: (date.month0() / 3 + 1) as u8,
        }
    }

    pub fn next(self) -> Self {
        if self.number == 4 {
            Self {
                year: self.year + 1,
                number: 1,
            }
        } else {
            Self {
                year: self.year,
                number: self.number + 1,
            }
        }
    }

    pub fn first_day(self) -> NaiveDate {
        let month = (self.number as u32 - 1) * 3 + 1;
        NaiveDate::from_ymd_opt(self.year, month, 1).expect("quarter start is a valid date")
    }

    pub fn last_day(self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    /// The inclusive range `[first day 00:00:00.000, last day 23:59:59.999]`
    /// the server expects for quarter-scoped queries.
    pub fn date_range(self) -> DateRange {
        DateRange {
            start: self
                .first_day()
                .and_hms_milli_opt(0, 0, 0, 0)
                .expect("midnight is a valid time"),
            end: self
                .last_day()
                .and_hms_milli_opt(23, 59, 59, 999)
                .expect("end of day is a valid time"),
        }
    }
}

/// Inclusive local-time window sent as `startDate`/`endDate` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn start_param(&self) -> String {
        format_param(self.start)
    }

    pub fn end_param(&self) -> String {
        format_param(self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start.date() && date <= self.end.date()
    }
}

/// Millisecond-precision ISO 8601 without a zone suffix, matching what the
/// server parses.
fn format_param(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}
