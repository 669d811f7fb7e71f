// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Calendar-month quota windows, in UTC.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// The half-open interval `[start, end)` covering one calendar month.
///
/// Windows are computed from the clock on every request and never stored;
/// a new month starts counting from zero because its interval no longer
/// includes last month's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    /// First instant of the month.
    pub start: DateTime<Utc>,
    /// First instant of the following month, which is also the reset instant.
    pub end: DateTime<Utc>,
}

impl QuotaWindow {
    /// The month containing `now`.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let first = today.with_day(1).unwrap_or(today);
        let next = first
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        Self {
            start: midnight(first),
            end: midnight(next),
        }
    }

    /// Last representable instant inside the window.
    pub fn last_instant(&self) -> DateTime<Utc> {
        self.end - Duration::nanoseconds(1)
    }

    /// When the counter starts again from zero.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
