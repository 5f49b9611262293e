//! Market Clock — spec §4.A.
//!
//! Pure, side-effect-free classification of a WIB (`+07:00`) instant into
//! one of six session states, plus the duration until the next transition.
//! No host timezone database is consulted; the vendor's hours are always
//! Jakarta local time, so the offset is a fixed constant.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone, Timelike};

/// Jakarta has used a fixed `+07:00` offset (WIB) since 1988 — no DST to track.
pub fn wib_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).expect("+07:00 is a valid fixed offset")
}

pub fn now_wib() -> DateTime<FixedOffset> {
    chrono::Utc::now().with_timezone(&wib_offset())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    Pre,
    After,
    Weekend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Open { session: u8 },
    Break,
    Closed { reason: ClosedReason },
}

impl MarketState {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketState::Open { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClockReading {
    pub state: MarketState,
    pub next_transition: DateTime<FixedOffset>,
    pub time_until_next: Duration,
}

struct SessionWindows {
    s1_open: NaiveTime,
    s1_close: NaiveTime,
    s2_open: NaiveTime,
    s2_close: NaiveTime,
}

fn session_windows(is_friday: bool) -> SessionWindows {
    let t = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    if is_friday {
        SessionWindows {
            s1_open: t(8, 55),
            s1_close: t(11, 35),
            s2_open: t(13, 55),
            s2_close: t(15, 54),
        }
    } else {
        SessionWindows {
            s1_open: t(8, 55),
            s1_close: t(12, 5),
            s2_open: t(13, 25),
            s2_close: t(15, 54),
        }
    }
}

fn at_time(now: DateTime<FixedOffset>, date: chrono::NaiveDate, time: NaiveTime) -> DateTime<FixedOffset> {
    wib_offset()
        .from_local_datetime(&date.and_time(time))
        .single()
        .unwrap_or(now)
}

fn next_trading_day(date: chrono::NaiveDate, is_friday: bool) -> chrono::NaiveDate {
    let days_ahead = if is_friday { 3 } else { 1 };
    date + Duration::days(days_ahead)
}

/// Classify `now` into a session state and compute time until the next transition.
pub fn classify(now: DateTime<FixedOffset>) -> ClockReading {
    let weekday_num = now.weekday().num_days_from_monday(); // Mon=0 .. Sun=6
    let today = now.date_naive();

    if weekday_num >= 5 {
        let days_until_monday = 7 - weekday_num;
        let monday = today + Duration::days(days_until_monday as i64);
        let next_open = at_time(now, monday, NaiveTime::from_hms_opt(8, 55, 0).unwrap());
        return ClockReading {
            state: MarketState::Closed {
                reason: ClosedReason::Weekend,
            },
            next_transition: next_open,
            time_until_next: next_open - now,
        };
    }

    let is_friday = weekday_num == 4;
    let w = session_windows(is_friday);
    let current_time = now.time();

    if current_time < w.s1_open {
        let next_open = at_time(now, today, w.s1_open);
        return ClockReading {
            state: MarketState::Closed {
                reason: ClosedReason::Pre,
            },
            next_transition: next_open,
            time_until_next: next_open - now,
        };
    }

    if current_time < w.s1_close {
        let next_close = at_time(now, today, w.s1_close);
        return ClockReading {
            state: MarketState::Open { session: 1 },
            next_transition: next_close,
            time_until_next: next_close - now,
        };
    }

    if current_time < w.s2_open {
        let next_open = at_time(now, today, w.s2_open);
        return ClockReading {
            state: MarketState::Break,
            next_transition: next_open,
            time_until_next: next_open - now,
        };
    }

    if current_time < w.s2_close {
        let next_close = at_time(now, today, w.s2_close);
        return ClockReading {
            state: MarketState::Open { session: 2 },
            next_transition: next_close,
            time_until_next: next_close - now,
        };
    }

    let next_day = next_trading_day(today, is_friday);
    let next_open = at_time(now, next_day, NaiveTime::from_hms_opt(8, 55, 0).unwrap());
    ClockReading {
        state: MarketState::Closed {
            reason: ClosedReason::After,
        },
        next_transition: next_open,
        time_until_next: next_open - now,
    }
}
