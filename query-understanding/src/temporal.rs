use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use regex::Regex;

use crate::model::{RelativeUnit, TemporalFilter};

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december";

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("temporal pattern literals are valid")
}

static RELATIVE_N: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:in\s+the\s+)?(?:last|past)\s+(\d{1,3})\s+(day|week|month|year)s?\b")
});
static RELATIVE_ONE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)\b(?:in\s+the\s+)?(?:last|past)\s+(day|week|month|year)\b")
});
static YESTERDAY: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\byesterday\b"));
static TODAY: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)\btoday\b"));
static SINCE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)\bsince\s+(?:({MONTHS})(?:\s+(\d{{4}}))?|(\d{{4}}))\b"
    ))
});
static BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"(?i)\bbetween\s+({MONTHS})(?:\s+(\d{{4}}))?\s+and\s+({MONTHS})(?:\s+(\d{{4}}))?\b"
    ))
});
static IN_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(r"(?i)\b(?:in|during)\s+({MONTHS})(?:\s+(\d{{4}}))?\b"))
});

/// Extracts relative ("last 3 months"), absolute ("between June and
/// August") and open-ended ("since 2022") date references from query text.
///
/// All windows are inclusive, start-of-day to end-of-day UTC. The parser is
/// clock-injected: `now` comes from the caller so behavior is reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalParser;

struct Candidate {
    start: usize,
    end: usize,
    filter: TemporalFilter,
}

impl TemporalParser {
    pub fn new() -> Self {
        Self
    }

    /// First temporal phrase in the text, if any. Multiple phrases: the
    /// earliest match wins; `parse_all` returns the full list.
    pub fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<TemporalFilter> {
        self.parse_all(text, now).into_iter().next()
    }

    pub fn parse_all(&self, text: &str, now: DateTime<Utc>) -> Vec<TemporalFilter> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for m in RELATIVE_N.captures_iter(text) {
            if let Some(c) = relative_candidate(&m, now, true) {
                candidates.push(c);
            }
        }
        for m in RELATIVE_ONE.captures_iter(text) {
            if let Some(c) = relative_candidate(&m, now, false) {
                candidates.push(c);
            }
        }
        for m in BETWEEN.captures_iter(text) {
            if let Some(c) = between_candidate(&m, now) {
                candidates.push(c);
            }
        }
        for m in SINCE.captures_iter(text) {
            if let Some(c) = since_candidate(&m, now) {
                candidates.push(c);
            }
        }
        for m in IN_MONTH.captures_iter(text) {
            if let Some(c) = in_month_candidate(&m, now) {
                candidates.push(c);
            }
        }
        for m in YESTERDAY.find_iter(text) {
            let date = (now - Duration::days(1)).date_naive();
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                filter: TemporalFilter {
                    date_from: start_of_day(date),
                    date_to: end_of_day(date),
                    time_reference: m.as_str().to_owned(),
                    relative_type: Some(RelativeUnit::Days),
                    amount: Some(1),
                },
            });
        }
        for m in TODAY.find_iter(text) {
            let date = now.date_naive();
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                filter: TemporalFilter {
                    date_from: start_of_day(date),
                    date_to: end_of_day(date),
                    time_reference: m.as_str().to_owned(),
                    relative_type: Some(RelativeUnit::Days),
                    amount: Some(0),
                },
            });
        }

        // Earliest match first; overlapping candidates collapse to the one
        // that starts first (longer span wins on a tie).
        candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut accepted: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if accepted
                .iter()
                .any(|kept| candidate.start < kept.end && kept.start < candidate.end)
            {
                continue;
            }
            accepted.push(candidate);
        }

        accepted.into_iter().map(|c| c.filter).collect()
    }
}

fn relative_candidate(
    captures: &regex::Captures<'_>,
    now: DateTime<Utc>,
    has_amount: bool,
) -> Option<Candidate> {
    let full = captures.get(0)?;
    let (amount, unit_str) = if has_amount {
        (
            captures.get(1)?.as_str().parse::<u32>().ok()?,
            captures.get(2)?.as_str(),
        )
    } else {
        (1, captures.get(1)?.as_str())
    };

    let unit = match unit_str.to_ascii_lowercase().as_str() {
        "day" => RelativeUnit::Days,
        "week" => RelativeUnit::Weeks,
        "month" => RelativeUnit::Months,
        "year" => RelativeUnit::Years,
        _ => return None,
    };

    let from_date = match unit {
        RelativeUnit::Days => (now - Duration::days(i64::from(amount))).date_naive(),
        RelativeUnit::Weeks => (now - Duration::weeks(i64::from(amount))).date_naive(),
        RelativeUnit::Months => now.checked_sub_months(Months::new(amount))?.date_naive(),
        RelativeUnit::Years => now
            .checked_sub_months(Months::new(amount.checked_mul(12)?))?
            .date_naive(),
    };

    Some(Candidate {
        start: full.start(),
        end: full.end(),
        filter: TemporalFilter {
            date_from: start_of_day(from_date),
            date_to: end_of_day(now.date_naive()),
            time_reference: full.as_str().to_owned(),
            relative_type: Some(unit),
            amount: Some(amount),
        },
    })
}

fn between_candidate(captures: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<Candidate> {
    let full = captures.get(0)?;
    let start_month = month_number(captures.get(1)?.as_str())?;
    let start_year = captures
        .get(2)
        .and_then(|y| y.as_str().parse::<i32>().ok())
        .unwrap_or_else(|| resolve_year(start_month, now));
    let end_month = month_number(captures.get(3)?.as_str())?;
    let end_year = captures
        .get(4)
        .and_then(|y| y.as_str().parse::<i32>().ok())
        .unwrap_or(if end_month < start_month {
            start_year + 1
        } else {
            start_year
        });

    Some(Candidate {
        start: full.start(),
        end: full.end(),
        filter: TemporalFilter {
            date_from: start_of_day(month_first_day(start_year, start_month)?),
            date_to: end_of_day(month_last_day(end_year, end_month)?),
            time_reference: full.as_str().to_owned(),
            relative_type: None,
            amount: None,
        },
    })
}

fn since_candidate(captures: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<Candidate> {
    let full = captures.get(0)?;

    let from_date = if let Some(month_match) = captures.get(1) {
        let month = month_number(month_match.as_str())?;
        let year = captures
            .get(2)
            .and_then(|y| y.as_str().parse::<i32>().ok())
            .unwrap_or_else(|| resolve_year(month, now));
        month_first_day(year, month)?
    } else {
        let year = captures.get(3)?.as_str().parse::<i32>().ok()?;
        NaiveDate::from_ymd_opt(year, 1, 1)?
    };

    Some(Candidate {
        start: full.start(),
        end: full.end(),
        filter: TemporalFilter {
            date_from: start_of_day(from_date),
            date_to: end_of_day(now.date_naive()),
            time_reference: full.as_str().to_owned(),
            relative_type: None,
            amount: None,
        },
    })
}

fn in_month_candidate(captures: &regex::Captures<'_>, now: DateTime<Utc>) -> Option<Candidate> {
    let full = captures.get(0)?;
    let month = month_number(captures.get(1)?.as_str())?;
    let year = captures
        .get(2)
        .and_then(|y| y.as_str().parse::<i32>().ok())
        .unwrap_or_else(|| resolve_year(month, now));

    Some(Candidate {
        start: full.start(),
        end: full.end(),
        filter: TemporalFilter {
            date_from: start_of_day(month_first_day(year, month)?),
            date_to: end_of_day(month_last_day(year, month)?),
            time_reference: full.as_str().to_owned(),
            relative_type: None,
            amount: None,
        },
    })
}

/// Month-only references resolve to the current year unless that instance
/// lies entirely in the future, in which case the previous year.
fn resolve_year(month: u32, now: DateTime<Utc>) -> i32 {
    if month > now.month() {
        now.year() - 1
    } else {
        now.year()
    }
}

fn month_number(name: &str) -> Option<u32> {
    let idx = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ]
    .iter()
    .position(|m| m.eq_ignore_ascii_case(name))?;
    u32::try_from(idx + 1).ok()
}

fn month_first_day(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn month_last_day(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(NaiveDate::from_ymd_opt(next_year, next_month, 1)? - Duration::days(1))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_default()
        .and_utc()
}
