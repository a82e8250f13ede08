use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::has_conflict;

// ── Local time ────────────────────────────────────────────────────

/// 0 = Sunday .. 6 = Saturday, for the calendar date itself.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Wall-clock `time` on `date` in `tz`, as an instant. Uses the offset in
/// force on that date, not a fixed one.
///
/// A time skipped by a DST gap takes the offset in force before the gap, so
/// the wall clock lands past the gap by its length. An ambiguous time (clocks
/// set back) resolves to the earlier instant.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let local = date.and_time(time);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(local - Duration::days(1))).fix();
            (local - Duration::seconds(i64::from(before.local_minus_utc()))).and_utc()
        }
    }
}

/// Every calendar date from `first` to `last`, inclusive. Empty if reversed.
pub fn dates_between(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut date = first;
    while date <= last {
        dates.push(date);
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    dates
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(END_OF_DAY.0, END_OF_DAY.1, 0).unwrap_or(NaiveTime::MIN)
}

/// Exception time range with the 00:00 / 23:59 defaults applied.
fn exception_range(exception: &AvailabilityException) -> (NaiveTime, NaiveTime) {
    (
        exception.start_time.unwrap_or(NaiveTime::MIN),
        exception.end_time.unwrap_or_else(end_of_day),
    )
}

fn local_span(tz: Tz, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Option<Span> {
    if start >= end {
        return None;
    }
    let start = local_instant(tz, date, start);
    let end = local_instant(tz, date, end);
    (start < end).then(|| Span::new(start, end))
}

// ── Time-Window Resolver ──────────────────────────────────────────

/// Open windows of `room_id` on the tenant-local `date`.
///
/// Exception precedence, for exceptions scoped to this date and room (or to
/// all rooms):
/// 1. any closed exception without a time range shuts the whole day;
/// 2. otherwise open exceptions, if any, REPLACE the weekly rules;
/// 3. otherwise the weekly rules for the date's weekday apply.
///
/// Closed exceptions with a time range are carved out of whatever step 2 or 3
/// produced. Windows are neither merged nor deduplicated.
pub fn resolve_windows(
    tz: Tz,
    date: NaiveDate,
    room_id: Ulid,
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
) -> Vec<Span> {
    let matching: Vec<&AvailabilityException> = exceptions
        .iter()
        .filter(|e| e.applies_to(room_id, date))
        .collect();

    if matching.iter().any(|e| e.closes_whole_day()) {
        return Vec::new();
    }

    let open: Vec<(NaiveTime, NaiveTime)> = matching
        .iter()
        .filter(|e| !e.is_closed)
        .map(|e| exception_range(e))
        .collect();

    let local_ranges = if open.is_empty() {
        let dow = weekday_index(date);
        rules
            .iter()
            .filter(|r| r.applies_to(room_id, dow))
            .map(|r| (r.start_time, r.end_time))
            .collect()
    } else {
        open
    };

    let windows = local_ranges
        .into_iter()
        .filter_map(|(start, end)| local_span(tz, date, start, end));

    let mut closed: Vec<Span> = matching
        .iter()
        .filter(|e| e.is_closed)
        .filter_map(|e| {
            let (start, end) = exception_range(e);
            local_span(tz, date, start, end)
        })
        .collect();

    if closed.is_empty() {
        return windows.collect();
    }

    closed.sort_by_key(|s| s.start);
    let closed = merge_overlapping(&closed);
    windows
        .flat_map(|w| subtract_intervals(&[w], &closed))
        .collect()
}

// ── Slot Generator ────────────────────────────────────────────────

/// Bookable slots for `service` in `room_id` within `range`, ordered by start.
///
/// Starts step every `SLOT_STEP_MINUTES` from each window start while the full
/// occupancy (duration plus buffer) fits the window. A slot is kept when it
/// starts inside `range`, its visible end (buffer excluded) is within `range`,
/// and its occupancy overlaps none of the `occupied` spans.
///
/// No eligibility checks here: the caller has already rejected inactive
/// tenants, non-bookable rooms and unpublished services. A service without a
/// positive duration yields no slots.
pub fn generate_slots(
    tz: Tz,
    room_id: Ulid,
    service: &Service,
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    occupied: &[Span],
    range: Span,
) -> Vec<Slot> {
    let duration = service.duration();
    let occupancy = service.occupancy();
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    if duration <= Duration::zero() {
        return Vec::new();
    }

    let first = range.start.with_timezone(&tz).date_naive();
    let last = range.end.with_timezone(&tz).date_naive();

    let mut slots = Vec::new();
    for date in dates_between(first, last) {
        for window in resolve_windows(tz, date, room_id, rules, exceptions) {
            let mut start = window.start;
            while start + occupancy <= window.end {
                let end = start + duration;
                if start >= range.start
                    && end <= range.end
                    && !has_conflict(occupied, &Span::new(start, start + occupancy))
                {
                    slots.push(Slot { start, end });
                }
                start += step;
            }
        }
    }

    // Stable: equal starts from overlapping windows keep window order.
    slots.sort_by_key(|s| s.start);
    slots
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` from `base`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
