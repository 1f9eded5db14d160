// Purchase-order workflow
pub mod orders;
pub mod payments;

// Fixed-point money rules
pub mod money;

// Supplier and product registration
pub mod catalog;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

/// Turns an inclusive calendar-day range into half-open timestamp bounds:
/// `[from 00:00, to + 1 day 00:00)`.
pub(crate) fn day_bounds(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let start = from.map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
    let end = to
        .and_then(|d| d.succ_opt())
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
    (start, end)
}
