use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::attendance::Attendance;

/// Calendar day of `instant` on the gym's clock.
pub fn local_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

pub fn new_attendance(member_id: Uuid, now: DateTime<Utc>, offset: FixedOffset) -> Attendance {
    Attendance {
        id: Uuid::new_v4(),
        member_id,
        day: local_day(now, offset),
        checked_in_at: now,
    }
}
