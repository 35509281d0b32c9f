use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::members::MemberStatus;
use crate::lifecycle::fingerprint::FingerprintId;

/// One check-in. `day` is the gym-local calendar date and, with `member_id`,
/// the dedup key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Attendance {
    pub id: Uuid,
    pub member_id: Uuid,
    pub day: NaiveDate,
    pub checked_in_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberIdentity {
    Member(Uuid),
    Fingerprint(FingerprintId),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckIn {
    Denied {
        member_id: Uuid,
        status: MemberStatus,
    },
    Recorded {
        attendance: Attendance,
    },
    AlreadyRecorded {
        attendance: Attendance,
    },
}

impl CheckIn {
    pub fn is_granted(&self) -> bool {
        !matches!(self, CheckIn::Denied { .. })
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub attendance: Attendance,
    pub member_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DailyAttendance {
    pub day: NaiveDate,
    pub entries: Vec<AttendanceEntry>,
}
