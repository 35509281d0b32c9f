use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::{AttendanceStore, PgStore, StoreError};
use crate::models::attendance::{Attendance, AttendanceEntry};

#[derive(Debug, sqlx::FromRow)]
struct AttendanceRow {
    id: Uuid,
    member_id: Uuid,
    day: NaiveDate,
    checked_in_at: DateTime<Utc>,
}

impl From<AttendanceRow> for Attendance {
    fn from(row: AttendanceRow) -> Self {
        Attendance {
            id: row.id,
            member_id: row.member_id,
            day: row.day,
            checked_in_at: row.checked_in_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttendanceEntryRow {
    #[sqlx(flatten)]
    attendance: AttendanceRow,
    member_name: String,
}

#[async_trait]
impl AttendanceStore for PgStore {
    async fn record_attendance(
        &self,
        attendance: &Attendance,
    ) -> Result<(Attendance, bool), StoreError> {
        let inserted = sqlx::query_as::<_, AttendanceRow>(
            r#"
                INSERT INTO attendance (id, member_id, day, checked_in_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (member_id, day) DO NOTHING
                RETURNING *
            "#,
        )
        .bind(attendance.id)
        .bind(attendance.member_id)
        .bind(attendance.day)
        .bind(attendance.checked_in_at)
        .fetch_optional(&self.conn)
        .await
        .map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db) if db.is_foreign_key_violation()) {
                StoreError::MemberNotFound(attendance.member_id)
            } else {
                StoreError::Database(e)
            }
        })?;

        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let existing = sqlx::query_as::<_, AttendanceRow>(
            "SELECT * FROM attendance WHERE member_id = $1 AND day = $2",
        )
        .bind(attendance.member_id)
        .bind(attendance.day)
        .fetch_one(&self.conn)
        .await?;

        Ok((existing.into(), false))
    }

    async fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let rows = sqlx::query_as::<_, AttendanceEntryRow>(
            r#"
                SELECT a.id, a.member_id, a.day, a.checked_in_at, m.name AS member_name
                FROM attendance a
                JOIN members m ON m.id = a.member_id
                WHERE a.day = $1
                ORDER BY a.checked_in_at
            "#,
        )
        .bind(day)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AttendanceEntry {
                attendance: row.attendance.into(),
                member_name: row.member_name,
            })
            .collect())
    }
}
