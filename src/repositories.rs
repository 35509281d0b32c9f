use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::lifecycle::couple::{CoupleGroupId, CoupleLink, LinkError, UnlinkOutcome};
use crate::lifecycle::fingerprint::FingerprintId;
use crate::lifecycle::registration::ValidationError;
use crate::lifecycle::renewal::{RenewalError, RenewalOutcome, RenewalRequest};
use crate::models::attendance::{Attendance, AttendanceEntry};
use crate::models::members::{Member, MemberStatus, MemberUpdate, MembershipType, PlanPrices};
use crate::models::payments::Payment;

pub mod attendance;
pub mod members;
pub mod memory;
pub mod payments;

pub use memory::MemoryStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    PhoneNumber,
    Email,
    FingerprintId,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniqueField::PhoneNumber => "phone number",
            UniqueField::Email => "email",
            UniqueField::FingerprintId => "fingerprint ID",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Member not found: {0}")]
    MemberNotFound(Uuid),
    #[error("Another member already uses this {0}")]
    Duplicate(UniqueField),
    #[error("Couple update touched {actual} of {expected} records")]
    Inconsistent { expected: u64, actual: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Renewal(#[from] RenewalError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub assigned: Vec<(Uuid, FingerprintId)>,
    pub remaining: usize,
}

#[async_trait]
pub trait MemberStore: Send + Sync + 'static {
    async fn insert_member(&self, member: &Member, payment: &Payment)
        -> Result<Member, StoreError>;

    async fn get_member(&self, id: Uuid) -> Result<Option<Member>, StoreError>;

    async fn find_by_fingerprint(&self, id: FingerprintId) -> Result<Option<Member>, StoreError>;

    async fn list_members(&self) -> Result<Vec<Member>, StoreError>;

    async fn count_members(&self) -> Result<i64, StoreError>;

    async fn update_member(
        &self,
        id: Uuid,
        update: MemberUpdate,
        prices: &PlanPrices,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<Member, StoreError>;

    async fn delete_member(&self, id: Uuid, now: DateTime<Utc>) -> Result<Member, StoreError>;

    async fn set_status(
        &self,
        id: Uuid,
        status: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<Member, StoreError>;

    /// Compare-and-set used by the single-member synchronizer.
    async fn transition_status(
        &self,
        id: Uuid,
        from: MemberStatus,
        to: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn sync_statuses(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn renew_member(
        &self,
        id: Uuid,
        request: &RenewalRequest,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<RenewalOutcome, StoreError>;

    async fn assigned_fingerprints(&self) -> Result<Vec<FingerprintId>, StoreError>;

    async fn backfill_fingerprints(&self, now: DateTime<Utc>)
        -> Result<BackfillReport, StoreError>;

    async fn link_couple(
        &self,
        first: Uuid,
        second: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CoupleLink, StoreError>;

    async fn unlink_couple(
        &self,
        id: Uuid,
        target: MembershipType,
        now: DateTime<Utc>,
    ) -> Result<UnlinkOutcome, StoreError>;

    async fn couple_candidates(
        &self,
        id: Uuid,
        search: Option<&str>,
    ) -> Result<Vec<Member>, StoreError>;

    async fn group_members(&self, group_id: CoupleGroupId) -> Result<Vec<Member>, StoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    async fn payments_for_member(&self, member_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    async fn payments_for_group(&self, group_id: CoupleGroupId)
        -> Result<Vec<Payment>, StoreError>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync + 'static {
    /// Returns the stored record and whether it was created now.
    async fn record_attendance(
        &self,
        attendance: &Attendance,
    ) -> Result<(Attendance, bool), StoreError>;

    async fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError>;
}

pub trait Store: MemberStore + PaymentStore + AttendanceStore {}

impl<T> Store for T where T: MemberStore + PaymentStore + AttendanceStore {}

#[derive(Clone)]
pub struct PgStore {
    conn: sqlx::PgPool,
}

impl PgStore {
    pub fn new(conn: sqlx::PgPool) -> Self {
        PgStore { conn }
    }
}

pub(crate) fn map_unique_violation(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some("members_phone_number_key") => Some(UniqueField::PhoneNumber),
                Some("members_email_key") => Some(UniqueField::Email),
                Some("members_fingerprint_id_key") => Some(UniqueField::FingerprintId),
                _ => None,
            };
            if let Some(field) = field {
                return StoreError::Duplicate(field);
            }
        }
    }
    StoreError::Database(error)
}
