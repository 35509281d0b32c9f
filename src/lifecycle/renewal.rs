use chrono::{DateTime, FixedOffset, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::couple::CoupleGroupId;
use crate::models::members::{Member, MemberStatus, MembershipType};
use crate::models::payments::{Payment, PaymentMethod};

pub const MIN_RENEWAL_MONTHS: u32 = 1;
pub const MAX_RENEWAL_MONTHS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewalError {
    #[error("Renewal months must be between 1 and 12, got {0}")]
    InvalidMonths(u32),
    #[error("Valid payment amount is required, got {0}")]
    InvalidAmount(i64),
    #[error("Member {0} is linked in a couple group and cannot renew onto the {1} plan")]
    LinkedPlanChange(Uuid, MembershipType),
    #[error("Renewal end date is out of range")]
    DateOutOfRange,
}

/// Adds calendar months in the gym's timezone. A day that does not exist in
/// the target month clamps to that month's last day (Jan 31 + 1 = Feb 28/29).
pub fn add_months(
    instant: DateTime<Utc>,
    months: u32,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    instant
        .with_timezone(&offset)
        .checked_add_months(Months::new(months))
        .map(|local| local.with_timezone(&Utc))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RenewalSchedule {
    pub anchor: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Lapsed members restart from `now`; active ones extend from their current
/// end date.
pub fn compute_renewal(
    current_end_date: DateTime<Utc>,
    status: MemberStatus,
    months: u32,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<RenewalSchedule, RenewalError> {
    if !(MIN_RENEWAL_MONTHS..=MAX_RENEWAL_MONTHS).contains(&months) {
        return Err(RenewalError::InvalidMonths(months));
    }

    let anchor = if current_end_date <= now || status == MemberStatus::Expired {
        now
    } else {
        current_end_date
    };
    let end_date = add_months(anchor, months, offset).ok_or(RenewalError::DateOutOfRange)?;

    Ok(RenewalSchedule { anchor, end_date })
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RenewalRequest {
    pub months: u32,
    pub amount_in_cents: i64,
    pub membership_type: Option<MembershipType>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Everything a store needs to apply a renewal atomically.
#[derive(Clone, Debug)]
pub struct RenewalPlan {
    pub member_id: Uuid,
    pub couple_group_id: Option<CoupleGroupId>,
    pub schedule: RenewalSchedule,
    pub membership_type: MembershipType,
    pub amount_in_cents: i64,
    /// Renewal always reactivates, including out of Suspended.
    pub lifts_suspension: bool,
    pub payment: Payment,
}

impl RenewalPlan {
    /// Rows the member update must touch: the member plus its partner.
    pub fn expected_updates(&self) -> u64 {
        if self.couple_group_id.is_some() {
            2
        } else {
            1
        }
    }

    pub fn covers(&self, member: &Member) -> bool {
        member.id == self.member_id
            || (self.couple_group_id.is_some() && member.couple_group_id == self.couple_group_id)
    }

    pub fn apply(&self, member: &mut Member, now: DateTime<Utc>) {
        member.subscription_end_date = self.schedule.end_date;
        member.status = MemberStatus::Active;
        member.membership_type = self.membership_type;
        member.payment_amount_in_cents = self.amount_in_cents;
        member.updated_at = now;
    }
}

pub fn plan_renewal(
    member: &Member,
    request: &RenewalRequest,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<RenewalPlan, RenewalError> {
    if request.amount_in_cents <= 0 {
        return Err(RenewalError::InvalidAmount(request.amount_in_cents));
    }

    let membership_type = request.membership_type.unwrap_or(member.membership_type);
    if member.is_linked() && membership_type != MembershipType::Couple {
        return Err(RenewalError::LinkedPlanChange(member.id, membership_type));
    }

    let schedule = compute_renewal(
        member.subscription_end_date,
        member.status,
        request.months,
        now,
        offset,
    )?;

    let notes = format!(
        "{}membership renewal - {} month(s) - {}",
        if member.is_linked() { "Couple " } else { "" },
        request.months,
        membership_type
    );
    let payment = Payment::new(
        member.id,
        member.couple_group_id,
        request.amount_in_cents,
        request.payment_method,
        request.months as i32,
        notes,
        now,
    );

    Ok(RenewalPlan {
        member_id: member.id,
        couple_group_id: member.couple_group_id,
        schedule,
        membership_type,
        amount_in_cents: request.amount_in_cents,
        lifts_suspension: member.status == MemberStatus::Suspended,
        payment,
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct RenewalOutcome {
    pub schedule: RenewalSchedule,
    /// The renewed member first, then any partner.
    pub members: Vec<Member>,
    pub payment: Payment,
}
