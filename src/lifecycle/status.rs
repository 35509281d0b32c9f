use chrono::{DateTime, Utc};

use crate::models::members::{Member, MemberStatus};

/// Status a member should have at `now`.
///
/// Suspended is sticky; only an explicit reactivation leaves it. An end date
/// equal to `now` still counts as active.
pub fn resolve_status(
    current: MemberStatus,
    subscription_end_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MemberStatus {
    match current {
        MemberStatus::Suspended => MemberStatus::Suspended,
        _ if subscription_end_date < now => MemberStatus::Expired,
        _ => MemberStatus::Active,
    }
}

/// Recomputes one member in place. Returns true if the status changed.
pub fn synchronize(member: &mut Member, now: DateTime<Utc>) -> bool {
    let next = resolve_status(member.status, member.subscription_end_date, now);
    if next == member.status {
        return false;
    }

    log::debug!(
        "Member {} status {} -> {} (ends {})",
        member.id,
        member.status,
        next,
        member.subscription_end_date
    );
    member.status = next;
    true
}

/// Status after lifting a suspension: whatever the dates say.
pub fn reactivated_status(
    subscription_end_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MemberStatus {
    resolve_status(MemberStatus::Active, subscription_end_date, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn past_end_date_expires_active_member() {
        let end = now() - Duration::seconds(1);
        assert_eq!(
            resolve_status(MemberStatus::Active, end, now()),
            MemberStatus::Expired
        );
    }

    #[test]
    fn end_date_equal_to_now_is_still_active() {
        assert_eq!(
            resolve_status(MemberStatus::Active, now(), now()),
            MemberStatus::Active
        );
        assert_eq!(
            resolve_status(MemberStatus::Expired, now(), now()),
            MemberStatus::Active
        );
    }

    #[test]
    fn expired_member_with_future_end_becomes_active() {
        let end = now() + Duration::days(3);
        assert_eq!(
            resolve_status(MemberStatus::Expired, end, now()),
            MemberStatus::Active
        );
    }

    #[test]
    fn suspended_is_never_touched() {
        for end in [now() - Duration::days(30), now() + Duration::days(30)] {
            assert_eq!(
                resolve_status(MemberStatus::Suspended, end, now()),
                MemberStatus::Suspended
            );
        }
    }

    #[test]
    fn reactivation_lands_on_date_derived_status() {
        assert_eq!(
            reactivated_status(now() + Duration::days(1), now()),
            MemberStatus::Active
        );
        assert_eq!(
            reactivated_status(now() - Duration::days(1), now()),
            MemberStatus::Expired
        );
    }
}
