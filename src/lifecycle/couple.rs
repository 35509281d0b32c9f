//! Couple groups.
//!
//! A group is exactly two members sharing a group id and pointing at each
//! other. `CoupleLink` is the only way to produce one, so a half-written or
//! three-way group cannot be expressed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::members::{Member, MembershipType};

pub const CANDIDATE_LIMIT: usize = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CoupleGroupId(Uuid);

impl CoupleGroupId {
    pub fn new() -> Self {
        CoupleGroupId(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        CoupleGroupId(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CoupleGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CoupleGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("A member cannot be linked with themselves")]
    SelfLink,
    #[error("Member {0} must be on the Couple plan before linking")]
    NotCouplePlan(Uuid),
    #[error("Member {0} is already linked in a couple group")]
    AlreadyLinked(Uuid),
    #[error("{0} is not an individual membership type")]
    NotIndividual(MembershipType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoupleLink {
    group_id: CoupleGroupId,
    pair: (Uuid, Uuid),
}

impl CoupleLink {
    /// Validates both sides and mints a fresh group id.
    pub fn propose(first: &Member, second: &Member) -> Result<Self, LinkError> {
        Self::with_group_id(first, second, CoupleGroupId::new())
    }

    pub fn with_group_id(
        first: &Member,
        second: &Member,
        group_id: CoupleGroupId,
    ) -> Result<Self, LinkError> {
        if first.id == second.id {
            return Err(LinkError::SelfLink);
        }
        for member in [first, second] {
            if member.membership_type != MembershipType::Couple {
                return Err(LinkError::NotCouplePlan(member.id));
            }
        }
        for member in [first, second] {
            if member.is_linked() {
                return Err(LinkError::AlreadyLinked(member.id));
            }
        }

        Ok(CoupleLink {
            group_id,
            pair: (first.id, second.id),
        })
    }

    pub fn group_id(&self) -> CoupleGroupId {
        self.group_id
    }

    pub fn members(&self) -> (Uuid, Uuid) {
        self.pair
    }

    pub fn partner_of(&self, member_id: Uuid) -> Option<Uuid> {
        match self.pair {
            (a, b) if a == member_id => Some(b),
            (a, b) if b == member_id => Some(a),
            _ => None,
        }
    }

    /// Writes the group fields onto `member` if it is one of the pair.
    pub fn apply(&self, member: &mut Member, now: DateTime<Utc>) -> bool {
        match self.partner_of(member.id) {
            Some(partner) => {
                member.membership_type = MembershipType::Couple;
                member.couple_group_id = Some(self.group_id);
                member.couple_partner_id = Some(partner);
                member.updated_at = now;
                true
            }
            None => false,
        }
    }
}

pub fn ensure_individual(target: MembershipType) -> Result<(), LinkError> {
    if target.is_individual() {
        Ok(())
    } else {
        Err(LinkError::NotIndividual(target))
    }
}

/// Converts a member to an individual plan and drops any group fields.
/// Dates and amounts are left alone.
pub fn sever(member: &mut Member, target: MembershipType, now: DateTime<Utc>) {
    member.membership_type = target;
    member.couple_group_id = None;
    member.couple_partner_id = None;
    member.updated_at = now;
}

/// Drops the group fields but keeps the plan; used when the partner is
/// deleted.
pub fn orphan(member: &mut Member, now: DateTime<Utc>) {
    member.couple_group_id = None;
    member.couple_partner_id = None;
    member.updated_at = now;
}

/// Unlinked Couple-plan members other than `requester`, optionally filtered
/// by a case-insensitive name fragment.
pub fn is_candidate(member: &Member, requester: Uuid, search: Option<&str>) -> bool {
    if member.id == requester
        || member.membership_type != MembershipType::Couple
        || member.is_linked()
    {
        return false;
    }

    match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(fragment) => member
            .name
            .to_lowercase()
            .contains(&fragment.to_lowercase()),
        None => true,
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UnlinkOutcome {
    pub previous_group_id: Option<CoupleGroupId>,
    pub affected: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CoupleGroup {
    pub group_id: CoupleGroupId,
    pub members: Vec<Member>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::members::MemberStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 14, 18, 0, 0).unwrap()
    }

    fn member(name: &str, membership_type: MembershipType) -> Member {
        Member {
            id: Uuid::new_v4(),
            name: name.to_string(),
            age: 30,
            phone_number: "9000000000".to_string(),
            email: None,
            address: "Indiranagar".to_string(),
            membership_type,
            duration_months: 3,
            subscription_start_date: now(),
            subscription_end_date: now() + Duration::days(90),
            payment_amount_in_cents: 300_000,
            custom_amount_in_cents: None,
            status: MemberStatus::Active,
            fingerprint_id: None,
            couple_group_id: None,
            couple_partner_id: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn link_is_symmetric() {
        let mut a = member("Ravi", MembershipType::Couple);
        let mut b = member("Meera", MembershipType::Couple);
        let link = CoupleLink::propose(&a, &b).unwrap();

        assert!(link.apply(&mut a, now()));
        assert!(link.apply(&mut b, now()));
        assert_eq!(a.couple_group_id, b.couple_group_id);
        assert_eq!(a.couple_partner_id, Some(b.id));
        assert_eq!(b.couple_partner_id, Some(a.id));

        let outsider = member("Kiran", MembershipType::Couple);
        assert_eq!(link.partner_of(outsider.id), None);
    }

    #[test]
    fn link_preconditions() {
        let a = member("Ravi", MembershipType::Couple);
        let basic = member("Sam", MembershipType::Basic);
        assert_eq!(CoupleLink::propose(&a, &a), Err(LinkError::SelfLink));
        assert_eq!(
            CoupleLink::propose(&a, &basic),
            Err(LinkError::NotCouplePlan(basic.id))
        );

        let mut linked = member("Meera", MembershipType::Couple);
        linked.couple_group_id = Some(CoupleGroupId::new());
        assert_eq!(
            CoupleLink::propose(&a, &linked),
            Err(LinkError::AlreadyLinked(linked.id))
        );
    }

    #[test]
    fn sever_clears_group_but_not_dates() {
        let mut a = member("Ravi", MembershipType::Couple);
        let b = member("Meera", MembershipType::Couple);
        let link = CoupleLink::propose(&a, &b).unwrap();
        link.apply(&mut a, now());
        let end = a.subscription_end_date;

        sever(&mut a, MembershipType::Premium, now());
        assert_eq!(a.membership_type, MembershipType::Premium);
        assert_eq!(a.couple_group_id, None);
        assert_eq!(a.couple_partner_id, None);
        assert_eq!(a.subscription_end_date, end);
        assert_eq!(a.payment_amount_in_cents, 300_000);
    }

    #[test]
    fn couple_is_not_an_individual_target() {
        assert_eq!(
            ensure_individual(MembershipType::Couple),
            Err(LinkError::NotIndividual(MembershipType::Couple))
        );
        assert!(ensure_individual(MembershipType::Student).is_ok());
    }

    #[test]
    fn candidates_exclude_self_linked_and_other_plans() {
        let me = member("Ravi", MembershipType::Couple);
        let open = member("Meera Nair", MembershipType::Couple);
        let basic = member("Meena", MembershipType::Basic);
        let mut taken = member("Mehul", MembershipType::Couple);
        taken.couple_group_id = Some(CoupleGroupId::new());

        assert!(!is_candidate(&me, me.id, None));
        assert!(is_candidate(&open, me.id, None));
        assert!(is_candidate(&open, me.id, Some("nair")));
        assert!(is_candidate(&open, me.id, Some("  ")));
        assert!(!is_candidate(&open, me.id, Some("kumar")));
        assert!(!is_candidate(&basic, me.id, None));
        assert!(!is_candidate(&taken, me.id, None));
    }
}
