//! In-process store. Each operation runs under a single write lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AttendanceStore, BackfillReport, MemberStore, PaymentStore, StoreError, UniqueField,
};
use crate::lifecycle::couple::{self, CoupleGroupId, CoupleLink, UnlinkOutcome, CANDIDATE_LIMIT};
use crate::lifecycle::fingerprint::{FingerprintId, FingerprintPool};
use crate::lifecycle::renewal::{self, RenewalOutcome, RenewalRequest};
use crate::lifecycle::{registration, status};
use crate::models::attendance::{Attendance, AttendanceEntry};
use crate::models::members::{Member, MemberStatus, MemberUpdate, MembershipType, PlanPrices};
use crate::models::payments::Payment;

#[derive(Default)]
struct State {
    members: HashMap<Uuid, Member>,
    payments: Vec<Payment>,
    attendance: Vec<Attendance>,
}

impl State {
    fn member(&self, id: Uuid) -> Result<&Member, StoreError> {
        self.members.get(&id).ok_or(StoreError::MemberNotFound(id))
    }

    fn ensure_unique(&self, candidate: &Member) -> Result<(), StoreError> {
        for other in self.members.values().filter(|m| m.id != candidate.id) {
            if other.phone_number == candidate.phone_number {
                return Err(StoreError::Duplicate(UniqueField::PhoneNumber));
            }
            if candidate.email.is_some() && other.email == candidate.email {
                return Err(StoreError::Duplicate(UniqueField::Email));
            }
            if candidate.fingerprint_id.is_some() && other.fingerprint_id == candidate.fingerprint_id
            {
                return Err(StoreError::Duplicate(UniqueField::FingerprintId));
            }
        }
        Ok(())
    }

    fn sorted_newest_first(&self, mut members: Vec<Member>) -> Vec<Member> {
        members.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        members
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemberStore for MemoryStore {
    async fn insert_member(
        &self,
        member: &Member,
        payment: &Payment,
    ) -> Result<Member, StoreError> {
        let mut state = self.state.write().await;
        state.ensure_unique(member)?;

        state.members.insert(member.id, member.clone());
        state.payments.push(payment.clone());
        Ok(member.clone())
    }

    async fn get_member(&self, id: Uuid) -> Result<Option<Member>, StoreError> {
        let state = self.state.read().await;
        Ok(state.members.get(&id).cloned())
    }

    async fn find_by_fingerprint(&self, id: FingerprintId) -> Result<Option<Member>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .values()
            .find(|m| m.fingerprint_id == Some(id))
            .cloned())
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        let state = self.state.read().await;
        let members = state.members.values().cloned().collect();
        Ok(state.sorted_newest_first(members))
    }

    async fn count_members(&self) -> Result<i64, StoreError> {
        Ok(self.state.read().await.members.len() as i64)
    }

    async fn update_member(
        &self,
        id: Uuid,
        update: MemberUpdate,
        prices: &PlanPrices,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<Member, StoreError> {
        let mut state = self.state.write().await;
        let mut member = state.member(id)?.clone();
        registration::apply_update(&mut member, update, prices, now, offset)?;
        state.ensure_unique(&member)?;

        state.members.insert(id, member.clone());
        Ok(member)
    }

    async fn delete_member(&self, id: Uuid, now: DateTime<Utc>) -> Result<Member, StoreError> {
        let mut state = self.state.write().await;
        let removed = state
            .members
            .remove(&id)
            .ok_or(StoreError::MemberNotFound(id))?;

        state.payments.retain(|p| p.member_id != id);
        state.attendance.retain(|a| a.member_id != id);
        if let Some(partner) = removed
            .couple_partner_id
            .and_then(|partner| state.members.get_mut(&partner))
        {
            couple::orphan(partner, now);
        }

        Ok(removed)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<Member, StoreError> {
        let mut state = self.state.write().await;
        let member = state
            .members
            .get_mut(&id)
            .ok_or(StoreError::MemberNotFound(id))?;

        member.status = status;
        member.updated_at = now;
        Ok(member.clone())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: MemberStatus,
        to: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.members.get_mut(&id) {
            Some(member) if member.status == from => {
                member.status = to;
                member.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::MemberNotFound(id)),
        }
    }

    async fn sync_statuses(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut changed = 0;
        for member in state.members.values_mut() {
            if status::synchronize(member, now) {
                member.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn renew_member(
        &self,
        id: Uuid,
        request: &RenewalRequest,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<RenewalOutcome, StoreError> {
        let mut state = self.state.write().await;
        let member = state.member(id)?;
        let plan = renewal::plan_renewal(member, request, now, offset)?;

        let mut covered: Vec<Uuid> = state
            .members
            .values()
            .filter(|m| plan.covers(m))
            .map(|m| m.id)
            .collect();
        let actual = covered.len() as u64;
        if actual != plan.expected_updates() {
            return Err(StoreError::Inconsistent {
                expected: plan.expected_updates(),
                actual,
            });
        }
        covered.sort_by_key(|member_id| *member_id != id);

        let mut members = Vec::with_capacity(covered.len());
        for member_id in covered {
            if let Some(member) = state.members.get_mut(&member_id) {
                plan.apply(member, now);
                members.push(member.clone());
            }
        }
        state.payments.push(plan.payment.clone());

        Ok(RenewalOutcome {
            schedule: plan.schedule,
            members,
            payment: plan.payment,
        })
    }

    async fn assigned_fingerprints(&self) -> Result<Vec<FingerprintId>, StoreError> {
        let state = self.state.read().await;
        let mut ids: Vec<FingerprintId> = state
            .members
            .values()
            .filter_map(|m| m.fingerprint_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn backfill_fingerprints(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport, StoreError> {
        let mut state = self.state.write().await;
        let mut pool =
            FingerprintPool::from_assigned(state.members.values().filter_map(|m| m.fingerprint_id));

        let mut pending: Vec<&Member> = state
            .members
            .values()
            .filter(|m| m.fingerprint_id.is_none())
            .collect();
        pending.sort_by_key(|m| (m.created_at, m.id));
        let pending: Vec<Uuid> = pending.into_iter().map(|m| m.id).collect();

        let plan = pool.backfill(&pending);
        for (member_id, fingerprint_id) in &plan.assignments {
            if let Some(member) = state.members.get_mut(member_id) {
                member.fingerprint_id = Some(*fingerprint_id);
                member.updated_at = now;
            }
        }

        Ok(BackfillReport {
            assigned: plan.assignments,
            remaining: plan.remaining,
        })
    }

    async fn link_couple(
        &self,
        first: Uuid,
        second: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CoupleLink, StoreError> {
        let mut state = self.state.write().await;
        let link = CoupleLink::propose(state.member(first)?, state.member(second)?)?;

        for member_id in [first, second] {
            if let Some(member) = state.members.get_mut(&member_id) {
                link.apply(member, now);
            }
        }
        Ok(link)
    }

    async fn unlink_couple(
        &self,
        id: Uuid,
        target: MembershipType,
        now: DateTime<Utc>,
    ) -> Result<UnlinkOutcome, StoreError> {
        couple::ensure_individual(target)?;

        let mut state = self.state.write().await;
        let group_id = state.member(id)?.couple_group_id;

        let scope: Vec<Uuid> = state
            .members
            .values()
            .filter(|m| m.id == id || (group_id.is_some() && m.couple_group_id == group_id))
            .map(|m| m.id)
            .collect();
        let expected = if group_id.is_some() { 2 } else { 1 };
        let affected = scope.len() as u64;
        if affected != expected {
            return Err(StoreError::Inconsistent {
                expected,
                actual: affected,
            });
        }

        for member_id in scope {
            if let Some(member) = state.members.get_mut(&member_id) {
                couple::sever(member, target, now);
            }
        }

        Ok(UnlinkOutcome {
            previous_group_id: group_id,
            affected,
        })
    }

    async fn couple_candidates(
        &self,
        id: Uuid,
        search: Option<&str>,
    ) -> Result<Vec<Member>, StoreError> {
        let state = self.state.read().await;
        state.member(id)?;

        let mut candidates: Vec<Member> = state
            .members
            .values()
            .filter(|m| couple::is_candidate(m, id, search))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.truncate(CANDIDATE_LIMIT);
        Ok(candidates)
    }

    async fn group_members(&self, group_id: CoupleGroupId) -> Result<Vec<Member>, StoreError> {
        let state = self.state.read().await;
        let mut members: Vec<Member> = state
            .members
            .values()
            .filter(|m| m.couple_group_id == Some(group_id))
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn payments_for_member(&self, member_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.member_id == member_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn payments_for_group(
        &self,
        group_id: CoupleGroupId,
    ) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.couple_group_id == Some(group_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn record_attendance(
        &self,
        attendance: &Attendance,
    ) -> Result<(Attendance, bool), StoreError> {
        let mut state = self.state.write().await;
        if !state.members.contains_key(&attendance.member_id) {
            return Err(StoreError::MemberNotFound(attendance.member_id));
        }

        if let Some(existing) = state
            .attendance
            .iter()
            .find(|a| a.member_id == attendance.member_id && a.day == attendance.day)
        {
            return Ok((existing.clone(), false));
        }

        state.attendance.push(attendance.clone());
        Ok((attendance.clone(), true))
    }

    async fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<AttendanceEntry> = state
            .attendance
            .iter()
            .filter(|a| a.day == day)
            .map(|a| AttendanceEntry {
                attendance: a.clone(),
                member_name: state
                    .members
                    .get(&a.member_id)
                    .map(|m| m.name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        entries.sort_by_key(|e| e.attendance.checked_in_at);
        Ok(entries)
    }
}
