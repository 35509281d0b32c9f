use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use super::payments::insert_payment;
use super::{map_unique_violation, BackfillReport, MemberStore, PgStore, StoreError};
use crate::lifecycle::couple::{
    self, CoupleGroupId, CoupleLink, UnlinkOutcome, CANDIDATE_LIMIT,
};
use crate::lifecycle::fingerprint::{FingerprintId, FingerprintPool};
use crate::lifecycle::registration;
use crate::lifecycle::renewal::{self, RenewalOutcome, RenewalRequest};
use crate::models::members::{Member, MemberStatus, MemberUpdate, MembershipType, PlanPrices};
use crate::models::payments::Payment;

#[derive(Debug, sqlx::FromRow)]
pub(super) struct MemberRow {
    id: Uuid,
    name: String,
    age: i32,
    phone_number: String,
    email: Option<String>,
    address: String,
    membership_type: String,
    duration_months: i32,
    subscription_start_date: DateTime<Utc>,
    subscription_end_date: DateTime<Utc>,
    payment_amount_in_cents: i64,
    custom_amount_in_cents: Option<i64>,
    status: String,
    fingerprint_id: Option<i32>,
    couple_group_id: Option<Uuid>,
    couple_partner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let corrupt = |e: &dyn std::fmt::Display| StoreError::Corrupt(format!("member {}: {e}", row.id));

        let membership_type = row.membership_type.parse().map_err(|e| corrupt(&e))?;
        let status = row.status.parse().map_err(|e| corrupt(&e))?;
        let fingerprint_id = row
            .fingerprint_id
            .map(|id| FingerprintId::new(i64::from(id)))
            .transpose()
            .map_err(|e| corrupt(&e))?;

        Ok(Member {
            id: row.id,
            name: row.name,
            age: row.age,
            phone_number: row.phone_number,
            email: row.email,
            address: row.address,
            membership_type,
            duration_months: row.duration_months,
            subscription_start_date: row.subscription_start_date,
            subscription_end_date: row.subscription_end_date,
            payment_amount_in_cents: row.payment_amount_in_cents,
            custom_amount_in_cents: row.custom_amount_in_cents,
            status,
            fingerprint_id,
            couple_group_id: row.couple_group_id.map(CoupleGroupId::from_uuid),
            couple_partner_id: row.couple_partner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_members(rows: Vec<MemberRow>) -> Result<Vec<Member>, StoreError> {
    rows.into_iter().map(Member::try_from).collect()
}

fn fingerprint_column(id: Option<FingerprintId>) -> Option<i32> {
    id.map(|id| i32::from(id.get()))
}

async fn lock_member(conn: &mut PgConnection, id: Uuid) -> Result<Member, StoreError> {
    let row = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.ok_or(StoreError::MemberNotFound(id))?.try_into()
}

async fn abort<T>(tx: Transaction<'_, Postgres>, error: StoreError) -> Result<T, StoreError> {
    tx.rollback().await?;
    Err(error)
}

fn like_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl MemberStore for PgStore {
    async fn insert_member(
        &self,
        member: &Member,
        payment: &Payment,
    ) -> Result<Member, StoreError> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query_as::<_, MemberRow>(
            r#"
                INSERT INTO members (
                    id, name, age, phone_number, email, address, membership_type,
                    duration_months, subscription_start_date, subscription_end_date,
                    payment_amount_in_cents, custom_amount_in_cents, status, fingerprint_id,
                    couple_group_id, couple_partner_id, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                RETURNING *
            "#,
        )
        .bind(member.id)
        .bind(&member.name)
        .bind(member.age)
        .bind(&member.phone_number)
        .bind(&member.email)
        .bind(&member.address)
        .bind(member.membership_type.as_str())
        .bind(member.duration_months)
        .bind(member.subscription_start_date)
        .bind(member.subscription_end_date)
        .bind(member.payment_amount_in_cents)
        .bind(member.custom_amount_in_cents)
        .bind(member.status.as_str())
        .bind(fingerprint_column(member.fingerprint_id))
        .bind(member.couple_group_id.map(|g| g.as_uuid()))
        .bind(member.couple_partner_id)
        .bind(member.created_at)
        .bind(member.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        insert_payment(&mut tx, payment).await?;
        tx.commit().await?;

        log::info!("Inserted member {} with initial payment {}", member.id, payment.id);
        row.try_into()
    }

    async fn get_member(&self, id: Uuid) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        row.map(Member::try_from).transpose()
    }

    async fn find_by_fingerprint(&self, id: FingerprintId) -> Result<Option<Member>, StoreError> {
        let row =
            sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE fingerprint_id = $1")
                .bind(i32::from(id.get()))
                .fetch_optional(&self.conn)
                .await?;

        row.map(Member::try_from).transpose()
    }

    async fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query_as::<_, MemberRow>("SELECT * FROM members ORDER BY created_at DESC")
            .fetch_all(&self.conn)
            .await?;

        into_members(rows)
    }

    async fn count_members(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM members")
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    async fn update_member(
        &self,
        id: Uuid,
        update: MemberUpdate,
        prices: &PlanPrices,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<Member, StoreError> {
        let mut tx = self.conn.begin().await?;
        let mut member = lock_member(&mut tx, id).await?;
        if let Err(e) = registration::apply_update(&mut member, update, prices, now, offset) {
            return abort(tx, e.into()).await;
        }

        let row = sqlx::query_as::<_, MemberRow>(
            r#"
                UPDATE members
                SET name = $2, age = $3, phone_number = $4, email = $5, address = $6,
                    membership_type = $7, duration_months = $8, subscription_start_date = $9,
                    subscription_end_date = $10, payment_amount_in_cents = $11,
                    custom_amount_in_cents = $12, fingerprint_id = $13, updated_at = $14
                WHERE id = $1
                RETURNING *
            "#,
        )
        .bind(member.id)
        .bind(&member.name)
        .bind(member.age)
        .bind(&member.phone_number)
        .bind(&member.email)
        .bind(&member.address)
        .bind(member.membership_type.as_str())
        .bind(member.duration_months)
        .bind(member.subscription_start_date)
        .bind(member.subscription_end_date)
        .bind(member.payment_amount_in_cents)
        .bind(member.custom_amount_in_cents)
        .bind(fingerprint_column(member.fingerprint_id))
        .bind(member.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        tx.commit().await?;
        row.try_into()
    }

    async fn delete_member(&self, id: Uuid, now: DateTime<Utc>) -> Result<Member, StoreError> {
        let mut tx = self.conn.begin().await?;
        let member = lock_member(&mut tx, id).await?;

        // payments and attendance go with the ON DELETE CASCADE
        sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if let Some(partner) = member.couple_partner_id {
            sqlx::query(
                r#"
                    UPDATE members
                    SET couple_group_id = NULL, couple_partner_id = NULL, updated_at = $2
                    WHERE id = $1
                "#,
            )
            .bind(partner)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(member)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<Member, StoreError> {
        let row = sqlx::query_as::<_, MemberRow>(
            "UPDATE members SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .fetch_optional(&self.conn)
        .await?;

        row.ok_or(StoreError::MemberNotFound(id))?.try_into()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: MemberStatus,
        to: MemberStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE members SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM members WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.conn)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(StoreError::MemberNotFound(id))
        }
    }

    async fn sync_statuses(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
                UPDATE members
                SET status = CASE WHEN subscription_end_date < $1 THEN $2 ELSE $3 END,
                    updated_at = $1
                WHERE status <> $4
                  AND status <> CASE WHEN subscription_end_date < $1 THEN $2 ELSE $3 END
            "#,
        )
        .bind(now)
        .bind(MemberStatus::Expired.as_str())
        .bind(MemberStatus::Active.as_str())
        .bind(MemberStatus::Suspended.as_str())
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    async fn renew_member(
        &self,
        id: Uuid,
        request: &RenewalRequest,
        now: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Result<RenewalOutcome, StoreError> {
        let mut tx = self.conn.begin().await?;
        let member = lock_member(&mut tx, id).await?;
        let plan = match renewal::plan_renewal(&member, request, now, offset) {
            Ok(plan) => plan,
            Err(e) => return abort(tx, e.into()).await,
        };

        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
                UPDATE members
                SET subscription_end_date = $3, status = $4, membership_type = $5,
                    payment_amount_in_cents = $6, updated_at = $7
                WHERE id = $1 OR couple_group_id = $2
                RETURNING *
            "#,
        )
        .bind(id)
        .bind(plan.couple_group_id.map(|g| g.as_uuid()))
        .bind(plan.schedule.end_date)
        .bind(MemberStatus::Active.as_str())
        .bind(plan.membership_type.as_str())
        .bind(plan.amount_in_cents)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let actual = rows.len() as u64;
        if actual != plan.expected_updates() {
            log::error!(
                "Renewal of {} touched {} of {} members, rolling back",
                id,
                actual,
                plan.expected_updates()
            );
            let error = StoreError::Inconsistent {
                expected: plan.expected_updates(),
                actual,
            };
            return abort(tx, error).await;
        }

        insert_payment(&mut tx, &plan.payment).await?;
        tx.commit().await?;

        let mut members = into_members(rows)?;
        members.sort_by_key(|m| m.id != id);

        Ok(RenewalOutcome {
            schedule: plan.schedule,
            members,
            payment: plan.payment,
        })
    }

    async fn assigned_fingerprints(&self) -> Result<Vec<FingerprintId>, StoreError> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT fingerprint_id FROM members WHERE fingerprint_id IS NOT NULL ORDER BY fingerprint_id",
        )
        .fetch_all(&self.conn)
        .await?;

        ids.into_iter()
            .map(|id| {
                FingerprintId::new(i64::from(id)).map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    async fn backfill_fingerprints(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport, StoreError> {
        let mut tx = self.conn.begin().await?;

        // Keeps enrollments from claiming ids between the scan and the update.
        sqlx::query("LOCK TABLE members IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let used = sqlx::query_scalar::<_, i32>(
            "SELECT fingerprint_id FROM members WHERE fingerprint_id IS NOT NULL",
        )
        .fetch_all(&mut *tx)
        .await?;
        let used = used
            .into_iter()
            .map(|id| FingerprintId::new(i64::from(id)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut pool = FingerprintPool::from_assigned(used);

        let pending = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM members WHERE fingerprint_id IS NULL ORDER BY created_at, id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let plan = pool.backfill(&pending);
        if !plan.assignments.is_empty() {
            let (ids, fingerprints): (Vec<Uuid>, Vec<i32>) = plan
                .assignments
                .iter()
                .map(|(id, fingerprint)| (*id, i32::from(fingerprint.get())))
                .unzip();

            sqlx::query(
                r#"
                    UPDATE members AS m
                    SET fingerprint_id = a.fingerprint_id, updated_at = $3
                    FROM UNNEST($1::uuid[], $2::int4[]) AS a(id, fingerprint_id)
                    WHERE m.id = a.id
                "#,
            )
            .bind(&ids)
            .bind(&fingerprints)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_unique_violation)?;
        }

        tx.commit().await?;

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
        let mut tx = self.conn.begin().await?;
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM members WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(vec![first, second])
        .fetch_all(&mut *tx)
        .await?;
        let members = into_members(rows)?;

        let find = |id: Uuid| {
            members
                .iter()
                .find(|m| m.id == id)
                .ok_or(StoreError::MemberNotFound(id))
        };
        let link = match find(first).and_then(|a| {
            let b = find(second)?;
            CoupleLink::propose(a, b).map_err(StoreError::from)
        }) {
            Ok(link) => link,
            Err(e) => return abort(tx, e).await,
        };

        let result = sqlx::query(
            r#"
                UPDATE members
                SET couple_group_id = $3,
                    couple_partner_id = CASE WHEN id = $1 THEN $2 ELSE $1 END,
                    updated_at = $4
                WHERE id IN ($1, $2)
                  AND couple_group_id IS NULL
                  AND membership_type = $5
            "#,
        )
        .bind(first)
        .bind(second)
        .bind(link.group_id().as_uuid())
        .bind(now)
        .bind(MembershipType::Couple.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 2 {
            let error = StoreError::Inconsistent {
                expected: 2,
                actual: result.rows_affected(),
            };
            return abort(tx, error).await;
        }

        tx.commit().await?;
        Ok(link)
    }

    async fn unlink_couple(
        &self,
        id: Uuid,
        target: MembershipType,
        now: DateTime<Utc>,
    ) -> Result<UnlinkOutcome, StoreError> {
        couple::ensure_individual(target)?;

        let mut tx = self.conn.begin().await?;
        let member = lock_member(&mut tx, id).await?;

        let result = sqlx::query(
            r#"
                UPDATE members
                SET membership_type = $2, couple_group_id = NULL, couple_partner_id = NULL,
                    updated_at = $3
                WHERE id = $1 OR couple_group_id = $4
            "#,
        )
        .bind(id)
        .bind(target.as_str())
        .bind(now)
        .bind(member.couple_group_id.map(|g| g.as_uuid()))
        .execute(&mut *tx)
        .await?;

        let expected = if member.is_linked() { 2 } else { 1 };
        if result.rows_affected() != expected {
            let error = StoreError::Inconsistent {
                expected,
                actual: result.rows_affected(),
            };
            return abort(tx, error).await;
        }

        tx.commit().await?;
        Ok(UnlinkOutcome {
            previous_group_id: member.couple_group_id,
            affected: result.rows_affected(),
        })
    }

    async fn couple_candidates(
        &self,
        id: Uuid,
        search: Option<&str>,
    ) -> Result<Vec<Member>, StoreError> {
        if self.get_member(id).await?.is_none() {
            return Err(StoreError::MemberNotFound(id));
        }

        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
                SELECT * FROM members
                WHERE id <> $1
                  AND membership_type = $2
                  AND couple_group_id IS NULL
                  AND ($3::text IS NULL OR name ILIKE $3)
                ORDER BY name
                LIMIT $4
            "#,
        )
        .bind(id)
        .bind(MembershipType::Couple.as_str())
        .bind(pattern)
        .bind(CANDIDATE_LIMIT as i64)
        .fetch_all(&self.conn)
        .await?;

        into_members(rows)
    }

    async fn group_members(&self, group_id: CoupleGroupId) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM members WHERE couple_group_id = $1 ORDER BY created_at",
        )
        .bind(group_id.as_uuid())
        .fetch_all(&self.conn)
        .await?;

        into_members(rows)
    }
}
