use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use super::{PaymentStore, PgStore, StoreError};
use crate::lifecycle::couple::CoupleGroupId;
use crate::models::payments::Payment;

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    member_id: Uuid,
    couple_group_id: Option<Uuid>,
    amount_in_cents: i64,
    payment_method: String,
    duration_months: i32,
    notes: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let payment_method = row
            .payment_method
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?;

        Ok(Payment {
            id: row.id,
            member_id: row.member_id,
            couple_group_id: row.couple_group_id.map(CoupleGroupId::from_uuid),
            amount_in_cents: row.amount_in_cents,
            payment_method,
            duration_months: row.duration_months,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

pub(super) async fn insert_payment(
    conn: &mut PgConnection,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
            INSERT INTO payments (
                id, member_id, couple_group_id, amount_in_cents, payment_method,
                duration_months, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(payment.id)
    .bind(payment.member_id)
    .bind(payment.couple_group_id.map(|g| g.as_uuid()))
    .bind(payment.amount_in_cents)
    .bind(payment.payment_method.as_str())
    .bind(payment.duration_months)
    .bind(&payment.notes)
    .bind(payment.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn payments_for_member(&self, member_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE member_id = $1 ORDER BY created_at DESC",
        )
        .bind(member_id)
        .fetch_all(&self.conn)
        .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn payments_for_group(
        &self,
        group_id: CoupleGroupId,
    ) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE couple_group_id = $1 ORDER BY created_at DESC",
        )
        .bind(group_id.as_uuid())
        .fetch_all(&self.conn)
        .await?;

        rows.into_iter().map(Payment::try_from).collect()
    }
}
