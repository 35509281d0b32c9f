use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::members::ParseEnumError;
use crate::lifecycle::couple::CoupleGroupId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum PaymentMethod {
    #[default]
    Cash,
    #[serde(rename = "UPI")]
    Upi,
    Card,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Upi => "UPI",
            PaymentMethod::Card => "Card",
            PaymentMethod::BankTransfer => "BankTransfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Cash" => Ok(PaymentMethod::Cash),
            "UPI" => Ok(PaymentMethod::Upi),
            "Card" => Ok(PaymentMethod::Card),
            "BankTransfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}

/// Ledger entry. Written once, never updated.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Payment {
    pub id: Uuid,
    pub member_id: Uuid,
    pub couple_group_id: Option<CoupleGroupId>,
    pub amount_in_cents: i64,
    pub payment_method: PaymentMethod,
    pub duration_months: i32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        member_id: Uuid,
        couple_group_id: Option<CoupleGroupId>,
        amount_in_cents: i64,
        payment_method: PaymentMethod,
        duration_months: i32,
        notes: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            couple_group_id,
            amount_in_cents,
            payment_method,
            duration_months,
            notes,
            created_at,
        }
    }
}
