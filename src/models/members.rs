use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::couple::CoupleGroupId;
use crate::lifecycle::fingerprint::FingerprintId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MembershipType {
    Basic,
    Premium,
    Couple,
    Student,
    Custom,
}

impl MembershipType {
    pub const ALL: [MembershipType; 5] = [
        MembershipType::Basic,
        MembershipType::Premium,
        MembershipType::Couple,
        MembershipType::Student,
        MembershipType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipType::Basic => "Basic",
            MembershipType::Premium => "Premium",
            MembershipType::Couple => "Couple",
            MembershipType::Student => "Student",
            MembershipType::Custom => "Custom",
        }
    }

    /// Plans a member can hold on their own, i.e. everything but Couple.
    pub fn is_individual(&self) -> bool {
        !matches!(self, MembershipType::Couple)
    }
}

impl fmt::Display for MembershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MembershipType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError::new("membership type", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MemberStatus {
    Active,
    Expired,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "Active",
            MemberStatus::Expired => "Expired",
            MemberStatus::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Active" => Ok(MemberStatus::Active),
            "Expired" => Ok(MemberStatus::Expired),
            "Suspended" => Ok(MemberStatus::Suspended),
            other => Err(ParseEnumError::new("member status", other)),
        }
    }
}

/// Subscription lengths offered at registration.
pub const PLAN_DURATIONS: [i32; 4] = [1, 3, 6, 12];

/// Standard plan prices in cents. Custom plans carry their own amount.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlanPrices {
    pub basic: i64,
    pub premium: i64,
    pub couple: i64,
    pub student: i64,
}

impl Default for PlanPrices {
    fn default() -> Self {
        Self {
            basic: 1000 * 100,
            premium: 2000 * 100,
            couple: 3000 * 100,
            student: 500 * 100,
        }
    }
}

impl PlanPrices {
    pub fn price_for(&self, membership_type: MembershipType) -> Option<i64> {
        match membership_type {
            MembershipType::Basic => Some(self.basic),
            MembershipType::Premium => Some(self.premium),
            MembershipType::Couple => Some(self.couple),
            MembershipType::Student => Some(self.student),
            MembershipType::Custom => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub name: String,
    pub age: i32,
    pub phone_number: String,
    pub email: Option<String>,
    pub address: String,
    pub membership_type: MembershipType,
    pub duration_months: i32,
    pub subscription_start_date: DateTime<Utc>,
    pub subscription_end_date: DateTime<Utc>,
    pub payment_amount_in_cents: i64,
    pub custom_amount_in_cents: Option<i64>,
    pub status: MemberStatus,
    pub fingerprint_id: Option<FingerprintId>,
    pub couple_group_id: Option<CoupleGroupId>,
    pub couple_partner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn is_linked(&self) -> bool {
        self.couple_group_id.is_some()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub age: i32,
    pub phone_number: String,
    pub email: Option<String>,
    pub address: String,
    pub membership_type: MembershipType,
    pub duration_months: i32,
    pub custom_amount_in_cents: Option<i64>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_method: super::payments::PaymentMethod,
    /// Raw scanner value, checked against the enrollment token.
    pub fingerprint_id: String,
    pub fingerprint_token: String,
}

/// Partial profile edit. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub age: Option<i32>,
    /// An empty string clears the email.
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub membership_type: Option<MembershipType>,
    pub duration_months: Option<i32>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub custom_amount_in_cents: Option<i64>,
    /// Raw scanner value; an empty string clears the id.
    pub fingerprint_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemberDetails {
    pub member: Member,
    pub payments: Vec<super::payments::Payment>,
    pub total_paid_in_cents: i64,
}
