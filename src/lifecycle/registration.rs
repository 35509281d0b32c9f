use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::lifecycle::fingerprint::{FingerprintError, FingerprintId};
use crate::lifecycle::renewal::add_months;
use crate::models::members::{
    Member, MemberStatus, MemberUpdate, MembershipType, NewMember, PlanPrices, PLAN_DURATIONS,
};
use crate::models::payments::Payment;

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid required field: {0}")]
    Missing(&'static str),
    #[error("Age must be a number between 1 and 100, got {0}")]
    Age(i32),
    #[error("Invalid phone number {0:?}. Use a valid 10-digit mobile number")]
    Phone(String),
    #[error("Invalid email format: {0:?}")]
    Email(String),
    #[error("Duration must be 1, 3, 6, or 12 months, got {0}")]
    Duration(i32),
    #[error("Custom plan requires a valid positive amount")]
    CustomAmount,
    #[error("A custom amount only applies to the Custom plan, not {0}")]
    CustomAmountOnPlan(MembershipType),
    #[error("Fingerprint scan is required before registration")]
    FingerprintRequired,
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error("Member is linked in a couple group; unlink before leaving the Couple plan")]
    LinkedPlanChange,
    #[error("Subscription end date is out of range")]
    DateOutOfRange,
}

/// Strips everything but digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Ten digits, leading 6-9.
pub fn is_valid_mobile(phone: &str) -> bool {
    phone.len() == 10
        && phone.chars().all(|c| c.is_ascii_digit())
        && matches!(phone.as_bytes()[0], b'6'..=b'9')
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    Ok(value.to_string())
}

fn check_age(age: i32) -> Result<i32, ValidationError> {
    if !(1..=100).contains(&age) {
        return Err(ValidationError::Age(age));
    }
    Ok(age)
}

fn check_phone(raw: &str) -> Result<String, ValidationError> {
    let phone = normalize_phone(raw);
    if phone.is_empty() {
        return Err(ValidationError::Missing("phone_number"));
    }
    if !is_valid_mobile(&phone) {
        return Err(ValidationError::Phone(phone));
    }
    Ok(phone)
}

/// Lower-cases and validates. Blank means "no email".
fn check_email(raw: &str) -> Result<Option<String>, ValidationError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Ok(None);
    }
    if !RE_EMAIL.is_match(&email) {
        return Err(ValidationError::Email(email));
    }
    Ok(Some(email))
}

fn check_duration(months: i32) -> Result<i32, ValidationError> {
    if !PLAN_DURATIONS.contains(&months) {
        return Err(ValidationError::Duration(months));
    }
    Ok(months)
}

/// List price for standard plans, the custom amount for Custom.
fn plan_amount(
    membership_type: MembershipType,
    custom_amount: Option<i64>,
    prices: &PlanPrices,
) -> Result<(i64, Option<i64>), ValidationError> {
    match prices.price_for(membership_type) {
        Some(price) => Ok((price, None)),
        None => match custom_amount {
            Some(amount) if amount > 0 => Ok((amount, Some(amount))),
            _ => Err(ValidationError::CustomAmount),
        },
    }
}

fn end_date(
    start: DateTime<Utc>,
    duration_months: i32,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, ValidationError> {
    add_months(start, duration_months as u32, offset).ok_or(ValidationError::DateOutOfRange)
}

/// Validated registration, ready to insert together with its first payment.
#[derive(Clone, Debug)]
pub struct Registration {
    pub member: Member,
    pub payment: Payment,
}

/// Fingerprint id claimed by a registration form, before token checks.
pub fn claimed_fingerprint(new_member: &NewMember) -> Result<FingerprintId, ValidationError> {
    FingerprintId::parse_scan(&new_member.fingerprint_id)?
        .ok_or(ValidationError::FingerprintRequired)
}

pub fn prepare_registration(
    new_member: NewMember,
    prices: &PlanPrices,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Registration, ValidationError> {
    let fingerprint_id = claimed_fingerprint(&new_member)?;
    let name = required(&new_member.name, "name")?;
    let address = required(&new_member.address, "address")?;
    let age = check_age(new_member.age)?;
    let phone_number = check_phone(&new_member.phone_number)?;
    let email = check_email(new_member.email.as_deref().unwrap_or_default())?;
    let duration_months = check_duration(new_member.duration_months)?;
    let (payment_amount, custom_amount) = plan_amount(
        new_member.membership_type,
        new_member.custom_amount_in_cents,
        prices,
    )?;

    let start = new_member.subscription_start_date.unwrap_or(now);
    let member = Member {
        id: Uuid::new_v4(),
        name,
        age,
        phone_number,
        email,
        address,
        membership_type: new_member.membership_type,
        duration_months,
        subscription_start_date: start,
        subscription_end_date: end_date(start, duration_months, offset)?,
        payment_amount_in_cents: payment_amount,
        custom_amount_in_cents: custom_amount,
        status: MemberStatus::Active,
        fingerprint_id: Some(fingerprint_id),
        couple_group_id: None,
        couple_partner_id: None,
        created_at: now,
        updated_at: now,
    };

    let payment = Payment::new(
        member.id,
        None,
        payment_amount,
        new_member.payment_method,
        duration_months,
        format!(
            "Initial payment for {} month(s) during registration",
            duration_months
        ),
        now,
    );

    Ok(Registration { member, payment })
}

/// Applies a partial edit in place. Uniqueness is left to the store.
pub fn apply_update(
    member: &mut Member,
    update: MemberUpdate,
    prices: &PlanPrices,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<(), ValidationError> {
    // Setting a custom amount implies the Custom plan.
    let plan = match (update.membership_type, update.custom_amount_in_cents) {
        (Some(plan), Some(_)) if plan != MembershipType::Custom => {
            return Err(ValidationError::CustomAmountOnPlan(plan));
        }
        (_, Some(_)) => Some(MembershipType::Custom),
        (plan, None) => plan,
    };

    if let Some(name) = update.name {
        member.name = required(&name, "name")?;
    }
    if let Some(age) = update.age {
        member.age = check_age(age)?;
    }
    if let Some(email) = update.email {
        member.email = check_email(&email)?;
    }
    if let Some(phone) = update.phone_number {
        member.phone_number = check_phone(&phone)?;
    }
    if let Some(address) = update.address {
        member.address = required(&address, "address")?;
    }
    if let Some(raw) = update.fingerprint_id {
        member.fingerprint_id = FingerprintId::parse_scan(&raw)?;
    }

    if let Some(plan) = plan {
        if member.is_linked() && plan != MembershipType::Couple {
            return Err(ValidationError::LinkedPlanChange);
        }
        let custom = update
            .custom_amount_in_cents
            .or(member.custom_amount_in_cents);
        let (amount, custom) = plan_amount(plan, custom, prices)?;
        member.membership_type = plan;
        member.payment_amount_in_cents = amount;
        member.custom_amount_in_cents = custom;
    }

    let reschedule =
        update.duration_months.is_some() || update.subscription_start_date.is_some();
    if let Some(months) = update.duration_months {
        member.duration_months = check_duration(months)?;
    }
    if let Some(start) = update.subscription_start_date {
        member.subscription_start_date = start;
    }
    if reschedule {
        member.subscription_end_date =
            end_date(member.subscription_start_date, member.duration_months, offset)?;
    }

    member.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::couple::CoupleGroupId;
    use crate::models::payments::PaymentMethod;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap()
    }

    fn form() -> NewMember {
        NewMember {
            name: "  Priya Sharma ".to_string(),
            age: 27,
            phone_number: "98765-43210".to_string(),
            email: Some(" Priya@Example.COM ".to_string()),
            address: "Koramangala".to_string(),
            membership_type: MembershipType::Premium,
            duration_months: 3,
            custom_amount_in_cents: None,
            subscription_start_date: None,
            payment_method: PaymentMethod::Upi,
            fingerprint_id: "17".to_string(),
            fingerprint_token: String::new(),
        }
    }

    #[test]
    fn normalizes_and_derives_fields() {
        let registration = prepare_registration(form(), &PlanPrices::default(), now(), utc())
            .unwrap();
        let member = registration.member;

        assert_eq!(member.name, "Priya Sharma");
        assert_eq!(member.email.as_deref(), Some("priya@example.com"));
        assert_eq!(member.status, MemberStatus::Active);
        assert_eq!(member.payment_amount_in_cents, 200_000);
        assert_eq!(member.fingerprint_id, Some(FingerprintId::new(17).unwrap()));
        assert_eq!(
            member.subscription_end_date,
            Utc.with_ymd_and_hms(2025, 4, 30, 10, 0, 0).unwrap()
        );

        assert_eq!(registration.payment.member_id, member.id);
        assert_eq!(registration.payment.amount_in_cents, 200_000);
        assert_eq!(
            registration.payment.notes,
            "Initial payment for 3 month(s) during registration"
        );
    }

    #[test]
    fn phone_must_be_ten_digit_mobile() {
        assert_eq!(normalize_phone("98765-43210"), "9876543210");
        assert!(is_valid_mobile("9876543210"));
        assert!(!is_valid_mobile("5876543210"));
        assert!(!is_valid_mobile("919876543210"));
    }

    #[test]
    fn rejects_bad_fields() {
        let prices = PlanPrices::default();

        let mut bad = form();
        bad.age = 0;
        assert_eq!(
            prepare_registration(bad, &prices, now(), utc()).unwrap_err(),
            ValidationError::Age(0)
        );

        let mut bad = form();
        bad.phone_number = "12345".to_string();
        assert!(matches!(
            prepare_registration(bad, &prices, now(), utc()),
            Err(ValidationError::Phone(_))
        ));

        let mut bad = form();
        bad.duration_months = 2;
        assert_eq!(
            prepare_registration(bad, &prices, now(), utc()).unwrap_err(),
            ValidationError::Duration(2)
        );

        let mut bad = form();
        bad.fingerprint_id = "300".to_string();
        assert_eq!(
            prepare_registration(bad, &prices, now(), utc()).unwrap_err(),
            ValidationError::Fingerprint(FingerprintError::OutOfRange(300))
        );

        let mut bad = form();
        bad.fingerprint_id = String::new();
        assert_eq!(
            prepare_registration(bad, &prices, now(), utc()).unwrap_err(),
            ValidationError::FingerprintRequired
        );

        let mut bad = form();
        bad.membership_type = MembershipType::Custom;
        assert_eq!(
            prepare_registration(bad, &prices, now(), utc()).unwrap_err(),
            ValidationError::CustomAmount
        );
    }

    #[test]
    fn update_recomputes_end_and_amount() {
        let prices = PlanPrices::default();
        let mut member = prepare_registration(form(), &prices, now(), utc())
            .unwrap()
            .member;

        let update = MemberUpdate {
            duration_months: Some(1),
            custom_amount_in_cents: Some(75_000),
            email: Some(String::new()),
            ..Default::default()
        };
        apply_update(&mut member, update, &prices, now(), utc()).unwrap();

        assert_eq!(member.membership_type, MembershipType::Custom);
        assert_eq!(member.payment_amount_in_cents, 75_000);
        assert_eq!(member.email, None);
        assert_eq!(
            member.subscription_end_date,
            Utc.with_ymd_and_hms(2025, 2, 28, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn custom_amount_with_standard_plan_is_rejected() {
        let prices = PlanPrices::default();
        let mut member = prepare_registration(form(), &prices, now(), utc())
            .unwrap()
            .member;
        let before = member.clone();

        let update = MemberUpdate {
            name: Some("Priya S".to_string()),
            membership_type: Some(MembershipType::Basic),
            custom_amount_in_cents: Some(80_000),
            ..Default::default()
        };
        assert_eq!(
            apply_update(&mut member, update, &prices, now(), utc()),
            Err(ValidationError::CustomAmountOnPlan(MembershipType::Basic))
        );
        assert_eq!(member, before);

        let update = MemberUpdate {
            membership_type: Some(MembershipType::Custom),
            custom_amount_in_cents: Some(80_000),
            ..Default::default()
        };
        apply_update(&mut member, update, &prices, now(), utc()).unwrap();
        assert_eq!(member.membership_type, MembershipType::Custom);
        assert_eq!(member.payment_amount_in_cents, 80_000);
    }

    #[test]
    fn linked_member_cannot_leave_couple_plan_by_update() {
        let prices = PlanPrices::default();
        let mut member = prepare_registration(form(), &prices, now(), utc())
            .unwrap()
            .member;
        member.membership_type = MembershipType::Couple;
        member.couple_group_id = Some(CoupleGroupId::new());

        let update = MemberUpdate {
            membership_type: Some(MembershipType::Basic),
            ..Default::default()
        };
        assert_eq!(
            apply_update(&mut member, update, &prices, now(), utc()),
            Err(ValidationError::LinkedPlanChange)
        );
    }
}
