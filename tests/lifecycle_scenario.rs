use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use uuid::Uuid;

use gym_keeper::clock::{Clock, FixedClock};
use gym_keeper::lifecycle::fingerprint::{EnrollmentSigner, FingerprintId};
use gym_keeper::lifecycle::renewal::{add_months, RenewalRequest};
use gym_keeper::models::attendance::{CheckIn, MemberIdentity};
use gym_keeper::models::members::{Member, MemberStatus, MembershipType, NewMember, PlanPrices};
use gym_keeper::models::payments::PaymentMethod;
use gym_keeper::repositories::{MemberStore, MemoryStore, PaymentStore};
use gym_keeper::services::attendance::AttendanceRequest;
use gym_keeper::services::couples::CoupleRequest;
use gym_keeper::services::fingerprints::FingerprintRequest;
use gym_keeper::services::members::MemberRequest;
use gym_keeper::services::{request, start_services, ServiceChannels, ServiceContext, ServiceError};

fn ist() -> FixedOffset {
    FixedOffset::east_opt(330 * 60).unwrap()
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 3, 30, 0).unwrap()
}

struct Gym {
    channels: ServiceChannels,
    store: MemoryStore,
    clock: FixedClock,
}

fn open_gym() -> Gym {
    let store = MemoryStore::new();
    let clock = FixedClock::new(start());
    let context = ServiceContext {
        store: Arc::new(store.clone()),
        clock: Arc::new(clock.clone()),
        offset: ist(),
        prices: PlanPrices::default(),
        signer: EnrollmentSigner::new("integration-secret", Duration::minutes(10)),
        device_key: Some("front-desk".to_string()),
    };

    Gym {
        channels: start_services(context),
        store,
        clock,
    }
}

impl Gym {
    async fn enroll_and_register(
        &self,
        name: &str,
        phone: &str,
        plan: MembershipType,
        months: i32,
    ) -> Member {
        let proof = request(&self.channels.fingerprints, |response| {
            FingerprintRequest::Enroll {
                candidate: None,
                device_key: Some("front-desk".to_string()),
                response,
            }
        })
        .await
        .unwrap();

        let new_member = NewMember {
            name: name.to_string(),
            age: 28,
            phone_number: phone.to_string(),
            email: None,
            address: "Indiranagar, Bengaluru".to_string(),
            membership_type: plan,
            duration_months: months,
            custom_amount_in_cents: None,
            subscription_start_date: None,
            payment_method: PaymentMethod::Upi,
            fingerprint_id: proof.fingerprint_id.to_string(),
            fingerprint_token: proof.token,
        };
        request(&self.channels.members, |response| MemberRequest::Register {
            new_member,
            response,
        })
        .await
        .unwrap()
    }

    async fn check_in(&self, identity: MemberIdentity) -> CheckIn {
        request(&self.channels.attendance, |response| AttendanceRequest::CheckIn {
            identity,
            response,
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn lapsed_member_renews_and_checks_in() {
    let gym = open_gym();
    let member = gym
        .enroll_and_register("Arjun Rao", "9845012345", MembershipType::Basic, 1)
        .await;
    assert_eq!(member.fingerprint_id, FingerprintId::new(1).ok());

    // A month and a day later the subscription has lapsed.
    gym.clock.set(member.subscription_end_date + Duration::days(1));
    let changed = request(&gym.channels.members, |response| {
        MemberRequest::SyncStatuses { response }
    })
    .await
    .unwrap();
    assert_eq!(changed, 1);
    let lapsed = gym.store.get_member(member.id).await.unwrap().unwrap();
    assert_eq!(lapsed.status, MemberStatus::Expired);

    let denied = gym.check_in(MemberIdentity::Member(member.id)).await;
    assert!(!denied.is_granted());

    let renewal = RenewalRequest {
        months: 1,
        amount_in_cents: 100_000,
        membership_type: None,
        payment_method: PaymentMethod::Cash,
    };
    let outcome = request(&gym.channels.members, |response| MemberRequest::Renew {
        id: member.id,
        request: renewal,
        response,
    })
    .await
    .unwrap();

    let now = gym.clock.now();
    let renewed = &outcome.members[0];
    assert_eq!(renewed.status, MemberStatus::Active);
    assert_eq!(outcome.schedule.anchor, now);
    assert_eq!(Some(renewed.subscription_end_date), add_months(now, 1, ist()));
    assert_eq!(gym.store.payments_for_member(member.id).await.unwrap().len(), 2);

    let fingerprint = member.fingerprint_id.unwrap();
    let granted = gym.check_in(MemberIdentity::Fingerprint(fingerprint)).await;
    assert!(matches!(granted, CheckIn::Recorded { .. }));
    let repeat = gym.check_in(MemberIdentity::Fingerprint(fingerprint)).await;
    assert!(matches!(repeat, CheckIn::AlreadyRecorded { .. }));
}

#[tokio::test]
async fn couple_lifecycle_through_channels() {
    let gym = open_gym();
    let ravi = gym
        .enroll_and_register("Ravi Kumar", "9845000001", MembershipType::Couple, 3)
        .await;
    let meera = gym
        .enroll_and_register("Meera Kumar", "9845000002", MembershipType::Couple, 3)
        .await;
    assert_ne!(ravi.fingerprint_id, meera.fingerprint_id);

    let group = request(&gym.channels.couples, |response| CoupleRequest::Link {
        member_id: ravi.id,
        partner_id: meera.id,
        response,
    })
    .await
    .unwrap();

    let renewal = RenewalRequest {
        months: 6,
        amount_in_cents: 300_000,
        membership_type: None,
        payment_method: PaymentMethod::BankTransfer,
    };
    let outcome = request(&gym.channels.members, |response| MemberRequest::Renew {
        id: meera.id,
        request: renewal,
        response,
    })
    .await
    .unwrap();
    assert_eq!(outcome.members.len(), 2);
    assert_eq!(outcome.members[0].subscription_end_date, outcome.members[1].subscription_end_date);
    assert_eq!(outcome.payment.couple_group_id, Some(group.group_id));

    let off_plan = RenewalRequest {
        months: 1,
        amount_in_cents: 100_000,
        membership_type: Some(MembershipType::Basic),
        payment_method: PaymentMethod::Cash,
    };
    let rejected = request(&gym.channels.members, |response| MemberRequest::Renew {
        id: ravi.id,
        request: off_plan,
        response,
    })
    .await;
    assert!(matches!(rejected, Err(ServiceError::Validation(_))));

    let unlinked = request(&gym.channels.couples, |response| CoupleRequest::Unlink {
        member_id: ravi.id,
        target: MembershipType::Premium,
        response,
    })
    .await
    .unwrap();
    assert_eq!(unlinked.affected, 2);

    let meera_now = gym.store.get_member(meera.id).await.unwrap().unwrap();
    assert_eq!(meera_now.membership_type, MembershipType::Premium);
    assert_eq!(meera_now.couple_partner_id, None);
    assert_eq!(
        meera_now.subscription_end_date,
        outcome.members[0].subscription_end_date
    );
}

#[tokio::test]
async fn enrollment_requires_device_key() {
    let gym = open_gym();
    let result = request(&gym.channels.fingerprints, |response| {
        FingerprintRequest::Enroll {
            candidate: Some("5".to_string()),
            device_key: None,
            response,
        }
    })
    .await;
    assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
}

#[tokio::test]
async fn expired_token_cannot_register() {
    let gym = open_gym();
    let proof = request(&gym.channels.fingerprints, |response| {
        FingerprintRequest::Enroll {
            candidate: Some("5".to_string()),
            device_key: Some("front-desk".to_string()),
            response,
        }
    })
    .await
    .unwrap();

    gym.clock.advance(Duration::minutes(11));
    let new_member = NewMember {
        name: "Late Scanner".to_string(),
        age: 40,
        phone_number: "9845099999".to_string(),
        email: None,
        address: "Jayanagar".to_string(),
        membership_type: MembershipType::Basic,
        duration_months: 1,
        custom_amount_in_cents: None,
        subscription_start_date: None,
        payment_method: PaymentMethod::Cash,
        fingerprint_id: "5".to_string(),
        fingerprint_token: proof.token,
    };
    let result = request(&gym.channels.members, |response| MemberRequest::Register {
        new_member,
        response,
    })
    .await;
    assert!(matches!(result, Err(ServiceError::InvalidToken(_))));
    assert_eq!(gym.store.count_members().await.unwrap(), 0);

    let missing = request(&gym.channels.members, |response| MemberRequest::Get {
        id: Uuid::new_v4(),
        response,
    })
    .await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));
}
