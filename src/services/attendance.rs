use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceContext, ServiceError};
use crate::lifecycle::attendance::{local_day, new_attendance};
use crate::models::attendance::{CheckIn, DailyAttendance, MemberIdentity};
use crate::models::members::{Member, MemberStatus};

pub enum AttendanceRequest {
    CheckIn {
        identity: MemberIdentity,
        response: oneshot::Sender<Result<CheckIn, ServiceError>>,
    },
    Today {
        response: oneshot::Sender<Result<DailyAttendance, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct AttendanceRequestHandler {
    context: ServiceContext,
}

impl AttendanceRequestHandler {
    pub fn new(context: ServiceContext) -> Self {
        AttendanceRequestHandler { context }
    }

    async fn identify(&self, identity: MemberIdentity) -> Result<Member, ServiceError> {
        match identity {
            MemberIdentity::Member(id) => self.context.require_member(id).await,
            MemberIdentity::Fingerprint(fingerprint_id) => self
                .context
                .store
                .find_by_fingerprint(fingerprint_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "No member enrolled with fingerprint ID {fingerprint_id}"
                    ))
                }),
        }
    }

    async fn check_in(&self, identity: MemberIdentity) -> Result<CheckIn, ServiceError> {
        let now = self.context.now();
        let member = self.identify(identity).await?;
        let member = self.context.sync_member(member, now).await?;

        if member.status != MemberStatus::Active {
            log::info!("Denied check-in for member {} ({})", member.id, member.status);
            return Ok(CheckIn::Denied {
                member_id: member.id,
                status: member.status,
            });
        }

        let attendance = new_attendance(member.id, now, self.context.offset);
        let (attendance, created) = self
            .context
            .store
            .record_attendance(&attendance)
            .await?;

        if created {
            log::info!("Recorded attendance for member {} on {}", member.id, attendance.day);
            Ok(CheckIn::Recorded { attendance })
        } else {
            Ok(CheckIn::AlreadyRecorded { attendance })
        }
    }

    async fn today(&self) -> Result<DailyAttendance, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let day = local_day(now, self.context.offset);
        let entries = self.context.store.attendance_on(day).await?;
        Ok(DailyAttendance { day, entries })
    }
}

#[async_trait]
impl RequestHandler<AttendanceRequest> for AttendanceRequestHandler {
    async fn handle_request(&self, request: AttendanceRequest) {
        match request {
            AttendanceRequest::CheckIn { identity, response } => {
                let result = self.check_in(identity).await;
                let _ = response.send(result);
            }
            AttendanceRequest::Today { response } => {
                let result = self.today().await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AttendanceService;

impl AttendanceService {
    pub fn new() -> Self {
        AttendanceService {}
    }
}

#[async_trait]
impl Service<AttendanceRequest, AttendanceRequestHandler> for AttendanceService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::fingerprint::FingerprintId;
    use crate::models::members::MembershipType;
    use crate::models::payments::{Payment, PaymentMethod};
    use crate::repositories::{MemberStore, MemoryStore};
    use crate::services::test_support;
    use chrono::{DateTime, Duration, Utc};
    use uuid::Uuid;

    async fn seed(store: &MemoryStore, end: DateTime<Utc>, status: MemberStatus) -> Member {
        let start = end - Duration::days(30);
        let member = Member {
            id: Uuid::new_v4(),
            name: "Kavya".to_string(),
            age: 24,
            phone_number: "8123456789".to_string(),
            email: None,
            address: "Malleshwaram".to_string(),
            membership_type: MembershipType::Student,
            duration_months: 1,
            subscription_start_date: start,
            subscription_end_date: end,
            payment_amount_in_cents: 50_000,
            custom_amount_in_cents: None,
            status,
            fingerprint_id: Some(FingerprintId::new(11).unwrap()),
            couple_group_id: None,
            couple_partner_id: None,
            created_at: start,
            updated_at: start,
        };
        let payment = Payment::new(
            member.id,
            None,
            50_000,
            PaymentMethod::Cash,
            1,
            "Initial payment for 1 month(s) during registration".to_string(),
            start,
        );
        store.insert_member(&member, &payment).await.unwrap()
    }

    #[tokio::test]
    async fn check_in_is_once_per_local_day() {
        let (context, store, clock) = test_support::context();
        let handler = AttendanceRequestHandler::new(context);
        let member = seed(&store, test_support::now() + Duration::days(20), MemberStatus::Active).await;
        let by_fingerprint = MemberIdentity::Fingerprint(FingerprintId::new(11).unwrap());

        let first = handler.check_in(by_fingerprint).await.unwrap();
        let CheckIn::Recorded { attendance } = first.clone() else {
            panic!("expected a new record, got {first:?}");
        };

        clock.advance(Duration::hours(3));
        let again = handler
            .check_in(MemberIdentity::Member(member.id))
            .await
            .unwrap();
        assert_eq!(
            again,
            CheckIn::AlreadyRecorded {
                attendance: attendance.clone()
            }
        );

        clock.advance(Duration::days(1));
        let CheckIn::Recorded { attendance: next } = handler.check_in(by_fingerprint).await.unwrap()
        else {
            panic!("expected a record for the next day");
        };
        assert!(next.day > attendance.day);

        let today = handler.today().await.unwrap();
        assert_eq!(today.entries.len(), 1);
        assert_eq!(today.entries[0].member_name, "Kavya");
    }

    #[tokio::test]
    async fn lapsed_member_is_expired_and_denied() {
        let (context, store, _) = test_support::context();
        let handler = AttendanceRequestHandler::new(context);
        let member = seed(&store, test_support::now() - Duration::hours(1), MemberStatus::Active).await;

        let outcome = handler
            .check_in(MemberIdentity::Member(member.id))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CheckIn::Denied {
                member_id: member.id,
                status: MemberStatus::Expired
            }
        );
        assert!(!outcome.is_granted());

        let stored = store.get_member(member.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MemberStatus::Expired);
        assert!(handler.today().await.unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn suspended_member_is_denied() {
        let (context, store, _) = test_support::context();
        let handler = AttendanceRequestHandler::new(context);
        let member = seed(&store, test_support::now() + Duration::days(5), MemberStatus::Suspended).await;

        let outcome = handler
            .check_in(MemberIdentity::Member(member.id))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CheckIn::Denied {
                member_id: member.id,
                status: MemberStatus::Suspended
            }
        );
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_not_found() {
        let (context, _, _) = test_support::context();
        let handler = AttendanceRequestHandler::new(context);
        let outcome = handler
            .check_in(MemberIdentity::Fingerprint(FingerprintId::new(200).unwrap()))
            .await;
        assert!(matches!(outcome, Err(ServiceError::NotFound(_))));
    }
}
