use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{RequestHandler, Service, ServiceContext, ServiceError};
use crate::lifecycle::registration::{claimed_fingerprint, prepare_registration};
use crate::lifecycle::renewal::{RenewalOutcome, RenewalRequest};
use crate::lifecycle::status;
use crate::models::members::{Member, MemberDetails, MemberStatus, MemberUpdate, NewMember};

pub enum MemberRequest {
    Register {
        new_member: NewMember,
        response: oneshot::Sender<Result<Member, ServiceError>>,
    },
    Get {
        id: Uuid,
        response: oneshot::Sender<Result<MemberDetails, ServiceError>>,
    },
    List {
        response: oneshot::Sender<Result<Vec<Member>, ServiceError>>,
    },
    Count {
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    Update {
        id: Uuid,
        update: MemberUpdate,
        response: oneshot::Sender<Result<Member, ServiceError>>,
    },
    Suspend {
        id: Uuid,
        response: oneshot::Sender<Result<Member, ServiceError>>,
    },
    Reactivate {
        id: Uuid,
        response: oneshot::Sender<Result<Member, ServiceError>>,
    },
    Delete {
        id: Uuid,
        response: oneshot::Sender<Result<Member, ServiceError>>,
    },
    Renew {
        id: Uuid,
        request: RenewalRequest,
        response: oneshot::Sender<Result<RenewalOutcome, ServiceError>>,
    },
    SyncStatuses {
        response: oneshot::Sender<Result<u64, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct MemberRequestHandler {
    context: ServiceContext,
}

impl MemberRequestHandler {
    pub fn new(context: ServiceContext) -> Self {
        MemberRequestHandler { context }
    }

    async fn register(&self, new_member: NewMember) -> Result<Member, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let fingerprint_id = claimed_fingerprint(&new_member)?;
        self.context
            .signer
            .verify(&new_member.fingerprint_token, fingerprint_id, now)?;

        let registration =
            prepare_registration(new_member, &self.context.prices, now, self.context.offset)?;
        let member = self
            .context
            .store
            .insert_member(&registration.member, &registration.payment)
            .await?;

        log::info!(
            "Registered member {} ({} plan, fingerprint {})",
            member.id,
            member.membership_type,
            fingerprint_id
        );
        Ok(member)
    }

    async fn get(&self, id: Uuid) -> Result<MemberDetails, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;

        let member = self.context.require_member(id).await?;
        let payments = self.context.store.payments_for_member(id).await?;
        let total_paid_in_cents = payments.iter().map(|p| p.amount_in_cents).sum();

        Ok(MemberDetails {
            member,
            payments,
            total_paid_in_cents,
        })
    }

    async fn list(&self) -> Result<Vec<Member>, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;
        Ok(self.context.store.list_members().await?)
    }

    async fn count(&self) -> Result<i64, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;
        Ok(self.context.store.count_members().await?)
    }

    async fn update(&self, id: Uuid, update: MemberUpdate) -> Result<Member, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let member = self
            .context
            .store
            .update_member(id, update, &self.context.prices, now, self.context.offset)
            .await?;
        log::info!("Updated member {}", id);
        Ok(member)
    }

    async fn suspend(&self, id: Uuid) -> Result<Member, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let member = self
            .context
            .store
            .set_status(id, MemberStatus::Suspended, now)
            .await?;
        log::info!("Suspended member {}", id);
        Ok(member)
    }

    async fn reactivate(&self, id: Uuid) -> Result<Member, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let member = self.context.require_member(id).await?;
        if member.status != MemberStatus::Suspended {
            return Ok(member);
        }

        let target = status::reactivated_status(member.subscription_end_date, now);
        let member = self.context.store.set_status(id, target, now).await?;
        log::info!("Reactivated member {} as {}", id, target);
        Ok(member)
    }

    async fn delete(&self, id: Uuid) -> Result<Member, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let member = self.context.store.delete_member(id, now).await?;
        if let Some(partner) = member.couple_partner_id {
            log::info!("Deleted member {}; partner {} is now unlinked", id, partner);
        } else {
            log::info!("Deleted member {}", id);
        }
        Ok(member)
    }

    async fn renew(&self, id: Uuid, request: RenewalRequest) -> Result<RenewalOutcome, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let member = self.context.require_member(id).await?;
        if member.status == MemberStatus::Suspended {
            log::warn!("Renewal of member {} lifts their suspension", id);
        }

        let outcome = self
            .context
            .store
            .renew_member(id, &request, now, self.context.offset)
            .await?;

        log::info!(
            "Renewed {} member(s) through {} ({} month(s), {} cents)",
            outcome.members.len(),
            outcome.schedule.end_date,
            request.months,
            request.amount_in_cents
        );
        Ok(outcome)
    }
}

#[async_trait]
impl RequestHandler<MemberRequest> for MemberRequestHandler {
    async fn handle_request(&self, request: MemberRequest) {
        match request {
            MemberRequest::Register {
                new_member,
                response,
            } => {
                let result = self.register(new_member).await;
                let _ = response.send(result);
            }
            MemberRequest::Get { id, response } => {
                let result = self.get(id).await;
                let _ = response.send(result);
            }
            MemberRequest::List { response } => {
                let result = self.list().await;
                let _ = response.send(result);
            }
            MemberRequest::Count { response } => {
                let result = self.count().await;
                let _ = response.send(result);
            }
            MemberRequest::Update {
                id,
                update,
                response,
            } => {
                let result = self.update(id, update).await;
                let _ = response.send(result);
            }
            MemberRequest::Suspend { id, response } => {
                let result = self.suspend(id).await;
                let _ = response.send(result);
            }
            MemberRequest::Reactivate { id, response } => {
                let result = self.reactivate(id).await;
                let _ = response.send(result);
            }
            MemberRequest::Delete { id, response } => {
                let result = self.delete(id).await;
                let _ = response.send(result);
            }
            MemberRequest::Renew {
                id,
                request,
                response,
            } => {
                let result = self.renew(id, request).await;
                let _ = response.send(result);
            }
            MemberRequest::SyncStatuses { response } => {
                let result = self.context.sync_statuses(self.context.now()).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct MemberService;

impl MemberService {
    pub fn new() -> Self {
        MemberService {}
    }
}

#[async_trait]
impl Service<MemberRequest, MemberRequestHandler> for MemberService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::lifecycle::fingerprint::{EnrollmentSigner, FingerprintId};
    use crate::models::members::MembershipType;
    use crate::models::payments::PaymentMethod;
    use crate::services::test_support;
    use chrono::Duration;

    fn form(phone: &str, fingerprint: i64, token: String) -> NewMember {
        NewMember {
            name: "Priya Sharma".to_string(),
            age: 31,
            phone_number: phone.to_string(),
            email: Some("priya@example.com".to_string()),
            address: "HSR Layout".to_string(),
            membership_type: MembershipType::Premium,
            duration_months: 3,
            custom_amount_in_cents: None,
            subscription_start_date: None,
            payment_method: PaymentMethod::Card,
            fingerprint_id: fingerprint.to_string(),
            fingerprint_token: token,
        }
    }

    fn token(fingerprint: i64, context: &ServiceContext) -> String {
        context
            .signer
            .issue(FingerprintId::new(fingerprint).unwrap(), context.now())
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn register_requires_matching_token() {
        let (context, _, _) = test_support::context();
        let handler = MemberRequestHandler::new(context.clone());

        let forged = EnrollmentSigner::new("other", Duration::minutes(10))
            .issue(FingerprintId::new(7).unwrap(), context.now())
            .unwrap()
            .token;
        let result = handler.register(form("9123456780", 7, forged)).await;
        assert!(matches!(result, Err(ServiceError::InvalidToken(_))));

        let wrong_id = token(8, &context);
        let result = handler.register(form("9123456780", 7, wrong_id)).await;
        assert!(matches!(result, Err(ServiceError::InvalidToken(_))));

        let member = handler
            .register(form("9123456780", 7, token(7, &context)))
            .await
            .unwrap();
        assert_eq!(member.fingerprint_id, FingerprintId::new(7).ok());
        assert_eq!(member.status, MemberStatus::Active);

        let details = handler.get(member.id).await.unwrap();
        assert_eq!(details.payments.len(), 1);
        assert_eq!(details.total_paid_in_cents, 200_000);
        assert_eq!(
            details.payments[0].notes,
            "Initial payment for 3 month(s) during registration"
        );
    }

    #[tokio::test]
    async fn register_rejects_duplicate_phone_and_fingerprint() {
        let (context, _, _) = test_support::context();
        let handler = MemberRequestHandler::new(context.clone());
        handler
            .register(form("9123456780", 7, token(7, &context)))
            .await
            .unwrap();

        let mut same_phone = form("9123456780", 8, token(8, &context));
        same_phone.email = None;
        assert!(matches!(
            handler.register(same_phone).await,
            Err(ServiceError::Conflict(_))
        ));

        let mut same_fp = form("9123456781", 7, token(7, &context));
        same_fp.email = None;
        assert!(matches!(
            handler.register(same_fp).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn register_without_scan_is_rejected() {
        let (context, _, _) = test_support::context();
        let handler = MemberRequestHandler::new(context);
        let result = handler
            .register(form("9123456780", 7, String::new()))
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidToken(_))));

        let mut blank = form("9123456780", 7, String::new());
        blank.fingerprint_id = " ".to_string();
        assert!(matches!(
            handler.register(blank).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn suspension_survives_sync_and_reactivation_follows_dates() {
        let (context, _, clock) = test_support::context();
        let handler = MemberRequestHandler::new(context.clone());
        let member = handler
            .register(form("9123456780", 7, token(7, &context)))
            .await
            .unwrap();

        handler.suspend(member.id).await.unwrap();
        clock.advance(Duration::days(200));
        assert_eq!(handler.context.sync_statuses(clock.now()).await.unwrap(), 0);
        assert_eq!(
            handler.get(member.id).await.unwrap().member.status,
            MemberStatus::Suspended
        );

        let reactivated = handler.reactivate(member.id).await.unwrap();
        assert_eq!(reactivated.status, MemberStatus::Expired);
    }

    #[tokio::test]
    async fn update_rejects_taken_email() {
        let (context, _, _) = test_support::context();
        let handler = MemberRequestHandler::new(context.clone());
        handler
            .register(form("9123456780", 7, token(7, &context)))
            .await
            .unwrap();
        let mut other = form("9123456781", 8, token(8, &context));
        other.email = Some("other@example.com".to_string());
        let other = handler.register(other).await.unwrap();

        let update = MemberUpdate {
            email: Some("priya@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            handler.update(other.id, update).await,
            Err(ServiceError::Conflict(_))
        ));

        let update = MemberUpdate {
            duration_months: Some(6),
            ..Default::default()
        };
        let updated = handler.update(other.id, update).await.unwrap();
        assert_eq!(updated.duration_months, 6);
        assert!(updated.subscription_end_date > other.subscription_end_date);
    }

    #[tokio::test]
    async fn missing_member_is_not_found() {
        let (context, _, _) = test_support::context();
        let handler = MemberRequestHandler::new(context);
        assert!(matches!(
            handler.get(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            handler.delete(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sync_counts_only_changed_members() {
        let (context, _, clock) = test_support::context();
        let handler = MemberRequestHandler::new(context.clone());
        handler
            .register(form("9123456780", 7, token(7, &context)))
            .await
            .unwrap();

        clock.advance(Duration::days(120));
        assert_eq!(context.sync_statuses(clock.now()).await.unwrap(), 1);
        assert_eq!(context.sync_statuses(clock.now()).await.unwrap(), 0);
    }
}
