use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{RequestHandler, Service, ServiceContext, ServiceError};
use crate::lifecycle::couple::{CoupleGroup, UnlinkOutcome};
use crate::models::members::{Member, MembershipType};
use crate::models::payments::Payment;

pub enum CoupleRequest {
    Link {
        member_id: Uuid,
        partner_id: Uuid,
        response: oneshot::Sender<Result<CoupleGroup, ServiceError>>,
    },
    Unlink {
        member_id: Uuid,
        target: MembershipType,
        response: oneshot::Sender<Result<UnlinkOutcome, ServiceError>>,
    },
    Candidates {
        member_id: Uuid,
        search: Option<String>,
        response: oneshot::Sender<Result<Vec<Member>, ServiceError>>,
    },
    Group {
        member_id: Uuid,
        response: oneshot::Sender<Result<GroupDetails, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct GroupDetails {
    pub group: Option<CoupleGroup>,
    pub payments: Vec<Payment>,
}

#[derive(Clone)]
pub struct CoupleRequestHandler {
    context: ServiceContext,
}

impl CoupleRequestHandler {
    pub fn new(context: ServiceContext) -> Self {
        CoupleRequestHandler { context }
    }

    async fn link(&self, member_id: Uuid, partner_id: Uuid) -> Result<CoupleGroup, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let link = self
            .context
            .store
            .link_couple(member_id, partner_id, now)
            .await?;
        let members = self.context.store.group_members(link.group_id()).await?;

        log::info!(
            "Linked members {} and {} in couple group {}",
            member_id,
            partner_id,
            link.group_id()
        );
        Ok(CoupleGroup {
            group_id: link.group_id(),
            members,
        })
    }

    async fn unlink(
        &self,
        member_id: Uuid,
        target: MembershipType,
    ) -> Result<UnlinkOutcome, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let outcome = self
            .context
            .store
            .unlink_couple(member_id, target, now)
            .await?;

        match outcome.previous_group_id {
            Some(group_id) => log::info!(
                "Dissolved couple group {}; {} member(s) moved to {}",
                group_id,
                outcome.affected,
                target
            ),
            None => log::info!("Member {} was not linked; moved to {}", member_id, target),
        }
        Ok(outcome)
    }

    async fn candidates(
        &self,
        member_id: Uuid,
        search: Option<String>,
    ) -> Result<Vec<Member>, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;

        Ok(self
            .context
            .store
            .couple_candidates(member_id, search.as_deref())
            .await?)
    }

    async fn group(&self, member_id: Uuid) -> Result<GroupDetails, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;

        let member = self.context.require_member(member_id).await?;
        let Some(group_id) = member.couple_group_id else {
            return Ok(GroupDetails {
                group: None,
                payments: Vec::new(),
            });
        };

        let members = self.context.store.group_members(group_id).await?;
        let payments = self.context.store.payments_for_group(group_id).await?;

        Ok(GroupDetails {
            group: Some(CoupleGroup { group_id, members }),
            payments,
        })
    }
}

#[async_trait]
impl RequestHandler<CoupleRequest> for CoupleRequestHandler {
    async fn handle_request(&self, request: CoupleRequest) {
        match request {
            CoupleRequest::Link {
                member_id,
                partner_id,
                response,
            } => {
                let result = self.link(member_id, partner_id).await;
                let _ = response.send(result);
            }
            CoupleRequest::Unlink {
                member_id,
                target,
                response,
            } => {
                let result = self.unlink(member_id, target).await;
                let _ = response.send(result);
            }
            CoupleRequest::Candidates {
                member_id,
                search,
                response,
            } => {
                let result = self.candidates(member_id, search).await;
                let _ = response.send(result);
            }
            CoupleRequest::Group {
                member_id,
                response,
            } => {
                let result = self.group(member_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct CoupleService;

impl CoupleService {
    pub fn new() -> Self {
        CoupleService {}
    }
}

#[async_trait]
impl Service<CoupleRequest, CoupleRequestHandler> for CoupleService {}
