use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use config::ConfigError;
use tokio::sync::{mpsc, oneshot};

use crate::clock::Clock;
use crate::lifecycle::couple::LinkError;
use crate::lifecycle::fingerprint::{EnrollmentSigner, FingerprintError, TokenError};
use crate::lifecycle::registration::ValidationError;
use crate::lifecycle::status;
use crate::models::members::{Member, PlanPrices};
use crate::repositories::{Store, StoreError};
use crate::settings::Settings;

pub mod attendance;
pub mod couples;
pub mod fingerprints;
pub mod members;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid fingerprint token: {0}")]
    InvalidToken(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Consistency failure: {0}")]
    ConsistencyFailure(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::MemberNotFound(_) => ServiceError::NotFound(error.to_string()),
            StoreError::Duplicate(_) => ServiceError::Conflict(error.to_string()),
            StoreError::Inconsistent { .. } => ServiceError::ConsistencyFailure(error.to_string()),
            StoreError::Validation(e) => e.into(),
            StoreError::Renewal(e) => ServiceError::Validation(e.to_string()),
            StoreError::Link(e) => e.into(),
            StoreError::Corrupt(e) => ServiceError::Repository("members".to_string(), e),
            StoreError::Database(e) => ServiceError::Repository("postgres".to_string(), e.to_string()),
        }
    }
}

impl From<LinkError> for ServiceError {
    fn from(error: LinkError) -> Self {
        match error {
            LinkError::AlreadyLinked(_) => ServiceError::Conflict(error.to_string()),
            _ => ServiceError::Validation(error.to_string()),
        }
    }
}

impl From<FingerprintError> for ServiceError {
    fn from(error: FingerprintError) -> Self {
        match error {
            FingerprintError::Taken(_) => ServiceError::Conflict(error.to_string()),
            FingerprintError::Exhausted => ServiceError::ResourceExhausted(error.to_string()),
            _ => ServiceError::Validation(error.to_string()),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(error: ValidationError) -> Self {
        match error {
            ValidationError::Fingerprint(e) => e.into(),
            _ => ServiceError::Validation(error.to_string()),
        }
    }
}

impl From<TokenError> for ServiceError {
    fn from(error: TokenError) -> Self {
        ServiceError::InvalidToken(error.to_string())
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub offset: FixedOffset,
    pub prices: PlanPrices,
    pub signer: EnrollmentSigner,
    pub device_key: Option<String>,
}

impl ServiceContext {
    pub fn from_settings(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Result<Self, ConfigError> {
        Ok(ServiceContext {
            store,
            clock,
            offset: settings.offset()?,
            prices: settings.plans.clone(),
            signer: EnrollmentSigner::new(&settings.fingerprint.token_secret, settings.token_ttl()),
            device_key: settings.fingerprint.device_key.clone(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn sync_statuses(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let changed = self.store.sync_statuses(now).await?;
        if changed > 0 {
            log::info!("Synchronized status of {} member(s)", changed);
        }
        Ok(changed)
    }

    pub async fn sync_member(
        &self,
        mut member: Member,
        now: DateTime<Utc>,
    ) -> Result<Member, ServiceError> {
        let previous = member.status;
        if !status::synchronize(&mut member, now) {
            return Ok(member);
        }

        if self
            .store
            .transition_status(member.id, previous, member.status, now)
            .await?
        {
            member.updated_at = now;
            return Ok(member);
        }

        // Someone else moved the status first; take theirs.
        self.require_member(member.id).await
    }

    pub async fn require_member(&self, id: uuid::Uuid) -> Result<Member, ServiceError> {
        self.store
            .get_member(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Member not found: {id}")))
    }
}

pub async fn request<T, R>(
    sender: &mpsc::Sender<T>,
    build: impl FnOnce(oneshot::Sender<Result<R, ServiceError>>) -> T,
) -> Result<R, ServiceError>
where
    T: Send + 'static,
{
    let (response, receiver) = oneshot::channel();
    sender.send(build(response)).await.map_err(|e| {
        ServiceError::Communication("request channel".to_string(), e.to_string())
    })?;

    receiver.await.map_err(|e| {
        ServiceError::Communication("response channel".to_string(), e.to_string())
    })?
}

#[derive(Clone)]
pub struct ServiceChannels {
    pub members: mpsc::Sender<members::MemberRequest>,
    pub fingerprints: mpsc::Sender<fingerprints::FingerprintRequest>,
    pub couples: mpsc::Sender<couples::CoupleRequest>,
    pub attendance: mpsc::Sender<attendance::AttendanceRequest>,
}

pub fn start_services(context: ServiceContext) -> ServiceChannels {
    let (member_tx, mut member_rx) = mpsc::channel(512);
    let (fingerprint_tx, mut fingerprint_rx) = mpsc::channel(512);
    let (couple_tx, mut couple_rx) = mpsc::channel(512);
    let (attendance_tx, mut attendance_rx) = mpsc::channel(512);

    let mut member_service = members::MemberService::new();
    let mut fingerprint_service = fingerprints::FingerprintService::new();
    let mut couple_service = couples::CoupleService::new();
    let mut attendance_service = attendance::AttendanceService::new();

    log::info!("Starting member service.");
    let member_context = context.clone();
    tokio::spawn(async move {
        member_service
            .run(
                members::MemberRequestHandler::new(member_context),
                &mut member_rx,
            )
            .await;
    });

    log::info!("Starting fingerprint service.");
    let fingerprint_context = context.clone();
    tokio::spawn(async move {
        fingerprint_service
            .run(
                fingerprints::FingerprintRequestHandler::new(fingerprint_context),
                &mut fingerprint_rx,
            )
            .await;
    });

    log::info!("Starting couple service.");
    let couple_context = context.clone();
    tokio::spawn(async move {
        couple_service
            .run(
                couples::CoupleRequestHandler::new(couple_context),
                &mut couple_rx,
            )
            .await;
    });

    log::info!("Starting attendance service.");
    tokio::spawn(async move {
        attendance_service
            .run(
                attendance::AttendanceRequestHandler::new(context),
                &mut attendance_rx,
            )
            .await;
    });

    ServiceChannels {
        members: member_tx,
        fingerprints: fingerprint_tx,
        couples: couple_tx,
        attendance: attendance_tx,
    }
}
