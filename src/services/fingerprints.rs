use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceContext, ServiceError};
use crate::lifecycle::fingerprint::{EnrollmentProof, FingerprintId, FingerprintPool};
use crate::repositories::BackfillReport;

pub enum FingerprintRequest {
    Enroll {
        candidate: Option<String>,
        device_key: Option<String>,
        response: oneshot::Sender<Result<EnrollmentProof, ServiceError>>,
    },
    Backfill {
        response: oneshot::Sender<Result<BackfillReport, ServiceError>>,
    },
    PoolStatus {
        response: oneshot::Sender<Result<PoolStatus, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub assigned: usize,
    pub available: usize,
    pub next_free: Option<FingerprintId>,
}

#[derive(Clone)]
pub struct FingerprintRequestHandler {
    context: ServiceContext,
}

impl FingerprintRequestHandler {
    pub fn new(context: ServiceContext) -> Self {
        FingerprintRequestHandler { context }
    }

    fn authorize(&self, device_key: Option<&str>) -> Result<(), ServiceError> {
        match &self.context.device_key {
            Some(expected) if device_key != Some(expected.as_str()) => Err(
                ServiceError::Unauthorized("Enrollment device key mismatch".to_string()),
            ),
            _ => Ok(()),
        }
    }

    async fn pool(&self) -> Result<FingerprintPool, ServiceError> {
        let assigned = self.context.store.assigned_fingerprints().await?;
        Ok(FingerprintPool::from_assigned(assigned))
    }

    async fn enroll(
        &self,
        candidate: Option<String>,
        device_key: Option<String>,
    ) -> Result<EnrollmentProof, ServiceError> {
        self.authorize(device_key.as_deref())?;

        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let candidate = match candidate {
            Some(raw) => FingerprintId::parse_scan(&raw)?,
            None => None,
        };
        let mut pool = self.pool().await?;
        let fingerprint_id = pool.reserve(candidate)?;
        let proof = self.context.signer.issue(fingerprint_id, now)?;

        log::info!(
            "Issued enrollment token for fingerprint {} ({} left in pool)",
            fingerprint_id,
            pool.available()
        );
        Ok(proof)
    }

    async fn backfill(&self) -> Result<BackfillReport, ServiceError> {
        let now = self.context.now();
        self.context.sync_statuses(now).await?;

        let report = self.context.store.backfill_fingerprints(now).await?;
        if report.remaining > 0 {
            log::warn!(
                "Fingerprint pool exhausted; {} member(s) left without an ID",
                report.remaining
            );
        }
        log::info!("Backfilled {} fingerprint ID(s)", report.assigned.len());
        Ok(report)
    }

    async fn pool_status(&self) -> Result<PoolStatus, ServiceError> {
        self.context.sync_statuses(self.context.now()).await?;

        let pool = self.pool().await?;
        Ok(PoolStatus {
            assigned: pool.assigned(),
            available: pool.available(),
            next_free: pool.lowest_free(),
        })
    }
}

#[async_trait]
impl RequestHandler<FingerprintRequest> for FingerprintRequestHandler {
    async fn handle_request(&self, request: FingerprintRequest) {
        match request {
            FingerprintRequest::Enroll {
                candidate,
                device_key,
                response,
            } => {
                let result = self.enroll(candidate, device_key).await;
                let _ = response.send(result);
            }
            FingerprintRequest::Backfill { response } => {
                let result = self.backfill().await;
                let _ = response.send(result);
            }
            FingerprintRequest::PoolStatus { response } => {
                let result = self.pool_status().await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct FingerprintService;

impl FingerprintService {
    pub fn new() -> Self {
        FingerprintService {}
    }
}

#[async_trait]
impl Service<FingerprintRequest, FingerprintRequestHandler> for FingerprintService {}
