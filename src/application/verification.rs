use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::lifecycle::LifecycleEngine;
use crate::domain::ports::StoreRef;
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::error::{CodeKind, DispatchError, Result};

/// Produces single-use six-digit codes proving physical co-presence.
///
/// Codes are uniformly sampled and zero-padded. Uniqueness only matters
/// within one request; cross-request collisions are harmless.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn generate(&self) -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
    }
}

/// Gate on validation attempts.
///
/// The current design has no throttle; this seam exists so one can be added
/// without touching any validation caller.
pub trait AttemptPolicy: Send + Sync {
    /// Returns `false` once the attempt budget for a request is spent.
    fn register_attempt(&self, request_id: Uuid) -> bool;
}

/// Default policy: every attempt is allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedAttempts;

impl AttemptPolicy for UnlimitedAttempts {
    fn register_attempt(&self, _request_id: Uuid) -> bool {
        true
    }
}

/// Validates arrival and completion codes and drives the corresponding
/// lifecycle transitions on success.
pub struct VerificationService {
    store: StoreRef,
    lifecycle: Arc<LifecycleEngine>,
    policy: Arc<dyn AttemptPolicy>,
}

impl VerificationService {
    pub fn new(store: StoreRef, lifecycle: Arc<LifecycleEngine>) -> Self {
        Self::with_policy(store, lifecycle, Arc::new(UnlimitedAttempts))
    }

    pub fn with_policy(
        store: StoreRef,
        lifecycle: Arc<LifecycleEngine>,
        policy: Arc<dyn AttemptPolicy>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            policy,
        }
    }

    /// Proves the mechanic reached the customer. Requires IN_PROGRESS and an
    /// exact match against the issued arrival code; success moves the
    /// request to SERVICING and stamps its start time.
    pub async fn validate_arrival(&self, request_id: Uuid, code: &str) -> Result<ServiceRequest> {
        self.check(
            request_id,
            code,
            RequestStatus::InProgress,
            CodeKind::Arrival,
        )
        .await?;
        self.lifecycle
            .transition(request_id, RequestStatus::Servicing)
            .await
    }

    /// Proves the work is done to the customer's satisfaction. Requires
    /// IN_COMPLETION and an exact match against the issued completion code;
    /// success moves the request to COMPLETED, capturing the payment hold
    /// and retiring the accepted offer.
    pub async fn validate_completion(&self, request_id: Uuid, code: &str) -> Result<ServiceRequest> {
        self.check(
            request_id,
            code,
            RequestStatus::InCompletion,
            CodeKind::Completion,
        )
        .await?;
        self.lifecycle
            .transition(request_id, RequestStatus::Completed)
            .await
    }

    async fn check(
        &self,
        request_id: Uuid,
        code: &str,
        required: RequestStatus,
        kind: CodeKind,
    ) -> Result<()> {
        if !self.policy.register_attempt(request_id) {
            return Err(DispatchError::InvalidState(format!(
                "too many {kind} code attempts for this request"
            )));
        }

        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;

        if request.status != required {
            return Err(DispatchError::InvalidState(format!(
                "{kind} code can only be verified while the request is {required}, not {}",
                request.status
            )));
        }

        let expected = match kind {
            CodeKind::Arrival => request.arrival_code.as_deref(),
            CodeKind::Completion => request.completion_code.as_deref(),
        };
        match expected {
            Some(expected) if expected == code => Ok(()),
            _ => Err(DispatchError::InvalidCode(kind)),
        }
    }
}
