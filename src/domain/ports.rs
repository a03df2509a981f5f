use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::mechanic::Mechanic;
use super::money::Amount;
use super::offer::ServiceOffer;
use super::request::{RequestStatus, ServiceRequest};
use super::review::Review;
use crate::error::Result;

/// Result of the single-winner arbitration transaction.
#[derive(Debug, Clone)]
pub struct AcceptedOffer {
    pub request: ServiceRequest,
    pub offer: ServiceOffer,
    /// Sibling PENDING offers removed in the same transaction.
    pub discarded: usize,
}

/// Rows removed by a cancellation cascade.
#[derive(Debug, Clone)]
pub struct PurgedRequest {
    pub request: ServiceRequest,
    pub offers: Vec<ServiceOffer>,
}

/// Transactional storage for the marketplace entities.
///
/// Cross-entity invariants (single accepted offer, no double capture, no
/// double refund) live in the compound operations, which implementations
/// must apply atomically. Plain reads on missing rows return `Ok(None)`.
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    async fn insert_request(&self, request: ServiceRequest) -> Result<()>;
    async fn request(&self, id: Uuid) -> Result<Option<ServiceRequest>>;
    async fn requests(&self) -> Result<Vec<ServiceRequest>>;
    /// Unconditional write for a row the caller just won via a guarded
    /// update in the same call chain.
    async fn update_request(&self, request: ServiceRequest) -> Result<()>;
    /// Compare-and-swap on the row's current status. Returns `false` when
    /// the guard missed (row absent or status moved), affecting zero rows.
    async fn update_request_guarded(
        &self,
        request: ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool>;

    async fn insert_offer(&self, offer: ServiceOffer) -> Result<()>;
    async fn offer(&self, id: Uuid) -> Result<Option<ServiceOffer>>;
    async fn offers_for_request(&self, request_id: Uuid) -> Result<Vec<ServiceOffer>>;
    async fn update_offer(&self, offer: ServiceOffer) -> Result<()>;
    async fn delete_offer(&self, id: Uuid) -> Result<()>;

    /// One transaction: CAS the target offer PENDING → ACCEPTED (exactly one
    /// row, else `OfferNotAvailable`), delete sibling PENDING offers, bind
    /// mechanic and total amount, and drive the request to ACCEPTED.
    async fn accept_offer_exclusive(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptedOffer>;

    /// One transaction: remove the request and every offer attached to it.
    /// Returns `None` for a missing or already COMPLETED request so a racing
    /// second cancellation cannot trigger a double refund.
    async fn purge_request(&self, request_id: Uuid) -> Result<Option<PurgedRequest>>;

    async fn mechanic(&self, id: Uuid) -> Result<Option<Mechanic>>;
    async fn upsert_mechanic(&self, mechanic: Mechanic) -> Result<()>;

    /// Enforces uniqueness on `service_request_id`.
    async fn insert_review(&self, review: Review) -> Result<()>;
    async fn review_for_request(&self, request_id: Uuid) -> Result<Option<Review>>;
}

pub type StoreRef = Arc<dyn MarketplaceStore>;

/// Failures reported by the payment gateway.
///
/// `AlreadyProcessed` is the gateway confirming an idempotent retry; the
/// choreography treats it as success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("already processed as {0}")]
    AlreadyProcessed(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// External payment collaborator: authorization hold, capture, refund.
///
/// The core never retries internally; callers own timeout/retry policy.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        amount: Amount,
        currency: &str,
    ) -> std::result::Result<String, GatewayError>;
    async fn capture(&self, hold_id: &str) -> std::result::Result<String, GatewayError>;
    async fn refund(&self, hold_id: &str) -> std::result::Result<String, GatewayError>;
}

pub type GatewayRef = Arc<dyn PaymentGateway>;

/// Events pushed to customers and mechanics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    NewOffer { request_id: Uuid },
    OfferAccepted { request_id: Uuid },
    RequestCancelled { request_id: Uuid },
    JobCompleted { request_id: Uuid },
}

/// Fire-and-forget notification collaborator. Delivery failures are logged
/// by callers and never roll back a lifecycle transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: Uuid,
        notification: Notification,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub type NotifierRef = Arc<dyn Notifier>;
