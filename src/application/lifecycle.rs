use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::verification::CodeGenerator;
use crate::domain::geo::GeoPoint;
use crate::domain::money::Amount;
use crate::domain::offer::OfferStatus;
use crate::domain::ports::{GatewayError, GatewayRef, Notification, NotifierRef, StoreRef};
use crate::domain::request::{RequestStatus, ServiceRequest, ServiceType};
use crate::error::{DispatchError, Result};

const SETTLEMENT_CURRENCY: &str = "USD";

/// Validates and applies service-request transitions, carrying the payment
/// choreography and verification-code issuance bound to each edge.
///
/// Concurrent transitions on the same request serialize at the store: every
/// status write is guarded on the status the caller read, and the loser of a
/// race gets `InvalidTransition` instead of silently overwriting the winner.
pub struct LifecycleEngine {
    store: StoreRef,
    gateway: GatewayRef,
    notifier: NotifierRef,
    codes: CodeGenerator,
}

impl LifecycleEngine {
    pub fn new(store: StoreRef, gateway: GatewayRef, notifier: NotifierRef) -> Self {
        Self {
            store,
            gateway,
            notifier,
            codes: CodeGenerator,
        }
    }

    /// Opens a request for bids.
    pub async fn create(
        &self,
        client_id: Uuid,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
    ) -> Result<ServiceRequest> {
        let request =
            ServiceRequest::new(client_id, service_type, description, location, Utc::now());
        self.store.insert_request(request.clone()).await?;
        info!(request_id = %request.id, client_id = %client_id, "service request created");
        Ok(request)
    }

    /// Creates a pre-scheduled job bound to a chosen mechanic, bypassing
    /// live arbitration. Its only forward edge is BOOKED → COMPLETED.
    pub async fn create_booking(
        &self,
        client_id: Uuid,
        mechanic_id: Uuid,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
        amount: Amount,
    ) -> Result<ServiceRequest> {
        let request = ServiceRequest::booked(
            client_id,
            mechanic_id,
            service_type,
            description,
            location,
            amount,
            Utc::now(),
        );
        self.store.insert_request(request.clone()).await?;
        info!(request_id = %request.id, mechanic_id = %mechanic_id, "booking created");
        Ok(request)
    }

    pub async fn request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        self.store.request(id).await
    }

    /// Moves a request along one edge of the transition table.
    ///
    /// Rejects anything outside the current allowed-next set with
    /// `InvalidTransition` naming both statuses. Entry side effects:
    /// - PAYMENT_AUTHORIZED: authorize a hold for the bound amount
    /// - IN_PROGRESS: issue the arrival code
    /// - SERVICING: stamp the start time
    /// - IN_COMPLETION: issue the completion code
    /// - COMPLETED: stamp completion time, capture the hold, retire the
    ///   accepted offer, notify the client
    pub async fn transition(&self, request_id: Uuid, target: RequestStatus) -> Result<ServiceRequest> {
        let current = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        let prior = current.status;

        if !prior.can_transition_to(target) {
            return Err(DispatchError::InvalidTransition {
                from: prior,
                to: target,
            });
        }

        let now = Utc::now();
        let mut next = current;
        next.status = target;
        next.updated_at = now;

        match target {
            RequestStatus::Accepted => {
                // Acceptance binds a mechanic, and only arbitration does
                // that; a bare transition here would break the binding
                // invariant.
                if next.mechanic_id.is_none() {
                    return Err(DispatchError::InvalidState(
                        "acceptance is driven by offer arbitration, not a bare transition"
                            .to_string(),
                    ));
                }
            }
            RequestStatus::PaymentAuthorized => {
                let amount = next.total_amount.ok_or_else(|| {
                    DispatchError::InvalidState(
                        "cannot authorize payment before an amount is bound".to_string(),
                    )
                })?;
                let hold_id = self.gateway.authorize(amount, SETTLEMENT_CURRENCY).await?;
                info!(request_id = %request_id, hold_id = %hold_id, %amount, "payment hold authorized");
                next.payment_hold_id = Some(hold_id);
            }
            RequestStatus::InProgress => {
                next.arrival_code = Some(self.codes.generate());
            }
            RequestStatus::Servicing => {
                if next.start_time.is_none() {
                    next.start_time = Some(now);
                }
            }
            RequestStatus::InCompletion => {
                next.completion_code = Some(self.codes.generate());
            }
            RequestStatus::Completed => {
                next.completion_time = Some(now);
            }
            _ => {}
        }

        if !self.store.update_request_guarded(next.clone(), prior).await? {
            // Lost the race; release the hold we just took, if any.
            if target == RequestStatus::PaymentAuthorized
                && let Some(hold_id) = next.payment_hold_id.as_deref()
                && let Err(err) = self.gateway.refund(hold_id).await
            {
                warn!(request_id = %request_id, hold_id, %err, "failed to release orphaned hold");
            }
            return Err(DispatchError::InvalidTransition {
                from: prior,
                to: target,
            });
        }
        info!(request_id = %request_id, from = %prior, to = %target, "transition applied");

        if target == RequestStatus::Completed {
            return self.settle(next).await;
        }
        Ok(next)
    }

    /// Capture, offer retirement, and the completion notice. The COMPLETED
    /// status is already persisted; a hard capture failure is surfaced to
    /// the caller while the transition itself stands, since the gateway
    /// accepts idempotent retries.
    async fn settle(&self, mut request: ServiceRequest) -> Result<ServiceRequest> {
        let capture_failure = if let Some(hold_id) = request.payment_hold_id.clone() {
            match self.gateway.capture(&hold_id).await {
                Ok(payment_id) => {
                    info!(request_id = %request.id, payment_id = %payment_id, "payment captured");
                    request.payment_id = Some(payment_id);
                    self.store.update_request(request.clone()).await?;
                    None
                }
                Err(GatewayError::AlreadyProcessed(payment_id)) => {
                    debug!(request_id = %request.id, payment_id = %payment_id, "capture already processed");
                    request.payment_id = Some(payment_id);
                    self.store.update_request(request.clone()).await?;
                    None
                }
                Err(err) => {
                    warn!(request_id = %request.id, hold_id = %hold_id, %err, "capture failed");
                    Some(err)
                }
            }
        } else {
            None
        };

        self.retire_accepted_offer(request.id).await?;

        if let Err(err) = self
            .notifier
            .notify(request.client_id, Notification::JobCompleted { request_id: request.id })
            .await
        {
            warn!(request_id = %request.id, %err, "completion notice not delivered");
        }

        match capture_failure {
            Some(err) => Err(err.into()),
            None => Ok(request),
        }
    }

    /// Consumes the gateway's asynchronous authorization confirmation.
    /// Idempotent: unknown requests, repeated deliveries, and stale hold ids
    /// are all absorbed without a state change.
    pub async fn confirm_authorization(&self, request_id: Uuid, hold_id: &str) -> Result<()> {
        match self.store.request(request_id).await? {
            Some(request) if request.payment_hold_id.as_deref() == Some(hold_id) => {
                debug!(request_id = %request_id, hold_id, "authorization confirmed");
            }
            Some(_) => {
                warn!(request_id = %request_id, hold_id, "confirmation for an unknown hold ignored");
            }
            None => {
                debug!(request_id = %request_id, hold_id, "confirmation for a missing request ignored");
            }
        }
        Ok(())
    }

    /// Cancels a not-yet-completed request: removes it and every offer in
    /// one store transaction, releases the hold, and tells the mechanic.
    /// A second cancellation of the same id reports `NotFound`.
    pub async fn cancel(&self, request_id: Uuid) -> Result<()> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        if request.status.is_terminal() {
            return Err(DispatchError::InvalidState(
                "a completed request cannot be cancelled".to_string(),
            ));
        }

        // The purge re-checks atomically, so a racing cancel or completion
        // leaves exactly one effective winner.
        let Some(purged) = self.store.purge_request(request_id).await? else {
            return Err(DispatchError::NotFound("service request"));
        };
        info!(
            request_id = %request_id,
            offers_removed = purged.offers.len(),
            "request cancelled"
        );

        if let Some(hold_id) = purged.request.payment_hold_id.as_deref()
            && purged.request.payment_id.is_none()
        {
            match self.gateway.refund(hold_id).await {
                Ok(refund_id) => {
                    info!(request_id = %request_id, refund_id = %refund_id, "hold refunded");
                }
                Err(GatewayError::AlreadyProcessed(refund_id)) => {
                    debug!(request_id = %request_id, refund_id = %refund_id, "refund already processed");
                }
                Err(err) => {
                    warn!(request_id = %request_id, hold_id, %err, "refund failed");
                    return Err(err.into());
                }
            }
        }

        if let Some(mechanic_id) = purged.request.mechanic_id
            && let Err(err) = self
                .notifier
                .notify(mechanic_id, Notification::RequestCancelled { request_id })
                .await
        {
            warn!(request_id = %request_id, %err, "cancellation notice not delivered");
        }
        Ok(())
    }

    async fn retire_accepted_offer(&self, request_id: Uuid) -> Result<()> {
        let offers = self.store.offers_for_request(request_id).await?;
        for mut offer in offers {
            if offer.status == OfferStatus::Accepted {
                offer.status = OfferStatus::Expired;
                offer.updated_at = Utc::now();
                self.store.update_offer(offer).await?;
            }
        }
        Ok(())
    }
}
