use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::command_reader::ScriptCommand;
use crate::application::arbitration::ArbitrationEngine;
use crate::application::lifecycle::LifecycleEngine;
use crate::application::reviews::ReviewService;
use crate::application::tracking::{LocationChannel, ThrottleConfig};
use crate::application::verification::VerificationService;
use crate::domain::mechanic::Mechanic;
use crate::domain::money::Amount;
use crate::domain::ports::{GatewayRef, NotifierRef, StoreRef};
use crate::domain::request::ServiceRequest;
use crate::error::{CodeKind, DispatchError, Result};

/// Replays scenario commands against a fully wired engine stack.
///
/// Scenario labels stand in for entity ids: the first mention of a client or
/// mechanic label mints an id, and request/offer labels capture the ids the
/// engines generate.
pub struct ScenarioRunner {
    store: StoreRef,
    lifecycle: Arc<LifecycleEngine>,
    arbitration: ArbitrationEngine,
    verification: VerificationService,
    tracking: LocationChannel,
    reviews: ReviewService,
    labels: HashMap<String, Uuid>,
}

impl ScenarioRunner {
    pub fn new(store: StoreRef, gateway: GatewayRef, notifier: NotifierRef) -> Self {
        let lifecycle = Arc::new(LifecycleEngine::new(
            store.clone(),
            gateway,
            notifier.clone(),
        ));
        Self {
            verification: VerificationService::new(store.clone(), lifecycle.clone()),
            arbitration: ArbitrationEngine::new(store.clone(), notifier),
            tracking: LocationChannel::new(store.clone(), ThrottleConfig::default()),
            reviews: ReviewService::new(store.clone()),
            lifecycle,
            store,
            labels: HashMap::new(),
        }
    }

    fn mint(&mut self, label: &str) -> Uuid {
        *self
            .labels
            .entry(label.to_string())
            .or_insert_with(Uuid::new_v4)
    }

    fn lookup(&self, label: &str) -> Result<Uuid> {
        self.labels.get(label).copied().ok_or_else(|| {
            DispatchError::InvalidState(format!("scenario references unknown label `{label}`"))
        })
    }

    pub async fn apply(&mut self, command: ScriptCommand) -> Result<()> {
        match command {
            ScriptCommand::RegisterMechanic {
                label,
                location,
                services,
            } => {
                let id = self.mint(&label);
                let mechanic = Mechanic::new(id, Uuid::new_v4(), location, services);
                self.store.upsert_mechanic(mechanic).await
            }
            ScriptCommand::CreateRequest {
                label,
                client,
                service_type,
                description,
                location,
            } => {
                let client_id = self.mint(&client);
                let request = self
                    .lifecycle
                    .create(client_id, service_type, description, location)
                    .await?;
                self.labels.insert(label, request.id);
                Ok(())
            }
            ScriptCommand::CreateBooking {
                label,
                client,
                mechanic,
                service_type,
                description,
                location,
                amount,
            } => {
                let client_id = self.mint(&client);
                let mechanic_id = self.lookup(&mechanic)?;
                let request = self
                    .lifecycle
                    .create_booking(
                        client_id,
                        mechanic_id,
                        service_type,
                        description,
                        location,
                        Amount::new(amount)?,
                    )
                    .await?;
                self.labels.insert(label, request.id);
                Ok(())
            }
            ScriptCommand::SubmitOffer {
                label,
                request,
                mechanic,
                price,
                note,
                expires_in_secs,
                location,
            } => {
                let request_id = self.lookup(&request)?;
                let mechanic_id = self.lookup(&mechanic)?;
                let expires_at = Utc::now() + chrono::Duration::seconds(expires_in_secs);
                let offer = self
                    .arbitration
                    .submit_offer(
                        request_id,
                        mechanic_id,
                        Amount::new(price)?,
                        note,
                        expires_at,
                        location,
                    )
                    .await?;
                self.labels.insert(label, offer.id);
                Ok(())
            }
            ScriptCommand::AcceptOffer { offer, request } => {
                let offer_id = self.lookup(&offer)?;
                let request_id = self.lookup(&request)?;
                self.arbitration.accept_offer(offer_id, request_id).await?;
                Ok(())
            }
            ScriptCommand::Transition { request, to } => {
                let request_id = self.lookup(&request)?;
                self.lifecycle.transition(request_id, to).await?;
                Ok(())
            }
            ScriptCommand::PublishLocation { request, location } => {
                let request_id = self.lookup(&request)?;
                if !self.tracking.publish(request_id, location).await? {
                    debug!(request_id = %request_id, "scenario location update throttled");
                }
                Ok(())
            }
            ScriptCommand::ValidateArrival { request, code } => {
                let request_id = self.lookup(&request)?;
                let code = match code {
                    Some(code) => code,
                    None => self.issued_code(request_id, CodeKind::Arrival).await?,
                };
                self.verification.validate_arrival(request_id, &code).await?;
                Ok(())
            }
            ScriptCommand::ValidateCompletion { request, code } => {
                let request_id = self.lookup(&request)?;
                let code = match code {
                    Some(code) => code,
                    None => self.issued_code(request_id, CodeKind::Completion).await?,
                };
                self.verification
                    .validate_completion(request_id, &code)
                    .await?;
                Ok(())
            }
            ScriptCommand::Cancel { request } => {
                let request_id = self.lookup(&request)?;
                self.lifecycle.cancel(request_id).await
            }
            ScriptCommand::SubmitReview {
                request,
                rating,
                comment,
            } => {
                let request_id = self.lookup(&request)?;
                let request = self
                    .store
                    .request(request_id)
                    .await?
                    .ok_or(DispatchError::NotFound("service request"))?;
                self.reviews
                    .submit_review(request_id, request.client_id, rating, comment)
                    .await?;
                Ok(())
            }
        }
    }

    async fn issued_code(&self, request_id: Uuid, kind: CodeKind) -> Result<String> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        let code = match kind {
            CodeKind::Arrival => request.arrival_code,
            CodeKind::Completion => request.completion_code,
        };
        code.ok_or_else(|| {
            DispatchError::InvalidState(format!("no {kind} code has been issued yet"))
        })
    }

    /// Final state of every request, oldest first.
    pub async fn summary(&self) -> Result<Vec<ServiceRequest>> {
        let mut requests = self.store.requests().await?;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }
}
