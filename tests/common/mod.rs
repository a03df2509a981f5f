use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use roadcall::application::arbitration::ArbitrationEngine;
use roadcall::application::lifecycle::LifecycleEngine;
use roadcall::application::reviews::ReviewService;
use roadcall::application::verification::VerificationService;
use roadcall::domain::geo::GeoPoint;
use roadcall::domain::mechanic::Mechanic;
use roadcall::domain::money::Amount;
use roadcall::domain::offer::ServiceOffer;
use roadcall::domain::ports::{GatewayRef, Notification, Notifier, NotifierRef, StoreRef};
use roadcall::domain::request::{RequestStatus, ServiceRequest, ServiceType};
use roadcall::infrastructure::gateway::SimulatedGateway;
use roadcall::infrastructure::in_memory::InMemoryStore;

/// Notifier that records deliveries for assertions.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(Uuid, Notification)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Uuid, Notification)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: Uuid,
        notification: Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.sent.lock().unwrap().push((recipient, notification));
        Ok(())
    }
}

/// Notifier whose deliveries always fail.
#[derive(Default, Clone, Copy)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(
        &self,
        _recipient: Uuid,
        _notification: Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("push provider down".into())
    }
}

pub fn point(lat: f64, lng: f64) -> GeoPoint {
    GeoPoint::new(lat, lng)
}

pub fn usd(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// A fully wired engine stack over the in-memory store.
pub struct Harness {
    pub store: StoreRef,
    pub gateway: SimulatedGateway,
    pub notifier: RecordingNotifier,
    pub lifecycle: Arc<LifecycleEngine>,
    pub arbitration: ArbitrationEngine,
    pub verification: VerificationService,
    pub reviews: ReviewService,
}

impl Harness {
    pub fn new() -> Self {
        let store: StoreRef = Arc::new(InMemoryStore::new());
        let gateway = SimulatedGateway::new();
        let notifier = RecordingNotifier::default();
        let gateway_ref: GatewayRef = Arc::new(gateway.clone());
        let notifier_ref: NotifierRef = Arc::new(notifier.clone());

        let lifecycle = Arc::new(LifecycleEngine::new(
            store.clone(),
            gateway_ref,
            notifier_ref.clone(),
        ));
        Self {
            verification: VerificationService::new(store.clone(), lifecycle.clone()),
            arbitration: ArbitrationEngine::new(store.clone(), notifier_ref),
            reviews: ReviewService::new(store.clone()),
            lifecycle,
            store,
            gateway,
            notifier,
        }
    }

    pub async fn request(&self, id: Uuid) -> ServiceRequest {
        self.store.request(id).await.unwrap().unwrap()
    }

    pub async fn register_mechanic(&self) -> Mechanic {
        let mechanic = Mechanic::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            point(40.71, -74.01),
            vec![ServiceType::TireChange, ServiceType::Towing],
        );
        self.store.upsert_mechanic(mechanic.clone()).await.unwrap();
        mechanic
    }

    pub async fn open_request(&self) -> ServiceRequest {
        self.lifecycle
            .create(
                Uuid::new_v4(),
                ServiceType::TireChange,
                "flat rear tire".to_string(),
                point(40.73, -73.99),
            )
            .await
            .unwrap()
    }

    pub async fn submit_offer(
        &self,
        request_id: Uuid,
        mechanic_id: Uuid,
        price: Decimal,
    ) -> ServiceOffer {
        self.arbitration
            .submit_offer(
                request_id,
                mechanic_id,
                usd(price),
                "on my way".to_string(),
                Utc::now() + chrono::Duration::minutes(15),
                point(40.71, -74.01),
            )
            .await
            .unwrap()
    }

    /// Open request with one accepted offer: the entry point for lifecycle
    /// tests past arbitration.
    pub async fn accepted_request(&self) -> (ServiceRequest, ServiceOffer) {
        let request = self.open_request().await;
        let mechanic = self.register_mechanic().await;
        let offer = self
            .submit_offer(request.id, mechanic.id, Decimal::from(50))
            .await;
        let request = self
            .arbitration
            .accept_offer(offer.id, request.id)
            .await
            .unwrap();
        (request, offer)
    }

    /// Drives a request forward along the canonical path until `target`,
    /// relaying verification codes where the path demands them.
    pub async fn walk_to(&self, id: Uuid, target: RequestStatus) -> ServiceRequest {
        use RequestStatus::*;
        let mut request = self.request(id).await;
        while request.status != target {
            request = match request.status {
                Accepted => self.lifecycle.transition(id, PaymentAuthorized).await.unwrap(),
                PaymentAuthorized => self.lifecycle.transition(id, InRoute).await.unwrap(),
                InRoute => self.lifecycle.transition(id, InProgress).await.unwrap(),
                InProgress => {
                    let code = request.arrival_code.clone().unwrap();
                    self.verification.validate_arrival(id, &code).await.unwrap()
                }
                Servicing => self.lifecycle.transition(id, InCompletion).await.unwrap(),
                InCompletion => {
                    let code = request.completion_code.clone().unwrap();
                    self.verification
                        .validate_completion(id, &code)
                        .await
                        .unwrap()
                }
                other => panic!("no forward path from {other} to {target}"),
            };
        }
        request
    }
}
