use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::mechanic::Mechanic;
use crate::domain::offer::{OfferStatus, ServiceOffer};
use crate::domain::ports::{AcceptedOffer, MarketplaceStore, PurgedRequest};
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::domain::review::Review;
use crate::error::{DispatchError, Result};

#[derive(Default)]
struct Arena {
    requests: HashMap<Uuid, ServiceRequest>,
    offers: HashMap<Uuid, ServiceOffer>,
    mechanics: HashMap<Uuid, Mechanic>,
    reviews: HashMap<Uuid, Review>,
    /// Uniqueness index: one review per service request.
    reviews_by_request: HashMap<Uuid, Uuid>,
}

/// Thread-safe in-memory store.
///
/// One `RwLock` guards the whole arena, so every compound operation holds
/// the write lock for its full read-check-write sequence: that lock scope
/// is the store transaction. `Clone` shares the arena.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    arena: Arc<RwLock<Arena>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn insert_request(&self, request: ServiceRequest) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.requests.insert(request.id, request);
        Ok(())
    }

    async fn request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        let arena = self.arena.read().await;
        Ok(arena.requests.get(&id).cloned())
    }

    async fn requests(&self) -> Result<Vec<ServiceRequest>> {
        let arena = self.arena.read().await;
        Ok(arena.requests.values().cloned().collect())
    }

    async fn update_request(&self, request: ServiceRequest) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.requests.insert(request.id, request);
        Ok(())
    }

    async fn update_request_guarded(
        &self,
        request: ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool> {
        let mut arena = self.arena.write().await;
        match arena.requests.get(&request.id) {
            Some(current) if current.status == expected => {
                arena.requests.insert(request.id, request);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_offer(&self, offer: ServiceOffer) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn offer(&self, id: Uuid) -> Result<Option<ServiceOffer>> {
        let arena = self.arena.read().await;
        Ok(arena.offers.get(&id).cloned())
    }

    async fn offers_for_request(&self, request_id: Uuid) -> Result<Vec<ServiceOffer>> {
        let arena = self.arena.read().await;
        Ok(arena
            .offers
            .values()
            .filter(|o| o.service_request_id == request_id)
            .cloned()
            .collect())
    }

    async fn update_offer(&self, offer: ServiceOffer) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.offers.insert(offer.id, offer);
        Ok(())
    }

    async fn delete_offer(&self, id: Uuid) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.offers.remove(&id);
        Ok(())
    }

    async fn accept_offer_exclusive(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptedOffer> {
        let mut arena = self.arena.write().await;

        // Guard on the offer row's current status: the update must hit
        // exactly one PENDING, unexpired row or the accept loses the race.
        let offer = match arena.offers.get(&offer_id) {
            Some(o)
                if o.service_request_id == request_id
                    && o.status == OfferStatus::Pending
                    && o.expires_at > now =>
            {
                o.clone()
            }
            _ => return Err(DispatchError::OfferNotAvailable),
        };

        let request = arena
            .requests
            .get(&request_id)
            .ok_or(DispatchError::NotFound("service request"))?;
        if !request.status.can_transition_to(RequestStatus::Accepted) {
            return Err(DispatchError::InvalidTransition {
                from: request.status,
                to: RequestStatus::Accepted,
            });
        }

        let mut winner = offer;
        winner.status = OfferStatus::Accepted;
        winner.updated_at = now;
        arena.offers.insert(winner.id, winner.clone());

        let siblings: Vec<Uuid> = arena
            .offers
            .values()
            .filter(|o| {
                o.service_request_id == request_id
                    && o.id != offer_id
                    && o.status == OfferStatus::Pending
            })
            .map(|o| o.id)
            .collect();
        let discarded = siblings.len();
        for id in siblings {
            arena.offers.remove(&id);
        }

        let mut updated = arena.requests.get(&request_id).cloned().ok_or(
            DispatchError::NotFound("service request"),
        )?;
        updated.status = RequestStatus::Accepted;
        updated.mechanic_id = Some(winner.mechanic_id);
        updated.total_amount = Some(winner.price);
        updated.updated_at = now;
        arena.requests.insert(request_id, updated.clone());

        Ok(AcceptedOffer {
            request: updated,
            offer: winner,
            discarded,
        })
    }

    async fn purge_request(&self, request_id: Uuid) -> Result<Option<PurgedRequest>> {
        let mut arena = self.arena.write().await;
        let Some(request) = arena.requests.remove(&request_id) else {
            return Ok(None);
        };
        if request.status.is_terminal() {
            arena.requests.insert(request_id, request);
            return Ok(None);
        }

        let offer_ids: Vec<Uuid> = arena
            .offers
            .values()
            .filter(|o| o.service_request_id == request_id)
            .map(|o| o.id)
            .collect();
        let mut offers = Vec::with_capacity(offer_ids.len());
        for id in offer_ids {
            if let Some(offer) = arena.offers.remove(&id) {
                offers.push(offer);
            }
        }

        Ok(Some(PurgedRequest { request, offers }))
    }

    async fn mechanic(&self, id: Uuid) -> Result<Option<Mechanic>> {
        let arena = self.arena.read().await;
        Ok(arena.mechanics.get(&id).cloned())
    }

    async fn upsert_mechanic(&self, mechanic: Mechanic) -> Result<()> {
        let mut arena = self.arena.write().await;
        arena.mechanics.insert(mechanic.id, mechanic);
        Ok(())
    }

    async fn insert_review(&self, review: Review) -> Result<()> {
        let mut arena = self.arena.write().await;
        if arena
            .reviews_by_request
            .contains_key(&review.service_request_id)
        {
            return Err(DispatchError::InvalidState(
                "this service request has already been reviewed".to_string(),
            ));
        }
        arena
            .reviews_by_request
            .insert(review.service_request_id, review.id);
        arena.reviews.insert(review.id, review);
        Ok(())
    }

    async fn review_for_request(&self, request_id: Uuid) -> Result<Option<Review>> {
        let arena = self.arena.read().await;
        Ok(arena
            .reviews_by_request
            .get(&request_id)
            .and_then(|id| arena.reviews.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::GeoPoint;
    use crate::domain::money::Amount;
    use crate::domain::request::ServiceType;
    use rust_decimal_macros::dec;

    fn open_request() -> ServiceRequest {
        ServiceRequest::new(
            Uuid::new_v4(),
            ServiceType::JumpStart,
            "dead battery".to_string(),
            GeoPoint::new(40.7, -74.0),
            Utc::now(),
        )
    }

    fn pending_offer(request_id: Uuid) -> ServiceOffer {
        ServiceOffer::new(
            request_id,
            Uuid::new_v4(),
            Amount::new(dec!(45.0)).unwrap(),
            String::new(),
            Utc::now() + chrono::Duration::minutes(15),
            GeoPoint::new(40.71, -74.01),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();

        let fetched = store.request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched, request);
        assert!(store.request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_guarded_update_misses_on_stale_status() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();

        let mut moved = request.clone();
        moved.status = RequestStatus::Accepted;
        moved.mechanic_id = Some(Uuid::new_v4());
        assert!(
            store
                .update_request_guarded(moved.clone(), RequestStatus::Requested)
                .await
                .unwrap()
        );

        // Second writer still expects REQUESTED; zero rows match.
        let mut stale = request;
        stale.status = RequestStatus::Accepted;
        assert!(
            !store
                .update_request_guarded(stale, RequestStatus::Requested)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_accept_deletes_pending_siblings_only() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();

        let winner = pending_offer(request.id);
        let loser = pending_offer(request.id);
        let mut expired = pending_offer(request.id);
        expired.status = OfferStatus::Expired;
        store.insert_offer(winner.clone()).await.unwrap();
        store.insert_offer(loser.clone()).await.unwrap();
        store.insert_offer(expired.clone()).await.unwrap();

        let accepted = store
            .accept_offer_exclusive(winner.id, request.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(accepted.discarded, 1);
        assert_eq!(accepted.request.status, RequestStatus::Accepted);
        assert_eq!(accepted.request.mechanic_id, Some(winner.mechanic_id));
        assert_eq!(accepted.request.total_amount, Some(winner.price));

        assert!(store.offer(loser.id).await.unwrap().is_none());
        // Already-expired offers are untouched by the cascade.
        assert_eq!(
            store.offer(expired.id).await.unwrap().unwrap().status,
            OfferStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_second_accept_loses_the_race() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();

        let first = pending_offer(request.id);
        let second = pending_offer(request.id);
        store.insert_offer(first.clone()).await.unwrap();
        store.insert_offer(second.clone()).await.unwrap();

        store
            .accept_offer_exclusive(first.id, request.id, Utc::now())
            .await
            .unwrap();
        let err = store
            .accept_offer_exclusive(second.id, request.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::OfferNotAvailable));
    }

    #[tokio::test]
    async fn test_accept_rejects_expired_offer() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();

        let mut offer = pending_offer(request.id);
        offer.expires_at = Utc::now() - chrono::Duration::minutes(1);
        store.insert_offer(offer.clone()).await.unwrap();

        let err = store
            .accept_offer_exclusive(offer.id, request.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::OfferNotAvailable));
    }

    #[tokio::test]
    async fn test_purge_cascades_and_skips_completed() {
        let store = InMemoryStore::new();
        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();
        store
            .insert_offer(pending_offer(request.id))
            .await
            .unwrap();

        let purged = store.purge_request(request.id).await.unwrap().unwrap();
        assert_eq!(purged.offers.len(), 1);
        assert!(store.request(request.id).await.unwrap().is_none());
        assert!(
            store
                .offers_for_request(request.id)
                .await
                .unwrap()
                .is_empty()
        );

        // Purging again reports nothing to do.
        assert!(store.purge_request(request.id).await.unwrap().is_none());

        let mut done = open_request();
        done.status = RequestStatus::Completed;
        done.mechanic_id = Some(Uuid::new_v4());
        store.insert_request(done.clone()).await.unwrap();
        assert!(store.purge_request(done.id).await.unwrap().is_none());
        assert!(store.request(done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_review_uniqueness_per_request() {
        let store = InMemoryStore::new();
        let request_id = Uuid::new_v4();
        let review = Review::new(
            request_id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            5,
            "great".to_string(),
            Utc::now(),
        )
        .unwrap();
        store.insert_review(review.clone()).await.unwrap();

        let duplicate = Review::new(
            request_id,
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            "changed my mind".to_string(),
            Utc::now(),
        )
        .unwrap();
        let err = store.insert_review(duplicate).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidState(_)));

        let stored = store.review_for_request(request_id).await.unwrap().unwrap();
        assert_eq!(stored.id, review.id);
    }
}
