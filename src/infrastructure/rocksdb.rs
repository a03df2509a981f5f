use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::mechanic::Mechanic;
use crate::domain::offer::{OfferStatus, ServiceOffer};
use crate::domain::ports::{AcceptedOffer, MarketplaceStore, PurgedRequest};
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::domain::review::Review;
use crate::error::{DispatchError, Result};

/// Column family for service requests.
pub const CF_REQUESTS: &str = "requests";
/// Column family for offers.
pub const CF_OFFERS: &str = "offers";
/// Column family for mechanic projections.
pub const CF_MECHANICS: &str = "mechanics";
/// Column family for reviews, keyed by service request id so uniqueness is
/// structural.
pub const CF_REVIEWS: &str = "reviews";

/// Persistent store on RocksDB.
///
/// Entities are JSON values in per-entity column families. Compound
/// operations serialize behind a single writer gate and land their rows in
/// one `WriteBatch`, so a crash can never leave half an arbitration or half
/// a cancellation on disk. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_gate: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates the database, ensuring all column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_REQUESTS, CF_OFFERS, CF_MECHANICS, CF_REVIEWS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| DispatchError::Persistence(format!("column family {name} not found")))
    }

    fn put<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| DispatchError::Persistence(format!("serialization error: {e}")))?;
        self.db
            .put_cf(cf, key, bytes)
            .map_err(|e| DispatchError::Persistence(e.to_string()))
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        let found = self
            .db
            .get_cf(cf, key)
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        match found {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| DispatchError::Persistence(format!("deserialization error: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, bytes) =
                item.map_err(|e| DispatchError::Persistence(format!("iteration error: {e}")))?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| DispatchError::Persistence(format!("deserialization error: {e}")))?;
            values.push(value);
        }
        Ok(values)
    }

    fn batch_put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| DispatchError::Persistence(format!("serialization error: {e}")))?;
        batch.put_cf(cf, key, bytes);
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| DispatchError::Persistence(e.to_string()))
    }
}

#[async_trait]
impl MarketplaceStore for RocksDbStore {
    async fn insert_request(&self, request: ServiceRequest) -> Result<()> {
        self.put(CF_REQUESTS, request.id.as_bytes(), &request)
    }

    async fn request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        self.get(CF_REQUESTS, id.as_bytes())
    }

    async fn requests(&self) -> Result<Vec<ServiceRequest>> {
        self.scan(CF_REQUESTS)
    }

    async fn update_request(&self, request: ServiceRequest) -> Result<()> {
        self.put(CF_REQUESTS, request.id.as_bytes(), &request)
    }

    async fn update_request_guarded(
        &self,
        request: ServiceRequest,
        expected: RequestStatus,
    ) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let current: Option<ServiceRequest> = self.get(CF_REQUESTS, request.id.as_bytes())?;
        match current {
            Some(row) if row.status == expected => {
                self.put(CF_REQUESTS, request.id.as_bytes(), &request)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_offer(&self, offer: ServiceOffer) -> Result<()> {
        self.put(CF_OFFERS, offer.id.as_bytes(), &offer)
    }

    async fn offer(&self, id: Uuid) -> Result<Option<ServiceOffer>> {
        self.get(CF_OFFERS, id.as_bytes())
    }

    async fn offers_for_request(&self, request_id: Uuid) -> Result<Vec<ServiceOffer>> {
        let offers: Vec<ServiceOffer> = self.scan(CF_OFFERS)?;
        Ok(offers
            .into_iter()
            .filter(|o| o.service_request_id == request_id)
            .collect())
    }

    async fn update_offer(&self, offer: ServiceOffer) -> Result<()> {
        self.put(CF_OFFERS, offer.id.as_bytes(), &offer)
    }

    async fn delete_offer(&self, id: Uuid) -> Result<()> {
        let cf = self.cf(CF_OFFERS)?;
        self.db
            .delete_cf(cf, id.as_bytes())
            .map_err(|e| DispatchError::Persistence(e.to_string()))
    }

    async fn accept_offer_exclusive(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptedOffer> {
        let _gate = self.write_gate.lock().await;

        let offer: Option<ServiceOffer> = self.get(CF_OFFERS, offer_id.as_bytes())?;
        let offer = match offer {
            Some(o)
                if o.service_request_id == request_id
                    && o.status == OfferStatus::Pending
                    && o.expires_at > now =>
            {
                o
            }
            _ => return Err(DispatchError::OfferNotAvailable),
        };

        let request: ServiceRequest = self
            .get(CF_REQUESTS, request_id.as_bytes())?
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

        let siblings: Vec<ServiceOffer> = self
            .scan::<ServiceOffer>(CF_OFFERS)?
            .into_iter()
            .filter(|o| {
                o.service_request_id == request_id
                    && o.id != offer_id
                    && o.status == OfferStatus::Pending
            })
            .collect();

        let mut updated = request;
        updated.status = RequestStatus::Accepted;
        updated.mechanic_id = Some(winner.mechanic_id);
        updated.total_amount = Some(winner.price);
        updated.updated_at = now;

        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_OFFERS, winner.id.as_bytes(), &winner)?;
        let offers_cf = self.cf(CF_OFFERS)?;
        for sibling in &siblings {
            batch.delete_cf(offers_cf, sibling.id.as_bytes());
        }
        self.batch_put(&mut batch, CF_REQUESTS, request_id.as_bytes(), &updated)?;
        self.commit(batch)?;

        Ok(AcceptedOffer {
            request: updated,
            offer: winner,
            discarded: siblings.len(),
        })
    }

    async fn purge_request(&self, request_id: Uuid) -> Result<Option<PurgedRequest>> {
        let _gate = self.write_gate.lock().await;

        let request: Option<ServiceRequest> = self.get(CF_REQUESTS, request_id.as_bytes())?;
        let Some(request) = request else {
            return Ok(None);
        };
        if request.status.is_terminal() {
            return Ok(None);
        }

        let offers: Vec<ServiceOffer> = self
            .scan::<ServiceOffer>(CF_OFFERS)?
            .into_iter()
            .filter(|o| o.service_request_id == request_id)
            .collect();

        let mut batch = WriteBatch::default();
        let requests_cf = self.cf(CF_REQUESTS)?;
        batch.delete_cf(requests_cf, request_id.as_bytes());
        let offers_cf = self.cf(CF_OFFERS)?;
        for offer in &offers {
            batch.delete_cf(offers_cf, offer.id.as_bytes());
        }
        self.commit(batch)?;

        Ok(Some(PurgedRequest { request, offers }))
    }

    async fn mechanic(&self, id: Uuid) -> Result<Option<Mechanic>> {
        self.get(CF_MECHANICS, id.as_bytes())
    }

    async fn upsert_mechanic(&self, mechanic: Mechanic) -> Result<()> {
        self.put(CF_MECHANICS, mechanic.id.as_bytes(), &mechanic)
    }

    async fn insert_review(&self, review: Review) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let existing: Option<Review> =
            self.get(CF_REVIEWS, review.service_request_id.as_bytes())?;
        if existing.is_some() {
            return Err(DispatchError::InvalidState(
                "this service request has already been reviewed".to_string(),
            ));
        }
        self.put(CF_REVIEWS, review.service_request_id.as_bytes(), &review)
    }

    async fn review_for_request(&self, request_id: Uuid) -> Result<Option<Review>> {
        self.get(CF_REVIEWS, request_id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::GeoPoint;
    use crate::domain::money::Amount;
    use crate::domain::request::ServiceType;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn open_request() -> ServiceRequest {
        ServiceRequest::new(
            Uuid::new_v4(),
            ServiceType::Towing,
            "won't start".to_string(),
            GeoPoint::new(40.7, -74.0),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).expect("open rocksdb");
        for name in [CF_REQUESTS, CF_OFFERS, CF_MECHANICS, CF_REVIEWS] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();
        let fetched = store.request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched, request);

        assert!(store.request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accept_batch_is_atomic_per_offer_rows() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let request = open_request();
        store.insert_request(request.clone()).await.unwrap();
        let winner = ServiceOffer::new(
            request.id,
            Uuid::new_v4(),
            Amount::new(dec!(60.0)).unwrap(),
            String::new(),
            Utc::now() + chrono::Duration::minutes(10),
            GeoPoint::new(40.71, -74.01),
            Utc::now(),
        );
        let loser = ServiceOffer::new(
            request.id,
            Uuid::new_v4(),
            Amount::new(dec!(75.0)).unwrap(),
            String::new(),
            Utc::now() + chrono::Duration::minutes(10),
            GeoPoint::new(40.72, -74.02),
            Utc::now(),
        );
        store.insert_offer(winner.clone()).await.unwrap();
        store.insert_offer(loser.clone()).await.unwrap();

        let accepted = store
            .accept_offer_exclusive(winner.id, request.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(accepted.discarded, 1);
        assert!(store.offer(loser.id).await.unwrap().is_none());
        assert_eq!(
            store.offer(winner.id).await.unwrap().unwrap().status,
            OfferStatus::Accepted
        );
        assert_eq!(
            store.request(request.id).await.unwrap().unwrap().status,
            RequestStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_purge_survives_reopen() {
        let dir = tempdir().unwrap();
        let request = open_request();
        {
            let store = RocksDbStore::open(dir.path()).unwrap();
            store.insert_request(request.clone()).await.unwrap();
            store.purge_request(request.id).await.unwrap().unwrap();
        }
        let store = RocksDbStore::open(dir.path()).unwrap();
        assert!(store.request(request.id).await.unwrap().is_none());
    }
}
