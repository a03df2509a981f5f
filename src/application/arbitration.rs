use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::geo::GeoPoint;
use crate::domain::mechanic::MechanicProfile;
use crate::domain::money::Amount;
use crate::domain::offer::{OfferStatus, ServiceOffer};
use crate::domain::ports::{Notification, NotifierRef, StoreRef};
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::error::{DispatchError, Result};

/// Customers never see more than this many competing bids at once.
const MAX_LISTED_OFFERS: usize = 4;

/// An offer as listed to the customer, enriched with the bidding mechanic's
/// public profile when one is on file.
#[derive(Debug, Clone, Serialize)]
pub struct OfferView {
    pub offer: ServiceOffer,
    pub mechanic: Option<MechanicProfile>,
}

/// Collects competing bids for open requests and enforces the single-winner
/// invariant at acceptance.
///
/// Arbitration is customer-driven: offers are listed oldest-first and the
/// customer picks one. There is no automatic lowest-price selection.
pub struct ArbitrationEngine {
    store: StoreRef,
    notifier: NotifierRef,
}

impl ArbitrationEngine {
    pub fn new(store: StoreRef, notifier: NotifierRef) -> Self {
        Self { store, notifier }
    }

    /// Places (or revises) a mechanic's bid on an open request. A mechanic
    /// holds at most one pending offer per request; bidding again updates
    /// the price, note, and expiry in place.
    pub async fn submit_offer(
        &self,
        request_id: Uuid,
        mechanic_id: Uuid,
        price: Amount,
        note: String,
        expires_at: DateTime<Utc>,
        location: GeoPoint,
    ) -> Result<ServiceOffer> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        if request.status != RequestStatus::Requested {
            return Err(DispatchError::InvalidState(format!(
                "offers are only accepted while a request is open for bids, not {}",
                request.status
            )));
        }

        let now = Utc::now();
        if expires_at <= now {
            return Err(DispatchError::InvalidState(
                "offer expiry must be in the future".to_string(),
            ));
        }

        let existing = self
            .store
            .offers_for_request(request_id)
            .await?
            .into_iter()
            .find(|o| o.mechanic_id == mechanic_id && o.status == OfferStatus::Pending);

        let offer = if let Some(mut offer) = existing {
            offer.price = price;
            offer.note = note;
            offer.expires_at = expires_at;
            offer.location = location;
            offer.updated_at = now;
            self.store.update_offer(offer.clone()).await?;
            debug!(offer_id = %offer.id, mechanic_id = %mechanic_id, "offer revised");
            offer
        } else {
            let offer =
                ServiceOffer::new(request_id, mechanic_id, price, note, expires_at, location, now);
            self.store.insert_offer(offer.clone()).await?;
            info!(offer_id = %offer.id, request_id = %request_id, %price, "offer submitted");
            offer
        };

        if let Err(err) = self
            .notifier
            .notify(request.client_id, Notification::NewOffer { request_id })
            .await
        {
            warn!(request_id = %request_id, %err, "new-offer notice not delivered");
        }
        Ok(offer)
    }

    /// Live offers for a request, oldest-submitted first, capped at
    /// [`MAX_LISTED_OFFERS`]. Expired offers are filtered at read time; a
    /// missing request simply lists nothing.
    pub async fn list_active_offers(&self, request_id: Uuid) -> Result<Vec<OfferView>> {
        let now = Utc::now();
        let mut offers: Vec<ServiceOffer> = self
            .store
            .offers_for_request(request_id)
            .await?
            .into_iter()
            .filter(|o| o.is_live(now))
            .collect();
        offers.sort_by_key(|o| o.created_at);
        offers.truncate(MAX_LISTED_OFFERS);

        let mut views = Vec::with_capacity(offers.len());
        for offer in offers {
            let mechanic = self
                .store
                .mechanic(offer.mechanic_id)
                .await?
                .map(|m| m.public_profile());
            views.push(OfferView { offer, mechanic });
        }
        Ok(views)
    }

    /// First accept wins. The store transaction promotes the target offer,
    /// deletes its pending siblings, binds the mechanic and price to the
    /// request, and drives it to ACCEPTED. A second accept racing on an
    /// already-resolved offer gets `OfferNotAvailable`.
    pub async fn accept_offer(&self, offer_id: Uuid, request_id: Uuid) -> Result<ServiceRequest> {
        let accepted = self
            .store
            .accept_offer_exclusive(offer_id, request_id, Utc::now())
            .await?;
        info!(
            offer_id = %offer_id,
            request_id = %request_id,
            mechanic_id = %accepted.offer.mechanic_id,
            discarded = accepted.discarded,
            "offer accepted"
        );

        if let Err(err) = self
            .notifier
            .notify(
                accepted.offer.mechanic_id,
                Notification::OfferAccepted { request_id },
            )
            .await
        {
            warn!(request_id = %request_id, %err, "acceptance notice not delivered");
        }
        Ok(accepted.request)
    }

    /// Withdraws a bid. The winning offer of a live request cannot be
    /// withdrawn; once its request is gone, cleanup is allowed.
    pub async fn delete_offer(&self, offer_id: Uuid) -> Result<()> {
        let offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or(DispatchError::NotFound("offer"))?;

        if offer.status == OfferStatus::Accepted
            && self.store.request(offer.service_request_id).await?.is_some()
        {
            return Err(DispatchError::CannotWithdrawAcceptedOffer);
        }

        self.store.delete_offer(offer_id).await?;
        debug!(offer_id = %offer_id, "offer withdrawn");
        Ok(())
    }

    /// Terminal retirement of an offer. Idempotent: expiring a missing or
    /// already expired offer is a no-op.
    pub async fn expire_offer(&self, offer_id: Uuid) -> Result<()> {
        let Some(mut offer) = self.store.offer(offer_id).await? else {
            return Ok(());
        };
        if offer.status == OfferStatus::Expired {
            return Ok(());
        }
        offer.status = OfferStatus::Expired;
        offer.updated_at = Utc::now();
        self.store.update_offer(offer).await?;
        debug!(offer_id = %offer_id, "offer expired");
        Ok(())
    }
}
