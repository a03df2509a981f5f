use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geo::GeoPoint;
use super::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Expired,
}

/// A mechanic's bid on an open service request.
///
/// At most one offer per request is ever ACCEPTED. Siblings are deleted at
/// acceptance; the winner is EXPIRED when the request reaches a terminal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffer {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub mechanic_id: Uuid,
    pub status: OfferStatus,
    pub price: Amount,
    pub note: String,
    pub expires_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceOffer {
    pub fn new(
        service_request_id: Uuid,
        mechanic_id: Uuid,
        price: Amount,
        note: String,
        expires_at: DateTime<Utc>,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_request_id,
            mechanic_id,
            status: OfferStatus::Pending,
            price,
            note,
            expires_at,
            location,
            created_at: now,
            updated_at: now,
        }
    }

    /// Offers shown to customers: pending or accepted, and not yet expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, OfferStatus::Pending | OfferStatus::Accepted)
            && self.expires_at > now
    }
}
