use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geo::GeoPoint;
use super::request::ServiceType;

/// Read-mostly projection of a mechanic profile, owned elsewhere.
///
/// This core only updates `rating`/`rating_count` when a review lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mechanic {
    pub id: Uuid,
    pub user_id: Uuid,
    pub is_available: bool,
    pub rating: Decimal,
    pub rating_count: u32,
    pub services_offered: Vec<ServiceType>,
    pub location: GeoPoint,
}

impl Mechanic {
    pub fn new(
        id: Uuid,
        user_id: Uuid,
        location: GeoPoint,
        services_offered: Vec<ServiceType>,
    ) -> Self {
        Self {
            id,
            user_id,
            is_available: true,
            rating: Decimal::ZERO,
            rating_count: 0,
            services_offered,
            location,
        }
    }

    /// Folds a new 1-5 review score into the running average.
    pub fn apply_rating(&mut self, score: u8) {
        let total = self.rating * Decimal::from(self.rating_count) + Decimal::from(score);
        self.rating_count += 1;
        self.rating = total / Decimal::from(self.rating_count);
    }

    /// The fields customers see alongside an offer.
    pub fn public_profile(&self) -> MechanicProfile {
        MechanicProfile {
            id: self.id,
            rating: self.rating,
            rating_count: self.rating_count,
            is_available: self.is_available,
        }
    }
}

/// Public mechanic fields enriched into offer listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicProfile {
    pub id: Uuid,
    pub rating: Decimal,
    pub rating_count: u32,
    pub is_available: bool,
}
