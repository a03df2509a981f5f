use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// A client's one-time review of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub client_id: Uuid,
    pub mechanic_id: Uuid,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn new(
        service_request_id: Uuid,
        client_id: Uuid,
        mechanic_id: Uuid,
        rating: u8,
        comment: String,
        now: DateTime<Utc>,
    ) -> Result<Self, DispatchError> {
        if !(1..=5).contains(&rating) {
            return Err(DispatchError::InvalidState(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            service_request_id,
            client_id,
            mechanic_id,
            rating,
            comment,
            created_at: now,
        })
    }
}
