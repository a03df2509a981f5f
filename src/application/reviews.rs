use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::domain::ports::StoreRef;
use crate::domain::review::Review;
use crate::error::{DispatchError, Result};

/// Accepts one review per completed request and keeps the mechanic's
/// average rating current.
pub struct ReviewService {
    store: StoreRef,
}

impl ReviewService {
    pub fn new(store: StoreRef) -> Self {
        Self { store }
    }

    /// Records the requesting client's review of a COMPLETED job. The store
    /// enforces one review per request; a duplicate fails before any rating
    /// recompute happens.
    pub async fn submit_review(
        &self,
        request_id: Uuid,
        client_id: Uuid,
        rating: u8,
        comment: String,
    ) -> Result<Review> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        if !request.status.is_terminal() {
            return Err(DispatchError::InvalidState(format!(
                "reviews open once the job is COMPLETED, not {}",
                request.status
            )));
        }
        if request.client_id != client_id {
            return Err(DispatchError::InvalidState(
                "only the requesting client may leave a review".to_string(),
            ));
        }
        let mechanic_id = request.mechanic_id.ok_or_else(|| {
            DispatchError::Persistence("completed request has no mechanic bound".to_string())
        })?;

        let review = Review::new(request_id, client_id, mechanic_id, rating, comment, Utc::now())?;
        self.store.insert_review(review.clone()).await?;

        if let Some(mut mechanic) = self.store.mechanic(mechanic_id).await? {
            mechanic.apply_rating(rating);
            self.store.upsert_mechanic(mechanic).await?;
        }
        info!(request_id = %request_id, rating, "review recorded");
        Ok(review)
    }

    pub async fn review_for_request(&self, request_id: Uuid) -> Result<Option<Review>> {
        self.store.review_for_request(request_id).await
    }
}
