use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::application::schedule::Periodic;
use crate::domain::geo::GeoPoint;
use crate::domain::ports::StoreRef;
use crate::domain::request::RequestStatus;
use crate::error::{DispatchError, Result};

/// Both gates must pass before an update is persisted and fanned out.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    pub min_interval: Duration,
    pub min_displacement_m: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::seconds(5),
            min_displacement_m: 25.0,
        }
    }
}

/// A position accepted by the channel.
#[derive(Debug, Clone, Serialize)]
pub struct PositionUpdate {
    pub request_id: Uuid,
    pub position: GeoPoint,
    pub at: DateTime<Utc>,
}

/// Propagates mechanic coordinates to the customer while a request is
/// IN_ROUTE, and only then.
///
/// The latest position lives on the request row and is re-derived from the
/// store on every poll; the channel itself holds no mutable position state.
/// Polls and subscribers converge within one throttle interval.
pub struct LocationChannel {
    store: StoreRef,
    throttle: ThrottleConfig,
    updates: broadcast::Sender<PositionUpdate>,
}

impl LocationChannel {
    pub fn new(store: StoreRef, throttle: ThrottleConfig) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            store,
            throttle,
            updates,
        }
    }

    /// Reports a mechanic position. Returns `Ok(false)` when the update was
    /// throttled away (too soon or too close to the last accepted point);
    /// `Ok(true)` when it was persisted and broadcast.
    pub async fn publish(&self, request_id: Uuid, position: GeoPoint) -> Result<bool> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or(DispatchError::NotFound("service request"))?;
        if request.status != RequestStatus::InRoute {
            return Err(DispatchError::InvalidState(format!(
                "location updates are only tracked while the request is IN_ROUTE, not {}",
                request.status
            )));
        }

        let now = Utc::now();
        if let (Some(prev), Some(prev_at)) =
            (request.mechanic_location, request.mechanic_location_at)
        {
            let displacement = prev.distance_m(&position);
            if now - prev_at < self.throttle.min_interval
                || displacement < self.throttle.min_displacement_m
            {
                debug!(
                    request_id = %request_id,
                    displacement_m = displacement,
                    "location update throttled"
                );
                return Ok(false);
            }
        }

        let mut next = request;
        next.mechanic_location = Some(position);
        next.mechanic_location_at = Some(now);
        next.updated_at = now;
        // Guarded on IN_ROUTE: if the request transitioned underneath us the
        // stale position is simply dropped.
        if !self
            .store
            .update_request_guarded(next, RequestStatus::InRoute)
            .await?
        {
            return Ok(false);
        }

        let _ = self.updates.send(PositionUpdate {
            request_id,
            position,
            at: now,
        });
        Ok(true)
    }

    /// Latest known mechanic position, or `None` outside the IN_ROUTE
    /// window. Never reports a stale position after the window closes.
    pub async fn current_position(&self, request_id: Uuid) -> Result<Option<GeoPoint>> {
        Ok(self
            .store
            .request(request_id)
            .await?
            .filter(|r| r.status == RequestStatus::InRoute)
            .and_then(|r| r.mechanic_location))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.updates.subscribe()
    }

    /// Re-derives the latest position on a fixed cadence and forwards it to
    /// subscribers, for consumers that cannot poll. Stops with the returned
    /// handle; outside the IN_ROUTE window the task forwards nothing.
    pub fn snapshot_task(&self, request_id: Uuid, every: std::time::Duration) -> Periodic {
        let store = self.store.clone();
        let updates = self.updates.clone();
        Periodic::spawn(every, move || {
            let store = store.clone();
            let updates = updates.clone();
            async move {
                if let Ok(Some(request)) = store.request(request_id).await
                    && request.status == RequestStatus::InRoute
                    && let (Some(position), Some(at)) =
                        (request.mechanic_location, request.mechanic_location_at)
                {
                    let _ = updates.send(PositionUpdate {
                        request_id,
                        position,
                        at,
                    });
                }
            }
        })
    }
}
