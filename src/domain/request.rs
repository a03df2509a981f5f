use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geo::GeoPoint;
use super::money::Amount;

/// Kind of roadside work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Towing,
    TireChange,
    JumpStart,
    FuelDelivery,
    Lockout,
    Diagnostic,
    GeneralRepair,
}

/// Canonical lifecycle states of a service request.
///
/// The forward path is REQUESTED → ACCEPTED → PAYMENT_AUTHORIZED →
/// {IN_ROUTE | SERVICING} → … → COMPLETED, with BOOKED → COMPLETED serving
/// pre-scheduled jobs that bypass live bidding. Cancellation is out-of-band
/// and deletes the request rather than moving it to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Requested,
    Booked,
    Accepted,
    PaymentAuthorized,
    InRoute,
    InProgress,
    Servicing,
    InCompletion,
    Completed,
}

impl RequestStatus {
    /// The single transition table. Every status check in the crate goes
    /// through here; there are no per-call-site status comparisons.
    pub fn allowed_next(self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Requested => &[Accepted],
            Booked => &[Completed],
            Accepted => &[PaymentAuthorized],
            // Direct SERVICING entry covers a mechanic already on site.
            PaymentAuthorized => &[InRoute, Servicing],
            InRoute => &[InProgress],
            InProgress => &[Servicing],
            Servicing => &[InCompletion],
            InCompletion => &[Completed],
            Completed => &[],
        }
    }

    pub fn can_transition_to(self, target: RequestStatus) -> bool {
        self.allowed_next().contains(&target)
    }

    /// Statuses that carry an assigned mechanic. BOOKED jobs name their
    /// mechanic up front; everything past acceptance is bound as well.
    pub fn binds_mechanic(self) -> bool {
        !matches!(self, RequestStatus::Requested)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestStatus::Requested => "REQUESTED",
            RequestStatus::Booked => "BOOKED",
            RequestStatus::Accepted => "ACCEPTED",
            RequestStatus::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            RequestStatus::InRoute => "IN_ROUTE",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Servicing => "SERVICING",
            RequestStatus::InCompletion => "IN_COMPLETION",
            RequestStatus::Completed => "COMPLETED",
        };
        write!(f, "{name}")
    }
}

/// A customer's request for help, from creation to settlement.
///
/// Mutated only by the lifecycle engine and the arbitration engine; deleted
/// only by cancellation, which cascades to its offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub client_id: Uuid,
    pub mechanic_id: Option<Uuid>,
    pub status: RequestStatus,
    pub service_type: ServiceType,
    pub description: String,
    pub location: GeoPoint,
    pub mechanic_location: Option<GeoPoint>,
    pub mechanic_location_at: Option<DateTime<Utc>>,
    pub arrival_code: Option<String>,
    pub completion_code: Option<String>,
    pub payment_hold_id: Option<String>,
    pub payment_id: Option<String>,
    pub total_amount: Option<Amount>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    /// An open request awaiting bids.
    pub fn new(
        client_id: Uuid,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            mechanic_id: None,
            status: RequestStatus::Requested,
            service_type,
            description,
            location,
            mechanic_location: None,
            mechanic_location_at: None,
            arrival_code: None,
            completion_code: None,
            payment_hold_id: None,
            payment_id: None,
            total_amount: None,
            start_time: None,
            completion_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A pre-scheduled job with its mechanic and price fixed at creation.
    pub fn booked(
        client_id: Uuid,
        mechanic_id: Uuid,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        let mut request = Self::new(client_id, service_type, description, location, now);
        request.status = RequestStatus::Booked;
        request.mechanic_id = Some(mechanic_id);
        request.total_amount = Some(amount);
        request
    }

    /// mechanic_id must be set exactly on the mechanic-bound statuses.
    pub fn mechanic_binding_consistent(&self) -> bool {
        self.mechanic_id.is_some() == self.status.binds_mechanic()
    }
}
