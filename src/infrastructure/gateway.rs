use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::domain::money::Amount;
use crate::domain::ports::{GatewayError, PaymentGateway};

#[derive(Debug, Clone)]
enum HoldState {
    Authorized,
    Captured(String),
    Refunded(String),
}

#[derive(Default)]
struct Ledger {
    seq: u64,
    holds: HashMap<String, HoldState>,
}

/// In-process payment gateway with an idempotency ledger.
///
/// A capture or refund of a hold that was already settled reports
/// `AlreadyProcessed` with the original reference, matching how the real
/// gateway answers idempotent retries. `Clone` shares the ledger.
#[derive(Default, Clone)]
pub struct SimulatedGateway {
    ledger: Arc<Mutex<Ledger>>,
    declining: Arc<AtomicBool>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent authorization fail, for exercising abort
    /// paths.
    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::SeqCst);
    }

    pub async fn hold_count(&self) -> usize {
        self.ledger.lock().await.holds.len()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(
        &self,
        _amount: Amount,
        _currency: &str,
    ) -> std::result::Result<String, GatewayError> {
        if self.declining.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("card declined".to_string()));
        }
        let mut ledger = self.ledger.lock().await;
        ledger.seq += 1;
        let hold_id = format!("hold-{:06}", ledger.seq);
        ledger.holds.insert(hold_id.clone(), HoldState::Authorized);
        Ok(hold_id)
    }

    async fn capture(&self, hold_id: &str) -> std::result::Result<String, GatewayError> {
        let mut ledger = self.ledger.lock().await;
        ledger.seq += 1;
        let payment_id = format!("pay-{:06}", ledger.seq);
        match ledger.holds.get(hold_id) {
            Some(HoldState::Authorized) => {
                ledger
                    .holds
                    .insert(hold_id.to_string(), HoldState::Captured(payment_id.clone()));
                Ok(payment_id)
            }
            Some(HoldState::Captured(existing)) => {
                Err(GatewayError::AlreadyProcessed(existing.clone()))
            }
            Some(HoldState::Refunded(_)) => {
                Err(GatewayError::Declined("hold was refunded".to_string()))
            }
            None => Err(GatewayError::Declined("unknown hold".to_string())),
        }
    }

    async fn refund(&self, hold_id: &str) -> std::result::Result<String, GatewayError> {
        let mut ledger = self.ledger.lock().await;
        ledger.seq += 1;
        let refund_id = format!("ref-{:06}", ledger.seq);
        match ledger.holds.get(hold_id) {
            Some(HoldState::Authorized) => {
                ledger
                    .holds
                    .insert(hold_id.to_string(), HoldState::Refunded(refund_id.clone()));
                Ok(refund_id)
            }
            Some(HoldState::Refunded(existing)) => {
                Err(GatewayError::AlreadyProcessed(existing.clone()))
            }
            Some(HoldState::Captured(_)) => {
                Err(GatewayError::Declined("hold was captured".to_string()))
            }
            None => Err(GatewayError::Declined("unknown hold".to_string())),
        }
    }
}
