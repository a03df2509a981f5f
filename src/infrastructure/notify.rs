use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::ports::{Notification, Notifier};

/// Notification sink that logs deliveries instead of pushing them.
///
/// Stands in for the real push/email collaborator; useful for the replay
/// binary and anywhere delivery is out of scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        recipient: Uuid,
        notification: Notification,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(%recipient, ?notification, "notification dispatched");
        Ok(())
    }
}
