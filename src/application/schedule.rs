use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A periodic background task whose cancellation is tied to this handle's
/// lifetime: dropping the handle aborts the task.
///
/// Consumers that poll (offer listings, position snapshots) own one of
/// these instead of a free-running timer loop.
pub struct Periodic {
    handle: JoinHandle<()>,
}

impl Periodic {
    pub fn spawn<F, Fut>(every: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
