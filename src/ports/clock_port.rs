//! Clock port. Times are exchange-local.

use async_trait::async_trait;
use chrono::NaiveDateTime;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Returns once `now() >= at`. Returns immediately for past times.
    async fn sleep_until(&self, at: NaiveDateTime);
}
