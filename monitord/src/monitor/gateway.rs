use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::types::{HistoryRecord, Service, ServiceId};

pub use crate::store::db::StatusUpdate;

/// What the scheduler needs from persistence.
///
/// `append_history` and `update_service_status` report `false` instead of
/// failing when the service no longer exists.
#[async_trait]
pub trait ServiceStore: Send + Sync + 'static {
    async fn list_all_services(&self) -> Result<Vec<Service>>;

    async fn get_service(&self, id: ServiceId) -> Result<Option<Service>>;

    /// Rows at or after `since`, oldest first
    async fn get_history(&self, id: ServiceId, since: DateTime<Utc>) -> Result<Vec<HistoryRecord>>;

    async fn append_history(&self, record: HistoryRecord) -> Result<bool>;

    async fn update_service_status(&self, id: ServiceId, update: StatusUpdate) -> Result<bool>;
}
