use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::types::{HistoryRecord, NewService, OwnerId, Service, ServiceConfig, ServiceId};
use crate::monitor::gateway::ServiceStore;
use crate::store::db::{StatusUpdate, StoreDb};

/// Commands sent to the store thread
pub enum StoreCommand {
    Insert(NewService, oneshot::Sender<Result<Service>>),
    UpdateConfig(ServiceId, ServiceConfig, oneshot::Sender<Result<Option<Service>>>),
    Delete(ServiceId, oneshot::Sender<Result<bool>>),
    GetOne(ServiceId, oneshot::Sender<Result<Option<Service>>>),
    GetAll(oneshot::Sender<Result<Vec<Service>>>),
    GetByOwner(OwnerId, oneshot::Sender<Result<Vec<Service>>>),
    AppendHistory(HistoryRecord, oneshot::Sender<Result<bool>>),
    HistorySince(ServiceId, DateTime<Utc>, oneshot::Sender<Result<Vec<HistoryRecord>>>),
    RecentHistory(ServiceId, usize, oneshot::Sender<Result<Vec<HistoryRecord>>>),
    UpdateStatus(ServiceId, StatusUpdate, oneshot::Sender<Result<bool>>),
    Shutdown,
}

/// Handle to the thread that owns the SQLite connection
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread with an opened, migrated database
    pub fn spawn(db: StoreDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Insert(new, reply) => {
                        let _ = reply.send(db.insert_service(&new));
                    }
                    StoreCommand::UpdateConfig(id, config, reply) => {
                        let _ = reply.send(db.update_service_config(id, &config));
                    }
                    StoreCommand::Delete(id, reply) => {
                        let _ = reply.send(db.delete_service(id));
                    }
                    StoreCommand::GetOne(id, reply) => {
                        let _ = reply.send(db.get_service(id));
                    }
                    StoreCommand::GetAll(reply) => {
                        let _ = reply.send(db.get_all_services());
                    }
                    StoreCommand::GetByOwner(owner_id, reply) => {
                        let _ = reply.send(db.get_services_by_owner(owner_id));
                    }
                    StoreCommand::AppendHistory(record, reply) => {
                        let _ = reply.send(db.append_history(&record));
                    }
                    StoreCommand::HistorySince(id, since, reply) => {
                        let _ = reply.send(db.get_history_since(id, since));
                    }
                    StoreCommand::RecentHistory(id, limit, reply) => {
                        let _ = reply.send(db.recent_history(id, limit));
                    }
                    StoreCommand::UpdateStatus(id, update, reply) => {
                        let _ = reply.send(db.update_service_status(id, &update));
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await
            .map_err(|_| anyhow::anyhow!("Store thread is not running"))?;
        rx.await?
    }

    pub async fn insert(&self, new: NewService) -> Result<Service> {
        self.request(|reply| StoreCommand::Insert(new, reply)).await
    }

    /// Replace a service's configuration. `None` if it does not exist.
    pub async fn update_config(&self, id: ServiceId, config: ServiceConfig) -> Result<Option<Service>> {
        self.request(|reply| StoreCommand::UpdateConfig(id, config, reply)).await
    }

    pub async fn delete(&self, id: ServiceId) -> Result<bool> {
        self.request(|reply| StoreCommand::Delete(id, reply)).await
    }

    pub async fn get_one(&self, id: ServiceId) -> Result<Option<Service>> {
        self.request(|reply| StoreCommand::GetOne(id, reply)).await
    }

    pub async fn get_all(&self) -> Result<Vec<Service>> {
        self.request(StoreCommand::GetAll).await
    }

    pub async fn get_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Service>> {
        self.request(|reply| StoreCommand::GetByOwner(owner_id, reply)).await
    }

    pub async fn recent_history(&self, id: ServiceId, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.request(|reply| StoreCommand::RecentHistory(id, limit, reply)).await
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await
            .map_err(|_| anyhow::anyhow!("Store thread is not running"))?;
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for StoreHandle {
    async fn list_all_services(&self) -> Result<Vec<Service>> {
        self.get_all().await
    }

    async fn get_service(&self, id: ServiceId) -> Result<Option<Service>> {
        self.get_one(id).await
    }

    async fn get_history(&self, id: ServiceId, since: DateTime<Utc>) -> Result<Vec<HistoryRecord>> {
        self.request(|reply| StoreCommand::HistorySince(id, since, reply)).await
    }

    async fn append_history(&self, record: HistoryRecord) -> Result<bool> {
        self.request(|reply| StoreCommand::AppendHistory(record, reply)).await
    }

    async fn update_service_status(&self, id: ServiceId, update: StatusUpdate) -> Result<bool> {
        self.request(|reply| StoreCommand::UpdateStatus(id, update, reply)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::{CheckType, ServiceStatus};

    fn new_service() -> NewService {
        NewService {
            owner_id: 1,
            config: ServiceConfig {
                name: "edge".to_string(),
                check_type: CheckType::Ping,
                target: "1.1.1.1".to_string(),
                interval_secs: 60,
                locations: vec![],
            },
        }
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let handle = StoreHandle::spawn(StoreDb::open(":memory:").unwrap());

        let created = handle.insert(new_service()).await.unwrap();
        let now = Utc::now();

        assert!(handle.append_history(HistoryRecord {
            service_id: created.id,
            timestamp: now,
            up: true,
            response_time: 42,
        }).await.unwrap());

        assert!(handle.update_service_status(created.id, StatusUpdate {
            status: Some(ServiceStatus::Up),
            last_checked: now,
            last_response_time: Some(42),
            uptime_percentage: Some(100.0),
        }).await.unwrap());

        let svc = handle.get_service(created.id).await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Up);
        assert_eq!(handle.recent_history(created.id, 30).await.unwrap().len(), 1);
        assert_eq!(handle.list_all_services().await.unwrap().len(), 1);

        assert!(handle.delete(created.id).await.unwrap());
        assert!(handle.get_service(created.id).await.unwrap().is_none());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let handle = StoreHandle::spawn(StoreDb::open(":memory:").unwrap());
        handle.shutdown().await.unwrap();

        // The thread drops its receiver once it leaves the loop
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(handle.get_all().await.is_err());
    }
}
