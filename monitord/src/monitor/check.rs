use chrono::{DateTime, Duration, Utc};
use shared::protocol::UPTIME_WINDOW_HOURS;
use shared::types::{HistoryRecord, Service};
use super::aggregate;
use super::gateway::{ServiceStore, StatusUpdate};
use super::probe::ProbeExecutor;

/// Run one check for `service` and persist the result.
///
/// `still_scheduled` is consulted before each write; once it reports false
/// the rest of the result is dropped. Returns the time the check completed, which
/// becomes the service's new `last_checked`.
pub async fn run_check(
    store: &dyn ServiceStore,
    executor: &ProbeExecutor,
    service: &Service,
    still_scheduled: impl Fn() -> bool,
) -> DateTime<Utc> {
    if service.locations.is_empty() {
        let now = Utc::now();
        tracing::info!("[SKIPPED] No locations configured for {} (ID: {})", service.name, service.id);

        if still_scheduled() {
            // Nothing was measured, so an earlier Up verdict must not survive
            let summary = aggregate::summarize(&[]);
            let update = StatusUpdate {
                status: Some(summary.status),
                last_checked: now,
                last_response_time: Some(summary.average_response_ms),
                uptime_percentage: None,
            };
            persist_status(store, service, update).await;
        }
        return now;
    }

    tracing::debug!("[RUNNING] Checking {} ({})", service.name, service.target);

    let outcomes = executor.probe(service).await;
    let summary = aggregate::summarize(&outcomes);
    let checked_at = Utc::now();

    for failed in outcomes.iter().filter(|o| !o.success) {
        tracing::debug!(
            "Probe failed for {} - location: {}, status: {}, error: {}",
            service.name,
            failed.location,
            failed.status_code,
            failed.error.as_deref().unwrap_or("none")
        );
    }

    if !still_scheduled() {
        tracing::debug!("Discarding result for {} (ID: {}): no longer scheduled", service.name, service.id);
        return checked_at;
    }

    let record = HistoryRecord {
        service_id: service.id,
        timestamp: checked_at,
        up: summary.is_up(),
        response_time: summary.average_response_ms,
    };

    match store.append_history(record).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!("Discarding result for service ID {}: service was deleted", service.id);
            return checked_at;
        }
        Err(e) => {
            tracing::error!("Failed to record history for {}: {:#}", service.name, e);
        }
    }

    if !still_scheduled() {
        tracing::debug!("Skipping status update for service ID {}: no longer scheduled", service.id);
        return checked_at;
    }

    let since = checked_at - Duration::hours(UPTIME_WINDOW_HOURS);
    let uptime = match store.get_history(service.id, since).await {
        Ok(window) => Some(aggregate::uptime_percentage(&window)),
        Err(e) => {
            tracing::error!("Failed to load history window for {}: {:#}", service.name, e);
            None
        }
    };

    if !still_scheduled() {
        tracing::debug!("Skipping status update for service ID {}: no longer scheduled", service.id);
        return checked_at;
    }

    let update = StatusUpdate {
        status: Some(summary.status),
        last_checked: checked_at,
        last_response_time: Some(summary.average_response_ms),
        uptime_percentage: uptime,
    };
    persist_status(store, service, update).await;

    tracing::info!(
        "[RESULT] {}: {} ({}ms avg) - {}/{} locations succeeded",
        service.name,
        summary.status,
        summary.average_response_ms,
        summary.succeeded,
        summary.attempted
    );

    checked_at
}

async fn persist_status(store: &dyn ServiceStore, service: &Service, update: StatusUpdate) {
    match store.update_service_status(service.id, update).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Status update skipped: service ID {} no longer exists", service.id),
        Err(e) => tracing::error!("Failed to update status for {}: {:#}", service.name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;
    use shared::types::ServiceStatus;
    use crate::monitor::gateway::tests::MemoryStore;
    use crate::monitor::probe::tests::{service_with, FakeProbe, FakeProvider};

    fn executor(provider: FakeProvider) -> ProbeExecutor {
        ProbeExecutor::new(Arc::new(provider), StdDuration::from_secs(5))
    }

    fn seed_history(store: &MemoryStore, up: usize, down: usize, age: Duration) {
        let at = Utc::now() - age;
        let mut history = store.history.lock().unwrap();
        for i in 0..(up + down) {
            history.push(HistoryRecord {
                service_id: 1,
                timestamp: at,
                up: i < up,
                response_time: 0,
            });
        }
    }

    #[tokio::test]
    async fn test_uptime_counts_only_trailing_window() {
        let service = service_with(&["DE"]);
        let store = MemoryStore::with(vec![service.clone()]);
        seed_history(&store, 7, 2, Duration::hours(1));
        seed_history(&store, 0, 50, Duration::hours(48));

        let exec = executor(FakeProvider::new(&[("DE", FakeProbe::Accept { after: StdDuration::ZERO })]));
        run_check(&store, &exec, &service, || true).await;

        let updated = store.service(1).unwrap();
        assert_eq!(updated.status, ServiceStatus::Up);
        assert_eq!(updated.uptime_percentage, Some(80.0));
    }

    #[tokio::test]
    async fn test_all_locations_failing_is_down() {
        let service = service_with(&["DE", "US"]);
        let store = MemoryStore::with(vec![service.clone()]);
        let exec = executor(FakeProvider::new(&[
            ("DE", FakeProbe::Reject { status: 400, message: "bad target" }),
            ("US", FakeProbe::Unreachable),
        ]));

        let checked_at = run_check(&store, &exec, &service, || true).await;

        let updated = store.service(1).unwrap();
        assert_eq!(updated.status, ServiceStatus::Down);
        assert_eq!(updated.last_response_time, Some(0));
        assert_eq!(updated.last_checked, Some(checked_at));

        let history = store.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].up);
    }

    #[tokio::test]
    async fn test_unscheduled_service_is_not_written() {
        let service = service_with(&["DE"]);
        let store = MemoryStore::with(vec![service.clone()]);
        let exec = executor(FakeProvider::new(&[("DE", FakeProbe::Accept { after: StdDuration::ZERO })]));

        run_check(&store, &exec, &service, || false).await;

        assert_eq!(store.history_len(1), 0);
        assert!(store.service(1).unwrap().last_checked.is_none());
    }

    #[tokio::test]
    async fn test_deleted_service_skips_status_update() {
        let service = service_with(&["DE"]);
        let store = MemoryStore::default();
        let exec = executor(FakeProvider::new(&[("DE", FakeProbe::Accept { after: StdDuration::ZERO })]));

        run_check(&store, &exec, &service, || true).await;

        assert_eq!(store.history_len(1), 0);
        assert!(store.service(1).is_none());
    }

    #[tokio::test]
    async fn test_unscheduled_after_history_skips_status() {
        let service = service_with(&["DE"]);
        let store = MemoryStore::with(vec![service.clone()]);
        let exec = executor(FakeProvider::new(&[("DE", FakeProbe::Accept { after: StdDuration::ZERO })]));

        // Still owned for the history write, replaced before the status write
        let calls = std::cell::Cell::new(0);
        run_check(&store, &exec, &service, || {
            calls.set(calls.get() + 1);
            calls.get() == 1
        })
        .await;

        assert_eq!(store.history_len(1), 1);
        let untouched = store.service(1).unwrap();
        assert_eq!(untouched.status, ServiceStatus::Pending);
        assert!(untouched.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_no_locations_clears_previous_up() {
        let service = Service {
            status: ServiceStatus::Up,
            last_response_time: Some(120),
            ..service_with(&[])
        };
        let store = MemoryStore::with(vec![service.clone()]);
        let exec = executor(FakeProvider::new(&[]));

        let checked_at = run_check(&store, &exec, &service, || true).await;

        let updated = store.service(1).unwrap();
        assert_eq!(updated.status, ServiceStatus::Down);
        assert_eq!(updated.last_response_time, Some(0));
        assert_eq!(updated.last_checked, Some(checked_at));
        assert_eq!(store.history_len(1), 0);
    }

    #[tokio::test]
    async fn test_write_failures_are_absorbed() {
        let service = service_with(&["DE"]);
        let store = MemoryStore::with(vec![service.clone()]);
        store.fail_writes.store(true, Ordering::SeqCst);
        let exec = executor(FakeProvider::new(&[("DE", FakeProbe::Accept { after: StdDuration::ZERO })]));

        // Every write fails; the call must still complete normally
        let checked_at = run_check(&store, &exec, &service, || true).await;
        assert!(checked_at <= Utc::now());
        assert_eq!(store.history_len(1), 0);
    }
}
