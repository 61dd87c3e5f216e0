use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use shared::types::{Service, ServiceId};
use super::check;
use super::gateway::ServiceStore;
use super::probe::ProbeExecutor;

/// Time until a service is due: `last_checked + interval - now`, clamped at
/// zero. A service that was never checked is due immediately.
pub fn next_delay(last_checked: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> Duration {
    match last_checked {
        None => Duration::ZERO,
        Some(last) => {
            // A timestamp from the future counts as "just checked"
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            interval.saturating_sub(elapsed)
        }
    }
}

/// The armed timer for one service. `generation` identifies which arming
/// owns the slot, so stale timers and check cycles can tell they were replaced.
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn ServiceStore>,
    executor: ProbeExecutor,
    timers: Mutex<HashMap<ServiceId, Timer>>,
    next_generation: AtomicU64,
}

/// Owns one re-armable timer per service id.
///
/// A fired timer hands off to a detached check cycle. The cycle re-reads the
/// service, runs the probes, persists the result and re-arms the timer, but
/// only while its generation still owns the slot. `schedule` and `cancel`
/// replace or remove the slot, so neither can leave two live timers behind.
#[derive(Clone)]
pub struct ScheduleRegistry {
    inner: Arc<Inner>,
}

impl ScheduleRegistry {
    pub fn new(store: Arc<dyn ServiceStore>, executor: ProbeExecutor) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Arm (or re-arm) the timer for `service`, replacing any existing one.
    /// Returns immediately.
    pub fn schedule(&self, service: Service) {
        let mut timers = self.timers();
        self.arm(&mut timers, service);
    }

    /// Remove the timer for `service_id`. A check already running is left to
    /// finish but will not write or re-arm.
    pub fn cancel(&self, service_id: ServiceId) {
        if let Some(timer) = self.timers().remove(&service_id) {
            timer.handle.abort();
            tracing::info!("Canceled scheduled check for service ID: {}", service_id);
        }
    }

    /// Seed a timer for every stored service. Called once at startup, after
    /// the store has been migrated.
    pub async fn initialize_all(&self) -> Result<usize> {
        tracing::info!("Initializing monitoring schedules...");

        let services = self
            .inner
            .store
            .list_all_services()
            .await
            .context("Failed to list services")?;

        let count = services.len();
        for service in services {
            self.schedule(service);
        }

        tracing::info!("Initialized {} service monitors", count);
        Ok(count)
    }

    /// Abort every pending timer. In-flight checks stop at their next write.
    pub fn shutdown(&self) {
        let drained: Vec<Timer> = self.timers().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        tracing::info!("Scheduler stopped, {} timers dropped", drained.len());
    }

    pub fn active_count(&self) -> usize {
        self.timers().len()
    }

    pub fn is_scheduled(&self, service_id: ServiceId) -> bool {
        self.timers().contains_key(&service_id)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<ServiceId, Timer>> {
        self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, service_id: ServiceId, generation: u64) -> bool {
        self.timers()
            .get(&service_id)
            .is_some_and(|t| t.generation == generation)
    }

    fn arm(&self, timers: &mut HashMap<ServiceId, Timer>, service: Service) {
        let delay = next_delay(service.last_checked, service.interval(), Utc::now());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let id = service.id;

        tracing::info!(
            "Scheduling check for \"{}\" (ID: {}) in {}ms",
            service.name,
            id,
            delay.as_millis()
        );

        let registry = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so that replacing this timer never aborts a running check
            tokio::spawn(registry.run_cycle(service, generation));
        });

        if let Some(old) = timers.insert(id, Timer { generation, handle }) {
            old.handle.abort();
        }
    }

    /// Re-arm after a cycle, unless the slot was cancelled or replaced meanwhile
    fn rearm(&self, service: Service, generation: u64) {
        let mut timers = self.timers();
        if timers.get(&service.id).is_some_and(|t| t.generation == generation) {
            self.arm(&mut timers, service);
        } else {
            tracing::debug!("Not re-arming service ID {}: timer was replaced or cancelled", service.id);
        }
    }

    fn forget(&self, service_id: ServiceId, generation: u64) {
        let mut timers = self.timers();
        if timers.get(&service_id).is_some_and(|t| t.generation == generation) {
            timers.remove(&service_id);
        }
    }

    async fn run_cycle(self, armed: Service, generation: u64) {
        let id = armed.id;

        let service = match self.inner.store.get_service(id).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                tracing::info!("Service ID {} no longer exists, dropping its schedule", id);
                self.forget(id, generation);
                return;
            }
            Err(e) => {
                tracing::warn!("Could not reload service ID {}, using last known configuration: {:#}", id, e);
                armed
            }
        };

        let registry = self.clone();
        let target = service.clone();
        let result = tokio::spawn(async move {
            let inner = &registry.inner;
            check::run_check(inner.store.as_ref(), &inner.executor, &target, || {
                registry.is_current(id, generation)
            })
            .await
        })
        .await;

        let checked_at = match result {
            Ok(checked_at) => checked_at,
            Err(e) if e.is_panic() => {
                tracing::error!("Check for {} (ID: {}) panicked: {}", service.name, id, e);
                Utc::now()
            }
            Err(_) => return,
        };

        self.rearm(
            Service {
                last_checked: Some(checked_at),
                ..service
            },
            generation,
        );
    }
}
