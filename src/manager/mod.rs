//! Sandbox pool manager: warm-up, acquire/release, health checks, idle
//! cleanup, and graceful shutdown.

pub mod events;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::driver::{ContainerDriver, ContainerRef, ContainerSpec, ExecResult};
use crate::error::{Result, SandboxError};
use crate::state::{SandboxState, StateMachine};

pub use events::{Event, EventBus, SharedEventBus};

const ACQUIRE_MAX_RETRIES: u32 = 3;
const ACQUIRE_RETRY_INTERVAL_MS: u64 = 2_000;
const HEALTH_PROBE_CMD: &str = "python3 -c 'print(1)'";
const HEALTH_PROBE_TIMEOUT_MS: u64 = 5_000;
const STOP_GRACE_SECS: i64 = 10;

/// Manager-internal record of a single pooled sandbox.
#[derive(Debug, Clone)]
pub struct TrackedSandbox {
    pub id: String,
    pub container_ref: ContainerRef,
    pub state: SandboxState,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub health_failures: u32,
    pub session_id: Option<String>,
}

/// Point-in-time pool occupancy snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub ready: usize,
    pub executing: usize,
    pub idle: usize,
    pub suspended: usize,
}

struct PoolInner {
    sandboxes: HashMap<String, TrackedSandbox>,
    ready_queue: VecDeque<String>,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            sandboxes: HashMap::new(),
            ready_queue: VecDeque::new(),
        }
    }

    fn ready_count(&self) -> usize {
        self.sandboxes
            .values()
            .filter(|s| s.state == SandboxState::Ready)
            .count()
    }

    fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total: self.sandboxes.len(),
            ..Default::default()
        };
        for sandbox in self.sandboxes.values() {
            match sandbox.state {
                SandboxState::Ready => stats.ready += 1,
                SandboxState::Executing => stats.executing += 1,
                SandboxState::Idle => stats.idle += 1,
                SandboxState::Suspended => stats.suspended += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Pool lifecycle manager. Construct once per process and share via
/// [`crate::facade`].
pub struct SandboxManager {
    config: SandboxConfig,
    driver: Arc<dyn ContainerDriver>,
    state_machine: StateMachine,
    events: SharedEventBus,
    inner: Mutex<PoolInner>,
    initialized: AtomicBool,
    shutdown_requested: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// A caller's capability over one acquired sandbox. Does not own the
/// underlying container; must not be used after the manager shuts down.
pub struct SandboxHandle {
    id: String,
    container: ContainerRef,
    manager: Arc<SandboxManager>,
}

impl SandboxHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    pub async fn state(&self) -> Option<SandboxState> {
        let inner = self.manager.inner.lock().await;
        inner.sandboxes.get(&self.id).map(|s| s.state)
    }

    pub async fn exec(&self, cmd: &str) -> Result<ExecResult> {
        let start = Instant::now();
        let result = self
            .manager
            .driver
            .exec_in_container(&self.container, cmd, Some(self.manager.config.timeouts.exec_ms))
            .await;
        crate::metrics::observe_exec_duration(start.elapsed().as_secs_f64());
        result
    }

    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.manager
            .driver
            .write_to_container(&self.container, path, bytes)
            .await
    }

    pub async fn release(&self) {
        self.manager.release(&self.id).await;
    }

    pub async fn destroy(&self) {
        self.manager.destroy_sandbox(&self.id, "handle-destroy").await;
    }
}

impl SandboxManager {
    pub fn new(config: SandboxConfig, driver: Arc<dyn ContainerDriver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            driver,
            state_machine: StateMachine::new(),
            events: Arc::new(EventBus::new()),
            inner: Mutex::new(PoolInner::new()),
            initialized: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            health_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn on<F>(&self, listener: F) -> u64
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.on(listener).await
    }

    /// Idempotent. Pings the engine, ensures the image, warms `min_warm`
    /// sandboxes in parallel, and starts the background loops.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        crate::metrics::ensure_initialized();

        self.driver.ensure_image(&self.config.image).await.map_err(|e| {
            SandboxError::SandboxUnavailable(format!("engine unavailable: {e}"))
        })?;

        let warm_count = self.config.pool.min_warm.min(self.config.pool.max_total);
        let mut warm_futures = Vec::with_capacity(warm_count);
        for _ in 0..warm_count {
            let this = self.clone();
            warm_futures.push(tokio::spawn(async move {
                if let Err(e) = this.warm_one().await {
                    warn!(error = %e, "failed to warm sandbox during initialize");
                }
            }));
        }
        for handle in warm_futures {
            let _ = handle.await;
        }

        self.spawn_health_loop().await;
        self.spawn_cleanup_loop().await;

        info!(min_warm = warm_count, "sandbox pool initialized");
        Ok(())
    }

    async fn warm_one(self: &Arc<Self>) -> Result<()> {
        let id = self.create_fresh_sandbox().await?;
        let mut inner = self.inner.lock().await;
        if inner.sandboxes.contains_key(&id) {
            inner.ready_queue.push_back(id);
        }
        Ok(())
    }

    /// Stops both background loops, drains in-flight executions with a
    /// blanket grace sleep, then tears down every tracked sandbox.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.health_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.cleanup_task.lock().await.take() {
            handle.abort();
        }

        let any_executing = {
            let inner = self.inner.lock().await;
            inner
                .sandboxes
                .values()
                .any(|s| s.state == SandboxState::Executing)
        };
        if any_executing {
            sleep(Duration::from_millis(self.config.timeouts.shutdown_grace_ms)).await;
        }

        let ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.sandboxes.keys().cloned().collect()
        };
        let mut destroy_futures = Vec::with_capacity(ids.len());
        for id in ids {
            let this = self.clone();
            destroy_futures.push(tokio::spawn(async move {
                this.destroy_sandbox(&id, "shutdown").await;
            }));
        }
        for handle in destroy_futures {
            let _ = handle.await;
        }

        let mut inner = self.inner.lock().await;
        inner.sandboxes.clear();
        inner.ready_queue.clear();
        self.initialized.store(false, Ordering::SeqCst);

        info!("sandbox pool shut down");
    }

    /// Acquires a sandbox, preferring the warm ready queue, falling back to
    /// fresh creation under `max_total`, retrying the whole cycle on
    /// exhaustion.
    pub async fn acquire(self: &Arc<Self>, session_id: Option<String>) -> Result<SandboxHandle> {
        if !self.initialized.load(Ordering::SeqCst) {
            self.initialize().await?;
        }
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(SandboxError::SandboxUnavailable(
                "pool is shutting down".to_string(),
            ));
        }

        for attempt in 0..ACQUIRE_MAX_RETRIES {
            if let Some(handle) = self.try_pop_ready(session_id.clone()).await? {
                return Ok(handle);
            }
            if let Some(handle) = self.try_create_and_claim(session_id.clone()).await? {
                return Ok(handle);
            }
            if attempt + 1 < ACQUIRE_MAX_RETRIES {
                sleep(Duration::from_millis(ACQUIRE_RETRY_INTERVAL_MS)).await;
            }
        }

        Err(SandboxError::PoolExhausted(self.config.pool.max_total))
    }

    async fn try_pop_ready(
        self: &Arc<Self>,
        session_id: Option<String>,
    ) -> Result<Option<SandboxHandle>> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.ready_queue.pop_front() {
            let Some(sandbox) = inner.sandboxes.get_mut(&id) else {
                continue;
            };
            if sandbox.state != SandboxState::Ready {
                continue;
            }
            let to = self.state_machine.transition(sandbox.state, SandboxState::Executing)?;
            let from = sandbox.state;
            sandbox.state = to;
            sandbox.session_id = session_id;
            sandbox.last_used_at = Instant::now();
            let container = sandbox.container_ref.clone();
            drop(inner);
            self.events
                .emit(Event::StateChange { id: id.clone(), from, to })
                .await;
            return Ok(Some(SandboxHandle {
                id,
                container,
                manager: self.clone(),
            }));
        }
        Ok(None)
    }

    async fn try_create_and_claim(
        self: &Arc<Self>,
        session_id: Option<String>,
    ) -> Result<Option<SandboxHandle>> {
        let id = match self.create_fresh_sandbox().await {
            Ok(id) => id,
            Err(SandboxError::PoolExhausted(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut inner = self.inner.lock().await;
        let Some(sandbox) = inner.sandboxes.get_mut(&id) else {
            return Err(SandboxError::NotFound(id));
        };
        let to = self.state_machine.transition(sandbox.state, SandboxState::Executing)?;
        sandbox.state = to;
        sandbox.session_id = session_id;
        sandbox.last_used_at = Instant::now();
        let container = sandbox.container_ref.clone();
        drop(inner);

        self.events
            .emit(Event::StateChange {
                id: id.clone(),
                from: SandboxState::Ready,
                to,
            })
            .await;

        Ok(Some(SandboxHandle {
            id,
            container,
            manager: self.clone(),
        }))
    }

    /// Transitions `Executing -> Idle`, then promotes back to `Ready` (and
    /// requeues) if the ready count is below `min_warm`; otherwise leaves
    /// it `Idle` for the TTL reaper. Unknown ids are a silent no-op.
    pub async fn release(self: &Arc<Self>, id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(sandbox) = inner.sandboxes.get_mut(id) else {
            return;
        };
        let from = sandbox.state;
        let Ok(idle) = self.state_machine.transition(from, SandboxState::Idle) else {
            warn!(%id, ?from, "release called on sandbox in non-releasable state");
            return;
        };
        sandbox.state = idle;
        sandbox.last_used_at = Instant::now();
        sandbox.session_id = None;

        let promote = inner.ready_count() < self.config.pool.min_warm;
        let mut final_state = idle;
        if promote {
            if let Some(sandbox) = inner.sandboxes.get_mut(id) {
                if let Ok(ready) = self.state_machine.transition(idle, SandboxState::Ready) {
                    sandbox.state = ready;
                    final_state = ready;
                    inner.ready_queue.push_back(id.to_string());
                }
            }
        }
        drop(inner);

        self.events
            .emit(Event::StateChange {
                id: id.to_string(),
                from,
                to: final_state,
            })
            .await;
    }

    /// Backwards-compatible convenience matching the legacy `{container,
    /// stop}` shape: an acquire whose handle's `release` plays the role of
    /// `stop`.
    pub async fn create_sandbox(self: &Arc<Self>) -> Result<SandboxHandle> {
        self.acquire(None).await
    }

    pub async fn get_stats(&self) -> PoolStats {
        let stats = self.inner.lock().await.stats();
        crate::metrics::observe_stats(&stats);
        stats
    }

    /// Creates and boots one fresh sandbox end to end, inserting it into
    /// the pool map in `Ready` state. Retries the whole sequence exactly
    /// once on failure before giving up.
    async fn create_fresh_sandbox(self: &Arc<Self>) -> Result<String> {
        match self.try_create_fresh_sandbox_once().await {
            Ok(id) => Ok(id),
            Err(first_err @ SandboxError::PoolExhausted(_)) => Err(first_err),
            Err(first_err) => {
                warn!(error = %first_err, "fresh sandbox creation failed, retrying once");
                self.try_create_fresh_sandbox_once().await.map_err(|second_err| {
                    SandboxError::SandboxUnavailable(format!(
                        "create failed twice: first={first_err}, retry={second_err}"
                    ))
                })
            }
        }
    }

    /// Checks the pool bound and inserts a `Creating` placeholder under one
    /// lock hold, so two concurrent callers can't both observe room and
    /// both insert, overshooting `max_total`.
    async fn reserve_slot(self: &Arc<Self>) -> Option<String> {
        let full = Uuid::new_v4().simple().to_string();
        let id = full[..12].to_string();

        let mut inner = self.inner.lock().await;
        if inner.sandboxes.len() >= self.config.pool.max_total {
            return None;
        }
        inner.sandboxes.insert(
            id.clone(),
            TrackedSandbox {
                id: id.clone(),
                container_ref: String::new(),
                state: SandboxState::Creating,
                created_at: Instant::now(),
                last_used_at: Instant::now(),
                health_failures: 0,
                session_id: None,
            },
        );
        Some(id)
    }

    async fn try_create_fresh_sandbox_once(self: &Arc<Self>) -> Result<String> {
        let Some(id) = self.reserve_slot().await else {
            return Err(SandboxError::PoolExhausted(self.config.pool.max_total));
        };
        self.events.emit(Event::Created { id: id.clone() }).await;

        let result = self.boot_sandbox(&id).await;
        match result {
            Ok(container_ref) => {
                crate::metrics::record_created();
                let mut inner = self.inner.lock().await;
                if let Some(sandbox) = inner.sandboxes.get_mut(&id) {
                    sandbox.container_ref = container_ref;
                    if let Ok(ready) = self.state_machine.transition(sandbox.state, SandboxState::Ready) {
                        sandbox.state = ready;
                    }
                }
                Ok(id)
            }
            Err(e) => {
                self.events
                    .emit(Event::Error {
                        id: id.clone(),
                        message: e.to_string(),
                    })
                    .await;
                let container_ref = {
                    let mut inner = self.inner.lock().await;
                    let container_ref = inner
                        .sandboxes
                        .get(&id)
                        .map(|s| s.container_ref.clone())
                        .unwrap_or_default();
                    inner.sandboxes.remove(&id);
                    container_ref
                };
                if !container_ref.is_empty() {
                    let _ = self.driver.remove_container(&container_ref).await;
                }
                Err(e)
            }
        }
    }

    async fn boot_sandbox(self: &Arc<Self>, id: &str) -> Result<ContainerRef> {
        let spec = ContainerSpec {
            id: id.to_string(),
            image: self.config.image.clone(),
            limits: self.config.resource_limits.clone(),
            semantic_mount_host_path: format!(
                "{}/src/semantic",
                std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| ".".to_string())
            ),
        };

        let container_ref = self.driver.create_container(&spec).await?;
        self.transition_tracked(id, SandboxState::Initializing).await?;

        self.driver.start_container(&container_ref).await?;
        self.driver
            .init_container_python(&container_ref, self.config.timeouts.init_ms)
            .await?;

        Ok(container_ref)
    }

    async fn transition_tracked(&self, id: &str, to: SandboxState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(sandbox) = inner.sandboxes.get_mut(id) else {
            return Err(SandboxError::NotFound(id.to_string()));
        };
        let from = sandbox.state;
        let resolved = self.state_machine.transition(from, to)?;
        sandbox.state = resolved;
        Ok(())
    }

    /// Direct-assignment teardown: bypasses the transition table (any
    /// state may move straight to `Destroyed`), stops and removes the
    /// container, absorbing errors, then removes the pool entry.
    async fn destroy_sandbox(self: &Arc<Self>, id: &str, reason: &str) {
        let container_ref = {
            let mut inner = self.inner.lock().await;
            let Some(sandbox) = inner.sandboxes.get_mut(id) else {
                return;
            };
            sandbox.state = SandboxState::Destroyed;
            inner.ready_queue.retain(|qid| qid != id);
            sandbox.container_ref.clone()
        };

        if !container_ref.is_empty() {
            if let Err(e) = self.driver.stop_container(&container_ref, STOP_GRACE_SECS).await {
                debug!(%id, error = %e, "stop_container failed during destroy, continuing");
            }
            if let Err(e) = self.driver.remove_container(&container_ref).await {
                debug!(%id, error = %e, "remove_container failed during destroy");
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.sandboxes.remove(id);
        }

        crate::metrics::record_destroyed(reason);

        self.events
            .emit(Event::Destroyed {
                id: id.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    async fn spawn_health_loop(self: &Arc<Self>) {
        let this = self.clone();
        let interval_ms = self.config.health_check.interval_ms;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                this.run_health_tick().await;
            }
        });
        *self.health_task.lock().await = Some(handle);
    }

    async fn spawn_cleanup_loop(self: &Arc<Self>) {
        let this = self.clone();
        let interval_ms = self.config.health_check.interval_ms;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                this.run_cleanup_tick().await;
            }
        });
        *self.cleanup_task.lock().await = Some(handle);
    }

    async fn run_health_tick(self: &Arc<Self>) {
        let candidates: Vec<(String, ContainerRef)> = {
            let inner = self.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|s| matches!(s.state, SandboxState::Ready | SandboxState::Idle))
                .map(|s| (s.id.clone(), s.container_ref.clone()))
                .collect()
        };

        for (id, container_ref) in candidates {
            let probe = self
                .driver
                .exec_in_container(&container_ref, HEALTH_PROBE_CMD, Some(HEALTH_PROBE_TIMEOUT_MS))
                .await;

            let healthy = matches!(&probe, Ok(r) if r.exit_code == 0);
            let failures = {
                let mut inner = self.inner.lock().await;
                let Some(sandbox) = inner.sandboxes.get_mut(&id) else {
                    continue;
                };
                if healthy {
                    sandbox.health_failures = 0;
                } else {
                    sandbox.health_failures += 1;
                }
                sandbox.health_failures
            };

            if !healthy && failures >= self.config.health_check.max_failures {
                self.events
                    .emit(Event::HealthCheckFailed {
                        id: id.clone(),
                        failures,
                    })
                    .await;
                self.destroy_sandbox(&id, "health-check-failure").await;

                let below_floor = {
                    let inner = self.inner.lock().await;
                    inner.ready_count() < self.config.pool.min_warm
                };
                if below_floor {
                    let this = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.warm_one().await {
                            warn!(error = %e, "failed to warm replacement after health eviction");
                        }
                    });
                }
            }
        }

        crate::metrics::observe_stats(&self.inner.lock().await.stats());
    }

    async fn run_cleanup_tick(self: &Arc<Self>) {
        let now = Instant::now();
        let max_idle = Duration::from_millis(self.config.pool.max_idle_ms);

        let expired: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .sandboxes
                .values()
                .filter(|s| s.state == SandboxState::Idle && now.duration_since(s.last_used_at) > max_idle)
                .map(|s| s.id.clone())
                .collect()
        };

        for id in expired {
            self.destroy_sandbox(&id, "idle-timeout").await;
        }

        crate::metrics::observe_stats(&self.inner.lock().await.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::driver::mock::{MockBehavior, MockDriver};

    fn test_config(min_warm: usize, max_total: usize) -> SandboxConfig {
        SandboxConfig::default()
            .with_min_warm(min_warm)
            .with_max_total(max_total)
            .with_max_idle_ms(100_000)
    }

    #[tokio::test]
    async fn warm_acquire_release_updates_stats() {
        let mut config = test_config(1, 2);
        config.health_check.interval_ms = 60_000;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver);

        manager.initialize().await.unwrap();
        let stats = manager.get_stats().await;
        assert_eq!(stats, PoolStats { total: 1, ready: 1, executing: 0, idle: 0, suspended: 0 });

        let handle = manager.acquire(None).await.unwrap();
        let stats = manager.get_stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.executing, 1);
        assert_eq!(stats.ready, 0);

        manager.release(handle.id()).await;
        let stats = manager.get_stats().await;
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.executing, 0);
    }

    #[tokio::test]
    async fn pool_exhaustion_retries_then_fails() {
        let mut config = test_config(0, 1);
        config.health_check.interval_ms = 60_000;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver);
        manager.initialize().await.unwrap();

        let _held = manager.acquire(None).await.unwrap();

        let start = Instant::now();
        let err = manager.acquire(None).await.unwrap_err();
        assert!(matches!(err, SandboxError::PoolExhausted(1)));
        assert!(start.elapsed() >= Duration::from_millis(3_900));
    }

    #[tokio::test]
    async fn release_requeues_when_below_min_warm() {
        let mut config = test_config(1, 1);
        config.health_check.interval_ms = 60_000;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver);
        manager.initialize().await.unwrap();

        let handle = manager.acquire(None).await.unwrap();
        manager.release(handle.id()).await;

        let second = manager.acquire(None).await.unwrap();
        assert_eq!(second.id(), handle.id());
    }

    #[tokio::test]
    async fn health_check_evicts_sandbox_after_max_failures() {
        let mut config = test_config(1, 1);
        config.health_check.interval_ms = 20;
        config.health_check.max_failures = 2;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver.clone());
        manager.initialize().await.unwrap();

        let handle = manager.acquire(None).await.unwrap();
        let container = handle.container().clone();
        manager.release(handle.id()).await;

        driver
            .set_behavior(
                &container,
                MockBehavior { health_probe_exit_code: 1, ..Default::default() },
            )
            .await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        manager
            .on(move |event| {
                if let Event::Destroyed { reason, .. } = event {
                    let _ = tx.try_send(reason.clone());
                }
            })
            .await;

        let reason = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("health eviction should fire within timeout")
            .expect("event channel should not close");
        assert_eq!(reason, "health-check-failure");
    }

    #[tokio::test]
    async fn idle_ttl_evicts_expired_sandbox() {
        let mut config = test_config(0, 1);
        config.health_check.interval_ms = 20;
        config.pool.max_idle_ms = 10;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver);
        manager.initialize().await.unwrap();

        let handle = manager.acquire(None).await.unwrap();
        manager.release(handle.id()).await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        manager
            .on(move |event| {
                if let Event::Destroyed { reason, .. } = event {
                    let _ = tx.try_send(reason.clone());
                }
            })
            .await;

        let reason = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("idle eviction should fire within timeout")
            .expect("event channel should not close");
        assert_eq!(reason, "idle-timeout");
    }

    #[tokio::test]
    async fn exec_timeout_then_healthy_sandbox_remains_usable() {
        let mut config = test_config(0, 1);
        config.health_check.interval_ms = 60_000;
        config.timeouts.exec_ms = 20;
        let driver = Arc::new(MockDriver::new());
        let manager = SandboxManager::new(config, driver.clone());
        manager.initialize().await.unwrap();

        let handle = manager.acquire(None).await.unwrap();
        let container = handle.container().clone();
        driver
            .set_behavior(&container, MockBehavior { exec_delay_ms: Some(200), ..Default::default() })
            .await;

        let err = handle.exec("sleep 1").await.unwrap_err();
        assert!(matches!(err, SandboxError::SandboxTimeout { .. }));

        driver.set_behavior(&container, MockBehavior::default()).await;
        let result = handle.exec("echo ok").await.unwrap();
        assert_eq!(result.exit_code, 0);

        handle.release().await;
        let stats = manager.get_stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.idle, 1);
    }
}
