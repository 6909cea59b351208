//! Prometheus metrics for the sandbox pool's own observability surface.
//!
//! Scoped down from a broader metrics module: gauges for pool occupancy, a
//! counter for destroys labeled by reason, and a histogram for exec
//! duration.

use std::sync::OnceLock;

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total tracked sandboxes.
pub static POOL_SIZE: OnceLock<Gauge> = OnceLock::new();
/// Sandboxes currently `Ready`.
pub static POOL_READY: OnceLock<Gauge> = OnceLock::new();
/// Sandboxes currently `Executing`.
pub static POOL_EXECUTING: OnceLock<Gauge> = OnceLock::new();
/// Sandboxes currently `Idle`.
pub static POOL_IDLE: OnceLock<Gauge> = OnceLock::new();
/// Sandboxes destroyed, labeled by reason (`idle-timeout`,
/// `health-check-failure`, `shutdown`, ...).
pub static DESTROYED_TOTAL: OnceLock<CounterVec> = OnceLock::new();
/// Exec call duration in seconds.
pub static EXEC_DURATION: OnceLock<Histogram> = OnceLock::new();
/// Sandboxes created since process start.
pub static CREATED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Registers every metric with a fresh registry. Call once at process
/// startup; idempotent re-registration is a caller error, matching
/// Prometheus's own semantics.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let pool_size = Gauge::new("sandbox_pool_size", "Total tracked sandboxes")?;
    let pool_ready = Gauge::new("sandbox_pool_ready", "Sandboxes in the ready state")?;
    let pool_executing = Gauge::new("sandbox_pool_executing", "Sandboxes in the executing state")?;
    let pool_idle = Gauge::new("sandbox_pool_idle", "Sandboxes in the idle state")?;

    let destroyed_total = CounterVec::new(
        Opts::new("sandbox_destroyed_total", "Sandboxes destroyed, labeled by reason"),
        &["reason"],
    )?;

    let exec_duration = Histogram::with_opts(
        HistogramOpts::new("sandbox_exec_duration_seconds", "exec() call duration in seconds")
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
    )?;

    let created_total = Counter::new("sandbox_created_total", "Sandboxes created since process start")?;

    registry.register(Box::new(pool_size.clone()))?;
    registry.register(Box::new(pool_ready.clone()))?;
    registry.register(Box::new(pool_executing.clone()))?;
    registry.register(Box::new(pool_idle.clone()))?;
    registry.register(Box::new(destroyed_total.clone()))?;
    registry.register(Box::new(exec_duration.clone()))?;
    registry.register(Box::new(created_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = POOL_SIZE.set(pool_size);
    let _ = POOL_READY.set(pool_ready);
    let _ = POOL_EXECUTING.set(pool_executing);
    let _ = POOL_IDLE.set(pool_idle);
    let _ = DESTROYED_TOTAL.set(destroyed_total);
    let _ = EXEC_DURATION.set(exec_duration);
    let _ = CREATED_TOTAL.set(created_total);

    Ok(())
}

/// Calls [`init_metrics`] only if the registry hasn't been set up yet.
/// Safe to call from every construction path that might run first.
pub fn ensure_initialized() {
    if REGISTRY.get().is_none() {
        if let Err(e) = init_metrics() {
            tracing::warn!(error = %e, "failed to initialize metrics registry");
        }
    }
}

/// Refreshes the pool gauges from a stats snapshot. No-op if metrics were
/// never initialized.
pub fn observe_stats(stats: &crate::manager::PoolStats) {
    if let Some(g) = POOL_SIZE.get() {
        g.set(stats.total as f64);
    }
    if let Some(g) = POOL_READY.get() {
        g.set(stats.ready as f64);
    }
    if let Some(g) = POOL_EXECUTING.get() {
        g.set(stats.executing as f64);
    }
    if let Some(g) = POOL_IDLE.get() {
        g.set(stats.idle as f64);
    }
}

/// Increments the created-sandbox counter. No-op if metrics were never
/// initialized.
pub fn record_created() {
    if let Some(c) = CREATED_TOTAL.get() {
        c.inc();
    }
}

/// Increments the destroyed-sandbox counter for `reason`. No-op if metrics
/// were never initialized.
pub fn record_destroyed(reason: &str) {
    if let Some(c) = DESTROYED_TOTAL.get() {
        c.with_label_values(&[reason]).inc();
    }
}

/// Records one exec() call's wall-clock duration. No-op if metrics were
/// never initialized.
pub fn observe_exec_duration(seconds: f64) {
    if let Some(h) = EXEC_DURATION.get() {
        h.observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_metrics_registers_without_error() {
        init_metrics().unwrap();
        assert!(REGISTRY.get().is_some());
        assert!(POOL_SIZE.get().is_some());
    }

    #[test]
    fn record_and_observe_helpers_do_not_panic_before_init() {
        // OnceLocks are process-global and may already be set by another
        // test in this binary; these calls must stay side-effect-safe
        // either way.
        record_created();
        record_destroyed("idle-timeout");
        observe_exec_duration(0.01);
        ensure_initialized();
        record_created();
        record_destroyed("idle-timeout");
        observe_exec_duration(0.01);
    }
}
