//! Pool event bus: a small synchronous fan-out to registered listeners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::error;

use crate::state::SandboxState;

/// A single lifecycle event, delivered synchronously to every listener.
#[derive(Debug, Clone)]
pub enum Event {
    Created {
        id: String,
    },
    StateChange {
        id: String,
        from: SandboxState,
        to: SandboxState,
    },
    Destroyed {
        id: String,
        reason: String,
    },
    HealthCheckFailed {
        id: String,
        failures: u32,
    },
    Error {
        id: String,
        message: String,
    },
}

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Registered listeners keyed by a monotone handle id, so a caller can
/// unregister its own listener without disturbing others.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`, returning a handle id usable with [`Self::unregister`].
    pub async fn on<F>(&self, listener: F) -> u64
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().await.push((id, Box::new(listener)));
        id
    }

    pub async fn unregister(&self, id: u64) {
        self.listeners.lock().await.retain(|(lid, _)| *lid != id);
    }

    /// Delivers `event` to every listener. A listener that panics does not
    /// take down the others or the emitter: failures are caught and logged.
    pub async fn emit(&self, event: Event) {
        let listeners = self.listeners.lock().await;
        for (id, listener) in listeners.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event)));
            if let Err(_) = result {
                error!(listener_id = id, "event listener panicked");
            }
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn delivers_to_all_listeners() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        bus.on(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        bus.on(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        bus.emit(Event::Created { id: "x".into() }).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let handle = bus
            .on(move |_| {
                c1.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        bus.unregister(handle).await;
        bus.emit(Event::Created { id: "x".into() }).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
