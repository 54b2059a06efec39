use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Tracks detached search-index pushes so lag and failures are observable
#[derive(Debug, Default)]
pub struct IndexHealth {
    in_flight: AtomicU64,
    failed_total: AtomicU64,
    last_failure_at: RwLock<Option<DateTime<Utc>>>,
    idle: Notify,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHealthSnapshot {
    pub enabled: bool,
    pub in_flight: u64,
    pub failed_total: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Held by a running index task; releases its slot on drop
#[derive(Debug)]
pub struct InFlight {
    health: Arc<IndexHealth>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.health.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.health.idle.notify_waiters();
        }
    }
}

impl IndexHealth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            health: Arc::clone(self),
        }
    }

    pub fn record_failure(&self) {
        self.failed_total.fetch_add(1, Ordering::SeqCst);
        *self.last_failure_at.write() = Some(Utc::now());
        metrics::counter!("media.index.failures").increment(1);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, enabled: bool) -> IndexHealthSnapshot {
        IndexHealthSnapshot {
            enabled,
            in_flight: self.in_flight(),
            failed_total: self.failed_total.load(Ordering::SeqCst),
            last_failure_at: *self.last_failure_at.read(),
        }
    }

    /// Resolves once no index task is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
