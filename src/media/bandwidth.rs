use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::RwLock, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    media::{
        bitrate::{self, BitrateReceiver, BitrateSender},
        types::Priority,
    },
};

/// Source of the shared capacity, bits per second. Must not block.
pub trait CapacityEstimator: Send + Sync {
    fn current_estimate(&self) -> i64;
}

/// An estimate that only changes when told to.
#[derive(Debug, Default)]
pub struct FixedEstimate(AtomicI64);

impl FixedEstimate {
    pub fn new(bps: i64) -> Self {
        Self(AtomicI64::new(bps))
    }

    pub fn set(&self, bps: i64) {
        self.0.store(bps, Ordering::Relaxed);
    }
}

impl CapacityEstimator for FixedEstimate {
    fn current_estimate(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// `total_capacity * weight / total_priority`, truncated.
pub fn share(total_capacity: i64, weight: u64, total_priority: u64) -> i64 {
    if total_priority == 0 {
        return 0;
    }
    (total_capacity as f64 * weight as f64 / total_priority as f64) as i64
}

/// Split `total_capacity` across `priorities`. Excluded entries get `None`
/// and do not count towards the denominator.
pub fn split_capacity(total_capacity: i64, priorities: &[Priority]) -> Vec<Option<i64>> {
    let total_priority: u64 = priorities.iter().map(|p| p.weight()).sum();
    priorities
        .iter()
        .map(|p| {
            if p.is_excluded() || total_priority == 0 {
                None
            } else {
                Some(share(total_capacity, p.weight(), total_priority))
            }
        })
        .collect()
}

struct Consumer {
    mailbox: BitrateSender,
    priority: Priority,
}

/// Splits one capacity estimate across every registered track, in
/// proportion to priority, on a fixed interval.
///
/// There is no per-track floor: with enough higher priority tracks a low
/// priority one can be driven arbitrarily close to zero.
pub struct BandwidthAllocator {
    estimator: RwLock<Option<Arc<dyn CapacityEstimator>>>,
    consumers: RwLock<HashMap<String, Consumer>>,
    interval: Duration,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl BandwidthAllocator {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            estimator: RwLock::new(None),
            consumers: RwLock::new(HashMap::new()),
            interval,
            cancel,
            started: AtomicBool::new(false),
        }
    }

    pub fn with_estimator(self, estimator: Arc<dyn CapacityEstimator>) -> Self {
        Self {
            estimator: RwLock::new(Some(estimator)),
            ..self
        }
    }

    /// Install or replace the estimator. Ticks before this are skipped.
    pub async fn set_estimator(&self, estimator: Arc<dyn CapacityEstimator>) {
        *self.estimator.write().await = Some(estimator);
        log::info!("bandwidth estimator set");
    }

    /// Register `key` and return the mailbox its shares are delivered to.
    pub async fn set_consumer(&self, key: &str, priority: Priority) -> Result<BitrateReceiver> {
        let mut consumers = self.consumers.write().await;
        if consumers.contains_key(key) {
            return Err(Error::DuplicateKey(key.to_string()));
        }

        let (mailbox, receiver) = bitrate::mailbox();
        consumers.insert(key.to_string(), Consumer { mailbox, priority });
        log::info!("consumer set with id: {}, priority: {:?}", key, priority);
        Ok(receiver)
    }

    pub async fn consumer_count(&self) -> usize {
        self.consumers.read().await.len()
    }

    /// Start the tick loop. Only the first call spawns it.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        log::info!("bandwidth allocator started, interval: {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                },
                _ = ticker.tick() => {
                    self.allocate().await;
                },
            }
        }
        log::info!("bandwidth allocator finished");
    }

    /// One allocation pass. Returns the capacity that was split, or `None`
    /// when there was nothing to do.
    pub async fn allocate(&self) -> Option<i64> {
        // held for the whole pass so registrations land between passes
        let consumers = self.consumers.read().await;
        if consumers.is_empty() {
            return None;
        }

        let total_priority: u64 = consumers.values().map(|c| c.priority.weight()).sum();
        if total_priority == 0 {
            return None;
        }

        let estimator = self.estimator.read().await.clone()?;
        let total_capacity = estimator.current_estimate();

        for (key, consumer) in consumers.iter() {
            if consumer.priority.is_excluded() {
                continue;
            }
            let bps = share(total_capacity, consumer.priority.weight(), total_priority);
            consumer.mailbox.deliver(bps);
            log::trace!("sent bitrate to consumer with id: {} and bitrate {}", key, bps);
        }

        Some(total_capacity)
    }
}

#[cfg(test)]
#[path = "bandwidth_test.rs"]
mod bandwidth_test;
