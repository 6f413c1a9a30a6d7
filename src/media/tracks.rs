use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    media::{
        bandwidth::{BandwidthAllocator, CapacityEstimator},
        track::{Track, TrackOptions},
        types::AllocatorConfig,
    },
};

/// Keyed set of tracks sharing one bandwidth allocator.
pub struct Tracks {
    tracks: RwLock<HashMap<String, Arc<Track>>>,
    // keys whose creation is in flight
    pending: Mutex<HashSet<String>>,
    allocator: Arc<BandwidthAllocator>,
    allocator_enabled: bool,
    cancel: CancellationToken,
}

impl Tracks {
    pub fn new(config: AllocatorConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let allocator = BandwidthAllocator::new(config.interval(), cancel.child_token());
        Ok(Self {
            tracks: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            allocator: Arc::new(allocator),
            allocator_enabled: config.enabled,
            cancel,
        })
    }

    pub fn allocator(&self) -> &Arc<BandwidthAllocator> {
        &self.allocator
    }

    pub async fn set_estimator(&self, estimator: Arc<dyn CapacityEstimator>) {
        self.allocator.set_estimator(estimator).await;
    }

    /// Create a track and register it as a capacity consumer. The key is
    /// reserved before the transport is bound, so a concurrent creation
    /// under the same key fails without binding.
    pub async fn create_track(&self, options: TrackOptions) -> Result<Arc<Track>> {
        let key = options.key().to_string();
        let _reservation = self.reserve(&key)?;

        let track = Track::new(options, self.cancel.child_token())?;
        let receiver = self.allocator.set_consumer(&key, track.priority()).await?;
        track.attach_bitrate(receiver);

        let track = Arc::new(track);
        // the allocator rejects duplicates, so this insert never replaces
        let mut tracks = self.tracks.write().unwrap_or_else(PoisonError::into_inner);
        tracks.insert(key.clone(), Arc::clone(&track));
        log::info!("track registered: {}, total: {}", key, tracks.len());
        Ok(track)
    }

    fn reserve(&self, key: &str) -> Result<Reservation<'_>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.contains(key) || !pending.insert(key.to_string()) {
            return Err(Error::DuplicateKey(key.to_string()));
        }
        Ok(Reservation {
            pending: &self.pending,
            key: key.to_string(),
        })
    }

    /// Start one track. Unknown keys are ignored. The allocator loop is
    /// started on first use.
    pub fn start_track(&self, key: &str) {
        self.start_allocator();
        match self.get(key) {
            Some(track) => {
                track.start();
            }
            None => log::debug!("start_track: unknown key {}", key),
        }
    }

    pub fn start_all(&self) {
        self.start_allocator();
        for track in self.snapshot() {
            track.start();
        }
    }

    fn start_allocator(&self) {
        if self.allocator_enabled && self.allocator.start() {
            log::info!("bandwidth allocator loop launched");
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Track>> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cancel every track and the allocator.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn snapshot(&self) -> Vec<Arc<Track>> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Track>>> {
        self.tracks.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases a pending key when creation finishes, fails or is dropped.
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
#[path = "tracks_test.rs"]
mod tracks_test;
