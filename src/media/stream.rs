use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use sample_bus::{MediaUnit, Pool, UnitBuffer};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    media::{
        source::{SourcePacket, UnitSource},
        state::{State, StateCell},
        types::{MAX_BUFFER_SIZE, Pacing, StreamConfig},
    },
};

/// Log a dropped unit at most once every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

/// Source and settings for one stream.
pub struct StreamOptions {
    source: Arc<dyn UnitSource>,
    config: StreamConfig,
}

impl StreamOptions {
    pub fn new(source: Arc<dyn UnitSource>) -> Self {
        Self {
            source,
            config: StreamConfig::default(),
        }
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = Some(size);
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    pub fn push_timeout(mut self, timeout: Duration) -> Self {
        self.config.push_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn pop_timeout(mut self, timeout: Duration) -> Self {
        self.config.pop_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Expected timestamps for a constant-rate source: `start + index * frame`.
///
/// Re-anchors on the wall clock once the expected time and the real one
/// are further apart than `resync_threshold` (zero disables it).
#[derive(Debug)]
pub(crate) struct FramePacer {
    start: SystemTime,
    index: u64,
    frame_duration: Duration,
    resync_threshold: Duration,
}

impl FramePacer {
    pub(crate) fn new(start: SystemTime, frame_duration: Duration, resync_threshold: Duration) -> Self {
        Self {
            start,
            index: 0,
            frame_duration,
            resync_threshold,
        }
    }

    pub(crate) fn next_timestamp(&mut self, now: SystemTime) -> SystemTime {
        let offset = self
            .frame_duration
            .saturating_mul(self.index.min(u32::MAX as u64) as u32);
        let mut expected = self.start + offset;

        let drift = match now.duration_since(expected) {
            Ok(behind) => behind,
            Err(ahead) => ahead.duration(),
        };
        if !self.resync_threshold.is_zero() && drift > self.resync_threshold {
            log::debug!(
                "pacer drifted {:?} after {} frames, re-anchoring",
                drift,
                self.index
            );
            self.start = now;
            self.index = 0;
            expected = now;
        }

        self.index += 1;
        expected
    }

    pub(crate) fn frame_duration(&self) -> Duration {
        self.frame_duration
    }
}

#[derive(Debug, Default)]
pub struct StreamStats {
    produced: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
}

impl StreamStats {
    /// Units pushed into the buffer.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Units recycled because the buffer stayed full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Empty packets and source errors.
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }
}

/// Producer side of a track: pulls ready packets from the upstream source,
/// turns them into [`MediaUnit`]s and pushes them into a bounded buffer.
pub struct Stream {
    key: String,
    source: Arc<dyn UnitSource>,
    buffer: Arc<UnitBuffer<MediaUnit>>,
    config: StreamConfig,
    cancel: CancellationToken,
    state: StateCell,
    stats: StreamStats,
}

impl Stream {
    pub fn new(key: &str, options: StreamOptions, cancel: CancellationToken) -> Result<Self> {
        let StreamOptions { source, config } = options;
        config
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("stream {}: {}", key, e)))?;

        let capacity = match (config.buffer_size, config.pacing, source.frame_rate()) {
            (None, Pacing::Arrival, Some(fps)) if fps >= 1.0 => {
                ((fps * 3.0).round() as usize).min(MAX_BUFFER_SIZE)
            }
            _ => config.buffer_capacity(),
        };
        // every unit is queued, being filled or being forwarded
        let pool = Arc::new(Pool::with_max_idle(capacity.saturating_add(2)));
        let buffer = Arc::new(UnitBuffer::new(capacity, pool, cancel.clone()));
        log::debug!("stream {} created, buffer capacity: {}", key, capacity);

        Ok(Self {
            key: key.to_string(),
            source,
            buffer,
            config,
            cancel,
            state: StateCell::new(),
            stats: StreamStats::default(),
        })
    }

    /// Start the upstream source and spawn the producer loop.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.state.start() {
            log::warn!("stream {} is {:?}, not starting", self.key, self.state());
            return false;
        }
        self.source.start();
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
        log::info!("media source stream started: {}", self.key);
        true
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn buffer(&self) -> &UnitBuffer<MediaUnit> {
        &self.buffer
    }

    /// Next queued unit, waiting at most the configured pop timeout.
    /// `Error::Backpressure` when nothing arrived in time, `Error::Cancelled`
    /// once the stream is stopped.
    pub async fn pop_unit(&self) -> Result<MediaUnit> {
        Ok(self.buffer.pop(self.config.pop_timeout()).await?)
    }

    pub fn put_back(&self, unit: MediaUnit) {
        self.buffer.put_back(unit);
    }

    pub fn set_target_bitrate(&self, bps: i64) {
        self.source.set_target_bitrate(bps);
    }

    async fn run(self: Arc<Self>) {
        let mut pacer = self.config.pacing.frame_duration().map(|frame| {
            FramePacer::new(SystemTime::now(), frame, self.config.resync_threshold())
        });
        let mut ticker = pacer.as_ref().map(|p| {
            let mut ticker = tokio::time::interval(p.frame_duration());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut dropped_since_push: u16 = 0;

        loop {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        break;
                    },
                    _ = ticker.tick() => {},
                }
            }

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => {
                    break;
                },
                polled = self.source.get_unit(self.config.poll_timeout()) => polled,
            };

            match polled {
                Ok(Some(packet)) => {
                    self.push_packet(packet, pacer.as_mut(), &mut dropped_since_push)
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                    log::debug!("stream {}: source error: {:#}", self.key, e);
                }
            }
        }

        self.state.stop();
        let drained = self.buffer.drain();
        log::info!(
            "media source stream finished: {}, produced: {}, dropped: {}, left in buffer: {}",
            self.key,
            self.stats.produced(),
            self.stats.dropped(),
            drained
        );
    }

    async fn push_packet(
        &self,
        packet: SourcePacket,
        pacer: Option<&mut FramePacer>,
        dropped_since_push: &mut u16,
    ) {
        if packet.data.is_empty() {
            self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            let err = Error::InvalidUnit("empty payload".into());
            log::debug!("stream {}: discarding packet: {}", self.key, err);
            self.source.put_back(packet);
            return;
        }

        let mut unit = self.buffer.generate();
        self.packet_to_unit(&packet, &mut unit, pacer, *dropped_since_push);
        self.source.put_back(packet);

        match self.buffer.push(unit, self.config.push_timeout()).await {
            Ok(()) => {
                self.stats.produced.fetch_add(1, Ordering::Relaxed);
                *dropped_since_push = 0;
            }
            Err(rejected) => {
                let (error, unit) = rejected.into_parts();
                self.buffer.put_back(unit);
                if !error.is_backpressure() {
                    return;
                }
                *dropped_since_push = dropped_since_push.saturating_add(1);
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_INTERVAL == 1 {
                    log::debug!(
                        "stream {}: buffer full, dropped {} units ({})",
                        self.key,
                        dropped,
                        error
                    );
                }
            }
        }
    }

    /// Overwrites every field: pooled units carry whatever their last use left.
    fn packet_to_unit(
        &self,
        packet: &SourcePacket,
        unit: &mut MediaUnit,
        pacer: Option<&mut FramePacer>,
        dropped_since_push: u16,
    ) {
        let now = SystemTime::now();
        let (timestamp, frame_duration) = match pacer {
            Some(pacer) => (pacer.next_timestamp(now), Some(pacer.frame_duration())),
            None => (
                now,
                self.source
                    .frame_rate()
                    .filter(|fps| *fps > 0.0)
                    .map(|fps| Duration::from_secs_f64(1.0 / fps)),
            ),
        };

        unit.fill(&packet.data);
        unit.timestamp = timestamp;
        unit.duration = packet
            .duration
            .or(frame_duration)
            .unwrap_or(Duration::ZERO);
        unit.packet_timestamp = packet.pts.unwrap_or(0) as u32;
        unit.prev_dropped_packets = dropped_since_push;
        unit.header_extensions.clear();
        unit.metadata = None;
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
