use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures::{StreamExt, stream::BoxStream};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    media::{
        bitrate::BitrateReceiver,
        feedback,
        source::{Transport, UnitSource},
        state::{State, StateCell},
        stream::{Stream, StreamOptions},
        types::{Codec, Priority, StreamConfig, TrackConfig},
    },
};

/// Log a failed forward at most once every N failures.
const FAILURE_LOG_INTERVAL: u64 = 120;

/// Everything needed to create a [`Track`]. Source and transport are
/// optional at creation; a track missing either cannot be started.
pub struct TrackOptions {
    config: TrackConfig,
    source: Option<Arc<dyn UnitSource>>,
    transport: Option<Arc<dyn Transport>>,
}

impl TrackOptions {
    pub fn new(key: impl Into<String>, codec: Codec) -> Self {
        Self::from_config(TrackConfig::new(key, codec))
    }

    pub fn from_config(config: TrackConfig) -> Self {
        Self {
            config,
            source: None,
            transport: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.config.stream = stream;
        self
    }

    pub fn source(mut self, source: Arc<dyn UnitSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }
}

#[derive(Debug, Default)]
pub struct TrackStats {
    forwarded: AtomicU64,
    failed: AtomicU64,
}

impl TrackStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Consumer side: pops units from its stream and forwards them to the
/// transport. Capacity shares from the allocator are fed back into both the
/// source and the transport.
pub struct Track {
    key: String,
    codec: Codec,
    priority: Priority,
    stream: Option<Arc<Stream>>,
    transport: Option<Arc<dyn Transport>>,
    bitrate: Mutex<Option<BitrateReceiver>>,
    cancel: CancellationToken,
    state: StateCell,
    stats: TrackStats,
}

impl Track {
    pub fn new(options: TrackOptions, cancel: CancellationToken) -> Result<Self> {
        let TrackOptions {
            config,
            source,
            transport,
        } = options;
        config.validate()?;

        if let Some(transport) = &transport {
            transport
                .bind(&config.key, &config.codec)
                .map_err(|e| Error::Bind(format!("{}: {:#}", config.key, e)))?;
        }

        let stream = match source {
            Some(source) => {
                let options = StreamOptions::new(source).config(config.stream.clone());
                Some(Arc::new(Stream::new(
                    &config.key,
                    options,
                    cancel.child_token(),
                )?))
            }
            None => None,
        };

        log::info!(
            "track created: {}, codec: {}, priority: {:?}",
            config.key,
            config.codec,
            config.priority
        );
        Ok(Self {
            key: config.key,
            codec: config.codec,
            priority: config.priority,
            stream,
            transport,
            bitrate: Mutex::new(None),
            cancel,
            state: StateCell::new(),
            stats: TrackStats::default(),
        })
    }

    /// Mailbox the allocator delivers this track's share to. Must be set
    /// before `start`.
    pub(crate) fn attach_bitrate(&self, receiver: BitrateReceiver) {
        *self.bitrate.lock().unwrap_or_else(PoisonError::into_inner) = Some(receiver);
    }

    /// Start the stream and the consumer loop. Without a transport or a
    /// source this only logs.
    pub fn start(self: &Arc<Self>) -> bool {
        let Some(transport) = self.transport.clone() else {
            log::warn!("track {} has no transport, not starting", self.key);
            return false;
        };
        let Some(stream) = self.stream.clone() else {
            log::warn!("track {} has no source, not starting", self.key);
            return false;
        };
        if !self.state.start() {
            log::warn!("track {} is {:?}, not starting", self.key, self.state());
            return false;
        }

        stream.start();
        let bitrate = self
            .bitrate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tokio::spawn(feedback::watch(
            self.key.clone(),
            Arc::clone(&transport),
            self.cancel.clone(),
        ));
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(stream, transport, bitrate).await });
        log::info!("track started: {}", self.key);
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

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn stream(&self) -> Option<&Arc<Stream>> {
        self.stream.as_ref()
    }

    pub fn stats(&self) -> &TrackStats {
        &self.stats
    }

    async fn run(
        self: Arc<Self>,
        stream: Arc<Stream>,
        transport: Arc<dyn Transport>,
        bitrate: Option<BitrateReceiver>,
    ) {
        let mut rates: BoxStream<'static, i64> = match bitrate {
            Some(receiver) => receiver.into_stream().boxed(),
            None => futures::stream::pending().boxed(),
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    break;
                },
                Some(bps) = rates.next() => {
                    stream.set_target_bitrate(bps);
                    transport.set_target_bitrate(bps);
                    log::trace!("track {} target bitrate: {}", self.key, bps);
                },
                popped = stream.pop_unit() => {
                    let unit = match popped {
                        Ok(unit) => unit,
                        Err(Error::Backpressure(_)) => continue,
                        Err(e) => {
                            log::debug!("track {}: stream ended: {}", self.key, e);
                            break;
                        }
                    };

                    match transport.forward(&unit).await {
                        Ok(()) => {
                            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let failed = self.stats.failed.fetch_add(1, Ordering::Relaxed) + 1;
                            if failed % FAILURE_LOG_INTERVAL == 1 {
                                let err = Error::ForwardFailure(format!("{:#}", e));
                                log::warn!("track {}: {} ({} so far)", self.key, err, failed);
                            }
                        }
                    }
                    stream.put_back(unit);
                },
            }
        }

        self.state.stop();
        stream.stop();
        log::info!(
            "track finished: {}, forwarded: {}, failed: {}",
            self.key,
            self.stats.forwarded(),
            self.stats.failed()
        );
    }
}

#[cfg(test)]
#[path = "track_test.rs"]
mod track_test;
